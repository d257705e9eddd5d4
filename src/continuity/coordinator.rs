// SPDX-License-Identifier: Apache-2.0 WITH LLVM-exception

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use tokio::sync::Semaphore;

use crate::cert::Certificate;
use crate::continuity::policy::ContinuityPolicy;
use crate::error::{Error, Result};
use crate::policy::AuthenticationPolicy;
use crate::rotation::RotationService;
use crate::source::CurrentCredential;
use crate::transport::{ClientHandle, ServerHandle, TransportPort};
use crate::Clock;

/// Subscriber to continuity-scoped rotation events, keyed by connection id
/// (distinct from [`crate::rotation::RotationObserver`], which is
/// credential-scoped and carries no connection identity).
pub trait ContinuityObserver: Send + Sync {
    /// A continuity rotation began for `connection_id`.
    fn on_rotation_started(&self, connection_id: &str, reason: &str) {
        let _ = (connection_id, reason);
    }

    /// A continuity rotation for `connection_id` completed successfully.
    fn on_rotation_completed(&self, connection_id: &str) {
        let _ = connection_id;
    }

    /// A continuity rotation for `connection_id` failed and was rolled
    /// back.
    fn on_rotation_failed(&self, connection_id: &str, error: &Error) {
        let _ = (connection_id, error);
    }
}

fn dispatch<F>(observers: &[Arc<dyn ContinuityObserver>], call: F)
where
    F: Fn(&dyn ContinuityObserver) + Send + Sync + Clone + 'static,
{
    for observer in observers.iter().cloned() {
        let call = call.clone();
        tokio::spawn(async move {
            let outcome = std::panic::catch_unwind(AssertUnwindSafe(|| call(observer.as_ref())));
            if outcome.is_err() {
                tracing::error!("continuity observer panicked");
            }
        });
    }
}

fn dispatch_started(observers: &[Arc<dyn ContinuityObserver>], connection_id: &str, reason: &str) {
    let connection_id = connection_id.to_owned();
    let reason = reason.to_owned();
    dispatch(observers, move |o| o.on_rotation_started(&connection_id, &reason));
}

fn dispatch_completed(observers: &[Arc<dyn ContinuityObserver>], connection_id: &str) {
    let connection_id = connection_id.to_owned();
    dispatch(observers, move |o| o.on_rotation_completed(&connection_id));
}

fn dispatch_failed(observers: &[Arc<dyn ContinuityObserver>], connection_id: &str, error: Error) {
    let connection_id = connection_id.to_owned();
    dispatch(observers, move |o| o.on_rotation_failed(&connection_id, &error));
}

/// Rebuild an owned [`Certificate`] from a borrowed one, for handoff across
/// the [`crate::transport::TransportPort`] boundary, which takes ownership
/// via `Arc` rather than borrowing (`Certificate` intentionally has no
/// `Clone` impl, since cloning a live private key casually is worth a
/// speed bump).
fn clone_certificate(certificate: &Certificate) -> Result<Certificate> {
    Certificate::new(certificate.leaf().clone(), certificate.private_key(), certificate.chain().to_vec())
}

fn transport_certificate(credential: &CurrentCredential) -> Result<Arc<Certificate>> {
    Ok(Arc::new(clone_certificate(credential.document().certificate())?))
}

/// Overlap-window scheduling of server/client rotations (SPEC_FULL.md
/// §4.3): wraps a [`RotationService`] and a [`TransportPort`], enforcing
/// `max_concurrent_rotations` via a semaphore and running the seven-step
/// procedure around the rotation service's validated-candidate staging.
pub struct ContinuityCoordinator {
    rotation: Arc<RotationService>,
    transport: Arc<dyn TransportPort>,
    clock: Arc<dyn Clock>,
    policy: std::sync::RwLock<ContinuityPolicy>,
    admission: Semaphore,
    observers: std::sync::RwLock<Vec<Arc<dyn ContinuityObserver>>>,
}

impl ContinuityCoordinator {
    /// Build a coordinator around `rotation`, using `transport` to build
    /// the new listener/connector in step 3.
    #[must_use]
    pub fn new(rotation: Arc<RotationService>, transport: Arc<dyn TransportPort>, clock: Arc<dyn Clock>) -> Self {
        let policy = ContinuityPolicy::default();
        let admission = Semaphore::new(policy.max_concurrent_rotations);
        Self {
            rotation,
            transport,
            clock,
            policy: std::sync::RwLock::new(policy),
            admission,
            observers: std::sync::RwLock::new(Vec::new()),
        }
    }

    /// Replace the continuity policy. Does not affect rotations already
    /// holding an admission permit.
    pub fn set_policy(&self, policy: ContinuityPolicy) {
        *self.policy.write().unwrap_or_else(|e| e.into_inner()) = policy;
    }

    /// Register an observer for `on_rotation_started/completed/failed`.
    pub fn add_observer(&self, observer: Arc<dyn ContinuityObserver>) {
        self.observers
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push(observer);
    }

    fn policy_snapshot(&self) -> ContinuityPolicy {
        self.policy.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn observers_snapshot(&self) -> Vec<Arc<dyn ContinuityObserver>> {
        self.observers.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Run the server-side overlap-window rotation procedure for
    /// `connection_id`, bound to the endpoint previously built via
    /// `old_handle`, authenticating peers under `auth_policy`.
    pub async fn rotate_server_with_continuity(
        &self,
        connection_id: &str,
        old_handle: &dyn ServerHandle,
        auth_policy: &Arc<AuthenticationPolicy>,
    ) -> Result<()> {
        let _permit = self
            .admission
            .acquire()
            .await
            .map_err(|_| Error::internal("continuity admission semaphore was closed"))?;

        let observers = self.observers_snapshot();
        dispatch_started(&observers, connection_id, "server-rotation");

        let result = self.run_server_procedure(old_handle, auth_policy).await;

        match &result {
            Ok(()) => dispatch_completed(&observers, connection_id),
            Err(error) => dispatch_failed(&observers, connection_id, error.clone()),
        }
        result
    }

    async fn run_server_procedure(
        &self,
        old_handle: &dyn ServerHandle,
        auth_policy: &Arc<AuthenticationPolicy>,
    ) -> Result<()> {
        let policy = self.policy_snapshot();
        let (_guard, rotation_observers) = self.rotation.lock_for_rotation().await;

        // Step 2: pre-rotation prep — stage and validate the candidate.
        let (old, candidate) = match self.rotation.fetch_validated_candidate().await {
            Ok(pair) => pair,
            Err(error) => {
                self.rotation.report_failed_candidate(&rotation_observers, error.clone());
                return Err(error);
            }
        };
        self.clock.sleep(policy.pre_prep_time).await;

        // Step 3: start the new endpoint bound to the new credential.
        let new_server = match transport_certificate(&candidate)
            .and_then(|cert| self.transport.create_server(cert, Arc::clone(candidate.trust_bundle()), Arc::clone(auth_policy)))
        {
            Ok(server) => server,
            Err(error) => {
                self.rotation.report_failed_candidate(&rotation_observers, error.clone());
                return Err(error);
            }
        };
        if let Err(error) = new_server.start().await {
            self.rotation.report_failed_candidate(&rotation_observers, error.clone());
            return Err(error);
        }

        // Step 4: both endpoints accept traffic for the overlap window.
        // There is no explicit "drain" verb on ServerHandle; the adapter's
        // own accept loop is expected to stop routing new work to the old
        // endpoint once this window starts.
        self.clock.sleep(policy.overlap_duration).await;

        // Step 5: close the old endpoint after the graceful shutdown
        // window.
        self.clock.sleep(policy.graceful_shutdown_timeout).await;
        if let Err(error) = old_handle.stop().await {
            tracing::warn!(%error, "old endpoint did not shut down cleanly");
        }

        // Step 6: post-rotation validation window; roll back on failure.
        self.clock.sleep(policy.post_validation_time).await;
        if let Err(error) = candidate
            .document()
            .validate_against_bundle(candidate.trust_bundle(), self.clock.now())
        {
            if let Err(stop_err) = new_server.stop().await {
                tracing::warn!(%stop_err, "failed to roll back new endpoint after failed post-validation");
            }
            self.rotation.report_failed_candidate(&rotation_observers, error.clone());
            return Err(error);
        }

        // Step 7: commit and emit RotationCompleted.
        self.rotation.commit_candidate(old, candidate, &rotation_observers);
        Ok(())
    }

    /// Run the client-side overlap-window rotation procedure: open a new
    /// connection with the new credential, drain the old one, then close
    /// it.
    pub async fn rotate_client_with_continuity(
        &self,
        connection_id: &str,
        old_handle: &dyn ClientHandle,
        auth_policy: &Arc<AuthenticationPolicy>,
    ) -> Result<()> {
        let _permit = self
            .admission
            .acquire()
            .await
            .map_err(|_| Error::internal("continuity admission semaphore was closed"))?;

        let observers = self.observers_snapshot();
        dispatch_started(&observers, connection_id, "client-rotation");

        let result = self.run_client_procedure(old_handle, auth_policy).await;

        match &result {
            Ok(()) => dispatch_completed(&observers, connection_id),
            Err(error) => dispatch_failed(&observers, connection_id, error.clone()),
        }
        result
    }

    async fn run_client_procedure(
        &self,
        old_handle: &dyn ClientHandle,
        auth_policy: &Arc<AuthenticationPolicy>,
    ) -> Result<()> {
        let policy = self.policy_snapshot();
        let (_guard, rotation_observers) = self.rotation.lock_for_rotation().await;

        let (old, candidate) = match self.rotation.fetch_validated_candidate().await {
            Ok(pair) => pair,
            Err(error) => {
                self.rotation.report_failed_candidate(&rotation_observers, error.clone());
                return Err(error);
            }
        };

        let new_client = match transport_certificate(&candidate)
            .and_then(|cert| self.transport.create_client(cert, Arc::clone(candidate.trust_bundle()), Arc::clone(auth_policy)))
        {
            Ok(client) => client,
            Err(error) => {
                self.rotation.report_failed_candidate(&rotation_observers, error.clone());
                return Err(error);
            }
        };
        if let Err(error) = new_client.connect().await {
            self.rotation.report_failed_candidate(&rotation_observers, error.clone());
            return Err(error);
        }

        self.clock.sleep(policy.overlap_duration).await;
        if let Err(error) = old_handle.close().await {
            tracing::warn!(%error, "old client connection did not close cleanly");
        }

        self.rotation.commit_candidate(old, candidate, &rotation_observers);
        Ok(())
    }
}
