// SPDX-License-Identifier: Apache-2.0 WITH LLVM-exception

//! The identity service facade (SPEC_FULL.md §4.5): composes the rotation
//! service, continuity coordinator, connection registry, and invariant
//! enforcer behind one handle. The facade holds no lock of its own —
//! concurrency safety follows entirely from each constituent's own internal
//! locking, since every field here is an `Arc`.

use std::sync::Arc;
use std::time::SystemTime;

use crate::continuity::{ContinuityCoordinator, ContinuityObserver, ContinuityPolicy};
use crate::error::Result;
use crate::policy::AuthenticationPolicy;
use crate::registry::{
    ConnectionRecord, ConnectionRegistry, EnforcementPolicy, InvariantEnforcer, InvariantStatus, RegistryStats,
};
use crate::rotation::{RotationObserver, RotationPolicy, RotationService};
use crate::source::{CurrentCredential, IdentitySource};
use crate::transport::{ClientHandle, ServerHandle, TransportPort};
use crate::Clock;

/// Snapshot of rotation progress, returned by [`IdentityService::rotation_stats`].
#[derive(Debug, Clone, Copy)]
pub struct RotationStats {
    /// The rotation service's lifecycle state.
    pub state: crate::rotation::SlotState,
    /// When the credential slot was last swapped, if ever.
    pub last_rotation: Option<SystemTime>,
}

/// Composes the rotation service, continuity coordinator, connection
/// registry, and invariant enforcer into the one handle a binary crate
/// embeds (SPEC_FULL.md §4.5). Cheaply `Clone` — every field is an `Arc`.
#[derive(Clone)]
pub struct IdentityService {
    rotation: Arc<RotationService>,
    continuity: Arc<ContinuityCoordinator>,
    registry: Arc<ConnectionRegistry>,
    enforcer: Arc<InvariantEnforcer>,
    transport: Arc<dyn TransportPort>,
    policy: Arc<AuthenticationPolicy>,
    clock: Arc<dyn Clock>,
}

impl IdentityService {
    /// Compose a facade over `source` (the identity source), `transport`
    /// (the adapter-provided transport port), and `policy` (this service's
    /// authentication policy). No background task is running yet; call
    /// [`Self::start`].
    #[must_use]
    pub fn new(
        source: Arc<dyn IdentitySource>,
        transport: Arc<dyn TransportPort>,
        policy: Arc<AuthenticationPolicy>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let rotation = Arc::new(RotationService::new(source, Arc::clone(&clock), RotationPolicy::default()));
        let continuity = Arc::new(ContinuityCoordinator::new(
            Arc::clone(&rotation),
            Arc::clone(&transport),
            Arc::clone(&clock),
        ));
        let registry = Arc::new(ConnectionRegistry::new());
        let enforcer = Arc::new(InvariantEnforcer::new(Arc::clone(&registry), Arc::clone(&rotation), Arc::clone(&clock)));
        Self {
            rotation,
            continuity,
            registry,
            enforcer,
            transport,
            policy,
            clock,
        }
    }

    /// Fetch the initial credential and start the rotation background
    /// tasks. Fatal if the initial fetch fails.
    pub async fn start(&self) -> Result<()> {
        self.rotation.start().await
    }

    /// Signal every background task (rotation, enforcement) to stop.
    pub fn stop(&self) -> Result<()> {
        self.rotation.stop()?;
        self.enforcer.stop();
        Ok(())
    }

    /// Build (but do not start) a server endpoint bound to the current
    /// credential, bundle, and policy.
    pub fn create_server_identity(&self) -> Result<Box<dyn ServerHandle>> {
        let current = self.rotation.get_current(self.clock.now())?;
        self.transport
            .create_server(self.snapshot_certificate(&current)?, Arc::clone(current.trust_bundle()), Arc::clone(&self.policy))
    }

    /// Build (but do not connect) a client bound to the current credential,
    /// bundle, and policy.
    pub fn create_client_identity(&self) -> Result<Box<dyn ClientHandle>> {
        let current = self.rotation.get_current(self.clock.now())?;
        self.transport
            .create_client(self.snapshot_certificate(&current)?, Arc::clone(current.trust_bundle()), Arc::clone(&self.policy))
    }

    fn snapshot_certificate(&self, current: &CurrentCredential) -> Result<Arc<crate::cert::Certificate>> {
        let certificate = current.document().certificate();
        Ok(Arc::new(crate::cert::Certificate::new(
            certificate.leaf().clone(),
            certificate.private_key(),
            certificate.chain().to_vec(),
        )?))
    }

    /// Admit `id` as a connection from `remote`, attaching the current
    /// credential snapshot and running the handshake-time checks.
    pub fn establish_mtls_connection(&self, id: impl Into<String>, remote: &crate::cert::Certificate) -> Result<ConnectionRecord> {
        let current = self.rotation.get_current(self.clock.now())?;
        self.registry.establish(id, remote, &current, &self.policy, self.clock.now())
    }

    /// Fetch a snapshot of connection `id`.
    #[must_use]
    pub fn get_connection(&self, id: &str) -> Option<ConnectionRecord> {
        self.registry.get(id)
    }

    /// A snapshot of every tracked connection.
    #[must_use]
    pub fn list_connections(&self) -> Vec<ConnectionRecord> {
        self.registry.list()
    }

    /// Close connection `id`.
    pub fn close_mtls_connection(&self, id: &str) -> Result<()> {
        self.registry.close(id)
    }

    /// Start the periodic invariant enforcement loop.
    pub fn start_mtls_enforcement(&self) {
        self.enforcer.start();
    }

    /// Replace the enforcement policy.
    pub fn set_enforcement_policy(&self, policy: EnforcementPolicy) {
        self.enforcer.set_policy(policy);
    }

    /// Run the server-side overlap-window rotation procedure for
    /// `connection_id`.
    pub async fn rotate_server_with_continuity(&self, connection_id: &str, old_handle: &dyn ServerHandle) -> Result<()> {
        self.continuity
            .rotate_server_with_continuity(connection_id, old_handle, &self.policy)
            .await
    }

    /// Run the client-side overlap-window rotation procedure for
    /// `connection_id`.
    pub async fn rotate_client_with_continuity(&self, connection_id: &str, old_handle: &dyn ClientHandle) -> Result<()> {
        self.continuity
            .rotate_client_with_continuity(connection_id, old_handle, &self.policy)
            .await
    }

    /// Replace the continuity policy.
    pub fn set_continuity_policy(&self, policy: ContinuityPolicy) {
        self.continuity.set_policy(policy);
    }

    /// Register an observer for continuity-scoped rotation events.
    pub fn add_continuity_observer(&self, observer: Arc<dyn ContinuityObserver>) {
        self.continuity.add_observer(observer);
    }

    /// Register an observer for credential-level rotation events.
    pub fn add_rotation_observer(&self, observer: Arc<dyn RotationObserver>) {
        self.rotation.add_observer(observer);
    }

    /// Per-invariant pass/fail counters and last-failure timestamps.
    #[must_use]
    pub fn invariant_status(&self) -> Vec<InvariantStatus> {
        self.enforcer.status()
    }

    /// Aggregate connection counts by state.
    #[must_use]
    pub fn connection_stats(&self) -> RegistryStats {
        self.registry.stats()
    }

    /// The rotation service's current lifecycle state and last-rotation
    /// timestamp.
    #[must_use]
    pub fn rotation_stats(&self) -> RotationStats {
        RotationStats {
            state: self.rotation.state(),
            last_rotation: self.rotation.last_rotation(),
        }
    }
}
