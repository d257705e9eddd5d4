// SPDX-License-Identifier: Apache-2.0 WITH LLVM-exception

use std::sync::Arc;
use std::time::{Duration, SystemTime};

use rand::Rng;
use tokio::sync::Mutex as AsyncMutex;
use tokio_stream::StreamExt;

use crate::error::{Error, Result};
use crate::rotation::observer::{dispatch_completed, dispatch_failed, dispatch_started, RotationObserver};
use crate::rotation::slot::{CredentialSlot, SlotState};
use crate::source::{CurrentCredential, IdentitySource, RequestContext};
use crate::Clock;

/// Tunables for [`RotationService`], matching SPEC_FULL.md §4.2 defaults.
#[derive(Debug, Clone)]
pub struct RotationPolicy {
    /// How often the expiry monitor wakes to check the current credential.
    pub check_interval: Duration,
    /// Rotate once the credential is within this long of expiry; the
    /// effective threshold is `min(rotation_threshold, lifetime / 3)`.
    pub rotation_threshold: Duration,
    /// Upper bound of the uniform jitter applied before rotating, to avoid
    /// a thundering herd across many processes sharing an expiry.
    pub max_jitter: Duration,
}

impl Default for RotationPolicy {
    fn default() -> Self {
        Self {
            check_interval: Duration::from_secs(60),
            rotation_threshold: Duration::from_secs(5 * 60),
            max_jitter: Duration::from_secs(30),
        }
    }
}

/// Ensures the process always holds a valid, non-expiring credential, and
/// notifies subscribers on every change (SPEC_FULL.md §4.2).
pub struct RotationService {
    slot: Arc<CredentialSlot>,
    source: Arc<dyn IdentitySource>,
    clock: Arc<dyn Clock>,
    policy: RotationPolicy,
    observers: std::sync::RwLock<Vec<Arc<dyn RotationObserver>>>,
    // Serializes the capture-refresh-validate-swap sequence; held only
    // across the swap step per spec, but guarding the whole rotation here
    // is simpler and no contended path needs finer granularity than "one
    // rotation attempt at a time".
    rotation_lock: AsyncMutex<()>,
    stop: crate::source::CancellationSource,
    stop_token: crate::source::CancellationToken,
}

impl RotationService {
    /// Build a service over `source`, with no credential installed and no
    /// background tasks running yet.
    #[must_use]
    pub fn new(source: Arc<dyn IdentitySource>, clock: Arc<dyn Clock>, policy: RotationPolicy) -> Self {
        let (stop_token, stop) = crate::source::CancellationToken::new_pair();
        Self {
            slot: Arc::new(CredentialSlot::new()),
            source,
            clock,
            policy,
            observers: std::sync::RwLock::new(Vec::new()),
            rotation_lock: AsyncMutex::new(()),
            stop,
            stop_token,
        }
    }

    /// Register an observer. Observers registered after `start()` still
    /// receive every subsequent rotation.
    pub fn add_observer(&self, observer: Arc<dyn RotationObserver>) {
        self.observers
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push(observer);
    }

    /// The current credential, or `Error::Unavailable` if none has ever
    /// been installed, or `Error::Expired` if the held one is past
    /// `NotAfter`.
    pub fn get_current(&self, now: SystemTime) -> Result<Arc<CurrentCredential>> {
        let current = self
            .slot
            .current()
            .ok_or_else(|| Error::unavailable("no credential has been installed yet"))?;
        if current.document().is_expired_at(now) {
            return Err(Error::Expired);
        }
        Ok(current)
    }

    /// `Uninitialized -> Running`: fetch the initial credential
    /// synchronously (fatal if it fails), then spawn the expiry monitor
    /// and change watcher tasks.
    pub async fn start(self: &Arc<Self>) -> Result<()> {
        self.slot.mark_started()?;

        let ctx = RequestContext::background();
        self.source.refresh(&ctx).await?;
        let initial = self.source.get_current(&ctx).await?;
        self.slot.swap(initial, self.clock.now());

        let expiry_monitor = Arc::clone(self);
        tokio::spawn(async move { expiry_monitor.run_expiry_monitor().await });

        let change_watcher = Arc::clone(self);
        tokio::spawn(async move { change_watcher.run_change_watcher().await });

        Ok(())
    }

    /// `Running -> Stopped`: signal both background tasks and return once
    /// the transition is recorded. Tasks observe the signal at their next
    /// suspension point and exit.
    pub fn stop(&self) -> Result<()> {
        self.slot.mark_stopped()?;
        self.stop.cancel();
        Ok(())
    }

    /// Perform the seven-step rotation procedure synchronously, bypassing
    /// the expiry monitor's schedule.
    pub async fn force_rotation(&self) -> Result<()> {
        self.rotate("forced").await
    }

    async fn run_expiry_monitor(&self) {
        let mut ticker = tokio::time::interval(self.policy.check_interval);
        loop {
            tokio::select! {
                () = self.stop_token.cancelled() => return,
                _ = ticker.tick() => {}
            }

            let Some(current) = self.slot.current() else {
                continue;
            };
            let now = self.clock.now();
            let lifetime = current
                .document()
                .certificate()
                .not_after()
                .duration_since(current.document().certificate().not_before())
                .unwrap_or(Duration::ZERO);
            let threshold = self.policy.rotation_threshold.min(lifetime / 3);
            if !current.document().is_expiring_within(threshold, now) {
                continue;
            }

            let jitter_secs = rand::thread_rng().gen_range(0..=self.policy.max_jitter.as_secs().max(1));
            self.clock.sleep(Duration::from_secs(jitter_secs)).await;

            if let Err(error) = self.rotate("expiry-monitor").await {
                tracing::warn!(%error, "scheduled rotation failed; retaining current credential");
            }
        }
    }

    async fn run_change_watcher(&self) {
        let mut changes = self.source.watch_changes();
        loop {
            tokio::select! {
                () = self.stop_token.cancelled() => return,
                next = changes.next() => {
                    let Some(document) = next else { return };
                    if let Err(error) = self.adopt_external_update(document).await {
                        tracing::warn!(%error, "externally-pushed credential update was rejected");
                    }
                }
            }
        }
    }

    async fn adopt_external_update(&self, document: Arc<crate::IdentityDocument>) -> Result<()> {
        let _guard = self.rotation_lock.lock().await;
        let old = self.slot.current();

        if let Some(old) = &old {
            validate_monotonic(old.document(), &document)?;
        }
        let bundle = old
            .as_ref()
            .map(|o| Arc::clone(o.trust_bundle()))
            .ok_or_else(|| Error::unavailable("no trust bundle available to validate external update"))?;
        document.validate_against_bundle(&bundle, self.clock.now())?;

        let new_credential = CurrentCredential::new(Arc::clone(&document), bundle);
        self.slot.swap(new_credential, self.clock.now());

        let observers = self.snapshot_observers();
        dispatch_completed(&observers, old.map(|o| Arc::clone(o.document())), document);
        Ok(())
    }

    async fn rotate(&self, reason: &'static str) -> Result<()> {
        let _guard = self.rotation_lock.lock().await;
        let observers = self.snapshot_observers();
        dispatch_started(&observers, reason);

        match self.fetch_validated_candidate().await {
            Ok((old, new)) => {
                self.commit_candidate(old, new, &observers);
                Ok(())
            }
            Err(error) => {
                dispatch_failed(&observers, error.clone());
                Err(error)
            }
        }
    }

    /// Steps 1-5 of SPEC_FULL.md §4.2's rotation procedure: capture `old`,
    /// refresh the source, fetch `new`, and validate it (against its own
    /// bundle and for strict monotonicity over `old`) — without swapping
    /// it into the slot or notifying observers.
    ///
    /// The [`crate::continuity::ContinuityCoordinator`] uses this directly
    /// so it can run the overlap-window transport procedure between
    /// validation and commit; [`Self::rotate`] calls it for the simple
    /// (non-continuity) path.
    pub(crate) async fn fetch_validated_candidate(
        &self,
    ) -> Result<(Option<Arc<CurrentCredential>>, CurrentCredential)> {
        let old = self.slot.current();
        let ctx = RequestContext::background();

        self.source.refresh(&ctx).await?;
        let new = self.source.get_current(&ctx).await?;
        new.document()
            .validate_against_bundle(new.trust_bundle(), self.clock.now())?;
        if let Some(old) = &old {
            validate_monotonic(old.document(), new.document())?;
        }
        Ok((old, new))
    }

    /// Steps 6-7: swap `new` into the slot and dispatch
    /// `on_rotation_completed` to `observers`.
    pub(crate) fn commit_candidate(
        &self,
        old: Option<Arc<CurrentCredential>>,
        new: CurrentCredential,
        observers: &[Arc<dyn RotationObserver>],
    ) {
        self.slot.swap(new.clone(), self.clock.now());
        dispatch_completed(observers, old.map(|o| Arc::clone(o.document())), Arc::clone(new.document()));
    }

    /// Dispatch `on_rotation_failed` to `observers` without touching the
    /// slot, for a continuity procedure that aborts after staging a
    /// candidate.
    pub(crate) fn report_failed_candidate(&self, observers: &[Arc<dyn RotationObserver>], error: Error) {
        dispatch_failed(observers, error);
    }

    /// Acquire the rotation-serializing lock and a snapshot of the
    /// registered observers, for callers (the continuity coordinator) that
    /// need to run their own multi-step procedure under the same mutual
    /// exclusion `rotate()` uses.
    pub(crate) async fn lock_for_rotation(&self) -> (tokio::sync::MutexGuard<'_, ()>, Vec<Arc<dyn RotationObserver>>) {
        let guard = self.rotation_lock.lock().await;
        let observers = self.snapshot_observers();
        (guard, observers)
    }

    fn snapshot_observers(&self) -> Vec<Arc<dyn RotationObserver>> {
        self.observers
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// The lifecycle state of this service's credential slot.
    #[must_use]
    pub fn state(&self) -> SlotState {
        self.slot.state()
    }

    /// When the credential was last swapped, if ever.
    #[must_use]
    pub fn last_rotation(&self) -> Option<SystemTime> {
        self.slot.last_rotation()
    }
}

/// Require `new` strictly newer than `old`: later `NotBefore`, or equal
/// `NotBefore` and later `NotAfter` (SPEC_FULL.md §4.2 step 5 / Testable
/// Property 5).
fn validate_monotonic(old: &crate::IdentityDocument, new: &crate::IdentityDocument) -> Result<()> {
    let old_cert = old.certificate();
    let new_cert = new.certificate();
    let monotonic = new_cert.not_before() > old_cert.not_before()
        || (new_cert.not_before() == old_cert.not_before() && new_cert.not_after() > old_cert.not_after());
    if monotonic {
        Ok(())
    } else {
        Err(Error::conflict(
            "rotation candidate is not strictly newer than the current credential",
        ))
    }
}
