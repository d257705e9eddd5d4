// SPDX-License-Identifier: Apache-2.0 WITH LLVM-exception

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::{Duration, SystemTime};

use crate::error::{Error, Result};
use crate::registry::connection::{ConnectionRegistry, ConnectionState};
use crate::registry::invariants::{default_invariants, EnforcerContext, Invariant, InvariantOutcome};
use crate::rotation::RotationService;
use crate::source::CurrentCredential;
use crate::Clock;

/// Action taken when an invariant evaluation fails (SPEC_FULL.md §4.4).
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub enum ViolationAction {
    /// Record the violation only.
    Log,
    /// Record the violation and notify observers.
    AlertOnly,
    /// Transition the connection to draining and close it.
    CloseConnection,
}

/// Tunables for [`InvariantEnforcer`], matching SPEC_FULL.md §4.4 defaults.
#[derive(Debug, Clone)]
pub struct EnforcementPolicy {
    /// How often the enforcement loop wakes to evaluate every invariant
    /// against every active connection.
    pub check_interval: Duration,
    /// Action taken on a violation.
    pub action: ViolationAction,
    /// Violations tolerated per connection before `CloseConnection` is
    /// forced irrespective of `action`.
    pub max_violations: u32,
    /// When set, the enforcement loop returns a fatal error to its
    /// supervisor on the first violation instead of applying `action`.
    pub fail_on_violation: bool,
}

impl Default for EnforcementPolicy {
    fn default() -> Self {
        Self {
            check_interval: Duration::from_secs(30),
            action: ViolationAction::Log,
            max_violations: 3,
            fail_on_violation: false,
        }
    }
}

/// Pass/fail counters and last-failure timestamp for one invariant.
#[derive(Debug, Default)]
struct InvariantCounters {
    passes: AtomicU64,
    failures: AtomicU64,
    last_failure: RwLock<Option<SystemTime>>,
}

/// A snapshot of one invariant's counters, returned by
/// [`InvariantEnforcer::status`].
#[derive(Debug, Clone, Copy)]
pub struct InvariantStatus {
    /// The invariant's stable name.
    pub name: &'static str,
    /// Total passing evaluations observed.
    pub passes: u64,
    /// Total failing evaluations observed.
    pub failures: u64,
    /// When this invariant last failed, if ever.
    pub last_failure: Option<SystemTime>,
}

/// Runs the five registered [`Invariant`]s against every active connection
/// on a periodic interval (SPEC_FULL.md §4.4), applying the configured
/// [`ViolationAction`] and tracking per-invariant pass/fail counters.
pub struct InvariantEnforcer {
    registry: Arc<ConnectionRegistry>,
    rotation: Arc<RotationService>,
    clock: Arc<dyn Clock>,
    invariants: Vec<Box<dyn Invariant>>,
    counters: HashMap<&'static str, InvariantCounters>,
    policy: RwLock<EnforcementPolicy>,
    violations_per_connection: RwLock<HashMap<String, u32>>,
    stop_token: crate::source::CancellationToken,
    stop: crate::source::CancellationSource,
}

impl InvariantEnforcer {
    /// Build an enforcer over `registry`, using `rotation` to evaluate the
    /// `certificate_rotation` invariant against the live credential slot.
    #[must_use]
    pub fn new(registry: Arc<ConnectionRegistry>, rotation: Arc<RotationService>, clock: Arc<dyn Clock>) -> Self {
        let invariants = default_invariants();
        let counters = invariants.iter().map(|i| (i.name(), InvariantCounters::default())).collect();
        let (stop_token, stop) = crate::source::CancellationToken::new_pair();
        Self {
            registry,
            rotation,
            clock,
            invariants,
            counters,
            policy: RwLock::new(EnforcementPolicy::default()),
            violations_per_connection: RwLock::new(HashMap::new()),
            stop_token,
            stop,
        }
    }

    /// Replace the enforcement policy.
    pub fn set_policy(&self, policy: EnforcementPolicy) {
        *self.policy.write().unwrap_or_else(|e| e.into_inner()) = policy;
    }

    /// Per-invariant pass/fail counts and last-failure time, in evaluation
    /// order.
    #[must_use]
    pub fn status(&self) -> Vec<InvariantStatus> {
        self.invariants
            .iter()
            .map(|invariant| {
                let name = invariant.name();
                let counters = &self.counters[name];
                InvariantStatus {
                    name,
                    passes: counters.passes.load(Ordering::Relaxed),
                    failures: counters.failures.load(Ordering::Relaxed),
                    last_failure: *counters.last_failure.read().unwrap_or_else(|e| e.into_inner()),
                }
            })
            .collect()
    }

    /// Spawn the periodic enforcement loop.
    pub fn start(self: &Arc<Self>) {
        let enforcer = Arc::clone(self);
        tokio::spawn(async move { enforcer.run().await });
    }

    /// Signal the enforcement loop to stop at its next tick.
    pub fn stop(&self) {
        self.stop.cancel();
    }

    async fn run(&self) {
        let interval = self.policy.read().unwrap_or_else(|e| e.into_inner()).check_interval;
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                () = self.stop_token.cancelled() => return,
                _ = ticker.tick() => {}
            }
            if let Err(error) = self.evaluate_once() {
                tracing::error!(%error, "invariant enforcement loop exiting after a fatal violation");
                return;
            }
        }
    }

    /// Evaluate every registered invariant against every active connection
    /// once. Returns `Err` only when `fail_on_violation` is set and a
    /// violation occurred, matching spec.md §7's strict-mode behavior.
    pub fn evaluate_once(&self) -> Result<()> {
        let policy = self.policy.read().unwrap_or_else(|e| e.into_inner()).clone();
        let now = self.clock.now();
        let current_credential: Option<Arc<CurrentCredential>> = self.rotation.get_current(now).ok();
        let ctx = EnforcerContext {
            current_credential: current_credential.as_deref(),
            expected_rotation_interval: Duration::from_secs(5 * 60),
            now,
        };

        for record in self.registry.active_records() {
            if record.state() == ConnectionState::Closed {
                continue;
            }
            for invariant in &self.invariants {
                let outcome = invariant.check(&record, &ctx);
                self.record_outcome(invariant.name(), &outcome, now);

                if let InvariantOutcome::Fail { detail } = outcome {
                    tracing::warn!(
                        connection_id = record.id(),
                        invariant = invariant.name(),
                        detail,
                        "invariant violation"
                    );

                    if policy.fail_on_violation {
                        return Err(Error::InvariantViolation {
                            invariant: invariant.name(),
                            connection_id: record.id().to_owned(),
                        });
                    }

                    let exceeded = self.bump_violation_count(record.id(), policy.max_violations);
                    self.apply_action(record.id(), policy.action, exceeded);
                }
            }
        }
        Ok(())
    }

    fn record_outcome(&self, name: &'static str, outcome: &InvariantOutcome, now: SystemTime) {
        let counters = &self.counters[name];
        match outcome {
            InvariantOutcome::Pass => {
                counters.passes.fetch_add(1, Ordering::Relaxed);
            }
            InvariantOutcome::Fail { .. } => {
                counters.failures.fetch_add(1, Ordering::Relaxed);
                *counters.last_failure.write().unwrap_or_else(|e| e.into_inner()) = Some(now);
            }
        }
    }

    fn bump_violation_count(&self, connection_id: &str, max_violations: u32) -> bool {
        let mut counts = self.violations_per_connection.write().unwrap_or_else(|e| e.into_inner());
        let count = counts.entry(connection_id.to_owned()).or_insert(0);
        *count += 1;
        *count >= max_violations
    }

    fn apply_action(&self, connection_id: &str, action: ViolationAction, exceeded_max: bool) {
        let close = exceeded_max || action == ViolationAction::CloseConnection;
        if !close {
            // Log and AlertOnly both record the violation (already done in
            // evaluate_once via the counters and tracing::warn!); AlertOnly
            // additionally notifies subscribers, which in this crate's
            // scope means the structured log event above, since no
            // separate observer channel is otherwise named for the
            // enforcer.
            return;
        }
        if self.registry.mark_draining(connection_id).is_ok() {
            let _ = self.registry.close(connection_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cert::{Certificate, TrustBundle};
    use crate::clock::ManualClock;
    use crate::domain::{ServiceName, TrustDomain};
    use crate::identity_document::{IdentityDocument, ServiceIdentity};
    use crate::policy::AuthenticationPolicy;
    use crate::rotation::RotationPolicy;
    use crate::source::InMemoryIdentitySource;
    use crate::test_support::{mid_validity, new_ca, CaFixture};

    fn setup() -> (Arc<ConnectionRegistry>, Arc<RotationService>, Arc<ManualClock>, CaFixture) {
        let clock = Arc::new(ManualClock::new(mid_validity()));
        let source = Arc::new(InMemoryIdentitySource::new());

        let ca = new_ca();
        let (leaf, key) = ca.issue_leaf("spiffe://prod.company.com/api");
        let cert = Certificate::new(leaf, key, vec![]).unwrap();
        let doc = Arc::new(IdentityDocument::new(cert, mid_validity()).unwrap());
        let bundle = Arc::new(TrustBundle::new(doc.trust_domain().clone(), vec![ca.der()], mid_validity(), true).unwrap());
        source.push(CurrentCredential::new(doc, bundle));

        let rotation = Arc::new(RotationService::new(source, clock.clone(), RotationPolicy::default()));
        (Arc::new(ConnectionRegistry::new()), rotation, clock, ca)
    }

    #[tokio::test]
    async fn evaluate_once_passes_for_a_healthy_connection() {
        let (registry, rotation, clock, ca) = setup();
        rotation.start().await.unwrap();

        let local = rotation.get_current(clock.now()).unwrap();
        let local_identity = ServiceIdentity::new(ServiceName::new("api").unwrap(), local.document().identity_namespace().clone());
        let policy = AuthenticationPolicy::new(local_identity, TrustDomain::new("prod.company.com").unwrap());
        let (remote_leaf, remote_key) = ca.issue_leaf("spiffe://prod.company.com/auth");
        let remote = Certificate::new(remote_leaf, remote_key, vec![]).unwrap();
        registry.establish("c1", &remote, &local, &policy, clock.now()).unwrap();

        let enforcer = InvariantEnforcer::new(registry.clone(), rotation, clock);
        enforcer.evaluate_once().unwrap();

        let statuses = enforcer.status();
        let trust_domain_status = statuses.iter().find(|s| s.name == "trust_domain_validation").unwrap();
        assert_eq!(trust_domain_status.passes, 1);
        assert_eq!(trust_domain_status.failures, 0);
    }

    #[tokio::test]
    async fn max_violations_forces_close_regardless_of_log_action() {
        let (registry, rotation, clock, ca) = setup();
        rotation.start().await.unwrap();

        let local = rotation.get_current(clock.now()).unwrap();
        let local_identity = ServiceIdentity::new(ServiceName::new("api").unwrap(), local.document().identity_namespace().clone());
        let policy = AuthenticationPolicy::new(local_identity, TrustDomain::new("prod.company.com").unwrap());
        let (remote_leaf, remote_key) = ca.issue_leaf("spiffe://prod.company.com/auth");
        let remote = Certificate::new(remote_leaf, remote_key, vec![]).unwrap();
        registry.establish("c1", &remote, &local, &policy, clock.now()).unwrap();

        let enforcer = InvariantEnforcer::new(registry.clone(), rotation, clock.clone());
        enforcer.set_policy(EnforcementPolicy {
            check_interval: Duration::from_secs(30),
            action: ViolationAction::Log,
            max_violations: 1,
            fail_on_violation: false,
        });

        // Move well past the certificate's validity window so every
        // invariant evaluation for "c1" fails.
        clock.advance(Duration::from_secs(3600 * 24));
        enforcer.evaluate_once().unwrap();

        assert_eq!(registry.get("c1").unwrap().state(), ConnectionState::Closed);
    }

    #[tokio::test]
    async fn fail_on_violation_returns_an_error_instead_of_closing() {
        let (registry, rotation, clock, ca) = setup();
        rotation.start().await.unwrap();

        let local = rotation.get_current(clock.now()).unwrap();
        let local_identity = ServiceIdentity::new(ServiceName::new("api").unwrap(), local.document().identity_namespace().clone());
        let policy = AuthenticationPolicy::new(local_identity, TrustDomain::new("prod.company.com").unwrap());
        let (remote_leaf, remote_key) = ca.issue_leaf("spiffe://prod.company.com/auth");
        let remote = Certificate::new(remote_leaf, remote_key, vec![]).unwrap();
        registry.establish("c1", &remote, &local, &policy, clock.now()).unwrap();

        let enforcer = InvariantEnforcer::new(registry.clone(), rotation, clock.clone());
        enforcer.set_policy(EnforcementPolicy {
            check_interval: Duration::from_secs(30),
            action: ViolationAction::Log,
            max_violations: 100,
            fail_on_violation: true,
        });

        clock.advance(Duration::from_secs(3600 * 24));
        assert!(enforcer.evaluate_once().is_err());
        assert_eq!(registry.get("c1").unwrap().state(), ConnectionState::Active);
    }
}
