// SPDX-License-Identifier: Apache-2.0 WITH LLVM-exception

use std::collections::HashMap;
use std::sync::Arc;
use std::time::SystemTime;

use crate::cert::{Certificate, TrustBundle};
use crate::domain::IdentityNamespace;
use crate::error::{Error, Result};
use crate::identity_document::identity_namespace_from_certificate;
use crate::policy::{AuthenticationPolicy, PeerRole};
use crate::source::CurrentCredential;

/// Lifecycle state of a tracked mTLS connection (SPEC_FULL.md §4.4).
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub enum ConnectionState {
    /// The handshake-time checks are in progress.
    Handshaking,
    /// The connection passed its handshake checks and is serving traffic.
    Active,
    /// A rotation or enforcement action is winding the connection down.
    Draining,
    /// The connection has been closed and is retained only for `Stats`.
    Closed,
}

/// A live (or recently-closed) mTLS connection, as admitted by
/// [`ConnectionRegistry::establish`]: the credential snapshot captured at
/// admission time, not a live reference into the rotation slot.
#[derive(Clone)]
pub struct ConnectionRecord {
    id: String,
    local_identity: IdentityNamespace,
    remote_identity: IdentityNamespace,
    established_at: SystemTime,
    state: ConnectionState,
    cert_snapshot: Arc<Certificate>,
    bundle_snapshot: Arc<TrustBundle>,
}

impl ConnectionRecord {
    /// The opaque connection id.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// This side's identity at admission time.
    #[must_use]
    pub const fn local_identity(&self) -> &IdentityNamespace {
        &self.local_identity
    }

    /// The peer's identity, as recorded at admission time.
    #[must_use]
    pub const fn remote_identity(&self) -> &IdentityNamespace {
        &self.remote_identity
    }

    /// When `establish` admitted this connection.
    #[must_use]
    pub const fn established_at(&self) -> SystemTime {
        self.established_at
    }

    /// Current lifecycle state.
    #[must_use]
    pub const fn state(&self) -> ConnectionState {
        self.state
    }

    /// The local credential snapshot captured at admission, used by the
    /// enforcer so a later rotation cannot retroactively invalidate an
    /// already-established connection.
    #[must_use]
    pub const fn cert_snapshot(&self) -> &Arc<Certificate> {
        &self.cert_snapshot
    }

    /// The trust bundle snapshot captured at admission.
    #[must_use]
    pub const fn bundle_snapshot(&self) -> &Arc<TrustBundle> {
        &self.bundle_snapshot
    }
}

/// Aggregate counts returned by [`ConnectionRegistry::stats`].
#[derive(Debug, Clone, Copy, Default, Eq, PartialEq)]
pub struct RegistryStats {
    /// Connections currently `Handshaking`.
    pub handshaking: usize,
    /// Connections currently `Active`.
    pub active: usize,
    /// Connections currently `Draining`.
    pub draining: usize,
    /// Connections currently `Closed` (retained for inspection).
    pub closed: usize,
}

impl RegistryStats {
    /// Total tracked records across every state.
    #[must_use]
    pub const fn total(&self) -> usize {
        self.handshaking + self.active + self.draining + self.closed
    }
}

/// Tracks live mTLS connections (SPEC_FULL.md §4.4): a
/// `RwLock<HashMap<ConnectionId, ConnectionRecord>>`, guarded per spec.md
/// §5's shared-resource policy (readers for `get`/`list`, writer for
/// `establish`/`close`).
#[derive(Default)]
pub struct ConnectionRegistry {
    connections: std::sync::RwLock<HashMap<String, ConnectionRecord>>,
}

impl ConnectionRegistry {
    /// An empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Admit `id` as a connection from `remote`, the peer's presented
    /// certificate, snapshotting `local` (the current credential) and
    /// running the five handshake-time checks in order. The first failing
    /// check's description names the returned error.
    pub fn establish(
        &self,
        id: impl Into<String>,
        remote: &Certificate,
        local: &CurrentCredential,
        policy: &AuthenticationPolicy,
        now: SystemTime,
    ) -> Result<ConnectionRecord> {
        let id = id.into();

        // Check 1: local certificate is within validity.
        if !local.document().certificate().is_within_validity(now) {
            return Err(Error::validation("local certificate is not within its validity window"));
        }

        // Check 2: remote certificate chain verifies against the current
        // trust bundle.
        local.trust_bundle().validate_chain(remote, now)?;

        // Check 3: remote SPIFFE URI is present and parsable.
        let remote_identity = identity_namespace_from_certificate(remote)?;

        // Checks 4 and 5: policy admits the remote identity, falling back
        // to a trust-domain comparison when no explicit allow-list is
        // configured — exactly AuthenticationPolicy::is_authorized's
        // contract.
        policy.is_authorized(&remote_identity, PeerRole::Client)?;

        let record = ConnectionRecord {
            id: id.clone(),
            local_identity: policy.local_identity().namespace().clone(),
            remote_identity,
            established_at: now,
            state: ConnectionState::Active,
            cert_snapshot: Arc::new(clone_certificate(local.document().certificate())?),
            bundle_snapshot: Arc::clone(local.trust_bundle()),
        };

        self.connections
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(id, record.clone());
        Ok(record)
    }

    /// Fetch a snapshot of the record for `id`.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<ConnectionRecord> {
        self.connections
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(id)
            .cloned()
    }

    /// A snapshot of every tracked record.
    #[must_use]
    pub fn list(&self) -> Vec<ConnectionRecord> {
        self.connections
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .cloned()
            .collect()
    }

    /// Transition `id` to `Closed`. `Error::NotFound` if absent.
    pub fn close(&self, id: &str) -> Result<()> {
        let mut connections = self.connections.write().unwrap_or_else(|e| e.into_inner());
        let record = connections.get_mut(id).ok_or_else(|| Error::not_found(id))?;
        record.state = ConnectionState::Closed;
        Ok(())
    }

    /// Transition `id` to `Draining`, used by the enforcer before a forced
    /// close. `Error::NotFound` if absent.
    pub(crate) fn mark_draining(&self, id: &str) -> Result<()> {
        let mut connections = self.connections.write().unwrap_or_else(|e| e.into_inner());
        let record = connections.get_mut(id).ok_or_else(|| Error::not_found(id))?;
        record.state = ConnectionState::Draining;
        Ok(())
    }

    /// Snapshot every active/handshaking/draining record, for the
    /// enforcer's periodic evaluation pass.
    pub(crate) fn active_records(&self) -> Vec<ConnectionRecord> {
        self.connections
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .filter(|r| r.state != ConnectionState::Closed)
            .cloned()
            .collect()
    }

    /// Aggregate counts by state.
    #[must_use]
    pub fn stats(&self) -> RegistryStats {
        let mut stats = RegistryStats::default();
        for record in self.connections.read().unwrap_or_else(|e| e.into_inner()).values() {
            match record.state {
                ConnectionState::Handshaking => stats.handshaking += 1,
                ConnectionState::Active => stats.active += 1,
                ConnectionState::Draining => stats.draining += 1,
                ConnectionState::Closed => stats.closed += 1,
            }
        }
        stats
    }
}

fn clone_certificate(certificate: &Certificate) -> Result<Certificate> {
    Certificate::new(certificate.leaf().clone(), certificate.private_key(), certificate.chain().to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cert::TrustBundle;
    use crate::domain::{ServiceName, TrustDomain};
    use crate::identity_document::{IdentityDocument, ServiceIdentity};
    use crate::test_support::{ca_and_leaf, mid_validity, new_ca, CaFixture};

    fn local_credential(ca: &CaFixture, uri: &str) -> CurrentCredential {
        let (leaf, key) = ca.issue_leaf(uri);
        let cert = Certificate::new(leaf, key, vec![]).unwrap();
        let doc = Arc::new(IdentityDocument::new(cert, mid_validity()).unwrap());
        let bundle = Arc::new(TrustBundle::new(doc.trust_domain().clone(), vec![ca.der()], mid_validity(), true).unwrap());
        CurrentCredential::new(doc, bundle)
    }

    fn remote_certificate(ca: &CaFixture, uri: &str) -> Certificate {
        let (leaf, key) = ca.issue_leaf(uri);
        Certificate::new(leaf, key, vec![]).unwrap()
    }

    #[test]
    fn establish_admits_a_matching_trust_domain_peer() {
        let ca = new_ca();
        let local = local_credential(&ca, "spiffe://prod.company.com/api");
        let local_identity = ServiceIdentity::new(
            ServiceName::new("api").unwrap(),
            local.document().identity_namespace().clone(),
        );
        let policy = AuthenticationPolicy::new(local_identity, TrustDomain::new("prod.company.com").unwrap());

        let remote = remote_certificate(&ca, "spiffe://prod.company.com/auth");
        let registry = ConnectionRegistry::new();
        let record = registry.establish("c1", &remote, &local, &policy, mid_validity()).unwrap();
        assert_eq!(record.state(), ConnectionState::Active);
        assert_eq!(registry.stats().active, 1);
    }

    #[test]
    fn establish_rejects_cross_trust_domain_peer() {
        let ca = new_ca();
        let local = local_credential(&ca, "spiffe://prod.company.com/api");
        let local_identity = ServiceIdentity::new(
            ServiceName::new("api").unwrap(),
            local.document().identity_namespace().clone(),
        );
        let policy = AuthenticationPolicy::new(local_identity, TrustDomain::new("prod.company.com").unwrap());

        // Unrelated CA and trust domain: chain verification fails first.
        let (_other_ca, other_leaf, other_key, _, _) = ca_and_leaf("spiffe://other.com/auth");
        let remote = Certificate::new(other_leaf, other_key, vec![]).unwrap();

        let registry = ConnectionRegistry::new();
        assert!(registry.establish("c2", &remote, &local, &policy, mid_validity()).is_err());
    }

    #[test]
    fn close_transitions_state_and_get_reflects_it() {
        let ca = new_ca();
        let local = local_credential(&ca, "spiffe://prod.company.com/api");
        let local_identity = ServiceIdentity::new(
            ServiceName::new("api").unwrap(),
            local.document().identity_namespace().clone(),
        );
        let policy = AuthenticationPolicy::new(local_identity, TrustDomain::new("prod.company.com").unwrap());
        let remote = remote_certificate(&ca, "spiffe://prod.company.com/auth");

        let registry = ConnectionRegistry::new();
        registry.establish("c1", &remote, &local, &policy, mid_validity()).unwrap();
        registry.close("c1").unwrap();
        assert_eq!(registry.get("c1").unwrap().state(), ConnectionState::Closed);
        assert!(registry.close("missing").is_err());
    }
}
