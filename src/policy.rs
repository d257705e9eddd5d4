// SPDX-License-Identifier: Apache-2.0 WITH LLVM-exception

use std::collections::HashSet;

use crate::domain::{IdentityNamespace, TrustDomain};
use crate::error::{Error, Result};
use crate::identity_document::ServiceIdentity;

/// Which side of a handshake a peer occupies, selecting which allow-list
/// [`AuthenticationPolicy::is_authorized`] consults.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub enum PeerRole {
    /// The peer is connecting to us; checked against `authorized_clients`.
    Client,
    /// The peer is the endpoint we are connecting to; checked against
    /// `trusted_servers`.
    Server,
}

/// Declarative allow/trust lists over peer identities, combining
/// authentication and authorization in one decision (Open Question 3 of
/// SPEC_FULL.md rules out a separate authorization-only form).
#[derive(Debug, Clone)]
pub struct AuthenticationPolicy {
    local_identity: ServiceIdentity,
    trust_domain: TrustDomain,
    authorized_clients: Option<HashSet<IdentityNamespace>>,
    trusted_servers: Option<HashSet<IdentityNamespace>>,
    require_auth: bool,
}

impl AuthenticationPolicy {
    /// Build a policy for `local_identity`, falling back to trust-domain
    /// matching (`trust_domain`) when the relevant allow-list is unset.
    #[must_use]
    pub fn new(local_identity: ServiceIdentity, trust_domain: TrustDomain) -> Self {
        Self {
            local_identity,
            trust_domain,
            authorized_clients: None,
            trusted_servers: None,
            require_auth: true,
        }
    }

    /// Restrict accepted clients to `clients`; an empty set falls back to
    /// trust-domain matching, same as leaving it unset.
    #[must_use]
    pub fn with_authorized_clients(mut self, clients: HashSet<IdentityNamespace>) -> Self {
        self.authorized_clients = Some(clients);
        self
    }

    /// Restrict accepted servers to `servers`.
    #[must_use]
    pub fn with_trusted_servers(mut self, servers: HashSet<IdentityNamespace>) -> Self {
        self.trusted_servers = Some(servers);
        self
    }

    /// Require every peer to present a verifiable identity; `false` admits
    /// anonymous peers (only meaningful for non-mTLS transports).
    #[must_use]
    pub const fn with_require_auth(mut self, require_auth: bool) -> Self {
        self.require_auth = require_auth;
        self
    }

    /// The local service identity this policy protects.
    #[must_use]
    pub const fn local_identity(&self) -> &ServiceIdentity {
        &self.local_identity
    }

    /// The fallback trust domain.
    #[must_use]
    pub const fn trust_domain(&self) -> &TrustDomain {
        &self.trust_domain
    }

    /// `true` if peers must authenticate.
    #[must_use]
    pub const fn require_auth(&self) -> bool {
        self.require_auth
    }

    /// Decide whether `peer` is authorized for `role`.
    ///
    /// If the relevant list is absent or empty, any peer in `trust_domain`
    /// is accepted. Otherwise only membership in the list is accepted,
    /// regardless of trust domain.
    pub fn is_authorized(&self, peer: &IdentityNamespace, role: PeerRole) -> Result<()> {
        let list = match role {
            PeerRole::Client => self.authorized_clients.as_ref(),
            PeerRole::Server => self.trusted_servers.as_ref(),
        };

        match list {
            Some(allowed) if !allowed.is_empty() => {
                if allowed.contains(peer) {
                    Ok(())
                } else {
                    Err(Error::unauthorized(format!(
                        "{} is not in the configured allow-list",
                        peer.render()
                    )))
                }
            }
            _ => {
                if peer.trust_domain() == &self.trust_domain {
                    Ok(())
                } else {
                    Err(Error::unauthorized(format!(
                        "{} is not in trust domain {}",
                        peer.render(),
                        self.trust_domain
                    )))
                }
            }
        }
    }
}
