// SPDX-License-Identifier: Apache-2.0 WITH LLVM-exception

use std::cell::Cell;
use std::time::{Duration, SystemTime};

use crate::cert::Certificate;
use crate::cert::TrustBundle;
use crate::domain::{CacheEntry, IdentityNamespace, ServiceName, TrustDomain};
use crate::error::{Error, Result};

/// Default freshness window for a successful `validate_against_bundle`
/// result, mirroring `Certificate`'s `near_expiry_threshold` pattern: a
/// sensible default that callers needing a different gate can override.
const DEFAULT_VALIDATION_CACHE_TTL: Duration = Duration::from_secs(30);

/// A service name paired with the SPIFFE identity namespace it was derived
/// from: the explicit conversion the "interface discovery and dynamic
/// casting" redesign flag calls for in place of runtime type introspection.
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub struct ServiceIdentity {
    name: ServiceName,
    namespace: IdentityNamespace,
}

impl ServiceIdentity {
    /// Pair a service name with its namespace directly, for callers (e.g.
    /// [`crate::policy::AuthenticationPolicy`]) that construct a local
    /// identity without first parsing it out of a certificate.
    #[must_use]
    pub const fn new(name: ServiceName, namespace: IdentityNamespace) -> Self {
        Self { name, namespace }
    }

    /// The derived service name (the namespace's last path segment).
    #[must_use]
    pub const fn name(&self) -> &ServiceName {
        &self.name
    }

    /// The full SPIFFE identity namespace.
    #[must_use]
    pub const fn namespace(&self) -> &IdentityNamespace {
        &self.namespace
    }
}

/// A verifiable credential aggregate: a validated [`Certificate`] plus the
/// issuance/validity metadata and a [`CacheEntry`]-gated last-validation
/// time, so a hot path re-checking the same document repeatedly does not
/// pay for chain re-verification on every call.
pub struct IdentityDocument {
    certificate: Certificate,
    issued_at: SystemTime,
    namespace: IdentityNamespace,
    last_validated: Cell<CacheEntry>,
    validation_cache_ttl: Duration,
}

impl std::fmt::Debug for IdentityDocument {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdentityDocument")
            .field("namespace", &self.namespace.render())
            .field("issued_at", &self.issued_at)
            .field("not_before", &self.certificate.not_before())
            .field("not_after", &self.certificate.not_after())
            .finish_non_exhaustive()
    }
}

impl IdentityDocument {
    /// Wrap `certificate`, deriving its [`IdentityNamespace`] from the
    /// SPIFFE URI carried in the leaf's subject alternative name.
    pub fn new(certificate: Certificate, issued_at: SystemTime) -> Result<Self> {
        let namespace = spiffe_uri_from_leaf(&certificate)?;
        Ok(Self {
            certificate,
            issued_at,
            namespace,
            last_validated: Cell::new(CacheEntry::always_expired()),
            validation_cache_ttl: DEFAULT_VALIDATION_CACHE_TTL,
        })
    }

    /// Override how long a successful [`Self::validate_against_bundle`]
    /// result stays fresh before the next call re-verifies the chain.
    #[must_use]
    pub fn with_validation_cache_ttl(mut self, ttl: Duration) -> Self {
        self.validation_cache_ttl = ttl;
        self
    }

    /// The wrapped certificate.
    #[must_use]
    pub const fn certificate(&self) -> &Certificate {
        &self.certificate
    }

    /// When this document was issued (fetched from the identity source),
    /// as opposed to the certificate's own `NotBefore`.
    #[must_use]
    pub const fn issued_at(&self) -> SystemTime {
        self.issued_at
    }

    /// The derived SPIFFE identity namespace.
    #[must_use]
    pub const fn identity_namespace(&self) -> &IdentityNamespace {
        &self.namespace
    }

    /// The derived trust domain.
    #[must_use]
    pub const fn trust_domain(&self) -> &TrustDomain {
        self.namespace.trust_domain()
    }

    /// The derived service identity (name + namespace).
    #[must_use]
    pub fn service_identity(&self) -> Result<ServiceIdentity> {
        let name = self
            .namespace
            .last_segment()
            .ok_or_else(|| Error::validation("identity namespace has no service name segment"))?;
        Ok(ServiceIdentity {
            name: ServiceName::new(name)?,
            namespace: self.namespace.clone(),
        })
    }

    /// `true` if the certificate's `NotAfter` has passed at `now`.
    #[must_use]
    pub fn is_expired_at(&self, now: SystemTime) -> bool {
        now >= self.certificate.not_after()
    }

    /// `true` if the certificate will expire within `within` of `now`.
    #[must_use]
    pub fn is_expiring_within(&self, within: Duration, now: SystemTime) -> bool {
        self.certificate
            .not_after()
            .duration_since(now)
            .is_ok_and(|remaining| remaining <= within)
    }

    /// `true` if `now` falls within the certificate's validity window.
    #[must_use]
    pub fn is_valid_at(&self, now: SystemTime) -> bool {
        self.certificate.is_within_validity(now)
    }

    /// The last time this document was successfully validated against a
    /// trust bundle, if ever.
    #[must_use]
    pub fn last_validated(&self) -> Option<SystemTime> {
        let entry = self.last_validated.get();
        (entry != CacheEntry::always_expired()).then(|| entry.fetched_at())
    }

    /// Validate this document's certificate chain against `bundle` at
    /// `now`. Gated by a [`CacheEntry`]: a prior success still fresh at
    /// `now` short-circuits the expensive chain re-verification, per the
    /// domain contract that `CacheEntry` exists to gate repeated lookups
    /// like this one.
    pub fn validate_against_bundle(&self, bundle: &TrustBundle, now: SystemTime) -> Result<()> {
        if self.last_validated.get().is_fresh_at(now) {
            return Ok(());
        }
        bundle.validate_chain(&self.certificate, now)?;
        self.last_validated
            .set(CacheEntry::new(now, self.validation_cache_ttl));
        Ok(())
    }
}

/// Parse the SPIFFE URI carried in `certificate`'s leaf SAN into an
/// [`IdentityNamespace`], for callers (the connection registry) that need
/// a peer's identity without constructing a full [`IdentityDocument`].
pub fn identity_namespace_from_certificate(certificate: &Certificate) -> Result<IdentityNamespace> {
    spiffe_uri_from_leaf(certificate)
}

fn spiffe_uri_from_leaf(certificate: &Certificate) -> Result<IdentityNamespace> {
    let (_, parsed) = x509_parser::parse_x509_certificate(certificate.leaf())
        .map_err(|e| Error::validation(format!("malformed leaf certificate: {e}")))?;
    let san = parsed
        .subject_alternative_name()
        .ok()
        .flatten()
        .ok_or_else(|| Error::validation("certificate has no subjectAltName extension"))?;
    let uri = san
        .value
        .general_names
        .iter()
        .find_map(|gn| match gn {
            x509_parser::extensions::GeneralName::URI(uri) => Some(*uri),
            _ => None,
        })
        .ok_or_else(|| Error::validation("certificate SAN has no SPIFFE URI"))?;
    IdentityNamespace::parse(uri)
}
