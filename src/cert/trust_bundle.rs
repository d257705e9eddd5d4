// SPDX-License-Identifier: Apache-2.0 WITH LLVM-exception

use std::collections::HashSet;
use std::time::SystemTime;

use rustls::pki_types::{CertificateDer, UnixTime};
use rustls::server::danger::ClientCertVerified;
use rustls::server::WebPkiClientVerifier;
use rustls::RootCertStore;

use crate::cert::certificate::Certificate;
use crate::domain::TrustDomain;
use crate::error::{Error, Result};

/// The set of CA certificates trusted to validate SVIDs for a trust domain.
pub struct TrustBundle {
    trust_domain: TrustDomain,
    authorities: Vec<CertificateDer<'static>>,
}

impl std::fmt::Debug for TrustBundle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrustBundle")
            .field("trust_domain", &self.trust_domain)
            .field("count", &self.authorities.len())
            .finish()
    }
}

impl TrustBundle {
    /// Build a trust bundle for `trust_domain` from `authorities`.
    ///
    /// Invariants enforced here: non-empty; each certificate has
    /// `BasicConstraints CA=true`; each is within its validity window at
    /// `now` (pass `skip_validity_check` for tests); de-duplicated by
    /// subject-public-key-info.
    pub fn new(
        trust_domain: TrustDomain,
        authorities: Vec<CertificateDer<'static>>,
        now: SystemTime,
        skip_validity_check: bool,
    ) -> Result<Self> {
        if authorities.is_empty() {
            return Err(Error::validation("trust bundle must not be empty"));
        }

        let mut seen_spki = HashSet::new();
        let mut deduped = Vec::with_capacity(authorities.len());
        for der in authorities {
            let (_, parsed) = x509_parser::parse_x509_certificate(&der)
                .map_err(|e| Error::validation(format!("malformed CA certificate: {e}")))?;

            let is_ca = parsed
                .basic_constraints()
                .ok()
                .flatten()
                .is_some_and(|bc| bc.value.ca);
            if !is_ca {
                return Err(Error::validation(
                    "trust bundle member is not a CA certificate",
                ));
            }

            if !skip_validity_check {
                let now_secs = now
                    .duration_since(SystemTime::UNIX_EPOCH)
                    .map(|d| d.as_secs() as i64)
                    .unwrap_or(0);
                let validity = parsed.validity();
                let within = validity.not_before.timestamp() <= now_secs
                    && now_secs < validity.not_after.timestamp();
                if !within {
                    return Err(Error::Expired);
                }
            }

            // De-duplicate on subject-public-key-info rather than the
            // encoded certificate: a CA reissued with a new serial/signature
            // but the same key must still collapse to one bundle entry.
            let spki = parsed.tbs_certificate.subject_pki.raw.to_vec();
            if seen_spki.insert(spki) {
                deduped.push(der);
            }
        }

        Ok(Self {
            trust_domain,
            authorities: deduped,
        })
    }

    /// The trust domain this bundle primarily serves.
    #[must_use]
    pub const fn trust_domain(&self) -> &TrustDomain {
        &self.trust_domain
    }

    /// `true` if `der` is present in this bundle's CA set.
    #[must_use]
    pub fn contains(&self, der: &CertificateDer<'_>) -> bool {
        self.authorities.iter().any(|authority| authority.as_ref() == der.as_ref())
    }

    /// Number of distinct CA certificates held.
    #[must_use]
    pub fn count(&self) -> usize {
        self.authorities.len()
    }

    /// Build a fresh `rustls::RootCertStore`, returned by value so callers
    /// (e.g. a dynamically-reloading transport adapter) can rebuild their
    /// TLS configuration without aliasing this bundle's internal state.
    #[must_use]
    pub fn create_fresh_cert_pool(&self) -> RootCertStore {
        let mut store = RootCertStore::empty();
        let (added, ignored) = store.add_parsable_certificates(self.authorities.iter().cloned());
        tracing::debug!(added, ignored, "rebuilt trust bundle root store");
        store
    }

    /// Union this bundle's CA set with `other`'s, keeping `self`'s trust
    /// domain.
    pub fn merge(&self, other: &Self, now: SystemTime, skip_validity_check: bool) -> Result<Self> {
        let mut combined = self.authorities.clone();
        combined.extend(other.authorities.iter().cloned());
        Self::new(self.trust_domain.clone(), combined, now, skip_validity_check)
    }

    /// Verify `leaf`'s certificate chain against this bundle using the
    /// `rustls` webpki-backed client-certificate verifier (the
    /// SDK-delegated path of Open Question 1).
    pub fn validate_chain(&self, leaf: &Certificate, now: SystemTime) -> Result<()> {
        let roots = std::sync::Arc::new(self.create_fresh_cert_pool());
        let verifier = WebPkiClientVerifier::builder(roots)
            .build()
            .map_err(|e| Error::validation(format!("could not build chain verifier: {e}")))?;

        let unix_time = UnixTime::since_unix_epoch(
            now.duration_since(SystemTime::UNIX_EPOCH)
                .unwrap_or_default(),
        );

        let _verified: ClientCertVerified = verifier
            .verify_client_cert(leaf.leaf(), leaf.chain(), unix_time)
            .map_err(|e| Error::validation(format!("chain verification failed: {e}")))?;
        Ok(())
    }

    /// Trust domains this bundle's CAs can validate: this bundle's primary
    /// domain, plus any trust domain named in an issuer's SPIFFE URI SAN.
    #[must_use]
    pub fn covered_trust_domains(&self) -> HashSet<TrustDomain> {
        let mut domains = HashSet::new();
        domains.insert(self.trust_domain.clone());
        for der in &self.authorities {
            let Ok((_, parsed)) = x509_parser::parse_x509_certificate(der) else {
                continue;
            };
            let Some(uri) = spiffe_uri_san(&parsed) else {
                continue;
            };
            if let Ok(ns) = crate::domain::IdentityNamespace::parse(uri) {
                domains.insert(ns.trust_domain().clone());
            }
        }
        domains
    }

    /// Raw DER accessor, for adapters that need to hand the bundle to a
    /// non-`rustls` TLS stack.
    #[must_use]
    pub fn raw_authorities(&self) -> &[CertificateDer<'static>] {
        &self.authorities
    }
}

fn spiffe_uri_san<'a>(cert: &'a x509_parser::certificate::X509Certificate<'a>) -> Option<&'a str> {
    let san = cert.subject_alternative_name().ok()??;
    san.value.general_names.iter().find_map(|gn| match gn {
        x509_parser::extensions::GeneralName::URI(uri) => Some(*uri),
        _ => None,
    })
}
