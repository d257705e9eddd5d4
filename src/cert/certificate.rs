// SPDX-License-Identifier: Apache-2.0 WITH LLVM-exception

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use rustls::crypto::aws_lc_rs;
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::sign::CertifiedKey;
use tracing::warn;

use crate::cert::algorithm::KeyAlgorithm;
use crate::error::{Error, Result};

/// Default threshold before `NotAfter` at which [`Certificate::validate`]
/// emits a structured warning without failing.
const DEFAULT_NEAR_EXPIRY_FRACTION: u32 = 10; // 10% of validity duration
const MIN_NEAR_EXPIRY_THRESHOLD: Duration = Duration::from_secs(60);

/// An X.509 SVID: a leaf certificate, the signer owning its matching
/// private key, and an ordered chain of issuers (leaf → root, root
/// exclusive of any trust anchor).
pub struct Certificate {
    leaf: CertificateDer<'static>,
    chain: Vec<CertificateDer<'static>>,
    key: PrivateKeyDer<'static>,
    algorithm: KeyAlgorithm,
    not_before: SystemTime,
    not_after: SystemTime,
    subject: String,
    issuer: String,
    near_expiry_threshold: Duration,
}

impl std::fmt::Debug for Certificate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Certificate")
            .field("subject", &self.subject)
            .field("issuer", &self.issuer)
            .field("algorithm", &self.algorithm)
            .field("not_before", &self.not_before)
            .field("not_after", &self.not_after)
            .finish_non_exhaustive()
    }
}

impl Certificate {
    /// Build a certificate from its DER leaf, matching private key, and
    /// ordered issuer chain (leaf's issuer first, root last).
    ///
    /// Validates: the signer's public key matches the leaf's public key
    /// (delegated to `rustls::sign::CertifiedKey::keys_match`, which
    /// supports RSA, ECDSA, and Ed25519 — any other key type fails here);
    /// and chain ordering (`issuer == next.subject`, each link
    /// cryptographically verified, each issuer's key usage includes
    /// certificate signing).
    pub fn new(
        leaf: CertificateDer<'static>,
        key: PrivateKeyDer<'static>,
        chain: Vec<CertificateDer<'static>>,
    ) -> Result<Self> {
        let signing_key = aws_lc_rs::sign::any_supported_type(&key)
            .map_err(|e| Error::validation(format!("unsupported private key: {e}")))?;
        let algorithm = KeyAlgorithm::from_rustls(signing_key.algorithm())?;

        let certified = CertifiedKey::new(vec![leaf.clone()], signing_key);
        certified
            .keys_match()
            .map_err(|e| Error::validation(format!("key does not match certificate: {e}")))?;

        let (_, parsed) = x509_parser::parse_x509_certificate(&leaf)
            .map_err(|e| Error::validation(format!("malformed leaf certificate: {e}")))?;
        let not_before = asn1_time_to_system_time(parsed.validity().not_before)?;
        let not_after = asn1_time_to_system_time(parsed.validity().not_after)?;
        let subject = parsed.subject().to_string();
        let issuer = parsed.issuer().to_string();

        validate_chain_order(&leaf, &chain)?;

        let default_threshold = not_after
            .duration_since(not_before)
            .unwrap_or(Duration::ZERO)
            / DEFAULT_NEAR_EXPIRY_FRACTION
            .max(1);

        Ok(Self {
            leaf,
            chain,
            key,
            algorithm,
            not_before,
            not_after,
            subject,
            issuer,
            near_expiry_threshold: default_threshold.max(MIN_NEAR_EXPIRY_THRESHOLD),
        })
    }

    /// Override the near-expiry warning threshold.
    #[must_use]
    pub fn with_near_expiry_threshold(mut self, threshold: Duration) -> Self {
        self.near_expiry_threshold = threshold;
        self
    }

    /// The leaf certificate DER.
    #[must_use]
    pub fn leaf(&self) -> &CertificateDer<'static> {
        &self.leaf
    }

    /// The ordered issuer chain, leaf's issuer first.
    #[must_use]
    pub fn chain(&self) -> &[CertificateDer<'static>] {
        &self.chain
    }

    /// The leaf's full chain, including itself, as `rustls` expects it for
    /// `with_single_cert`/`with_client_auth_cert`.
    #[must_use]
    pub fn full_chain(&self) -> Vec<CertificateDer<'static>> {
        std::iter::once(self.leaf.clone())
            .chain(self.chain.iter().cloned())
            .collect()
    }

    /// The matching private key, cloned for handoff to a TLS config
    /// builder.
    #[must_use]
    pub fn private_key(&self) -> PrivateKeyDer<'static> {
        self.key.clone_key()
    }

    /// The detected key algorithm.
    #[must_use]
    pub const fn algorithm(&self) -> KeyAlgorithm {
        self.algorithm
    }

    /// The validity window start.
    #[must_use]
    pub const fn not_before(&self) -> SystemTime {
        self.not_before
    }

    /// The validity window end.
    #[must_use]
    pub const fn not_after(&self) -> SystemTime {
        self.not_after
    }

    /// The leaf's subject distinguished name.
    #[must_use]
    pub fn subject(&self) -> &str {
        &self.subject
    }

    /// The leaf's issuer distinguished name.
    #[must_use]
    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    /// `true` if `now` falls within `[not_before, not_after)`.
    #[must_use]
    pub fn is_within_validity(&self, now: SystemTime) -> bool {
        now >= self.not_before && now < self.not_after
    }

    /// `true` if `now` is within the near-expiry threshold of `not_after`.
    #[must_use]
    pub fn is_near_expiry(&self, now: SystemTime) -> bool {
        self.not_after
            .duration_since(now)
            .is_ok_and(|remaining| remaining <= self.near_expiry_threshold)
    }

    /// Validate the certificate: key-pair match and chain order were
    /// already enforced at construction; this additionally checks the
    /// validity window (unless `skip_validity_check`, for tests) and emits
    /// a near-expiry warning without failing.
    pub fn validate(&self, now: SystemTime, skip_validity_check: bool) -> Result<()> {
        if !skip_validity_check && !self.is_within_validity(now) {
            return Err(Error::Expired);
        }
        if self.is_near_expiry(now) {
            warn!(
                subject = %self.subject,
                not_after = ?self.not_after,
                "certificate is nearing expiry"
            );
        }
        Ok(())
    }
}

fn asn1_time_to_system_time(time: x509_parser::time::ASN1Time) -> Result<SystemTime> {
    let secs = time.timestamp();
    if secs >= 0 {
        Ok(UNIX_EPOCH + Duration::from_secs(secs as u64))
    } else {
        UNIX_EPOCH
            .checked_sub(Duration::from_secs(secs.unsigned_abs()))
            .ok_or_else(|| Error::validation("certificate timestamp out of range"))
    }
}

/// Verify `issuer == next.subject` and a valid signature at every link of
/// `chain`, and that every issuer's key usage permits certificate signing
/// (Open Question 2 of SPEC_FULL.md).
fn validate_chain_order(leaf: &CertificateDer<'_>, chain: &[CertificateDer<'_>]) -> Result<()> {
    let mut current = leaf.clone();
    for issuer_der in chain {
        let (_, current_cert) = x509_parser::parse_x509_certificate(&current)
            .map_err(|e| Error::validation(format!("malformed certificate in chain: {e}")))?;
        let (_, issuer_cert) = x509_parser::parse_x509_certificate(issuer_der)
            .map_err(|e| Error::validation(format!("malformed issuer certificate: {e}")))?;

        if current_cert.issuer() != issuer_cert.subject() {
            return Err(Error::validation(
                "chain order violated: issuer does not match next certificate's subject",
            ));
        }

        let key_usage_ok = issuer_cert
            .key_usage()
            .ok()
            .flatten()
            .is_none_or(|ku| ku.value.key_cert_sign());
        if !key_usage_ok {
            return Err(Error::validation(
                "issuer certificate key usage does not permit certificate signing",
            ));
        }

        current_cert
            .verify_signature(Some(issuer_cert.public_key()))
            .map_err(|e| Error::validation(format!("chain signature verification failed: {e}")))?;

        current = issuer_der.clone();
    }
    Ok(())
}
