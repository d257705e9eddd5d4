// SPDX-License-Identifier: Apache-2.0 WITH LLVM-exception

//! Self-signed and CA-issued certificate fixtures for unit/integration
//! tests, built with `rcgen` (the same test-certificate crate
//! `agentgateway`'s CA client tests use).

use std::time::{Duration, SystemTime};

use rcgen::{BasicConstraints, CertificateParams, IsCa, KeyPair, KeyUsagePurpose, SanType};
use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};

/// Build a self-signed leaf certificate whose SAN carries `spiffe_uri`,
/// valid for one hour from a fixed point in time.
pub fn self_signed_leaf(
    spiffe_uri: &str,
) -> (
    CertificateDer<'static>,
    PrivateKeyDer<'static>,
    SystemTime,
    SystemTime,
) {
    let mut params = CertificateParams::default();
    params.subject_alt_names = vec![SanType::URI(spiffe_uri.to_owned().try_into().unwrap())];
    params.not_before = rcgen::date_time_ymd(2024, 1, 1);
    params.not_after = rcgen::date_time_ymd(2024, 1, 1) + time::Duration::hours(1);

    let key_pair = KeyPair::generate_for(&rcgen::PKCS_ECDSA_P256_SHA256).unwrap();
    let cert = params.self_signed(&key_pair).unwrap();

    let der = cert.der().clone();
    let key_der = PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(key_pair.serialize_der()));
    let not_before: SystemTime = params.not_before.into();
    let not_after: SystemTime = params.not_after.into();
    (der, key_der, not_before, not_after)
}

/// Build a CA certificate plus a leaf it issues, both carrying `spiffe_uri`
/// on the leaf's SAN, valid for one hour from a fixed point in time.
///
/// Returns `(ca_der, leaf_der, leaf_key, not_before, not_after)`.
pub fn ca_and_leaf(
    spiffe_uri: &str,
) -> (
    CertificateDer<'static>,
    CertificateDer<'static>,
    PrivateKeyDer<'static>,
    SystemTime,
    SystemTime,
) {
    let not_before = rcgen::date_time_ymd(2024, 1, 1);
    let not_after = not_before + time::Duration::hours(1);

    let mut ca_params = CertificateParams::default();
    ca_params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
    ca_params.key_usages = vec![KeyUsagePurpose::KeyCertSign, KeyUsagePurpose::CrlSign];
    ca_params.not_before = not_before;
    ca_params.not_after = not_after;
    let ca_key = KeyPair::generate_for(&rcgen::PKCS_ECDSA_P256_SHA256).unwrap();
    let ca_cert = ca_params.self_signed(&ca_key).unwrap();

    let mut leaf_params = CertificateParams::default();
    leaf_params.subject_alt_names = vec![SanType::URI(spiffe_uri.to_owned().try_into().unwrap())];
    leaf_params.not_before = not_before;
    leaf_params.not_after = not_after;
    let leaf_key = KeyPair::generate_for(&rcgen::PKCS_ECDSA_P256_SHA256).unwrap();
    let leaf_cert = leaf_params
        .signed_by(&leaf_key, &ca_cert, &ca_key)
        .unwrap();

    let ca_der = ca_cert.der().clone();
    let leaf_der = leaf_cert.der().clone();
    let leaf_key_der = PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(leaf_key.serialize_der()));
    (
        ca_der,
        leaf_der,
        leaf_key_der,
        not_before.into(),
        not_after.into(),
    )
}

/// A span of wall-clock time guaranteed to fall within the fixture
/// certificates' validity window.
#[must_use]
pub fn mid_validity() -> SystemTime {
    SystemTime::from(rcgen::date_time_ymd(2024, 1, 1)) + Duration::from_secs(60)
}

/// A CA that can issue more than one leaf, for scenarios (establishing a
/// connection) where the local and remote certificates must chain-verify
/// against the same trust bundle while carrying distinct SPIFFE URIs.
pub struct CaFixture {
    cert: rcgen::Certificate,
    key: KeyPair,
}

impl CaFixture {
    /// Issue a leaf certificate under this CA, valid for one hour from a
    /// fixed point in time.
    #[must_use]
    pub fn issue_leaf(&self, spiffe_uri: &str) -> (CertificateDer<'static>, PrivateKeyDer<'static>) {
        let not_before = rcgen::date_time_ymd(2024, 1, 1);
        let mut params = CertificateParams::default();
        params.subject_alt_names = vec![SanType::URI(spiffe_uri.to_owned().try_into().unwrap())];
        params.not_before = not_before;
        params.not_after = not_before + time::Duration::hours(1);
        let key_pair = KeyPair::generate_for(&rcgen::PKCS_ECDSA_P256_SHA256).unwrap();
        let leaf_cert = params.signed_by(&key_pair, &self.cert, &self.key).unwrap();
        let key_der = PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(key_pair.serialize_der()));
        (leaf_cert.der().clone(), key_der)
    }

    /// This CA's own certificate, as a trust bundle authority.
    #[must_use]
    pub fn der(&self) -> CertificateDer<'static> {
        self.cert.der().clone()
    }
}

/// Build a fresh CA able to issue several leaves sharing one trust anchor.
#[must_use]
pub fn new_ca() -> CaFixture {
    let not_before = rcgen::date_time_ymd(2024, 1, 1);
    let mut ca_params = CertificateParams::default();
    ca_params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
    ca_params.key_usages = vec![KeyUsagePurpose::KeyCertSign, KeyUsagePurpose::CrlSign];
    ca_params.not_before = not_before;
    ca_params.not_after = not_before + time::Duration::hours(1);
    let key = KeyPair::generate_for(&rcgen::PKCS_ECDSA_P256_SHA256).unwrap();
    let cert = ca_params.self_signed(&key).unwrap();
    CaFixture { cert, key }
}
