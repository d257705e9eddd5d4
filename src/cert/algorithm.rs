// SPDX-License-Identifier: Apache-2.0 WITH LLVM-exception

use rustls::SignatureAlgorithm;

use crate::error::{Error, Result};

/// The signature algorithm families this crate recognizes for SVID key
/// pairs. A closed enum rather than runtime dispatch over the signing
/// key's reported algorithm (the "reflective dispatch" redesign flag):
/// unsupported algorithms fail at construction instead of being silently
/// accepted or probed at every use.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub enum KeyAlgorithm {
    /// RSA (PKCS#1 or PSS padding, any supported hash).
    Rsa,
    /// ECDSA over a NIST curve.
    Ecdsa,
    /// Ed25519 (EdDSA over Curve25519).
    Ed25519,
}

impl KeyAlgorithm {
    /// Map a [`rustls::SignatureAlgorithm`] (as reported by a constructed
    /// signing key) onto our closed variant set.
    pub(crate) fn from_rustls(algorithm: SignatureAlgorithm) -> Result<Self> {
        match algorithm {
            SignatureAlgorithm::RSA => Ok(Self::Rsa),
            SignatureAlgorithm::ECDSA => Ok(Self::Ecdsa),
            SignatureAlgorithm::ED25519 => Ok(Self::Ed25519),
            other => Err(Error::validation(format!(
                "unsupported signing key algorithm: {other:?}"
            ))),
        }
    }
}

impl std::fmt::Display for KeyAlgorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Rsa => "rsa",
            Self::Ecdsa => "ecdsa",
            Self::Ed25519 => "ed25519",
        };
        f.write_str(s)
    }
}
