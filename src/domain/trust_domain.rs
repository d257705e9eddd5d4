// SPDX-License-Identifier: Apache-2.0 WITH LLVM-exception

use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};

/// A validated DNS-like label naming a SPIFFE trust domain, e.g.
/// `prod.company.com`.
///
/// Construction normalizes to lowercase so equality and hashing never need
/// to special-case case, and validates the same label rules the SPIFFE SDK
/// applies to trust domains so that any domain accepted by an
/// SDK-backed identity source is also accepted here (Open Question 1 of
/// SPEC_FULL.md).
#[derive(Debug, Clone, Eq, PartialEq, Hash, Ord, PartialOrd, serde::Serialize, serde::Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TrustDomain(String);

const MAX_LEN: usize = 255;

impl TrustDomain {
    /// Validate and construct a trust domain from its textual label.
    ///
    /// Rejects an empty string, a string longer than 255 bytes, a scheme or
    /// port or path (those belong to the full `spiffe://` URI, not the
    /// trust domain label), and any character outside `[a-z0-9.-]`.
    pub fn new(label: impl AsRef<str>) -> Result<Self> {
        let raw = label.as_ref();
        if raw.is_empty() {
            return Err(Error::validation("trust domain must not be empty"));
        }
        if raw.len() > MAX_LEN {
            return Err(Error::validation(format!(
                "trust domain exceeds {MAX_LEN} characters"
            )));
        }
        if raw.contains("://") || raw.contains('/') || raw.contains(':') {
            return Err(Error::validation(
                "trust domain must not contain a scheme, port, or path",
            ));
        }
        let lower = raw.to_ascii_lowercase();
        for label in lower.split('.') {
            if label.is_empty() {
                return Err(Error::validation("trust domain has an empty label"));
            }
            let bytes = label.as_bytes();
            let first_last_alnum = bytes[0].is_ascii_alphanumeric()
                && bytes[bytes.len() - 1].is_ascii_alphanumeric();
            if !first_last_alnum {
                return Err(Error::validation(
                    "trust domain labels must start and end with a letter or digit",
                ));
            }
            if !bytes
                .iter()
                .all(|b| b.is_ascii_alphanumeric() || *b == b'-')
            {
                return Err(Error::validation(
                    "trust domain labels may only contain letters, digits, and hyphens",
                ));
            }
        }
        Ok(Self(lower))
    }

    /// The explicit zero value: an empty trust domain, distinct from any
    /// valid domain and detectable via [`Self::is_empty`].
    #[must_use]
    pub const fn empty() -> Self {
        Self(String::new())
    }

    /// `true` for the zero value produced by [`Self::empty`].
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// The normalized (lowercase) label.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TrustDomain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for TrustDomain {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::new(s)
    }
}

impl TryFrom<String> for TrustDomain {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::new(value)
    }
}

impl From<TrustDomain> for String {
    fn from(value: TrustDomain) -> Self {
        value.0
    }
}
