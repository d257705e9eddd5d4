// SPDX-License-Identifier: Apache-2.0 WITH LLVM-exception

use std::fmt;

use crate::error::{Error, Result};

const MAX_LEN: usize = 100;
const FORBIDDEN_SUBSTRINGS: &[&str] = &["..", "://", "\0"];

/// A validated, human-assigned service name (distinct from the cryptographic
/// identity carried in an SVID).
#[derive(Debug, Clone, Eq, PartialEq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ServiceName(String);

impl ServiceName {
    /// Validate and construct a service name.
    pub fn new(name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(Error::validation("service name must not be empty"));
        }
        if name.len() > MAX_LEN {
            return Err(Error::validation(format!(
                "service name exceeds {MAX_LEN} characters"
            )));
        }
        if name != name.trim() {
            return Err(Error::validation(
                "service name must not have leading or trailing whitespace",
            ));
        }
        for forbidden in FORBIDDEN_SUBSTRINGS {
            if name.contains(forbidden) {
                return Err(Error::validation(format!(
                    "service name must not contain {forbidden:?}"
                )));
            }
        }
        if !name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
        {
            return Err(Error::validation(
                "service name may only contain letters, digits, '-', '_', and '.'",
            ));
        }
        Ok(Self(name))
    }

    /// The validated name.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ServiceName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for ServiceName {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::new(value)
    }
}

impl From<ServiceName> for String {
    fn from(value: ServiceName) -> Self {
        value.0
    }
}
