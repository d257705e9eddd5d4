// SPDX-License-Identifier: Apache-2.0 WITH LLVM-exception

use std::fmt;

use crate::error::{Error, Result};

const ALLOWED_PREFIXES: &[&str] = &["/run", "/var/run", "/tmp"];

/// A validated absolute Unix domain socket path, the canonical transport for
/// a local SPIFFE Workload API endpoint (spec §6).
#[derive(Debug, Clone, Eq, PartialEq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SocketPath(String);

impl SocketPath {
    /// Validate a socket path, stripping a leading `unix://` if present.
    ///
    /// Requires an absolute path under `/run`, `/var/run`, or `/tmp` with a
    /// `.sock` suffix.
    pub fn new(raw: impl AsRef<str>) -> Result<Self> {
        let raw = raw.as_ref();
        let path = raw.strip_prefix("unix://").unwrap_or(raw);

        if !path.starts_with('/') {
            return Err(Error::validation("socket path must be absolute"));
        }
        if !path.ends_with(".sock") {
            return Err(Error::validation("socket path must end with .sock"));
        }
        if !ALLOWED_PREFIXES
            .iter()
            .any(|prefix| path == *prefix || path.starts_with(&format!("{prefix}/")))
        {
            return Err(Error::validation(format!(
                "socket path must live under one of {ALLOWED_PREFIXES:?}"
            )));
        }
        Ok(Self(path.to_owned()))
    }

    /// The validated filesystem path (without a `unix://` prefix).
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The path rendered as a `unix://` URI, the form the SPIFFE Workload
    /// API client expects.
    #[must_use]
    pub fn as_unix_uri(&self) -> String {
        format!("unix://{}", self.0)
    }
}

impl fmt::Display for SocketPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for SocketPath {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::new(value)
    }
}

impl From<SocketPath> for String {
    fn from(value: SocketPath) -> Self {
        value.0
    }
}
