// SPDX-License-Identifier: Apache-2.0 WITH LLVM-exception

use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};

/// Lifecycle status of a [`crate::workload::Workload`].
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    /// Serving traffic with a valid credential.
    Active,
    /// Registered but not currently serving.
    Inactive,
    /// Awaiting its first credential.
    Pending,
    /// Permanently retired; will not be reactivated.
    Terminated,
}

impl Status {
    /// `true` for a workload that is admitted to serve or initiate traffic.
    #[must_use]
    pub const fn is_healthy(self) -> bool {
        matches!(self, Self::Active)
    }

    /// `true` for a workload still participating in its lifecycle (not yet
    /// terminated).
    #[must_use]
    pub const fn is_operational(self) -> bool {
        !matches!(self, Self::Terminated)
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Active => "active",
            Self::Inactive => "inactive",
            Self::Pending => "pending",
            Self::Terminated => "terminated",
        };
        f.write_str(s)
    }
}

impl FromStr for Status {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "active" => Ok(Self::Active),
            "inactive" => Ok(Self::Inactive),
            "pending" => Ok(Self::Pending),
            "terminated" => Ok(Self::Terminated),
            other => Err(Error::validation(format!("unknown status {other:?}"))),
        }
    }
}

/// Which kind of component a workload or configuration section describes;
/// used only to tag log spans and configuration sections.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComponentType {
    /// A process accepting mTLS connections.
    Server,
    /// A process initiating mTLS connections.
    Client,
    /// A process mediating access to the identity source (e.g. a SPIFFE
    /// agent).
    Agent,
}

impl fmt::Display for ComponentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Server => "server",
            Self::Client => "client",
            Self::Agent => "agent",
        };
        f.write_str(s)
    }
}

impl FromStr for ComponentType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "server" => Ok(Self::Server),
            "client" => Ok(Self::Client),
            "agent" => Ok(Self::Agent),
            other => Err(Error::validation(format!("unknown component type {other:?}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_predicates() {
        assert!(Status::Active.is_healthy());
        assert!(Status::Active.is_operational());
        assert!(!Status::Pending.is_healthy());
        assert!(Status::Pending.is_operational());
        assert!(!Status::Terminated.is_operational());
    }

    #[test]
    fn status_round_trip() {
        for s in [
            Status::Active,
            Status::Inactive,
            Status::Pending,
            Status::Terminated,
        ] {
            assert_eq!(s.to_string().parse::<Status>().unwrap(), s);
        }
    }

    #[test]
    fn component_type_round_trip() {
        for c in [ComponentType::Server, ComponentType::Client, ComponentType::Agent] {
            assert_eq!(c.to_string().parse::<ComponentType>().unwrap(), c);
        }
    }
}
