// SPDX-License-Identifier: Apache-2.0 WITH LLVM-exception

use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};

/// Transport protocol of a [`super::ServiceAddress`].
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    /// Plaintext HTTP, never used for mTLS-authenticated traffic.
    Http,
    /// TLS-wrapped HTTP.
    Https,
    /// Raw gRPC over TLS.
    Grpc,
    /// gRPC over plaintext, for loopback/test use only.
    GrpcInsecure,
    /// Raw TCP (mTLS handled by the caller).
    Tcp,
}

impl Protocol {
    /// `true` if this protocol implies a TLS-secured transport.
    #[must_use]
    pub const fn is_secure(self) -> bool {
        matches!(self, Self::Https | Self::Grpc | Self::Tcp)
    }

    /// The conventional default port for this protocol, if one is
    /// universally recognized.
    #[must_use]
    pub const fn default_port(self) -> Option<u16> {
        match self {
            Self::Http => Some(80),
            Self::Https | Self::Grpc => Some(443),
            Self::GrpcInsecure => Some(50051),
            Self::Tcp => None,
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Http => "http",
            Self::Https => "https",
            Self::Grpc => "grpc",
            Self::GrpcInsecure => "grpc+insecure",
            Self::Tcp => "tcp",
        };
        f.write_str(s)
    }
}

impl FromStr for Protocol {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "http" => Ok(Self::Http),
            "https" => Ok(Self::Https),
            "grpc" => Ok(Self::Grpc),
            "grpc+insecure" | "grpc-insecure" => Ok(Self::GrpcInsecure),
            "tcp" => Ok(Self::Tcp),
            other => Err(Error::validation(format!("unknown protocol {other:?}"))),
        }
    }
}
