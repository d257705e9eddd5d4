// SPDX-License-Identifier: Apache-2.0 WITH LLVM-exception

use std::fmt;

use crate::domain::protocol::Protocol;
use crate::error::{Error, Result};

/// A validated service endpoint address, recognizing URL (`scheme://host[:port]`),
/// `host:port`, or bare-host forms.
#[derive(Debug, Clone, Eq, PartialEq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ServiceAddress {
    raw: String,
    protocol: Option<Protocol>,
    host: String,
    port: Option<u16>,
}

impl ServiceAddress {
    /// Parse and validate a service address in any of the supported forms.
    pub fn new(raw: impl Into<String>) -> Result<Self> {
        let raw = raw.into();
        if raw.trim().is_empty() {
            return Err(Error::validation("service address must not be empty"));
        }

        if let Some((scheme, rest)) = raw.split_once("://") {
            let protocol: Protocol = scheme.parse()?;
            let (host, port) = split_host_port(rest)?;
            return Ok(Self {
                raw,
                protocol: Some(protocol),
                host,
                port,
            });
        }

        if let Some((host, port_str)) = raw.rsplit_once(':') {
            if let Ok(port) = port_str.parse::<u16>() {
                validate_host(host)?;
                return Ok(Self {
                    raw,
                    protocol: None,
                    host: host.to_owned(),
                    port: Some(port),
                });
            }
        }

        validate_host(&raw)?;
        Ok(Self {
            raw: raw.clone(),
            protocol: None,
            host: raw,
            port: None,
        })
    }

    /// The host or IP component.
    #[must_use]
    pub fn host(&self) -> &str {
        &self.host
    }

    /// The port, taking the protocol's default port when none was given
    /// explicitly and a protocol is known.
    #[must_use]
    pub fn port(&self) -> Option<u16> {
        self.port
            .or_else(|| self.protocol.and_then(Protocol::default_port))
    }

    /// The parsed protocol, if the address carried a scheme.
    #[must_use]
    pub const fn protocol(&self) -> Option<Protocol> {
        self.protocol
    }

    /// `true` if the address is known to be TLS-secured.
    #[must_use]
    pub fn is_secure(&self) -> bool {
        self.protocol.is_some_and(Protocol::is_secure)
    }

    /// The original textual form.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.raw
    }
}

fn split_host_port(rest: &str) -> Result<(String, Option<u16>)> {
    match rest.rsplit_once(':') {
        Some((host, port_str)) => {
            let port = port_str
                .parse::<u16>()
                .map_err(|_| Error::validation(format!("invalid port {port_str:?}")))?;
            validate_host(host)?;
            Ok((host.to_owned(), Some(port)))
        }
        None => {
            validate_host(rest)?;
            Ok((rest.to_owned(), None))
        }
    }
}

fn validate_host(host: &str) -> Result<()> {
    if host.is_empty() {
        return Err(Error::validation("service address host must not be empty"));
    }
    Ok(())
}

impl fmt::Display for ServiceAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl TryFrom<String> for ServiceAddress {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::new(value)
    }
}

impl From<ServiceAddress> for String {
    fn from(value: ServiceAddress) -> Self {
        value.raw
    }
}
