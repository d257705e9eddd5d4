// SPDX-License-Identifier: Apache-2.0 WITH LLVM-exception

//! Configuration shape consumed by the core (SPEC_FULL.md §2/§6): a closed,
//! `serde`-deserializable record. File/env decoding and YAML syntax are an
//! external collaborator's concern; this module only defines the shape and
//! validates it once decoded.

use serde::Deserialize;

use crate::domain::{ServiceName, SocketPath, TrustDomain};
use crate::error::{Error, Result};

/// The `service` section: this process's own identity.
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    /// Raw service name, validated by [`Configuration::validate`].
    pub name: String,
    /// Raw trust domain label, validated by [`Configuration::validate`].
    pub domain: String,
}

/// The `agent` section: how to reach the local SPIFFE Workload API agent.
#[derive(Debug, Clone, Deserialize)]
pub struct AgentConfig {
    /// Raw Unix domain socket path, validated by [`Configuration::validate`].
    pub socket_path: String,
}

/// The full configuration object an external provider supplies
/// (spec.md §6). Only `service` and `agent` are consumed by the core;
/// `transport` is handed through to whichever adapter the binary crate
/// wires in, untouched.
#[derive(Debug, Clone, Deserialize)]
pub struct Configuration {
    /// This process's own identity.
    pub service: ServiceConfig,
    /// Workload API agent connection details.
    pub agent: AgentConfig,
    /// Opaque transport-adapter configuration; the core never inspects it.
    #[serde(default)]
    pub transport: serde_json::Value,
}

/// The validated, typed form of [`Configuration`]'s `service`/`agent`
/// sections — what the core actually consumes.
#[derive(Debug, Clone)]
pub struct ValidatedConfiguration {
    /// Validated local service name.
    pub service_name: ServiceName,
    /// Validated local trust domain.
    pub trust_domain: TrustDomain,
    /// Validated agent socket path.
    pub agent_socket: SocketPath,
    /// Opaque transport configuration, passed through unvalidated.
    pub transport: serde_json::Value,
}

impl Configuration {
    /// Validate `service.name`, `service.domain`, and `agent.socket_path`
    /// into their typed forms. Decoding or validation failures surface as
    /// `Error::ValidationFailed` (the "open map with decode hooks" redesign
    /// flag: a closed, explicitly-validated record instead of an
    /// arbitrarily-shaped map with ad hoc decode hooks).
    pub fn validate(&self) -> Result<ValidatedConfiguration> {
        let service_name = ServiceName::new(self.service.name.as_str())
            .map_err(|e| Error::validation(format!("service.name: {e}")))?;
        let trust_domain = TrustDomain::new(&self.service.domain)
            .map_err(|e| Error::validation(format!("service.domain: {e}")))?;
        let agent_socket = SocketPath::new(&self.agent.socket_path)
            .map_err(|e| Error::validation(format!("agent.socket_path: {e}")))?;
        Ok(ValidatedConfiguration {
            service_name,
            trust_domain,
            agent_socket,
            transport: self.transport.clone(),
        })
    }
}
