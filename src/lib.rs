// SPDX-License-Identifier: Apache-2.0 WITH LLVM-exception

//! Ephemos: the identity and mutual-TLS control plane for SPIFFE-based
//! workload identity.
//!
//! This crate models SPIFFE identities, X.509 SVIDs, and trust bundles;
//! runs the rotation lifecycle that keeps a workload's credential fresh;
//! and enforces the connection-level invariants that make mTLS handshakes
//! trustworthy. It deliberately stops at that boundary — configuration
//! loading, CLI surfaces, and the transport/RPC layer a workload actually
//! serves traffic over are external collaborators, reached through the
//! [`transport`] port rather than implemented here.

#![forbid(rust_2018_idioms)]
#![forbid(missing_docs, unsafe_code)]
#![deny(
    clippy::all,
    clippy::pedantic,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::dbg_macro,
    clippy::todo
)]

pub mod cert;
pub mod clock;
pub mod config;
pub mod continuity;
pub mod domain;
pub mod error;
pub mod facade;
pub mod identity_document;
pub mod policy;
pub mod registry;
pub mod rotation;
pub mod source;
pub mod transport;
pub mod workload;

pub use cert::{Certificate, KeyAlgorithm, TrustBundle};
pub use clock::{Clock, SystemClock};
pub use domain::{IdentityNamespace, Protocol, ServiceAddress, ServiceName, SocketPath, Status, TrustDomain};
pub use error::{Error, Result};
pub use facade::IdentityService;
pub use identity_document::{IdentityDocument, ServiceIdentity};
pub use policy::AuthenticationPolicy;
pub use workload::Workload;

#[cfg(test)]
mod test_support;
