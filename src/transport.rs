// SPDX-License-Identifier: Apache-2.0 WITH LLVM-exception

//! The transport port (SPEC_FULL.md §6): the narrow interface the identity
//! and mTLS control plane consumes from whichever RPC or HTTP library a
//! binary crate wires in. The core never imports a concrete transport or
//! TLS stack directly — it hands an adapter a `(Certificate, TrustBundle,
//! AuthenticationPolicy)` triple and gets back a handle.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::cert::{Certificate, TrustBundle};
use crate::error::Result;
use crate::policy::AuthenticationPolicy;

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// A running (or startable) server-side mTLS endpoint.
pub trait ServerHandle: Send + Sync {
    /// Begin accepting connections.
    fn start(&self) -> BoxFuture<'_, Result<()>>;

    /// Stop accepting new connections and shut down.
    fn stop(&self) -> BoxFuture<'_, Result<()>>;
}

/// A client-side mTLS connector bound to one credential/bundle/policy
/// triple.
pub trait ClientHandle: Send + Sync {
    /// Establish the underlying connection.
    fn connect(&self) -> BoxFuture<'_, Result<()>>;

    /// Close the underlying connection.
    fn close(&self) -> BoxFuture<'_, Result<()>>;
}

/// Abstract factory converting a credential/bundle/policy triple into
/// transport-layer constructs. The adapter implementing this trait is the
/// only place a concrete RPC or TLS library is named.
pub trait TransportPort: Send + Sync {
    /// Build (but do not start) a server endpoint bound to `certificate`,
    /// validating peers against `bundle` and `policy`.
    fn create_server(
        &self,
        certificate: Arc<Certificate>,
        bundle: Arc<TrustBundle>,
        policy: Arc<AuthenticationPolicy>,
    ) -> Result<Box<dyn ServerHandle>>;

    /// Build (but do not connect) a client bound to `certificate`.
    fn create_client(
        &self,
        certificate: Arc<Certificate>,
        bundle: Arc<TrustBundle>,
        policy: Arc<AuthenticationPolicy>,
    ) -> Result<Box<dyn ClientHandle>>;
}

/// A no-op [`TransportPort`] so facade and continuity tests never depend
/// on a real RPC stack.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullTransport;

struct NullServerHandle;
struct NullClientHandle;

impl ServerHandle for NullServerHandle {
    fn start(&self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async { Ok(()) })
    }

    fn stop(&self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async { Ok(()) })
    }
}

impl ClientHandle for NullClientHandle {
    fn connect(&self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async { Ok(()) })
    }

    fn close(&self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async { Ok(()) })
    }
}

impl TransportPort for NullTransport {
    fn create_server(
        &self,
        _certificate: Arc<Certificate>,
        _bundle: Arc<TrustBundle>,
        _policy: Arc<AuthenticationPolicy>,
    ) -> Result<Box<dyn ServerHandle>> {
        Ok(Box::new(NullServerHandle))
    }

    fn create_client(
        &self,
        _certificate: Arc<Certificate>,
        _bundle: Arc<TrustBundle>,
        _policy: Arc<AuthenticationPolicy>,
    ) -> Result<Box<dyn ClientHandle>> {
        Ok(Box::new(NullClientHandle))
    }
}
