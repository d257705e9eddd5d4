// SPDX-License-Identifier: Apache-2.0 WITH LLVM-exception

//! The identity source port (SPEC_FULL.md §4.1): an abstract supplier of the
//! current SVID, trust bundle, and change-notification stream. The core
//! (rotation, registry, facade) depends only on [`IdentitySource`]; the
//! Workload API wire protocol is an adapter concern.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::SystemTime;

use tokio::sync::watch;
use tokio_stream::wrappers::WatchStream;
use tokio_stream::Stream;

use crate::cert::TrustBundle;
use crate::error::{Error, Result};
use crate::identity_document::IdentityDocument;

/// A crate-local cancellation signal, avoiding an extra `tokio-util`
/// dependency the teacher never carries: a single-writer `watch<bool>`
/// every suspension point observes.
#[derive(Debug, Clone)]
pub struct CancellationToken {
    rx: watch::Receiver<bool>,
}

impl CancellationToken {
    /// Build a linked `(token, canceller)` pair.
    #[must_use]
    pub fn new_pair() -> (Self, CancellationSource) {
        let (tx, rx) = watch::channel(false);
        (Self { rx }, CancellationSource { tx })
    }

    /// A token that is never cancelled, for call sites with no natural
    /// cancellation scope (tests, one-shot CLI invocations).
    #[must_use]
    pub fn none() -> Self {
        Self::new_pair().0
    }

    /// `true` if the linked source has cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolve once the linked source cancels. Returns immediately if
    /// already cancelled.
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        if *rx.borrow() {
            return;
        }
        let _ = rx.wait_for(|cancelled| *cancelled).await;
    }
}

/// The write half of a [`CancellationToken`] pair.
#[derive(Debug, Clone)]
pub struct CancellationSource {
    tx: watch::Sender<bool>,
}

impl CancellationSource {
    /// Cancel every token derived from this source.
    pub fn cancel(&self) {
        let _ = self.tx.send(true);
    }
}

/// Per-call cancellation and deadline, threaded through every suspension
/// point named in SPEC_FULL.md §5 (source calls, bundle retrieval,
/// handshake establishment, continuity sleeps).
#[derive(Debug, Clone)]
pub struct RequestContext {
    cancellation: CancellationToken,
    deadline: Option<SystemTime>,
}

impl RequestContext {
    /// A context with no cancellation scope and no deadline.
    #[must_use]
    pub fn background() -> Self {
        Self {
            cancellation: CancellationToken::none(),
            deadline: None,
        }
    }

    /// A context bound to `cancellation`, with an optional `deadline`.
    #[must_use]
    pub const fn new(cancellation: CancellationToken, deadline: Option<SystemTime>) -> Self {
        Self {
            cancellation,
            deadline,
        }
    }

    /// The cancellation token.
    #[must_use]
    pub const fn cancellation(&self) -> &CancellationToken {
        &self.cancellation
    }

    /// The deadline, if any.
    #[must_use]
    pub const fn deadline(&self) -> Option<SystemTime> {
        self.deadline
    }

    /// `true` if `now` is at or past the deadline.
    #[must_use]
    pub fn is_expired_at(&self, now: SystemTime) -> bool {
        self.deadline.is_some_and(|deadline| now >= deadline)
    }
}

/// The `(IdentityDocument, TrustBundle)` pair an identity source hands back
/// from [`IdentitySource::get_current`].
#[derive(Debug, Clone)]
pub struct CurrentCredential {
    document: Arc<IdentityDocument>,
    trust_bundle: Arc<TrustBundle>,
}

impl CurrentCredential {
    /// Pair a document with the trust bundle it should be validated
    /// against.
    #[must_use]
    pub const fn new(document: Arc<IdentityDocument>, trust_bundle: Arc<TrustBundle>) -> Self {
        Self {
            document,
            trust_bundle,
        }
    }

    /// The current identity document (and, through it, the certificate).
    #[must_use]
    pub fn document(&self) -> &Arc<IdentityDocument> {
        &self.document
    }

    /// The current trust bundle.
    #[must_use]
    pub fn trust_bundle(&self) -> &Arc<TrustBundle> {
        &self.trust_bundle
    }
}

type ChangeStream = Pin<Box<dyn Stream<Item = Arc<IdentityDocument>> + Send>>;

/// Abstract supplier of the current SVID, trust bundle, and a hot
/// change-notification stream. Implementations include an in-memory test
/// source and (behind the `workload-api` feature) a SPIFFE Workload
/// API-backed source; the core depends only on this trait.
pub trait IdentitySource: Send + Sync {
    /// Fetch the currently-held credential without forcing a refresh.
    fn get_current<'a>(
        &'a self,
        ctx: &'a RequestContext,
    ) -> Pin<Box<dyn Future<Output = Result<CurrentCredential>> + Send + 'a>>;

    /// Force a re-fetch from the underlying source.
    fn refresh<'a>(
        &'a self,
        ctx: &'a RequestContext,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>>;

    /// A hot stream of documents published after subscription; closes when
    /// the source shuts down.
    fn watch_changes(&self) -> ChangeStream;
}

/// An in-memory identity source for tests and local development: a
/// `watch::Sender<CurrentCredential>` the caller drives directly, mirroring
/// the teacher's `watch`-channel hot-swap pattern used elsewhere for the
/// stop signal and the credential slot.
pub struct InMemoryIdentitySource {
    current: watch::Sender<Option<CurrentCredential>>,
    refresh_queue: std::sync::Mutex<Vec<CurrentCredential>>,
}

impl InMemoryIdentitySource {
    /// Build a source with no credential installed yet.
    #[must_use]
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(None);
        Self {
            current: tx,
            refresh_queue: std::sync::Mutex::new(Vec::new()),
        }
    }

    /// Install `credential` immediately, as if pushed from the Workload
    /// API, publishing it to `watch_changes` subscribers.
    pub fn push(&self, credential: CurrentCredential) {
        let _ = self.current.send(Some(credential));
    }

    /// Queue `credential` to be returned by the *next* [`IdentitySource::refresh`]
    /// call, without publishing it to `watch_changes` — this drives the
    /// rotation service's expiry-monitor path rather than its
    /// change-watcher path.
    pub fn enqueue_refresh(&self, credential: CurrentCredential) {
        let mut queue = self.refresh_queue.lock().unwrap_or_else(|e| e.into_inner());
        queue.push(credential);
    }
}

impl Default for InMemoryIdentitySource {
    fn default() -> Self {
        Self::new()
    }
}

impl IdentitySource for InMemoryIdentitySource {
    fn get_current<'a>(
        &'a self,
        _ctx: &'a RequestContext,
    ) -> Pin<Box<dyn Future<Output = Result<CurrentCredential>> + Send + 'a>> {
        Box::pin(async move {
            self.current
                .borrow()
                .clone()
                .ok_or_else(|| Error::unavailable("no credential installed yet"))
        })
    }

    fn refresh<'a>(
        &'a self,
        _ctx: &'a RequestContext,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>> {
        Box::pin(async move {
            let next = {
                let mut queue = self.refresh_queue.lock().unwrap_or_else(|e| e.into_inner());
                if queue.is_empty() {
                    None
                } else {
                    Some(queue.remove(0))
                }
            };
            if let Some(credential) = next {
                let _ = self.current.send(Some(credential));
            }
            Ok(())
        })
    }

    fn watch_changes(&self) -> ChangeStream {
        let stream = WatchStream::new(self.current.subscribe());
        Box::pin(futures_lite_filter_map(stream))
    }
}

/// Adapt a stream of `Option<CurrentCredential>` snapshots into a stream of
/// the documents that actually changed, matching the port's contract that
/// `watch_changes` yields `IdentityDocument`s, not raw credential snapshots.
fn futures_lite_filter_map(
    stream: WatchStream<Option<CurrentCredential>>,
) -> impl Stream<Item = Arc<IdentityDocument>> + Send {
    use tokio_stream::StreamExt;
    stream.filter_map(|snapshot| snapshot.map(|c| Arc::clone(c.document())))
}

#[cfg(feature = "workload-api")]
pub use workload_api_source::WorkloadApiIdentitySource;

#[cfg(feature = "workload-api")]
mod workload_api_source {
    use std::pin::Pin;
    use std::sync::Arc;
    use std::time::SystemTime;

    use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};
    use spiffe::{WorkloadApiClient, X509Context};
    use tokio::sync::{watch, Mutex};
    use tokio_stream::StreamExt;

    use super::{ChangeStream, CurrentCredential, IdentitySource, RequestContext};
    use crate::cert::{Certificate, TrustBundle};
    use crate::clock::Clock;
    use crate::error::{Error, Result};
    use crate::identity_document::IdentityDocument;

    /// An [`IdentitySource`] backed by the SPIFFE Workload API, adapted the
    /// way the teacher's `client_stream`/`server_stream` modules drive the
    /// same `spiffe` crate client: each [`X509Context`] pulled off
    /// `stream_x509_contexts` is translated into this crate's
    /// `Certificate`/`TrustBundle`/`IdentityDocument` types instead of
    /// `rustls::ClientConfig`/`ServerConfig`, and SDK errors are translated
    /// into this crate's `Error` taxonomy rather than leaking across the
    /// port boundary.
    ///
    /// `stream_x509_contexts` takes `&mut WorkloadApiClient`, but
    /// [`IdentitySource`] methods take `&self`; the client is held behind a
    /// `tokio::sync::Mutex` for the same reason `InMemoryIdentitySource`
    /// holds its slot behind a `watch::Sender` — interior mutability at the
    /// one adapter that needs it, not a `&mut self` port.
    pub struct WorkloadApiIdentitySource {
        client: Mutex<WorkloadApiClient>,
        clock: Arc<dyn Clock>,
        latest: watch::Sender<Option<Arc<IdentityDocument>>>,
    }

    impl WorkloadApiIdentitySource {
        /// Wrap an already-connected Workload API client.
        #[must_use]
        pub fn new(client: WorkloadApiClient, clock: Arc<dyn Clock>) -> Self {
            let (latest, _) = watch::channel(None);
            Self {
                client: Mutex::new(client),
                clock,
                latest,
            }
        }

        /// Pull the next context off the Workload API stream and translate
        /// it, publishing the resulting document to [`Self::watch_changes`]
        /// subscribers on success.
        async fn fetch(&self) -> Result<CurrentCredential> {
            let mut client = self.client.lock().await;
            let mut contexts = client.stream_x509_contexts().await.map_err(|e| {
                Error::unavailable(format!(
                    "failed to open the Workload API X.509 context stream: {e}"
                ))
            })?;
            let context = contexts
                .next()
                .await
                .ok_or_else(|| {
                    Error::unavailable("Workload API context stream closed with no update")
                })?
                .map_err(|e| {
                    Error::unavailable(format!("Workload API context stream error: {e}"))
                })?;
            let credential = credential_from_context(&context, self.clock.now())?;
            let _ = self.latest.send(Some(Arc::clone(credential.document())));
            Ok(credential)
        }
    }

    impl IdentitySource for WorkloadApiIdentitySource {
        fn get_current<'a>(
            &'a self,
            _ctx: &'a RequestContext,
        ) -> Pin<Box<dyn std::future::Future<Output = Result<CurrentCredential>> + Send + 'a>>
        {
            Box::pin(self.fetch())
        }

        fn refresh<'a>(
            &'a self,
            _ctx: &'a RequestContext,
        ) -> Pin<Box<dyn std::future::Future<Output = Result<()>> + Send + 'a>> {
            Box::pin(async move {
                self.fetch().await?;
                Ok(())
            })
        }

        fn watch_changes(&self) -> ChangeStream {
            let stream = tokio_stream::wrappers::WatchStream::new(self.latest.subscribe());
            Box::pin(stream.filter_map(|doc| doc))
        }
    }

    /// Translate one Workload API update into this crate's credential
    /// types: the default SVID's chain/key become a [`Certificate`], the
    /// bundle for the SVID's own trust domain becomes a [`TrustBundle`],
    /// and `now` (the injected [`Clock`], not a hidden wall-clock call)
    /// stamps both the document's `issued_at` and the bundle's validity
    /// check.
    fn credential_from_context(context: &X509Context, now: SystemTime) -> Result<CurrentCredential> {
        let svid = context
            .default_svid()
            .ok_or_else(|| Error::unavailable("Workload API returned no default X.509 SVID"))?;

        let mut chain = svid
            .cert_chain()
            .iter()
            .map(|c| CertificateDer::from(c.content().to_owned()));
        let leaf = chain
            .next()
            .ok_or_else(|| Error::validation("SVID certificate chain is empty"))?;
        let issuers: Vec<_> = chain.collect();
        let key = PrivateKeyDer::from(PrivatePkcs8KeyDer::from(svid.private_key().content().to_owned()));
        let certificate = Certificate::new(leaf, key, issuers)?;
        let document = Arc::new(IdentityDocument::new(certificate, now)?);

        let trust_domain = document.trust_domain().clone();
        let spiffe_trust_domain = spiffe::TrustDomain::new(trust_domain.as_str())
            .map_err(|e| Error::validation(format!("invalid trust domain in SVID: {e}")))?;
        let authorities: Vec<_> = context
            .bundle_set()
            .get_bundle(&spiffe_trust_domain)
            .ok_or_else(|| {
                Error::unavailable("Workload API returned no trust bundle for the SVID's trust domain")
            })?
            .authorities()
            .iter()
            .map(|c| CertificateDer::from(c.content().to_owned()))
            .collect();
        let trust_bundle = Arc::new(TrustBundle::new(trust_domain, authorities, now, false)?);

        Ok(CurrentCredential::new(document, trust_bundle))
    }
}
