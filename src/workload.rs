// SPDX-License-Identifier: Apache-2.0 WITH LLVM-exception

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::SystemTime;

use crate::cert::TrustBundle;
use crate::clock::Clock;
use crate::domain::{IdentityNamespace, Status};
use crate::identity_document::IdentityDocument;

/// A registered participant in the identity and mTLS control plane: an
/// identity namespace plus its current credential, trust bundle, lifecycle
/// status, and free-form metadata.
///
/// Mutation methods take `&mut self` and stamp `updated_at` from an injected
/// [`Clock`] rather than `SystemTime::now()`, so tests can assert ordering
/// without wall-clock delay.
#[derive(Debug, Clone)]
pub struct Workload {
    id: String,
    namespace: IdentityNamespace,
    document: Option<Arc<IdentityDocument>>,
    trust_bundle: Option<Arc<TrustBundle>>,
    status: Status,
    labels: BTreeMap<String, String>,
    annotations: BTreeMap<String, String>,
    created_at: SystemTime,
    updated_at: SystemTime,
}

impl Workload {
    /// Register a new workload under `namespace`, with no credential yet
    /// (`Status::Pending`).
    #[must_use]
    pub fn new(id: impl Into<String>, namespace: IdentityNamespace, clock: &dyn Clock) -> Self {
        let now = clock.now();
        Self {
            id: id.into(),
            namespace,
            document: None,
            trust_bundle: None,
            status: Status::Pending,
            labels: BTreeMap::new(),
            annotations: BTreeMap::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// The caller-assigned identifier (distinct from the SPIFFE namespace —
    /// a workload may be re-identified across a namespace migration without
    /// changing this id).
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// The workload's identity namespace.
    #[must_use]
    pub const fn identity_namespace(&self) -> &IdentityNamespace {
        &self.namespace
    }

    /// The current credential, if one has been issued.
    #[must_use]
    pub fn document(&self) -> Option<&Arc<IdentityDocument>> {
        self.document.as_ref()
    }

    /// The current trust bundle, if one has been attached.
    #[must_use]
    pub fn trust_bundle(&self) -> Option<&Arc<TrustBundle>> {
        self.trust_bundle.as_ref()
    }

    /// The current lifecycle status.
    #[must_use]
    pub const fn status(&self) -> Status {
        self.status
    }

    /// A snapshot of this workload's labels, copied out so callers cannot
    /// observe or corrupt internal storage by holding a reference across a
    /// mutation.
    #[must_use]
    pub fn labels(&self) -> BTreeMap<String, String> {
        self.labels.clone()
    }

    /// A snapshot of this workload's annotations, copied out for the same
    /// reason as [`Self::labels`].
    #[must_use]
    pub fn annotations(&self) -> BTreeMap<String, String> {
        self.annotations.clone()
    }

    /// When this workload was first registered.
    #[must_use]
    pub const fn created_at(&self) -> SystemTime {
        self.created_at
    }

    /// When this workload was last mutated.
    #[must_use]
    pub const fn updated_at(&self) -> SystemTime {
        self.updated_at
    }

    /// Attach a freshly-issued credential and move to `Status::Active`.
    pub fn install_document(&mut self, document: Arc<IdentityDocument>, clock: &dyn Clock) {
        self.document = Some(document);
        self.status = Status::Active;
        self.updated_at = clock.now();
    }

    /// Attach a trust bundle (independent of credential rotation — a
    /// workload can receive a bundle update without its own SVID changing).
    pub fn install_trust_bundle(&mut self, bundle: Arc<TrustBundle>, clock: &dyn Clock) {
        self.trust_bundle = Some(bundle);
        self.updated_at = clock.now();
    }

    /// Move to `Status::Inactive`, keeping the current credential and
    /// bundle so the workload can be reactivated without re-issuance.
    pub fn deactivate(&mut self, clock: &dyn Clock) {
        if self.status != Status::Terminated {
            self.status = Status::Inactive;
            self.updated_at = clock.now();
        }
    }

    /// Move to `Status::Active`, provided the workload is not terminated
    /// and holds a credential.
    pub fn reactivate(&mut self, clock: &dyn Clock) -> bool {
        if self.status == Status::Terminated || self.document.is_none() {
            return false;
        }
        self.status = Status::Active;
        self.updated_at = clock.now();
        true
    }

    /// Permanently retire the workload. Irreversible.
    pub fn terminate(&mut self, clock: &dyn Clock) {
        self.status = Status::Terminated;
        self.document = None;
        self.updated_at = clock.now();
    }

    /// Set a label, replacing any prior value.
    pub fn set_label(&mut self, key: impl Into<String>, value: impl Into<String>, clock: &dyn Clock) {
        self.labels.insert(key.into(), value.into());
        self.updated_at = clock.now();
    }

    /// Remove a label, returning its prior value if present.
    pub fn remove_label(&mut self, key: &str, clock: &dyn Clock) -> Option<String> {
        let removed = self.labels.remove(key);
        if removed.is_some() {
            self.updated_at = clock.now();
        }
        removed
    }

    /// Replace the entire label map with `labels`, taking ownership of the
    /// caller-provided map so no external reference can alias this
    /// workload's stored copy.
    pub fn set_labels(&mut self, labels: BTreeMap<String, String>, clock: &dyn Clock) {
        self.labels = labels;
        self.updated_at = clock.now();
    }

    /// Set an annotation, replacing any prior value.
    pub fn set_annotation(&mut self, key: impl Into<String>, value: impl Into<String>, clock: &dyn Clock) {
        self.annotations.insert(key.into(), value.into());
        self.updated_at = clock.now();
    }

    /// Remove an annotation, returning its prior value if present.
    pub fn remove_annotation(&mut self, key: &str, clock: &dyn Clock) -> Option<String> {
        let removed = self.annotations.remove(key);
        if removed.is_some() {
            self.updated_at = clock.now();
        }
        removed
    }

    /// Replace the entire annotation map with `annotations`, mirroring
    /// [`Self::set_labels`].
    pub fn set_annotations(&mut self, annotations: BTreeMap<String, String>, clock: &dyn Clock) {
        self.annotations = annotations;
        self.updated_at = clock.now();
    }
}
