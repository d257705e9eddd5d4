// SPDX-License-Identifier: Apache-2.0 WITH LLVM-exception

//! Error taxonomy for the identity and mTLS control plane.
//!
//! Every fallible core operation returns [`Error`] so callers can match on
//! kind rather than parse a message. See spec §7 for the propagation rules
//! each variant is expected to obey.

use std::fmt;

/// The crate-wide result alias.
pub type Result<T> = std::result::Result<T, Error>;

/// Taxonomy of failures raised by the identity and mTLS control plane.
#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    /// A domain invariant was violated (bad SPIFFE ID, chain order, non-CA
    /// bundle member, key-pair mismatch, malformed configuration).
    #[error("validation failed: {detail}")]
    ValidationFailed {
        /// Human-readable description of the violated invariant.
        detail: String,
    },

    /// The requested connection or workload id does not exist.
    #[error("not found: {id}")]
    NotFound {
        /// The id that was looked up.
        id: String,
    },

    /// A credential or CA certificate is past its `NotAfter`.
    #[error("expired")]
    Expired,

    /// The peer identity was not admitted by the active policy.
    #[error("unauthorized: {detail}")]
    Unauthorized {
        /// Why the peer was rejected.
        detail: String,
    },

    /// The identity source cannot be reached.
    #[error("identity source unavailable: {detail}")]
    Unavailable {
        /// Underlying cause, if known.
        detail: String,
    },

    /// The operation timed out waiting on the identity source or a peer.
    #[error("timed out: {detail}")]
    Timeout {
        /// What was being waited on.
        detail: String,
    },

    /// A duplicate id, an already-in-progress rotation, or a slot at
    /// capacity.
    #[error("conflict: {detail}")]
    Conflict {
        /// Description of the conflicting state.
        detail: String,
    },

    /// A registered invariant failed during periodic enforcement.
    #[error("invariant violation: {invariant} on connection {connection_id}")]
    InvariantViolation {
        /// Name of the invariant that failed (e.g. `"identity_matching"`).
        invariant: &'static str,
        /// The connection the violation was observed on.
        connection_id: String,
    },

    /// A programmer error; fatal in strict mode.
    #[error("internal error: {detail}")]
    Internal {
        /// Description of the unexpected condition.
        detail: String,
    },
}

impl Error {
    /// Build a [`Error::ValidationFailed`] from any displayable detail.
    pub fn validation(detail: impl fmt::Display) -> Self {
        Self::ValidationFailed {
            detail: detail.to_string(),
        }
    }

    /// Build a [`Error::NotFound`].
    pub fn not_found(id: impl fmt::Display) -> Self {
        Self::NotFound { id: id.to_string() }
    }

    /// Build a [`Error::Unauthorized`].
    pub fn unauthorized(detail: impl fmt::Display) -> Self {
        Self::Unauthorized {
            detail: detail.to_string(),
        }
    }

    /// Build a [`Error::Unavailable`].
    pub fn unavailable(detail: impl fmt::Display) -> Self {
        Self::Unavailable {
            detail: detail.to_string(),
        }
    }

    /// Build a [`Error::Conflict`].
    pub fn conflict(detail: impl fmt::Display) -> Self {
        Self::Conflict {
            detail: detail.to_string(),
        }
    }

    /// Build a [`Error::Internal`].
    pub fn internal(detail: impl fmt::Display) -> Self {
        Self::Internal {
            detail: detail.to_string(),
        }
    }

    /// `true` for failures that a retry on the next tick can plausibly fix
    /// (identity-source unavailability or a timeout), as opposed to
    /// structural validation problems.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable { .. } | Self::Timeout { .. })
    }
}
