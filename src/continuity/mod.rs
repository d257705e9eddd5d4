// SPDX-License-Identifier: Apache-2.0 WITH LLVM-exception

//! Overlap-window continuity (SPEC_FULL.md §4.3): keeps a server listener
//! or client connection serving traffic throughout a credential rotation,
//! rather than the simple swap [`crate::rotation::RotationService`]
//! performs on its own.

mod coordinator;
mod policy;

pub use coordinator::{ContinuityCoordinator, ContinuityObserver};
pub use policy::ContinuityPolicy;
