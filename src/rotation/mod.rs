// SPDX-License-Identifier: Apache-2.0 WITH LLVM-exception

//! Credential rotation lifecycle (SPEC_FULL.md §4.2): keeps a workload's
//! SVID fresh via an expiry monitor and a change watcher, both driven
//! through an injected [`crate::Clock`] and [`crate::source::IdentitySource`].

mod observer;
mod service;
mod slot;

pub use observer::RotationObserver;
pub use service::{RotationPolicy, RotationService};
pub use slot::SlotState;
