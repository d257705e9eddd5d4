// SPDX-License-Identifier: Apache-2.0 WITH LLVM-exception

//! Connection registry and invariant enforcer (SPEC_FULL.md §4.4): tracks
//! live mTLS connections and periodically evaluates named invariants
//! against them, independent of any concrete transport.

mod connection;
mod enforcer;
mod invariants;

pub use connection::{ConnectionRecord, ConnectionRegistry, ConnectionState, RegistryStats};
pub use enforcer::{EnforcementPolicy, InvariantEnforcer, InvariantStatus, ViolationAction};
pub use invariants::{EnforcerContext, Invariant, InvariantOutcome};
