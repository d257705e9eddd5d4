// SPDX-License-Identifier: Apache-2.0 WITH LLVM-exception

use std::time::Duration;

/// Timings and admission control for overlap-window rotation
/// (SPEC_FULL.md §4.3), with the spec's defaults.
#[derive(Debug, Clone)]
pub struct ContinuityPolicy {
    /// How long both the old and new credential accept connections.
    pub overlap_duration: Duration,
    /// How long the old endpoint is given to drain in-flight work before
    /// it is force-closed.
    pub graceful_shutdown_timeout: Duration,
    /// Warm-up window before the new endpoint is considered ready.
    pub pre_prep_time: Duration,
    /// Verification window after cutover before declaring success.
    pub post_validation_time: Duration,
    /// How many rotations may be in their overlap window at once.
    pub max_concurrent_rotations: usize,
}

impl Default for ContinuityPolicy {
    fn default() -> Self {
        Self {
            overlap_duration: Duration::from_secs(2),
            graceful_shutdown_timeout: Duration::from_secs(1),
            pre_prep_time: Duration::from_millis(500),
            post_validation_time: Duration::from_millis(500),
            max_concurrent_rotations: 4,
        }
    }
}
