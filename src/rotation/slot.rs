// SPDX-License-Identifier: Apache-2.0 WITH LLVM-exception

use std::sync::Mutex;
use std::time::SystemTime;

use arc_swap::ArcSwapOption;

use crate::error::{Error, Result};
use crate::source::CurrentCredential;

/// Lifecycle of a [`super::service::RotationService`]'s credential slot.
/// Transitions are guarded by a single mutex so `start`/`stop` fail
/// idempotently rather than racing.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum SlotState {
    /// No background tasks running yet; no credential guaranteed.
    Uninitialized,
    /// Expiry monitor and change watcher are active.
    Running,
    /// `stop()` has completed; the slot retains its last credential for
    /// inspection but will not rotate further.
    Stopped,
}

/// The hot-swappable credential store a [`super::service::RotationService`]
/// guards: readers (`current()`) never block behind the writer (`swap()`),
/// the same `arc_swap` pattern the teacher's CA client uses for its signing
/// key.
#[derive(Debug)]
pub struct CredentialSlot {
    current: ArcSwapOption<CurrentCredential>,
    last_rotation: Mutex<Option<SystemTime>>,
    state: Mutex<SlotState>,
}

impl CredentialSlot {
    /// An empty, `Uninitialized` slot.
    #[must_use]
    pub fn new() -> Self {
        Self {
            current: ArcSwapOption::empty(),
            last_rotation: Mutex::new(None),
            state: Mutex::new(SlotState::Uninitialized),
        }
    }

    /// The held credential, if any has been installed.
    #[must_use]
    pub fn current(&self) -> Option<std::sync::Arc<CurrentCredential>> {
        self.current.load_full()
    }

    /// Replace the held credential and stamp `last_rotation`.
    pub fn swap(&self, credential: CurrentCredential, now: SystemTime) {
        self.current.store(Some(std::sync::Arc::new(credential)));
        *self.last_rotation.lock().unwrap_or_else(|e| e.into_inner()) = Some(now);
    }

    /// When the slot last swapped its credential.
    #[must_use]
    pub fn last_rotation(&self) -> Option<SystemTime> {
        *self.last_rotation.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// The current lifecycle state.
    #[must_use]
    pub fn state(&self) -> SlotState {
        *self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// `Uninitialized -> Running`. Fails with `Conflict` if already
    /// running or stopped.
    pub fn mark_started(&self) -> Result<()> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        match *state {
            SlotState::Uninitialized => {
                *state = SlotState::Running;
                Ok(())
            }
            SlotState::Running => Err(Error::conflict("rotation service is already running")),
            SlotState::Stopped => Err(Error::conflict("rotation service was already stopped")),
        }
    }

    /// `Running -> Stopped`. Fails with `Conflict` if not running.
    pub fn mark_stopped(&self) -> Result<()> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        match *state {
            SlotState::Running => {
                *state = SlotState::Stopped;
                Ok(())
            }
            SlotState::Uninitialized | SlotState::Stopped => {
                Err(Error::conflict("rotation service is not running"))
            }
        }
    }
}

impl Default for CredentialSlot {
    fn default() -> Self {
        Self::new()
    }
}
