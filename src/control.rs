//! Cooperative pause / resume / cancel for one root's indexing run.
//!
//! ```text
//!          begin               finish
//!   Idle ────────▶ Indexing ────────▶ Completed
//!    ▲              │    ▲                │
//!    │        pause │    │ resume         │ next begin
//!    │              ▼    │                │
//!    │             Paused                 │
//!    │              │                     │
//!    └── cancel ────┴─────────────────────┘
//! ```
//!
//! Requests are flags set from any thread; the engine polls them. Pause is
//! honoured at batch boundaries (the engine sleeps in [`IndexControl::wait_while_paused`],
//! polling every `pause_poll`); cancel is checked before every file and
//! never interrupts one mid-parse.

use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexState {
    Idle,
    Indexing,
    Paused,
    Completed,
}

impl IndexState {
    pub fn can_transition_to(self, next: IndexState) -> bool {
        use IndexState::*;
        matches!(
            (self, next),
            (Idle, Indexing)
                | (Indexing, Paused)
                | (Paused, Indexing)
                | (Indexing, Completed)
                | (Completed, Idle)
                | (Indexing, Idle)
                | (Paused, Idle)
        )
    }
}

impl fmt::Display for IndexState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            IndexState::Idle => "idle",
            IndexState::Indexing => "indexing",
            IndexState::Paused => "paused",
            IndexState::Completed => "completed",
        };
        f.write_str(name)
    }
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ControlError {
    #[error("illegal index state transition {from} → {to}")]
    IllegalTransition { from: IndexState, to: IndexState },
}

/// Shared handle between the indexing pipeline and whoever steers it.
#[derive(Debug)]
pub struct IndexControl {
    state: Mutex<IndexState>,
    pause_requested: AtomicBool,
    cancel_requested: AtomicBool,
}

impl Default for IndexControl {
    fn default() -> Self {
        Self::new()
    }
}

impl IndexControl {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(IndexState::Idle),
            pause_requested: AtomicBool::new(false),
            cancel_requested: AtomicBool::new(false),
        }
    }

    pub fn state(&self) -> IndexState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Stop starting new batches until [`resume`](Self::resume).
    pub fn pause(&self) {
        self.pause_requested.store(true, Ordering::SeqCst);
    }

    pub fn resume(&self) {
        self.pause_requested.store(false, Ordering::SeqCst);
    }

    /// Stop after the files already started. Merged work is kept and committed.
    pub fn cancel(&self) {
        self.cancel_requested.store(true, Ordering::SeqCst);
    }

    pub fn is_pause_requested(&self) -> bool {
        self.pause_requested.load(Ordering::SeqCst)
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel_requested.load(Ordering::SeqCst)
    }

    pub(crate) fn transition(&self, next: IndexState) -> Result<(), ControlError> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if !state.can_transition_to(next) {
            return Err(ControlError::IllegalTransition {
                from: *state,
                to: next,
            });
        }
        *state = next;
        Ok(())
    }

    /// Enter `Indexing` for a new run. A finished run passes through `Idle`
    /// first; a stale cancel request from the previous run is cleared.
    pub(crate) fn begin(&self) -> Result<(), ControlError> {
        if self.state() == IndexState::Completed {
            self.transition(IndexState::Idle)?;
        }
        self.transition(IndexState::Indexing)?;
        self.cancel_requested.store(false, Ordering::SeqCst);
        Ok(())
    }

    /// Block while a pause is requested, polling every `poll`.
    ///
    /// Returns `true` when the run may continue and `false` when it was
    /// cancelled (before or during the pause). Moves the state to `Paused`
    /// and back to `Indexing` around the wait.
    pub(crate) fn wait_while_paused(&self, poll: Duration) -> Result<bool, ControlError> {
        if self.is_cancelled() {
            return Ok(false);
        }
        if !self.is_pause_requested() {
            return Ok(true);
        }

        self.transition(IndexState::Paused)?;
        while self.is_pause_requested() && !self.is_cancelled() {
            std::thread::sleep(poll);
        }
        if self.is_cancelled() {
            return Ok(false);
        }
        self.transition(IndexState::Indexing)?;
        Ok(true)
    }
}
