//! Session state machine.
//!
//! # State Transitions
//! ```text
//! Idle → Connected → Written → Verified → Reporting → Reported { healthy: true }
//! Idle | Connected | Written | Verified → Reporting → Reported { healthy: false }
//! any state → Cleaned (terminal)
//! ```
//!
//! The state lives behind a [`StateGate`] shared with the fault interceptor, so
//! a fault raised after reporting began is recognised as late and ignored.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Connected,
    Written,
    Verified,
    Reporting,
    Reported { healthy: bool },
    Cleaned,
}

impl SessionState {
    /// Whether the single report for this invocation has already been started.
    pub fn is_reporting(self) -> bool {
        matches!(
            self,
            SessionState::Reporting | SessionState::Reported { .. } | SessionState::Cleaned
        )
    }
}

#[derive(Debug)]
pub struct StateGate {
    state: Mutex<SessionState>,
}

impl StateGate {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(SessionState::Idle),
        })
    }

    fn lock(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn current(&self) -> SessionState {
        *self.lock()
    }

    /// Non-blocking read for use inside the panic hook.
    pub fn peek(&self) -> Option<SessionState> {
        match self.state.try_lock() {
            Ok(state) => Some(*state),
            Err(std::sync::TryLockError::Poisoned(poisoned)) => Some(*poisoned.into_inner()),
            Err(std::sync::TryLockError::WouldBlock) => None,
        }
    }

    /// Record progress along the probe sequence. Ignored once reporting has begun.
    pub fn advance(&self, next: SessionState) {
        let mut state = self.lock();
        if *state == SessionState::Cleaned
            || (state.is_reporting() && !matches!(next, SessionState::Reported { .. }))
        {
            return;
        }
        tracing::trace!(from = ?*state, to = ?next, "session state transition");
        *state = next;
    }

    /// Enter the reporting path. Returns `false` when a report was already started.
    pub fn begin_report(&self) -> bool {
        let mut state = self.lock();
        if state.is_reporting() {
            return false;
        }
        *state = SessionState::Reporting;
        true
    }

    /// Enter the terminal state. Returns `false` when cleanup already ran.
    pub fn begin_cleanup(&self) -> bool {
        let mut state = self.lock();
        if *state == SessionState::Cleaned {
            return false;
        }
        *state = SessionState::Cleaned;
        true
    }
}
