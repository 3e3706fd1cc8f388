//! Connection state machine.
//!
//! ```text
//! NotConnected -> Connecting -> Connected -> Closing -> Closed
//!                     |             |                   ^
//!                     v             +-------------------+  (child exited on its own)
//!                   Failed
//! ```

use std::fmt;
use std::sync::Mutex;

use tracing::{debug, warn};

use super::lock;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    #[default]
    NotConnected,
    Connecting,
    Connected,
    Closing,
    Closed,
    Failed,
}

impl ConnectionState {
    pub fn can_transition_to(self, next: ConnectionState) -> bool {
        use ConnectionState::*;
        matches!(
            (self, next),
            (NotConnected, Connecting)
                | (NotConnected, Closing)
                | (Connecting, Connected)
                | (Connecting, Failed)
                | (Connected, Closing)
                | (Connected, Closed)
                | (Closing, Closed)
        )
    }

    /// No further transitions are possible.
    pub fn is_terminal(self) -> bool {
        matches!(self, ConnectionState::Closed | ConnectionState::Failed)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::NotConnected => "not connected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Closing => "closing",
            ConnectionState::Closed => "closed",
            ConnectionState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Current state, shared between the owning thread and the session's workers
#[derive(Debug, Default)]
pub struct StateCell {
    state: Mutex<ConnectionState>,
}

impl StateCell {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self) -> ConnectionState {
        *lock(&self.state)
    }

    /// Move to `next` only if the current state is still `expected`.
    pub fn transition_from(&self, expected: ConnectionState, next: ConnectionState) -> bool {
        let mut state = lock(&self.state);
        if *state != expected || !expected.can_transition_to(next) {
            debug!("connection state {} -> {} skipped, now {}", expected, next, *state);
            return false;
        }
        debug!("connection state {} -> {}", expected, next);
        *state = next;
        true
    }

    /// Move to `next` if the machine allows it. Returns whether it moved.
    pub fn transition(&self, next: ConnectionState) -> bool {
        let mut state = lock(&self.state);
        if state.can_transition_to(next) {
            debug!("connection state {} -> {}", *state, next);
            *state = next;
            true
        } else {
            if *state != next {
                warn!("rejected connection state change {} -> {}", *state, next);
            }
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ConnectionState::*;

    #[test]
    fn test_normal_lifecycle() {
        let cell = StateCell::new();
        assert!(cell.transition(Connecting));
        assert!(cell.transition(Connected));
        assert!(cell.transition(Closing));
        assert!(cell.transition(Closed));
        assert!(cell.get().is_terminal());
    }

    #[test]
    fn test_failed_skips_closing() {
        let cell = StateCell::new();
        assert!(cell.transition(Connecting));
        assert!(cell.transition(Failed));
        assert!(!cell.transition(Closing));
        assert_eq!(cell.get(), Failed);
    }

    #[test]
    fn test_user_close_cannot_skip_closing() {
        assert!(!NotConnected.can_transition_to(Closed));
        assert!(!Connecting.can_transition_to(Closed));
        assert!(Connected.can_transition_to(Closed));
    }

    #[test]
    fn test_terminal_states_are_final() {
        for next in [NotConnected, Connecting, Connected, Closing, Closed, Failed] {
            assert!(!Closed.can_transition_to(next));
            assert!(!Failed.can_transition_to(next));
        }
    }

    #[test]
    fn test_transition_from_requires_expected_state() {
        let cell = StateCell::new();
        cell.transition(Connecting);
        cell.transition(Connected);
        assert!(cell.transition(Closing));
        // Closing -> Closed is legal, but not for a caller that saw Connected.
        assert!(!cell.transition_from(Connected, Closed));
        assert_eq!(cell.get(), Closing);
        assert!(cell.transition_from(Closing, Closed));
    }

    #[test]
    fn test_second_close_transition_rejected() {
        let cell = StateCell::new();
        cell.transition(Connecting);
        cell.transition(Connected);
        assert!(cell.transition(Closed));
        assert!(!cell.transition(Closed));
    }
}
