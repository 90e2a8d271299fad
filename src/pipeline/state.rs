//! Session state management

use super::types::Timestamp;

/// Session state machine
///
/// A session can be restarted after it stops, so `Idle` is both the initial
/// and the final state. State transitions are validated by the coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Not capturing
    Idle,

    /// Start requested, waiting for the channel to open
    Starting {
        /// When the start was requested
        requested_at: Timestamp,
    },

    /// Capture loop active
    Running {
        /// When the session entered Running
        started_at: Timestamp,
    },

    /// Cleanup in progress (transitioning back to Idle)
    Stopping,
}

impl SessionState {
    /// Check if this state transition is valid
    pub fn can_transition_to(&self, target: &SessionState) -> bool {
        use SessionState::*;

        match (self, target) {
            (Idle, Starting { .. }) => true,
            (Idle, Running { .. }) => true,

            (Starting { .. }, Running { .. }) => true,
            (Starting { .. }, Idle) => true, // abandoned start

            (Running { .. }, Stopping) => true,

            (Stopping, Idle) => true,

            (Idle, Idle) => true,

            _ => false,
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            SessionState::Idle => "Idle",
            SessionState::Starting { .. } => "Starting",
            SessionState::Running { .. } => "Running",
            SessionState::Stopping => "Stopping",
        }
    }

    pub fn is_running(&self) -> bool {
        matches!(self, SessionState::Running { .. })
    }

    pub fn is_starting(&self) -> bool {
        matches!(self, SessionState::Starting { .. })
    }

    pub fn is_idle(&self) -> bool {
        matches!(self, SessionState::Idle)
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.description())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_transitions() {
        let idle = SessionState::Idle;
        let starting = SessionState::Starting {
            requested_at: Timestamp::ZERO,
        };
        let running = SessionState::Running {
            started_at: Timestamp::ZERO,
        };
        let stopping = SessionState::Stopping;

        assert!(idle.can_transition_to(&starting));
        assert!(idle.can_transition_to(&running));
        assert!(starting.can_transition_to(&running));
        assert!(starting.can_transition_to(&idle));
        assert!(running.can_transition_to(&stopping));
        assert!(stopping.can_transition_to(&idle));
        assert!(idle.can_transition_to(&idle));
    }

    #[test]
    fn test_invalid_transitions() {
        let idle = SessionState::Idle;
        let running = SessionState::Running {
            started_at: Timestamp::ZERO,
        };
        let stopping = SessionState::Stopping;

        assert!(!running.can_transition_to(&idle)); // must clean up first
        assert!(!idle.can_transition_to(&stopping));
        assert!(!stopping.can_transition_to(&running));
        assert!(!running.can_transition_to(&running));
    }

    #[test]
    fn test_state_checks() {
        let running = SessionState::Running {
            started_at: Timestamp::ZERO,
        };
        assert!(running.is_running());
        assert!(!running.is_idle());
        assert!(SessionState::Idle.is_idle());
        assert!(SessionState::Starting {
            requested_at: Timestamp::ZERO
        }
        .is_starting());
        assert_eq!(SessionState::Stopping.to_string(), "Stopping");
    }
}
