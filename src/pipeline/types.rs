//! Core types for the pipeline system

use std::time::Duration;

/// Timestamp on the pipeline clock
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Timestamp {
    /// Milliseconds since the clock base
    pub millis: u64,
}

impl Timestamp {
    pub const ZERO: Timestamp = Timestamp { millis: 0 };

    pub fn from_millis(millis: u64) -> Self {
        Self { millis }
    }

    pub fn from_duration(duration: Duration) -> Self {
        Self {
            millis: duration.as_millis() as u64,
        }
    }

    pub fn as_duration(&self) -> Duration {
        Duration::from_millis(self.millis)
    }

    pub fn add(&self, duration: Duration) -> Self {
        Self {
            millis: self.millis.saturating_add(duration.as_millis() as u64),
        }
    }

    /// Time elapsed from `earlier` to `self`, zero if `earlier` is later
    pub fn since(&self, earlier: Timestamp) -> Duration {
        Duration::from_millis(self.millis.saturating_sub(earlier.millis))
    }
}

impl std::fmt::Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}ms", self.millis)
    }
}

/// Bookkeeping for one frame that was sent and awaits its result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameRecord {
    pub frame_id: u64,
    pub capture_start: Timestamp,
    pub sent_at: Timestamp,
    pub capture_duration: Duration,
}

/// Per-client session data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub running: bool,
    pub device_id: String,
    pub target_interval: Duration,
}

impl Session {
    pub fn new(device_id: impl Into<String>, target_interval: Duration) -> Self {
        Self {
            running: false,
            device_id: device_id.into(),
            target_interval,
        }
    }
}
