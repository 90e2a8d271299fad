//! Pipeline clock and frame id generation

use tokio::time::Instant;

use super::types::Timestamp;

/// Monotonic millisecond clock for scheduling and latency arithmetic
///
/// All timestamps handed around the pipeline are relative to a base `Instant`.
/// The clock is built on `tokio::time::Instant`, so paused-time tests drive it
/// deterministically.
#[derive(Clone, Copy)]
pub struct PipelineClock {
    base: Instant,
}

impl PipelineClock {
    /// Create a new clock starting now
    pub fn new() -> Self {
        Self {
            base: Instant::now(),
        }
    }

    /// Current position of the clock
    pub fn now(&self) -> Timestamp {
        self.timestamp_from_instant(Instant::now())
    }

    pub fn timestamp_from_instant(&self, instant: Instant) -> Timestamp {
        Timestamp::from_duration(instant.saturating_duration_since(self.base))
    }

    /// The `Instant` a timestamp refers to, used to arm sleeps
    pub fn instant_at(&self, ts: Timestamp) -> Instant {
        self.base + ts.as_duration()
    }
}

impl Default for PipelineClock {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for PipelineClock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineClock")
            .field("elapsed", &self.base.elapsed())
            .finish()
    }
}

/// Frame id generator
///
/// Ids come from a wall-clock read taken when the capture starts. Two captures
/// inside the same millisecond, or a clock stepping backwards, still yield
/// strictly increasing ids.
#[derive(Debug, Default, Clone)]
pub struct FrameIds {
    last: u64,
}

impl FrameIds {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next(&mut self, clock_read_millis: u64) -> u64 {
        let id = clock_read_millis.max(self.last + 1);
        self.last = id;
        id
    }
}

/// Wall-clock milliseconds since the Unix epoch
pub fn wall_clock_millis() -> u64 {
    chrono::Utc::now().timestamp_millis().max(0) as u64
}
