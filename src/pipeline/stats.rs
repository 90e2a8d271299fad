//! Rolling frame rate and latency statistics

use std::time::Duration;

use super::types::Timestamp;

/// Figures handed to the presenter and to diagnostics
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct StatsSnapshot {
    pub fps: f64,
    pub latency_ms: f64,
    pub sent_frames: u64,
    pub received_results: u64,
}

impl std::fmt::Display for StatsSnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "FPS: {:.1} | latency: {:.0}ms | sent {} / received {}",
            self.fps, self.latency_ms, self.sent_frames, self.received_results
        )
    }
}

/// Maintains the session statistics.
///
/// `fps` is the achieved send rate over the last window, so throttled ticks
/// show up as a lower figure. Both `fps` and `latency_ms` only move once a full
/// window has elapsed since the previous recompute.
#[derive(Debug)]
pub struct StatsAggregator {
    window: Duration,
    latency_cap_ms: u64,
    sent_frames: u64,
    received_results: u64,
    window_start: Timestamp,
    window_start_sent: u64,
    window_latency_sum: f64,
    window_latency_count: u64,
    fps: f64,
    latency_ms: f64,
}

impl StatsAggregator {
    pub fn new(window: Duration, latency_cap_ms: u64) -> Self {
        Self {
            window,
            latency_cap_ms,
            sent_frames: 0,
            received_results: 0,
            window_start: Timestamp::ZERO,
            window_start_sent: 0,
            window_latency_sum: 0.0,
            window_latency_count: 0,
            fps: 0.0,
            latency_ms: 0.0,
        }
    }

    /// Zero everything and open a new window at `now`
    pub fn reset(&mut self, now: Timestamp) {
        *self = Self::new(self.window, self.latency_cap_ms);
        self.window_start = now;
    }

    pub fn record_sent(&mut self) {
        self.sent_frames += 1;
    }

    pub fn record_received(&mut self) {
        self.received_results += 1;
    }

    /// Account for one correlated round trip
    pub fn record_latency(&mut self, latency_ms: f64) {
        self.window_latency_sum += latency_ms;
        self.window_latency_count += 1;
    }

    /// Recompute `fps` and `latency_ms` if a full window has elapsed.
    ///
    /// Returns whether the figures were refreshed.
    pub fn refresh(&mut self, now: Timestamp) -> bool {
        let elapsed = now.since(self.window_start);
        if elapsed < self.window || elapsed.is_zero() {
            return false;
        }

        let sent_in_window = self.sent_frames - self.window_start_sent;
        self.fps = sent_in_window as f64 * 1000.0 / elapsed.as_millis() as f64;

        if self.window_latency_count > 0 {
            self.latency_ms = self.window_latency_sum / self.window_latency_count as f64;
        }

        self.window_start = now;
        self.window_start_sent = self.sent_frames;
        self.window_latency_sum = 0.0;
        self.window_latency_count = 0;
        true
    }

    /// Unclamped latency of the last window
    pub fn latency_ms(&self) -> f64 {
        self.latency_ms
    }

    pub fn display_latency_ms(&self) -> f64 {
        self.latency_ms.min(self.latency_cap_ms as f64)
    }

    /// Snapshot for display, with the latency clamped to the cap
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            fps: self.fps,
            latency_ms: self.display_latency_ms(),
            sent_frames: self.sent_frames,
            received_results: self.received_results,
        }
    }
}
