//! Health counters for the capture loop

use std::sync::atomic::{AtomicU64, Ordering};

/// Health metrics for a pipeline
///
/// Counts every soft failure the loop absorbs. Shared through an `Arc` so the
/// binary can log a summary while the coordinator task keeps running.
#[derive(Debug, Default)]
pub struct PipelineHealth {
    /// Frames handed to the channel
    pub frames_sent: AtomicU64,

    /// Payload bytes handed to the channel
    pub bytes_sent: AtomicU64,

    /// Frames dropped for exceeding the size limit
    pub oversized_frames: AtomicU64,

    /// Failed acquisitions from the frame source
    pub capture_failures: AtomicU64,

    /// Sends the channel rejected
    pub send_failures: AtomicU64,

    /// Inbound messages that were not valid JSON or lacked required fields
    pub malformed_messages: AtomicU64,

    /// Inbound messages of a type other than `result`
    pub ignored_messages: AtomicU64,

    /// Results rendered without a matching pending frame
    pub uncorrelated_results: AtomicU64,

    /// Scheduler ticks skipped because the pending bound was reached
    pub throttled_ticks: AtomicU64,
}

impl PipelineHealth {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_sent(&self, size: usize) {
        self.frames_sent.fetch_add(1, Ordering::Relaxed);
        self.bytes_sent.fetch_add(size as u64, Ordering::Relaxed);
    }

    pub fn record_oversized(&self) {
        self.oversized_frames.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_capture_failure(&self) {
        self.capture_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_send_failure(&self) {
        self.send_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_malformed(&self) {
        self.malformed_messages.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_ignored(&self) {
        self.ignored_messages.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_uncorrelated(&self) {
        self.uncorrelated_results.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_throttle(&self) {
        self.throttled_ticks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn frames_sent(&self) -> u64 {
        self.frames_sent.load(Ordering::Relaxed)
    }

    pub fn oversized_frames(&self) -> u64 {
        self.oversized_frames.load(Ordering::Relaxed)
    }

    pub fn capture_failures(&self) -> u64 {
        self.capture_failures.load(Ordering::Relaxed)
    }

    pub fn send_failures(&self) -> u64 {
        self.send_failures.load(Ordering::Relaxed)
    }

    pub fn malformed_messages(&self) -> u64 {
        self.malformed_messages.load(Ordering::Relaxed)
    }

    pub fn throttled_ticks(&self) -> u64 {
        self.throttled_ticks.load(Ordering::Relaxed)
    }

    /// Share of capture attempts that never reached the channel, in percent
    pub fn drop_rate(&self) -> f64 {
        let dropped = self.oversized_frames() + self.capture_failures();
        let attempts = dropped + self.frames_sent();
        if attempts == 0 {
            return 0.0;
        }
        (dropped as f64 / attempts as f64) * 100.0
    }

    pub fn summary(&self) -> HealthSummary {
        HealthSummary {
            frames_sent: self.frames_sent(),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            oversized_frames: self.oversized_frames(),
            capture_failures: self.capture_failures(),
            send_failures: self.send_failures(),
            malformed_messages: self.malformed_messages(),
            ignored_messages: self.ignored_messages.load(Ordering::Relaxed),
            uncorrelated_results: self.uncorrelated_results.load(Ordering::Relaxed),
            throttled_ticks: self.throttled_ticks(),
            drop_rate: self.drop_rate(),
        }
    }
}

/// Snapshot of health metrics
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HealthSummary {
    pub frames_sent: u64,
    pub bytes_sent: u64,
    pub oversized_frames: u64,
    pub capture_failures: u64,
    pub send_failures: u64,
    pub malformed_messages: u64,
    pub ignored_messages: u64,
    pub uncorrelated_results: u64,
    pub throttled_ticks: u64,
    pub drop_rate: f64,
}

impl std::fmt::Display for HealthSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Health: {} frames sent ({} bytes), {} oversized, {} capture failures ({:.2}% dropped), {} send failures, {} malformed / {} ignored messages, {} uncorrelated results, {} throttled ticks",
            self.frames_sent,
            self.bytes_sent,
            self.oversized_frames,
            self.capture_failures,
            self.drop_rate,
            self.send_failures,
            self.malformed_messages,
            self.ignored_messages,
            self.uncorrelated_results,
            self.throttled_ticks
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_health_metrics() {
        let health = PipelineHealth::new();

        health.record_sent(1000);
        health.record_sent(2000);
        health.record_sent(1500);
        health.record_oversized();

        let summary = health.summary();
        assert_eq!(summary.frames_sent, 3);
        assert_eq!(summary.bytes_sent, 4500);
        assert_eq!(summary.oversized_frames, 1);
        assert_eq!(summary.drop_rate, 25.0);
    }

    #[test]
    fn test_drop_rate_without_attempts() {
        let health = PipelineHealth::new();
        assert_eq!(health.drop_rate(), 0.0);
        health.record_throttle();
        assert_eq!(health.throttled_ticks(), 1);
        assert_eq!(health.drop_rate(), 0.0);
    }
}
