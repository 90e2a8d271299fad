use bytes::Bytes;
use log::{debug, info, warn};
use std::time::Duration;
use thiserror::Error;

use super::traits::FrameSource;

/// Why a capture attempt did not produce a sendable frame
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CaptureError {
    #[error("device unavailable: {0}")]
    DeviceUnavailable(String),
    #[error("frame read failed: {0}")]
    ReadFailed(String),
    #[error("device returned an empty frame")]
    Empty,
    #[error("frame of {size} bytes exceeds the {limit} byte limit")]
    Oversized { size: usize, limit: usize },
}

impl CaptureError {
    pub fn is_oversized(&self) -> bool {
        matches!(self, CaptureError::Oversized { .. })
    }
}

/// Device that never became ready during initialization
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("device not ready after {attempts} attempts: {last}")]
pub struct DeviceInitError {
    pub attempts: u32,
    pub last: CaptureError,
}

// ── Capturer ────────────────────────────────────────────────────

/// Wraps a [`FrameSource`] and enforces the payload size limit.
pub struct Capturer {
    source: Box<dyn FrameSource>,
    max_frame_size: usize,
}

impl Capturer {
    pub fn new(source: Box<dyn FrameSource>, max_frame_size: usize) -> Self {
        Self {
            source,
            max_frame_size,
        }
    }

    pub fn source_name(&self) -> &str {
        self.source.name()
    }

    pub fn max_frame_size(&self) -> usize {
        self.max_frame_size
    }

    /// Wait for the device, giving up after `attempts` consecutive failures.
    pub async fn initialize(&mut self, attempts: u32, retry: Duration) -> Result<(), DeviceInitError> {
        let attempts = attempts.max(1);
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.source.ready().await {
                Ok(()) => {
                    info!("Capturer: device '{}' ready", self.source.name());
                    return Ok(());
                }
                Err(e) if attempt < attempts => {
                    warn!(
                        "Capturer: device '{}' not ready ({}), retrying in {:?} ({}/{})",
                        self.source.name(),
                        e,
                        retry,
                        attempt,
                        attempts
                    );
                    tokio::time::sleep(retry).await;
                }
                Err(e) => {
                    return Err(DeviceInitError {
                        attempts,
                        last: e,
                    });
                }
            }
        }
    }

    /// Acquire one frame and apply the size gate.
    pub async fn capture(&mut self) -> Result<Bytes, CaptureError> {
        let frame = self.source.grab().await?;
        if frame.is_empty() {
            return Err(CaptureError::Empty);
        }
        if frame.len() > self.max_frame_size {
            return Err(CaptureError::Oversized {
                size: frame.len(),
                limit: self.max_frame_size,
            });
        }
        debug!("Capturer: acquired {:.1}KB frame", frame.len() as f64 / 1024.0);
        Ok(frame)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Frame source replaying a script of outcomes; once the script runs out it
    /// keeps producing `fallback`.
    pub(crate) struct ScriptedSource {
        pub ready: VecDeque<Result<(), CaptureError>>,
        pub frames: VecDeque<Result<Bytes, CaptureError>>,
        pub fallback: Result<Bytes, CaptureError>,
        pub delay: Duration,
        pub grabs: Arc<AtomicUsize>,
    }

    impl ScriptedSource {
        pub(crate) fn steady(size: usize) -> Self {
            Self {
                ready: VecDeque::new(),
                frames: VecDeque::new(),
                fallback: Ok(Bytes::from(vec![0xAB; size])),
                delay: Duration::ZERO,
                grabs: Arc::new(AtomicUsize::new(0)),
            }
        }
    }

    #[async_trait]
    impl FrameSource for ScriptedSource {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn ready(&mut self) -> Result<(), CaptureError> {
            self.ready.pop_front().unwrap_or(Ok(()))
        }

        async fn grab(&mut self) -> Result<Bytes, CaptureError> {
            self.grabs.fetch_add(1, Ordering::SeqCst);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            self.frames
                .pop_front()
                .unwrap_or_else(|| self.fallback.clone())
        }
    }

    #[tokio::test]
    async fn test_oversized_frame_rejected() {
        let source = ScriptedSource::steady(310 * 1024);
        let mut capturer = Capturer::new(Box::new(source), 300 * 1024);

        let err = capturer.capture().await.unwrap_err();
        assert_eq!(
            err,
            CaptureError::Oversized {
                size: 317_440,
                limit: 307_200
            }
        );
        assert!(err.is_oversized());
    }

    #[tokio::test]
    async fn test_frame_at_limit_accepted() {
        let source = ScriptedSource::steady(300 * 1024);
        let mut capturer = Capturer::new(Box::new(source), 300 * 1024);
        assert_eq!(capturer.capture().await.unwrap().len(), 307_200);
    }

    #[tokio::test]
    async fn test_empty_and_failed_reads() {
        let mut source = ScriptedSource::steady(10);
        source.frames.push_back(Ok(Bytes::new()));
        source
            .frames
            .push_back(Err(CaptureError::ReadFailed("io".into())));
        let mut capturer = Capturer::new(Box::new(source), 1024);

        assert_eq!(capturer.capture().await.unwrap_err(), CaptureError::Empty);
        assert!(matches!(
            capturer.capture().await.unwrap_err(),
            CaptureError::ReadFailed(_)
        ));
        assert!(capturer.capture().await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_initialize_retries_then_succeeds() {
        let mut source = ScriptedSource::steady(10);
        source
            .ready
            .push_back(Err(CaptureError::DeviceUnavailable("warming up".into())));
        source
            .ready
            .push_back(Err(CaptureError::DeviceUnavailable("warming up".into())));
        let mut capturer = Capturer::new(Box::new(source), 1024);

        assert!(capturer
            .initialize(3, Duration::from_millis(500))
            .await
            .is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_initialize_gives_up_after_three_failures() {
        let mut source = ScriptedSource::steady(10);
        for _ in 0..3 {
            source
                .ready
                .push_back(Err(CaptureError::DeviceUnavailable("no camera".into())));
        }
        let mut capturer = Capturer::new(Box::new(source), 1024);

        let err = capturer
            .initialize(3, Duration::from_millis(500))
            .await
            .unwrap_err();
        assert_eq!(err.attempts, 3);
        assert_eq!(err.last, CaptureError::DeviceUnavailable("no camera".into()));
    }
}
