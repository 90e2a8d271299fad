//! Traits for frame acquisition

use async_trait::async_trait;
use bytes::Bytes;

use super::CaptureError;

/// A device that produces one compressed still image on demand
#[async_trait]
pub trait FrameSource: Send {
    /// Human readable name for logging
    fn name(&self) -> &str;

    /// Check whether the device can deliver frames.
    async fn ready(&mut self) -> Result<(), CaptureError>;

    /// Acquire a single compressed frame.
    async fn grab(&mut self) -> Result<Bytes, CaptureError>;
}
