//! Transport abstraction between the pipeline and the inference service

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;

/// Lifecycle and inbound traffic reported by a [`Channel`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    Open,
    /// One inbound text message
    Message(String),
    Error(String),
    Close { code: u16, reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SendError {
    /// The transport is gone; no later send can succeed
    #[error("channel closed")]
    Closed,
    #[error("send failed: {0}")]
    Failed(String),
}

impl SendError {
    /// Whether the failure ends the session
    pub fn is_terminal(&self) -> bool {
        matches!(self, SendError::Closed)
    }
}

/// Duplex transport to the inference service
///
/// Outbound frames go through [`Channel::send`]; the events of the channel are
/// delivered on the receiver handed out when the channel is created.
#[async_trait]
pub trait Channel: Send + Sync {
    fn is_open(&self) -> bool;

    /// Send one frame, resolving once the transport accepted or rejected it.
    async fn send(&self, frame: Bytes) -> Result<(), SendError>;
}
