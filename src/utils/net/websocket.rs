//! WebSocket implementation of [`Channel`]

use async_trait::async_trait;
use async_tungstenite::tokio::{ConnectStream, connect_async};
use async_tungstenite::tungstenite::{self, Message};
use async_tungstenite::WebSocketStream;
use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use log::{debug, error, info, warn};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use super::channel::{Channel, ChannelEvent, SendError};

const ABNORMAL_CLOSURE: u16 = 1006;
const NORMAL_CLOSURE: u16 = 1000;

type Outbound = (Bytes, oneshot::Sender<Result<(), SendError>>);

#[derive(Debug, Clone)]
pub struct ConnectOptions {
    pub timeout: Duration,
    pub attempts: u32,
    pub retry_delay: Duration,
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self {
            timeout: crate::assets::CONNECT_TIMEOUT,
            attempts: crate::assets::CONNECT_ATTEMPTS,
            retry_delay: Duration::from_millis(500),
        }
    }
}

/// Append the device id to the service endpoint.
pub fn realtime_url(base: &str, device_id: &str) -> String {
    let separator = if base.contains('?') { '&' } else { '?' };
    format!("{}{}device_id={}", base, separator, device_id)
}

/// WebSocket channel to the inference service
///
/// Connecting happens in the background, like a browser socket: the channel
/// is returned at once and reports [`ChannelEvent::Open`] when the handshake
/// completes. Frames are written as binary messages; text messages are
/// forwarded as [`ChannelEvent::Message`].
pub struct WsChannel {
    outbound: mpsc::Sender<Outbound>,
    open: Arc<AtomicBool>,
    cancel: CancellationToken,
}

impl WsChannel {
    pub fn connect(
        url: String,
        options: ConnectOptions,
    ) -> (Self, mpsc::UnboundedReceiver<ChannelEvent>) {
        let (outbound_tx, outbound_rx) = mpsc::channel::<Outbound>(8);
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let open = Arc::new(AtomicBool::new(false));
        let cancel = CancellationToken::new();

        tokio::spawn(drive(
            url,
            options,
            Arc::clone(&open),
            events_tx,
            outbound_rx,
            cancel.clone(),
        ));

        (
            Self {
                outbound: outbound_tx,
                open,
                cancel,
            },
            events_rx,
        )
    }

    /// Close the socket and stop the I/O task.
    pub fn close(&self) {
        self.cancel.cancel();
    }
}

impl Drop for WsChannel {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

#[async_trait]
impl Channel for WsChannel {
    fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    async fn send(&self, frame: Bytes) -> Result<(), SendError> {
        if !self.is_open() {
            return Err(SendError::Closed);
        }
        let (ack_tx, ack_rx) = oneshot::channel();
        self.outbound
            .send((frame, ack_tx))
            .await
            .map_err(|_| SendError::Closed)?;
        ack_rx.await.unwrap_or(Err(SendError::Closed))
    }
}

fn classify(err: tungstenite::Error) -> SendError {
    match err {
        tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed => {
            SendError::Closed
        }
        tungstenite::Error::Io(e) if e.kind() == std::io::ErrorKind::BrokenPipe => {
            SendError::Closed
        }
        other => SendError::Failed(other.to_string()),
    }
}

async fn establish(
    url: &str,
    options: &ConnectOptions,
    events: &mpsc::UnboundedSender<ChannelEvent>,
    cancel: &CancellationToken,
) -> Option<WebSocketStream<ConnectStream>> {
    let attempts = options.attempts.max(1);
    for attempt in 1..=attempts {
        info!("WsChannel: connecting to {} ({}/{})", url, attempt, attempts);
        let outcome = tokio::select! {
            _ = cancel.cancelled() => return None,
            outcome = tokio::time::timeout(options.timeout, connect_async(url)) => outcome,
        };

        let reason = match outcome {
            Ok(Ok((stream, _response))) => return Some(stream),
            Ok(Err(e)) => e.to_string(),
            Err(_) => format!("connect timed out after {:?}", options.timeout),
        };

        if attempt == attempts {
            error!("WsChannel: giving up on {}: {}", url, reason);
            let _ = events.send(ChannelEvent::Error(reason.clone()));
            let _ = events.send(ChannelEvent::Close {
                code: ABNORMAL_CLOSURE,
                reason,
            });
            return None;
        }

        warn!("WsChannel: connect failed: {}", reason);
        tokio::select! {
            _ = cancel.cancelled() => return None,
            _ = tokio::time::sleep(options.retry_delay) => {}
        }
    }
    None
}

async fn drive(
    url: String,
    options: ConnectOptions,
    open: Arc<AtomicBool>,
    events: mpsc::UnboundedSender<ChannelEvent>,
    mut outbound: mpsc::Receiver<Outbound>,
    cancel: CancellationToken,
) {
    let Some(stream) = establish(&url, &options, &events, &cancel).await else {
        return;
    };

    info!("WsChannel: connected to {}", url);
    open.store(true, Ordering::Release);
    let _ = events.send(ChannelEvent::Open);

    let (mut sink, mut stream) = stream.split();
    let (code, reason) = loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                let _ = sink.send(Message::Close(None)).await;
                break (NORMAL_CLOSURE, "closed by client".to_string());
            }
            Some((frame, ack)) = outbound.recv() => {
                let result = sink.send(Message::Binary(frame)).await.map_err(classify);
                let closed = matches!(result, Err(SendError::Closed));
                let _ = ack.send(result);
                if closed {
                    break (ABNORMAL_CLOSURE, "connection lost while sending".to_string());
                }
            }
            inbound = stream.next() => match inbound {
                Some(Ok(Message::Text(text))) => {
                    let _ = events.send(ChannelEvent::Message(text.as_str().to_owned()));
                }
                Some(Ok(Message::Binary(data))) => {
                    let _ = events.send(ChannelEvent::Message(
                        String::from_utf8_lossy(&data).into_owned(),
                    ));
                }
                Some(Ok(Message::Close(frame))) => {
                    break match frame {
                        Some(frame) => (u16::from(frame.code), frame.reason.as_str().to_owned()),
                        None => (NORMAL_CLOSURE, String::new()),
                    };
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    let _ = events.send(ChannelEvent::Error(e.to_string()));
                    break (ABNORMAL_CLOSURE, e.to_string());
                }
                None => break (ABNORMAL_CLOSURE, "stream ended".to_string()),
            }
        }
    };

    open.store(false, Ordering::Release);
    debug!("WsChannel: closed ({} {})", code, reason);
    let _ = events.send(ChannelEvent::Close { code, reason });
}
