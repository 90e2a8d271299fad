pub mod channel;
pub mod protocol;
pub mod websocket;

pub use self::channel::{Channel, ChannelEvent, SendError};
pub use self::protocol::{DetectionResult, Inbound, ProtocolError};
pub use self::websocket::{ConnectOptions, WsChannel};
