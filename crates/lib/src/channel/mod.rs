//! Realtime message channel: STOMP over WebSocket (optionally SockJS-framed), one per-user topic,
//! automatic reconnect, and delivery into the [`crate::messages::MessageStore`].

mod backoff;
mod realtime;
pub mod sockjs;
pub mod stomp;
mod transport;

pub use backoff::ReconnectPolicy;
pub use realtime::{ChannelStatus, ConnectionState, HistoryLoader, RealtimeMessageChannel};
pub use transport::{ChannelConnection, ChannelError, ChannelTransport, StompTransport};
