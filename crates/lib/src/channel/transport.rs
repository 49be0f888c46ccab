//! Channel transport seam and the STOMP-over-WebSocket implementation.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use std::collections::VecDeque;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use super::sockjs::{self, SockJsFrame};
use super::stomp::{decode_frames, Command, Frame};
use crate::config::{join_url, ChannelFraming, Config};
use crate::session::UserId;

const CLOSE_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("channel connect failed: {0}")]
    Connect(String),
    #[error("channel handshake failed: {0}")]
    Handshake(String),
    #[error("channel protocol error: {0}")]
    Protocol(String),
    #[error("channel closed by server")]
    Closed,
    #[error("channel handshake timed out")]
    Timeout,
}

/// Opens one connection per session identity.
#[async_trait]
pub trait ChannelTransport: Send + Sync {
    /// Connect and complete the handshake for `user_id`.
    async fn open(&self, user_id: UserId) -> Result<Box<dyn ChannelConnection>, ChannelError>;
}

/// A live, handshaken connection.
#[async_trait]
pub trait ChannelConnection: Send {
    async fn subscribe(&mut self, destination: &str) -> Result<(), ChannelError>;
    /// Next message body on the subscription; `None` when the transport closed cleanly.
    async fn next_event(&mut self) -> Option<Result<String, ChannelError>>;
    /// Unsubscribe, disconnect and close the socket. Best effort; never fails.
    async fn close(&mut self);
}

/// STOMP 1.2 client over tokio-tungstenite, raw or SockJS-framed.
#[derive(Debug, Clone)]
pub struct StompTransport {
    endpoint_url: String,
    framing: ChannelFraming,
    handshake_timeout: Duration,
}

impl StompTransport {
    pub fn new(endpoint_url: impl Into<String>, framing: ChannelFraming) -> Self {
        Self {
            endpoint_url: endpoint_url.into(),
            framing,
            handshake_timeout: Duration::from_secs(10),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        let endpoint = join_url(&config.server.ws_base(), &config.channel.endpoint);
        Self::new(endpoint, config.channel.framing)
            .handshake_timeout(Duration::from_millis(config.channel.handshake_timeout_ms))
    }

    pub fn handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    fn socket_url(&self) -> String {
        match self.framing {
            ChannelFraming::Raw => join_url(&self.endpoint_url, "websocket"),
            ChannelFraming::SockJs => sockjs::session_url(&self.endpoint_url),
        }
    }

    fn host_header(&self) -> String {
        let rest = self
            .endpoint_url
            .split_once("://")
            .map(|(_, r)| r)
            .unwrap_or(&self.endpoint_url);
        rest.split('/').next().unwrap_or_default().to_string()
    }

    async fn handshake(&self, user_id: UserId) -> Result<StompConnection, ChannelError> {
        let url = self.socket_url();
        log::debug!("channel connecting to {}", url);
        let (ws, _) = tokio_tungstenite::connect_async(&url)
            .await
            .map_err(|e| ChannelError::Connect(e.to_string()))?;
        let mut conn = StompConnection {
            ws,
            framing: self.framing,
            pending: VecDeque::new(),
            subscription: None,
        };
        if self.framing == ChannelFraming::SockJs {
            conn.await_sockjs_open().await?;
        }
        let connect = Frame::new(Command::Connect)
            .header("accept-version", "1.2,1.1")
            .header("host", self.host_header())
            .header("heart-beat", "0,0")
            .header("userId", user_id.to_string());
        conn.send_frame(&connect).await?;
        loop {
            match conn.next_frame().await {
                Some(Ok(f)) if f.command == Command::Connected => {
                    log::debug!(
                        "STOMP connected, version {}",
                        f.get("version").unwrap_or("1.0")
                    );
                    return Ok(conn);
                }
                Some(Ok(f)) if f.command == Command::Error => {
                    return Err(ChannelError::Handshake(error_text(&f)));
                }
                Some(Ok(f)) => log::debug!("ignoring {} before CONNECTED", f.command),
                Some(Err(e)) => return Err(e),
                None => return Err(ChannelError::Closed),
            }
        }
    }
}

#[async_trait]
impl ChannelTransport for StompTransport {
    async fn open(&self, user_id: UserId) -> Result<Box<dyn ChannelConnection>, ChannelError> {
        let conn = tokio::time::timeout(self.handshake_timeout, self.handshake(user_id))
            .await
            .map_err(|_| ChannelError::Timeout)??;
        Ok(Box::new(conn))
    }
}

fn error_text(frame: &Frame) -> String {
    let header = frame.get("message").unwrap_or("STOMP ERROR");
    if frame.body.trim().is_empty() {
        header.to_string()
    } else {
        format!("{}: {}", header, frame.body.trim())
    }
}

struct StompConnection {
    ws: WebSocketStream<MaybeTlsStream<TcpStream>>,
    framing: ChannelFraming,
    pending: VecDeque<Frame>,
    subscription: Option<String>,
}

impl StompConnection {
    async fn send_frame(&mut self, frame: &Frame) -> Result<(), ChannelError> {
        let text = match self.framing {
            ChannelFraming::Raw => frame.encode(),
            ChannelFraming::SockJs => sockjs::encode(&frame.encode()),
        };
        self.ws
            .send(Message::Text(text))
            .await
            .map_err(|e| ChannelError::Protocol(e.to_string()))
    }

    async fn await_sockjs_open(&mut self) -> Result<(), ChannelError> {
        while let Some(msg) = self.ws.next().await {
            let msg = msg.map_err(|e| ChannelError::Connect(e.to_string()))?;
            let Message::Text(text) = msg else { continue };
            return match sockjs::decode(&text)? {
                SockJsFrame::Open => Ok(()),
                SockJsFrame::Close(code, reason) => Err(ChannelError::Handshake(format!(
                    "SockJS closed {}: {}",
                    code, reason
                ))),
                other => Err(ChannelError::Handshake(format!(
                    "expected SockJS open frame, got {:?}",
                    other
                ))),
            };
        }
        Err(ChannelError::Closed)
    }

    /// Read one transport message and decode the STOMP frames it carries.
    async fn read_frames(&mut self) -> Option<Result<Vec<Frame>, ChannelError>> {
        let msg = match self.ws.next().await? {
            Ok(m) => m,
            Err(e) => return Some(Err(ChannelError::Protocol(e.to_string()))),
        };
        let text = match msg {
            Message::Text(t) => t,
            Message::Binary(b) => String::from_utf8_lossy(&b).into_owned(),
            Message::Close(_) => return None,
            _ => return Some(Ok(Vec::new())),
        };
        let decode = |s: &str| decode_frames(s).map_err(|e| ChannelError::Protocol(e.to_string()));
        Some(match self.framing {
            ChannelFraming::Raw => decode(&text),
            ChannelFraming::SockJs => match sockjs::decode(&text) {
                Ok(SockJsFrame::Messages(items)) => {
                    let mut frames = Vec::new();
                    for item in &items {
                        match decode(item) {
                            Ok(f) => frames.extend(f),
                            Err(e) => return Some(Err(e)),
                        }
                    }
                    Ok(frames)
                }
                Ok(SockJsFrame::Close(code, reason)) => {
                    log::debug!("SockJS close {}: {}", code, reason);
                    Err(ChannelError::Closed)
                }
                Ok(_) => Ok(Vec::new()),
                Err(e) => Err(e),
            },
        })
    }

    async fn next_frame(&mut self) -> Option<Result<Frame, ChannelError>> {
        loop {
            if let Some(f) = self.pending.pop_front() {
                return Some(Ok(f));
            }
            match self.read_frames().await? {
                Ok(frames) => self.pending.extend(frames),
                Err(e) => return Some(Err(e)),
            }
        }
    }
}

#[async_trait]
impl ChannelConnection for StompConnection {
    async fn subscribe(&mut self, destination: &str) -> Result<(), ChannelError> {
        let id = format!("sub-{}", uuid::Uuid::new_v4().simple());
        let frame = Frame::new(Command::Subscribe)
            .header("id", id.clone())
            .header("destination", destination)
            .header("ack", "auto");
        self.send_frame(&frame).await?;
        log::debug!("subscribed to {} as {}", destination, id);
        self.subscription = Some(id);
        Ok(())
    }

    async fn next_event(&mut self) -> Option<Result<String, ChannelError>> {
        loop {
            let frame = match self.next_frame().await? {
                Ok(f) => f,
                Err(e) => return Some(Err(e)),
            };
            match frame.command {
                Command::Message => {
                    let ours = match (&self.subscription, frame.get("subscription")) {
                        (Some(mine), Some(theirs)) => mine == theirs,
                        _ => true,
                    };
                    if ours {
                        return Some(Ok(frame.body));
                    }
                    log::debug!("dropping MESSAGE for foreign subscription");
                }
                Command::Error => return Some(Err(ChannelError::Protocol(error_text(&frame)))),
                other => log::debug!("ignoring STOMP {}", other),
            }
        }
    }

    async fn close(&mut self) {
        let shutdown = async {
            if let Some(id) = self.subscription.take() {
                let unsub = Frame::new(Command::Unsubscribe).header("id", id);
                if let Err(e) = self.send_frame(&unsub).await {
                    log::debug!("unsubscribe failed: {}", e);
                }
            }
            if let Err(e) = self.send_frame(&Frame::new(Command::Disconnect)).await {
                log::debug!("disconnect failed: {}", e);
            }
            if let Err(e) = self.ws.close(None).await {
                log::debug!("websocket close failed: {}", e);
            }
        };
        if tokio::time::timeout(CLOSE_TIMEOUT, shutdown).await.is_err() {
            log::debug!("channel close timed out");
        }
    }
}
