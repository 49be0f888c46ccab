//! Per-user realtime channel: one spawned worker per session identity, driving
//! Disconnected -> Connecting -> Connected -> Reconnecting and feeding the [`MessageStore`].

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;

use super::backoff::ReconnectPolicy;
use super::transport::{ChannelConnection, ChannelTransport, StompTransport};
use crate::config::Config;
use crate::messages::{parse_inbound, InboundMessage, MessageStore};
use crate::session::{Session, UserId};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
}

/// Snapshot published on the status feed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChannelStatus {
    pub state: ConnectionState,
    pub user_id: Option<UserId>,
    pub last_message: Option<InboundMessage>,
    /// Why the last connection ended or failed; cleared on Connected.
    pub last_error: Option<String>,
}

impl ChannelStatus {
    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }
}

/// Source of the full received-message list, used to resync after a reconnect.
#[async_trait]
pub trait HistoryLoader: Send + Sync {
    async fn load(&self, user_id: UserId) -> Result<Vec<InboundMessage>, String>;
}

struct ActiveConnection {
    user_id: UserId,
    stop: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

pub struct RealtimeMessageChannel {
    transport: Arc<dyn ChannelTransport>,
    store: MessageStore,
    policy: ReconnectPolicy,
    topic_prefix: String,
    history: Option<Arc<dyn HistoryLoader>>,
    reload_on_reconnect: bool,
    status: Arc<watch::Sender<ChannelStatus>>,
    active: Option<ActiveConnection>,
}

impl RealtimeMessageChannel {
    pub fn new(
        transport: Arc<dyn ChannelTransport>,
        store: MessageStore,
        policy: ReconnectPolicy,
        topic_prefix: impl Into<String>,
    ) -> Self {
        let (status, _) = watch::channel(ChannelStatus::default());
        Self {
            transport,
            store,
            policy,
            topic_prefix: topic_prefix.into(),
            history: None,
            reload_on_reconnect: true,
            status: Arc::new(status),
            active: None,
        }
    }

    /// STOMP transport and policy from config.
    pub fn from_config(config: &Config, store: MessageStore) -> Self {
        let mut channel = Self::new(
            Arc::new(StompTransport::from_config(config)),
            store,
            config.channel.reconnect.clone(),
            config.channel.topic_prefix.clone(),
        );
        channel.reload_on_reconnect = config.channel.reload_on_reconnect;
        channel
    }

    pub fn with_history_loader(mut self, loader: Arc<dyn HistoryLoader>) -> Self {
        self.history = Some(loader);
        self
    }

    pub fn store(&self) -> &MessageStore {
        &self.store
    }

    pub fn status(&self) -> ChannelStatus {
        self.status.borrow().clone()
    }

    pub fn watch_status(&self) -> watch::Receiver<ChannelStatus> {
        self.status.subscribe()
    }

    pub fn is_connected(&self) -> bool {
        self.status.borrow().is_connected()
    }

    pub fn last_message(&self) -> Option<InboundMessage> {
        self.status.borrow().last_message.clone()
    }

    /// Follow the current session. Same identity: no-op. Different identity: the old
    /// connection is fully torn down and the store cleared before the new one starts.
    pub async fn set_session(&mut self, session: Option<&Session>) {
        let next = session.and_then(Session::identity);
        let current = self.active.as_ref().map(|a| a.user_id);
        if next == current {
            return;
        }
        self.teardown().await;
        if current.is_some() {
            self.store.clear().await;
        }
        if let Some(user_id) = next {
            self.start(user_id);
        }
    }

    /// Tear down any connection and cancel pending reconnects.
    pub async fn shutdown(&mut self) {
        self.teardown().await;
    }

    fn start(&mut self, user_id: UserId) {
        let (stop_tx, stop_rx) = oneshot::channel();
        self.status.send_modify(|s| {
            s.state = ConnectionState::Connecting;
            s.user_id = Some(user_id);
            s.last_error = None;
        });
        let worker = Worker {
            user_id,
            topic: format!("{}{}", self.topic_prefix, user_id),
            transport: self.transport.clone(),
            store: self.store.clone(),
            policy: self.policy.clone(),
            history: if self.reload_on_reconnect {
                self.history.clone()
            } else {
                None
            },
            status: self.status.clone(),
        };
        log::info!("channel: starting for user {}", user_id);
        let task = tokio::spawn(worker.run(stop_rx));
        self.active = Some(ActiveConnection {
            user_id,
            stop: stop_tx,
            task,
        });
    }

    async fn teardown(&mut self) {
        if let Some(active) = self.active.take() {
            log::info!("channel: tearing down for user {}", active.user_id);
            // worker may already be gone
            let _ = active.stop.send(());
            if let Err(e) = active.task.await {
                if e.is_panic() {
                    log::error!("channel worker panicked: {}", e);
                }
            }
        }
        self.status.send_modify(|s| *s = ChannelStatus::default());
    }
}

impl Drop for RealtimeMessageChannel {
    fn drop(&mut self) {
        if let Some(active) = self.active.take() {
            active.task.abort();
        }
    }
}

enum ConnectionEnd {
    Stopped,
    Lost { connected: bool, reason: String },
}

struct Worker {
    user_id: UserId,
    topic: String,
    transport: Arc<dyn ChannelTransport>,
    store: MessageStore,
    policy: ReconnectPolicy,
    history: Option<Arc<dyn HistoryLoader>>,
    status: Arc<watch::Sender<ChannelStatus>>,
}

impl Worker {
    async fn run(self, mut stop: oneshot::Receiver<()>) {
        let mut attempt: u32 = 0;
        let mut tried_before = false;
        loop {
            self.status.send_modify(|s| s.state = ConnectionState::Connecting);
            let end = self.connect_once(tried_before, &mut stop).await;
            tried_before = true;
            let (connected, reason) = match end {
                ConnectionEnd::Stopped => break,
                ConnectionEnd::Lost { connected, reason } => (connected, reason),
            };
            if connected {
                attempt = 0;
            }
            let delay = self.policy.delay_for(attempt);
            attempt = attempt.saturating_add(1);
            log::warn!(
                "channel for user {} lost: {}; reconnecting in {:?}",
                self.user_id,
                reason,
                delay
            );
            self.status.send_modify(|s| {
                s.state = ConnectionState::Reconnecting;
                s.last_error = Some(reason);
            });
            tokio::select! {
                _ = &mut stop => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }
        log::info!("channel: worker for user {} stopped", self.user_id);
    }

    /// One connection lifetime: open, subscribe, optional resync, then pump frames until loss or stop.
    async fn connect_once(
        &self,
        resync: bool,
        stop: &mut oneshot::Receiver<()>,
    ) -> ConnectionEnd {
        let opened = tokio::select! {
            _ = &mut *stop => return ConnectionEnd::Stopped,
            r = self.transport.open(self.user_id) => r,
        };
        let mut conn = match opened {
            Ok(c) => c,
            Err(e) => {
                return ConnectionEnd::Lost {
                    connected: false,
                    reason: e.to_string(),
                }
            }
        };
        if let Err(e) = conn.subscribe(&self.topic).await {
            conn.close().await;
            return ConnectionEnd::Lost {
                connected: false,
                reason: e.to_string(),
            };
        }
        let end = match self.resync(resync, stop).await {
            Some(end) => end,
            None => {
                self.status.send_modify(|s| {
                    s.state = ConnectionState::Connected;
                    s.last_error = None;
                });
                log::info!("channel: connected, subscribed to {}", self.topic);
                self.pump(conn.as_mut(), stop).await
            }
        };
        conn.close().await;
        end
    }

    /// Reload the full list after a reconnect. Some(Stopped) if stop arrived meanwhile.
    async fn resync(
        &self,
        resync: bool,
        stop: &mut oneshot::Receiver<()>,
    ) -> Option<ConnectionEnd> {
        let loader = match (&self.history, resync) {
            (Some(loader), true) => loader,
            _ => return None,
        };
        let loaded = tokio::select! {
            _ = &mut *stop => return Some(ConnectionEnd::Stopped),
            r = loader.load(self.user_id) => r,
        };
        match loaded {
            Ok(list) => self.store.replace_all(list).await,
            Err(e) => log::warn!("channel: reload after reconnect failed: {}", e),
        }
        None
    }

    async fn pump(
        &self,
        conn: &mut dyn ChannelConnection,
        stop: &mut oneshot::Receiver<()>,
    ) -> ConnectionEnd {
        loop {
            let event = tokio::select! {
                _ = &mut *stop => return ConnectionEnd::Stopped,
                ev = conn.next_event() => ev,
            };
            match event {
                Some(Ok(body)) => self.deliver(&body).await,
                Some(Err(e)) => {
                    return ConnectionEnd::Lost {
                        connected: true,
                        reason: e.to_string(),
                    }
                }
                None => {
                    return ConnectionEnd::Lost {
                        connected: true,
                        reason: "connection closed".to_string(),
                    }
                }
            }
        }
    }

    async fn deliver(&self, body: &str) {
        let message = match parse_inbound(body) {
            Ok(m) => m,
            Err(e) => {
                log::warn!("channel: dropping frame: {}", e);
                return;
            }
        };
        self.store.append(message.clone()).await;
        self.status.send_modify(|s| s.last_message = Some(message));
    }
}
