//! Message store: a pure reducer ([`MessageState`]) behind a shared handle ([`MessageStore`]).
//!
//! Invariants after every mutation:
//! - no two messages share an id;
//! - `unread_count` equals the number of messages with `read == false`;
//! - `latest_message` is the most recently appended message (replace_all leaves it alone).

use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};

use super::model::{InboundMessage, MessageId};
use super::notification::MessageNotification;

const NOTIFICATION_CAPACITY: usize = 64;

/// Result of [`MessageState::append`].
#[derive(Debug, Clone, PartialEq)]
pub enum AppendOutcome {
    /// Id already present; state untouched.
    Duplicate,
    Appended(Option<MessageNotification>),
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MessageState {
    messages: Vec<InboundMessage>,
    unread_count: usize,
    latest_message: Option<InboundMessage>,
}

impl MessageState {
    pub fn messages(&self) -> &[InboundMessage] {
        &self.messages
    }

    pub fn unread_count(&self) -> usize {
        self.unread_count
    }

    pub fn latest_message(&self) -> Option<&InboundMessage> {
        self.latest_message.as_ref()
    }

    pub fn get(&self, id: MessageId) -> Option<&InboundMessage> {
        self.messages.iter().find(|m| m.id == id)
    }

    /// Replace the whole list (full reload). Returns a notification when the last message is a doctor answer.
    pub fn replace_all(&mut self, messages: Vec<InboundMessage>) -> Option<MessageNotification> {
        let mut seen = HashSet::with_capacity(messages.len());
        let before = messages.len();
        let messages: Vec<InboundMessage> =
            messages.into_iter().filter(|m| seen.insert(m.id)).collect();
        if messages.len() != before {
            log::debug!(
                "replace_all dropped {} duplicate message id(s)",
                before - messages.len()
            );
        }
        self.unread_count = messages.iter().filter(|m| !m.read).count();
        self.messages = messages;
        self.messages.last().and_then(MessageNotification::for_message)
    }

    /// Append one message unless its id is already present.
    pub fn append(&mut self, message: InboundMessage) -> AppendOutcome {
        if self.messages.iter().any(|m| m.id == message.id) {
            return AppendOutcome::Duplicate;
        }
        if !message.read {
            self.unread_count += 1;
        }
        let notification = MessageNotification::for_message(&message);
        self.latest_message = Some(message.clone());
        self.messages.push(message);
        AppendOutcome::Appended(notification)
    }

    /// Mark an unread message read. False if the id is unknown or already read.
    pub fn mark_read(&mut self, id: MessageId) -> bool {
        match self.messages.iter_mut().find(|m| m.id == id) {
            Some(m) if !m.read => {
                m.read = true;
                self.unread_count = self.unread_count.saturating_sub(1);
                true
            }
            _ => false,
        }
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }
}

/// Shared message store handle. Clones share state and the notification feed.
#[derive(Clone)]
pub struct MessageStore {
    state: Arc<RwLock<MessageState>>,
    notifications: broadcast::Sender<MessageNotification>,
}

impl Default for MessageStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageStore {
    pub fn new() -> Self {
        let (notifications, _) = broadcast::channel(NOTIFICATION_CAPACITY);
        Self {
            state: Arc::new(RwLock::new(MessageState::default())),
            notifications,
        }
    }

    /// Receiver for doctor-answer notifications fired by `replace_all` and `append`.
    pub fn subscribe(&self) -> broadcast::Receiver<MessageNotification> {
        self.notifications.subscribe()
    }

    fn notify(&self, notification: Option<MessageNotification>) {
        if let Some(n) = notification {
            log::info!(
                "new answer from {} (message {})",
                n.sender_name,
                n.message_id
            );
            // no receivers is fine
            let _ = self.notifications.send(n);
        }
    }

    pub async fn replace_all(&self, messages: Vec<InboundMessage>) {
        let mut g = self.state.write().await;
        let n = g.replace_all(messages);
        log::debug!(
            "message store reloaded: {} messages, {} unread",
            g.messages().len(),
            g.unread_count()
        );
        self.notify(n);
    }

    /// True if the message was new.
    pub async fn append(&self, message: InboundMessage) -> bool {
        let mut g = self.state.write().await;
        let id = message.id;
        match g.append(message) {
            AppendOutcome::Duplicate => {
                log::debug!("ignoring duplicate message {}", id);
                false
            }
            AppendOutcome::Appended(n) => {
                self.notify(n);
                true
            }
        }
    }

    /// Local read mark only; the read confirmation request is the caller's (see `MessagesApi::mark_read`).
    pub async fn mark_read(&self, id: MessageId) -> bool {
        self.state.write().await.mark_read(id)
    }

    pub async fn clear(&self) {
        self.state.write().await.clear();
    }

    pub async fn snapshot(&self) -> MessageState {
        self.state.read().await.clone()
    }

    pub async fn messages(&self) -> Vec<InboundMessage> {
        self.state.read().await.messages().to_vec()
    }

    pub async fn unread_count(&self) -> usize {
        self.state.read().await.unread_count()
    }

    pub async fn latest_message(&self) -> Option<InboundMessage> {
        self.state.read().await.latest_message().cloned()
    }
}
