//! Received-message history, unread count, send, and read confirmation.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;

use super::{decode, ensure_success, ApiError};
use crate::channel::HistoryLoader;
use crate::config::ServerConfig;
use crate::http::{AuthenticatedRequestClient, RequestOptions};
use crate::messages::{InboundMessage, MessageId, MessageStore};
use crate::session::UserId;

/// Body of a successful `POST messages/send`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendReceipt {
    pub message_id: MessageId,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub status: String,
}

#[derive(Clone)]
pub struct MessagesApi {
    client: AuthenticatedRequestClient,
    server: ServerConfig,
}

impl MessagesApi {
    pub fn new(client: AuthenticatedRequestClient, server: ServerConfig) -> Self {
        Self { client, server }
    }

    pub async fn received(&self, user_id: UserId) -> Result<Vec<InboundMessage>, ApiError> {
        let url = self
            .server
            .api_url(&format!("messages/received/{}", user_id));
        let response = self.client.send(&url, RequestOptions::get()).await?;
        decode(response)
    }

    pub async fn unread_count(&self, user_id: UserId) -> Result<u64, ApiError> {
        let url = self.server.api_url(&format!("messages/unread/{}", user_id));
        let response = self.client.send(&url, RequestOptions::get()).await?;
        decode(response)
    }

    pub async fn send(
        &self,
        sender_id: UserId,
        receiver_id: UserId,
        content: &str,
    ) -> Result<SendReceipt, ApiError> {
        let body = serde_json::json!({
            "senderId": sender_id,
            "receiverId": receiver_id,
            "content": content,
        });
        let response = self
            .client
            .send(
                &self.server.api_url("messages/send"),
                RequestOptions::post().json(body),
            )
            .await?;
        let receipt: SendReceipt = decode(response)?;
        log::info!("sent message {} to user {}", receipt.message_id, receiver_id);
        Ok(receipt)
    }

    /// Tell the server a message was read.
    pub async fn confirm_read(&self, id: MessageId) -> Result<(), ApiError> {
        let url = self
            .server
            .api_url(&format!("messages/read?messageId={}", id));
        let response = self.client.send(&url, RequestOptions::post()).await?;
        ensure_success(response).map(|_| ())
    }

    /// Fire the read confirmation in the background and mark the message read locally right away.
    /// The local mark is not rolled back if the request fails. Await the handle to know the
    /// request has finished.
    pub async fn mark_read(&self, store: &MessageStore, id: MessageId) -> JoinHandle<()> {
        let api = self.clone();
        let handle = tokio::spawn(async move {
            if let Err(e) = api.confirm_read(id).await {
                log::warn!("read confirmation for message {} failed: {}", id, e);
            }
        });
        if !store.mark_read(id).await {
            log::debug!("message {} unknown or already read locally", id);
        }
        handle
    }
}

#[async_trait]
impl HistoryLoader for MessagesApi {
    async fn load(&self, user_id: UserId) -> Result<Vec<InboundMessage>, String> {
        self.received(user_id).await.map_err(|e| e.to_string())
    }
}
