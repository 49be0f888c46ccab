//! In-process notification raised when a doctor's answer enters the store.

use serde::Serialize;

use super::model::{InboundMessage, MessageId, MessageType};
use crate::session::Role;

/// Delivery is at-least-once: a full reload right after a live append can repeat a message id.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageNotification {
    pub message_id: MessageId,
    pub content: String,
    pub sender_name: String,
    pub sender_role: Role,
    pub message_type: MessageType,
}

impl MessageNotification {
    /// Notification for `message` if it qualifies (doctor answer), else None.
    pub fn for_message(message: &InboundMessage) -> Option<Self> {
        message.is_doctor_answer().then(|| Self {
            message_id: message.id,
            content: message.content.clone(),
            sender_name: message.sender_name.clone(),
            sender_role: message.sender_role.clone(),
            message_type: message.message_type,
        })
    }
}
