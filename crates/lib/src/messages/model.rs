//! Inbound doctor/patient message as pushed on the channel and returned by the REST history.

use chrono::NaiveDateTime;
use serde::{Deserialize, Deserializer, Serialize};

use crate::session::{Role, UserId};

/// Backend message id; unique within the store.
pub type MessageId = i64;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    Question,
    Answer,
    #[default]
    #[serde(other)]
    Generic,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InboundMessage {
    pub id: MessageId,
    pub sender_id: UserId,
    #[serde(default)]
    pub sender_name: String,
    #[serde(default)]
    pub sender_role: Role,
    pub receiver_id: UserId,
    pub content: String,
    #[serde(default)]
    pub message_type: MessageType,
    #[serde(
        default,
        alias = "regTime",
        deserialize_with = "lenient_timestamp",
        skip_serializing_if = "Option::is_none"
    )]
    pub timestamp: Option<NaiveDateTime>,
    #[serde(default, alias = "isRead")]
    pub read: bool,
}

impl InboundMessage {
    /// An answer written by a doctor: the only kind that raises a user-facing notification.
    pub fn is_doctor_answer(&self) -> bool {
        self.message_type == MessageType::Answer && self.sender_role == Role::Doctor
    }
}

/// Frame body that could not be turned into an [`InboundMessage`].
#[derive(Debug, thiserror::Error)]
#[error("malformed message: {0}")]
pub struct MalformedMessage(String);

/// Parse one channel frame body.
pub fn parse_inbound(body: &str) -> Result<InboundMessage, MalformedMessage> {
    serde_json::from_str(body).map_err(|e| MalformedMessage(e.to_string()))
}

/// ISO local date-time ("2025-03-01T10:20:30[.ffffff]"), RFC 3339, or epoch millis; anything else => None.
fn lenient_timestamp<'de, D>(deserializer: D) -> Result<Option<NaiveDateTime>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(serde_json::Value::String(s)) => parse_timestamp_str(&s),
        Some(serde_json::Value::Number(n)) => n
            .as_i64()
            .and_then(chrono::DateTime::from_timestamp_millis)
            .map(|dt| dt.naive_utc()),
        _ => None,
    })
}

fn parse_timestamp_str(s: &str) -> Option<NaiveDateTime> {
    let s = s.trim();
    NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f")
        .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f"))
        .ok()
        .or_else(|| {
            chrono::DateTime::parse_from_rfc3339(s)
                .ok()
                .map(|dt| dt.naive_utc())
        })
}
