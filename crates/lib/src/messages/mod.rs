//! Received messages: wire model, notification event, and the client-side store.

mod model;
mod notification;
mod store;

pub use model::{parse_inbound, InboundMessage, MalformedMessage, MessageId, MessageType};
pub use notification::MessageNotification;
pub use store::{AppendOutcome, MessageState, MessageStore};
