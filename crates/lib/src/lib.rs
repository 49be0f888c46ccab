//! CareLink client core: authenticated HTTP with one-shot session refresh, the per-user realtime
//! message channel, and the client-side message store. Used by the CLI.

pub mod api;
pub mod channel;
pub mod config;
pub mod http;
pub mod init;
pub mod messages;
pub mod session;
