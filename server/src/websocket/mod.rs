//! WebSocket support for live store notifications.
//!
//! UI tabs connect to `/events` and are told about store lifecycle signals
//! and sync-queue changes as they happen, instead of polling.

mod manager;
mod protocol;

pub use manager::{spawn_event_forwarder, ConnectionManager};
pub use protocol::*;
