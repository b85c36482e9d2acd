//! Conversation history: bounded windows and durable snapshots.

pub mod store;
pub mod window;

pub use store::{SnapshotError, SnapshotStore};
pub use window::{HistoryWindow, Message, MessageContent, Role};
