//! Bounded per-user conversation window.
//!
//! The window is a fixed-capacity ring: appending at capacity drops the
//! oldest message. Messages are immutable once appended and replayed to the
//! completion provider in arrival order.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Who authored a message. Serialized as a lowercase string in snapshots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    Tool,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::Tool => "tool",
        }
    }
}

/// Message payload variants.
///
/// Tool results carry the correlation id of the call they answer; image
/// messages carry the base64-encoded bytes alongside a caption so vision
/// requests can be replayed from a snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MessageContent {
    Text {
        text: String,
    },
    ToolResult {
        content: String,
        tool_call_id: String,
    },
    Image {
        text: String,
        media_type: String,
        data: String,
    },
}

/// A single conversation entry: who said it and what was said.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: MessageContent,
}

impl Message {
    pub fn text(role: Role, text: impl Into<String>) -> Self {
        Self {
            role,
            content: MessageContent::Text { text: text.into() },
        }
    }

    pub fn tool_result(content: impl Into<String>, tool_call_id: impl Into<String>) -> Self {
        Self {
            role: Role::Tool,
            content: MessageContent::ToolResult {
                content: content.into(),
                tool_call_id: tool_call_id.into(),
            },
        }
    }

    pub fn image(
        text: impl Into<String>,
        media_type: impl Into<String>,
        data: impl Into<String>,
    ) -> Self {
        Self {
            role: Role::User,
            content: MessageContent::Image {
                text: text.into(),
                media_type: media_type.into(),
                data: data.into(),
            },
        }
    }
}

/// Fixed-capacity chronological message window for one user.
#[derive(Debug, Clone)]
pub struct HistoryWindow {
    capacity: usize,
    messages: VecDeque<Message>,
}

impl HistoryWindow {
    /// Create an empty window. A zero capacity is clamped to one so
    /// `append` always retains the newest message.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            messages: VecDeque::with_capacity(capacity),
        }
    }

    /// Rehydrate a window from snapshot contents. The stored length is
    /// trusted even when it exceeds `capacity`; oversized windows shrink
    /// back to capacity on the next append, never on load.
    pub fn from_messages(capacity: usize, messages: Vec<Message>) -> Self {
        Self {
            capacity: capacity.max(1),
            messages: messages.into(),
        }
    }

    /// Append one message, dropping the oldest entries if the window is at
    /// (or above) capacity. Never fails.
    pub fn append(&mut self, message: Message) {
        while self.messages.len() >= self.capacity {
            self.messages.pop_front();
        }
        self.messages.push_back(message);
    }

    /// Chronological, non-mutating view of the window.
    pub fn messages(&self) -> impl Iterator<Item = &Message> {
        self.messages.iter()
    }

    pub fn to_vec(&self) -> Vec<Message> {
        self.messages.iter().cloned().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msg(i: usize) -> Message {
        Message::text(Role::User, format!("message {i}"))
    }

    #[test]
    fn append_keeps_arrival_order() {
        let mut window = HistoryWindow::new(5);
        for i in 0..3 {
            window.append(msg(i));
        }

        let texts: Vec<_> = window
            .messages()
            .map(|m| match &m.content {
                MessageContent::Text { text } => text.clone(),
                _ => unreachable!(),
            })
            .collect();
        assert_eq!(texts, vec!["message 0", "message 1", "message 2"]);
    }

    #[test]
    fn capacity_plus_one_appends_retain_last_n() {
        let n = 4;
        let mut window = HistoryWindow::new(n);
        for i in 0..=n {
            window.append(msg(i));
        }

        assert_eq!(window.len(), n);
        assert_eq!(window.to_vec(), vec![msg(1), msg(2), msg(3), msg(4)]);
    }

    #[test]
    fn oversized_snapshot_is_not_truncated_on_load() {
        let stored: Vec<_> = (0..8).map(msg).collect();
        let window = HistoryWindow::from_messages(3, stored.clone());
        assert_eq!(window.len(), 8);
        assert_eq!(window.to_vec(), stored);
    }

    #[test]
    fn oversized_window_shrinks_to_capacity_on_append() {
        let stored: Vec<_> = (0..8).map(msg).collect();
        let mut window = HistoryWindow::from_messages(3, stored);

        window.append(msg(8));
        assert_eq!(window.len(), 3);
        assert_eq!(window.to_vec(), vec![msg(6), msg(7), msg(8)]);
    }

    #[test]
    fn zero_capacity_is_clamped() {
        let mut window = HistoryWindow::new(0);
        window.append(msg(0));
        window.append(msg(1));
        assert_eq!(window.to_vec(), vec![msg(1)]);
    }

    #[test]
    fn messages_iterator_is_restartable() {
        let mut window = HistoryWindow::new(4);
        window.append(msg(0));
        window.append(msg(1));

        assert_eq!(window.messages().count(), 2);
        // A second pass sees the same sequence; iteration does not mutate.
        assert_eq!(window.messages().count(), 2);
    }

    #[test]
    fn role_serializes_lowercase() {
        let json = serde_json::to_string(&Role::Assistant).unwrap();
        assert_eq!(json, "\"assistant\"");
    }

    #[test]
    fn message_content_round_trips_through_json() {
        let message = Message::tool_result("14:05", "get_current_time");
        let json = serde_json::to_string(&message).unwrap();
        let back: Message = serde_json::from_str(&json).unwrap();
        assert_eq!(back, message);
    }
}
