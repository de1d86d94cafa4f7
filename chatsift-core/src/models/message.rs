use chrono::Local;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A chat line pulled out of the watched document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: String,
    pub author: String,
    pub message: String,
    pub timestamp: String,
}

impl ChatMessage {
    pub fn new(author: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            id: new_message_id(),
            author: author.into(),
            message: message.into(),
            timestamp: Local::now().format("%H:%M:%S").to_string(),
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_timestamp(mut self, timestamp: impl Into<String>) -> Self {
        self.timestamp = timestamp.into();
        self
    }

    /// Message text cut to at most `max_chars` characters.
    pub fn truncated_text(&self, max_chars: usize) -> &str {
        match self.message.char_indices().nth(max_chars) {
            Some((idx, _)) => &self.message[..idx],
            None => &self.message,
        }
    }
}

pub fn new_message_id() -> String {
    Uuid::new_v4().simple().to_string()
}

/// Messages flushed together for one classification call.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Batch {
    pub messages: Vec<ChatMessage>,
}

impl Batch {
    pub fn new(messages: Vec<ChatMessage>) -> Self {
        Self { messages }
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn ids(&self) -> Vec<&str> {
        self.messages.iter().map(|m| m.id.as_str()).collect()
    }

    pub fn into_messages(self) -> Vec<ChatMessage> {
        self.messages
    }
}

impl From<Vec<ChatMessage>> for Batch {
    fn from(messages: Vec<ChatMessage>) -> Self {
        Self::new(messages)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_new() {
        let msg = ChatMessage::new("alice", "what is a monad?");
        assert_eq!(msg.author, "alice");
        assert_eq!(msg.message, "what is a monad?");
        assert_eq!(msg.id.len(), 32);
        assert!(!msg.timestamp.is_empty());
    }

    #[test]
    fn test_ids_are_unique() {
        let a = ChatMessage::new("a", "one");
        let b = ChatMessage::new("a", "one");
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn test_truncated_text() {
        let msg = ChatMessage::new("bob", "héllo wörld");
        assert_eq!(msg.truncated_text(5), "héllo");
        assert_eq!(msg.truncated_text(100), "héllo wörld");
        assert_eq!(msg.truncated_text(0), "");
    }

    #[test]
    fn test_batch_ids() {
        let batch = Batch::new(vec![
            ChatMessage::new("a", "first").with_id("1"),
            ChatMessage::new("b", "second").with_id("2"),
        ]);
        assert_eq!(batch.len(), 2);
        assert_eq!(batch.ids(), vec!["1", "2"]);
        assert!(Batch::default().is_empty());
    }
}
