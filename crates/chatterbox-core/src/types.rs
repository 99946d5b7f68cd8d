//! Message and event types exchanged with a chat transport.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A chat message received on a channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IncomingMessage {
    /// Channel the message was posted in (lower-case, no leading `#`).
    pub channel: String,
    /// Username of the author.
    pub username: String,
    /// Raw message text.
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

impl IncomingMessage {
    pub fn new(channel: &str, username: &str, content: &str) -> Self {
        Self {
            channel: normalize_channel(channel),
            username: username.to_lowercase(),
            content: content.to_string(),
            timestamp: Utc::now(),
        }
    }
}

/// Events emitted by a transport's listen stream.
#[derive(Debug, Clone)]
pub enum ChatEvent {
    Connected { address: String, port: u16 },
    Join { channel: String, username: String },
    Message(IncomingMessage),
}

/// Lower-case a channel name and strip a leading `#`.
pub fn normalize_channel(channel: &str) -> String {
    channel.trim().trim_start_matches('#').to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_channel() {
        assert_eq!(normalize_channel("#SomeChannel"), "somechannel");
        assert_eq!(normalize_channel(" other "), "other");
    }

    #[test]
    fn test_incoming_message_normalizes() {
        let msg = IncomingMessage::new("#Chan", "Alice", "!ping");
        assert_eq!(msg.channel, "chan");
        assert_eq!(msg.username, "alice");
        assert_eq!(msg.content, "!ping");
    }
}
