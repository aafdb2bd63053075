//! Message types for channel communication.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Metadata key carrying the chat kind (`direct` or `group`).
pub const CHAT_TYPE_KEY: &str = "chat_type";

/// Suffix of transport group chat addresses.
const GROUP_ADDRESS_SUFFIX: &str = "@g.us";

/// Status/broadcast pseudo-chat.
const BROADCAST_ADDRESS: &str = "status@broadcast";

/// Inbound message as delivered by a gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelMessage {
    /// Message ID (channel-specific)
    pub id: String,
    /// Gateway that received the message
    pub channel: String,
    /// Chat the message was posted in; equals `sender` for direct chats
    pub chat_id: String,
    /// Contact address of the author
    pub sender: String,
    /// Message content
    pub content: MessageContent,
    /// Additional metadata
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    /// Timestamp (Unix millis)
    pub timestamp: i64,
    /// Trace ID for request correlation
    pub trace_id: String,
}

/// Message content types.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum MessageContent {
    /// Plain text message
    Text { text: String },
    /// Anything else (media, reactions, locations)
    Unsupported { kind: String },
}

impl ChannelMessage {
    /// A direct text message from `sender`.
    pub fn direct_text(channel: &str, sender: &str, text: &str) -> Self {
        Self {
            id: slipbot_common::logging::generate_trace_id(),
            channel: channel.to_string(),
            chat_id: sender.to_string(),
            sender: sender.to_string(),
            content: MessageContent::Text {
                text: text.to_string(),
            },
            metadata: HashMap::new(),
            timestamp: chrono::Utc::now().timestamp_millis(),
            trace_id: slipbot_common::logging::generate_trace_id(),
        }
    }

    /// Get the text content if this is a text message.
    pub fn text(&self) -> Option<&str> {
        match &self.content {
            MessageContent::Text { text } => Some(text),
            MessageContent::Unsupported { .. } => None,
        }
    }

    /// Whether the message came from a group chat or a broadcast list.
    pub fn is_group(&self) -> bool {
        self.chat_id.ends_with(GROUP_ADDRESS_SUFFIX)
            || self.chat_id == BROADCAST_ADDRESS
            || self.metadata.get(CHAT_TYPE_KEY).map(String::as_str) == Some("group")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_direct_text_is_not_group() {
        let msg = ChannelMessage::direct_text("whatsapp", "919825533053", "Sobha");
        assert_eq!(msg.text(), Some("Sobha"));
        assert!(!msg.is_group());
    }

    #[test]
    fn test_group_detection() {
        let mut msg = ChannelMessage::direct_text("whatsapp", "919825533053", "sobha");

        msg.chat_id = "120363025@g.us".into();
        assert!(msg.is_group());

        msg.chat_id = "status@broadcast".into();
        assert!(msg.is_group());

        msg.chat_id = msg.sender.clone();
        msg.metadata.insert(CHAT_TYPE_KEY.into(), "group".into());
        assert!(msg.is_group());
    }

    #[test]
    fn test_message_serialization() {
        let msg = ChannelMessage::direct_text("whatsapp", "919825533053", "E001");
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["content"]["type"], "text");
        assert_eq!(json["content"]["text"], "E001");

        let parsed: ChannelMessage = serde_json::from_value(json).unwrap();
        assert_eq!(parsed.sender, "919825533053");
    }
}
