use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{MessageId, MessageKind, MessageStatus};

/// A persisted chat message as the server hands it out, both on the event
/// channel (`receive-message`) and in paginated history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    #[serde(rename = "_id", alias = "id")]
    pub id: MessageId,
    pub sender: String,
    pub receiver: String,
    /// Sender's stable account identifier.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender_email: Option<String>,
    /// Text body, or the URL of an uploaded file for media kinds.
    pub text: String,
    #[serde(rename = "type", default)]
    pub kind: MessageKind,
    #[serde(default)]
    pub status: MessageStatus,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub delivered_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub read_at: Option<DateTime<Utc>>,
    /// Temporary id the sending client attached, echoed back so the client
    /// can reconcile its optimistic copy exactly. Never persisted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temp_id: Option<String>,
}

impl ChatMessage {
    /// `delivered_at` is set iff status >= delivered, `read_at` iff read.
    pub fn timestamps_consistent(&self) -> bool {
        let delivered_ok = self.delivered_at.is_some() == (self.status >= MessageStatus::Delivered);
        let read_ok = self.read_at.is_some() == (self.status == MessageStatus::Read);
        delivered_ok && read_ok
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> ChatMessage {
        ChatMessage {
            id: MessageId::generate(),
            sender: "u@x.com".into(),
            receiver: "admin@chat.com".into(),
            sender_email: Some("U@x.com".into()),
            text: "hello".into(),
            kind: MessageKind::Text,
            status: MessageStatus::Sent,
            timestamp: Utc::now(),
            delivered_at: None,
            read_at: None,
            temp_id: None,
        }
    }

    #[test]
    fn serializes_with_wire_field_names() {
        let msg = sample();
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["_id"], msg.id.as_str());
        assert_eq!(json["type"], "text");
        assert_eq!(json["status"], "sent");
        assert_eq!(json["senderEmail"], "U@x.com");
        assert!(json["deliveredAt"].is_null());
        assert!(json.get("tempId").is_none());
    }

    #[test]
    fn timestamp_invariant() {
        let mut msg = sample();
        assert!(msg.timestamps_consistent());
        msg.status = MessageStatus::Delivered;
        assert!(!msg.timestamps_consistent());
        msg.delivered_at = Some(Utc::now());
        assert!(msg.timestamps_consistent());
    }
}
