//! Event-channel protocol.
//!
//! Every WebSocket text frame carries one JSON object of the form
//! `{"event": "<name>", "data": {...}}`. Event names are kebab-case and
//! payload fields camelCase, matching what browser clients already emit.

use serde::{Deserialize, Serialize};

use crate::message::ChatMessage;
use crate::types::MessageKind;

// ── Client → Server ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum ClientEvent {
    SendMessage(SendMessage),
    UserOnline(Presence),
    UserOffline(Presence),
    Typing(Typing),
    StopTyping(Typing),
    MessageDelivered(DeliveredAck),
    MessageRead(ReadAck),
    MarkConversationRead(ConversationRead),
}

/// A message to persist and relay. Missing fields deserialize as empty and
/// are rejected by validation rather than by the parser.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessage {
    #[serde(default)]
    pub sender: String,
    #[serde(default)]
    pub receiver: String,
    #[serde(default)]
    pub text: String,
    #[serde(rename = "type", default)]
    pub kind: MessageKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender_email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temp_id: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Presence {
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Typing {
    #[serde(default)]
    pub sender: String,
    #[serde(default)]
    pub receiver: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveredAck {
    #[serde(default)]
    pub message_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<String>,
}

/// Read acknowledgement. Carries a message id, an admin/user pair, or both.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadAck {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub admin: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub receiver: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationRead {
    #[serde(default)]
    pub user_email: String,
    #[serde(default)]
    pub sender_email: String,
}

// ── Server → Clients ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum ServerEvent {
    ReceiveMessage(ChatMessage),
    UserOnline(Presence),
    UserOffline(Presence),
    Typing(Typing),
    StopTyping(Typing),
    MessageDelivered(Delivered),
    MessageRead(Read),
    UnreadCountUpdated(UnreadCount),
    UnreadCountReset(UnreadCount),
    MessageError(MessageError),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Delivered {
    pub message_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Read {
    pub message_id: String,
    pub sender: String,
    pub receiver: String,
}

/// Unread counter owned by `user_email`, keyed by `sender_email`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnreadCount {
    pub user_email: String,
    pub sender_email: String,
    pub count: u32,
}

/// Rejection notice sent to the originating connection only. `event` names
/// the client event that failed; it is absent for frames that never parsed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageError {
    pub error: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event: Option<String>,
}

impl ClientEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::SendMessage(_) => "send-message",
            Self::UserOnline(_) => "user-online",
            Self::UserOffline(_) => "user-offline",
            Self::Typing(_) => "typing",
            Self::StopTyping(_) => "stop-typing",
            Self::MessageDelivered(_) => "message-delivered",
            Self::MessageRead(_) => "message-read",
            Self::MarkConversationRead(_) => "mark-conversation-read",
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}

impl ServerEvent {
    pub fn error(message: impl Into<String>) -> Self {
        Self::MessageError(MessageError {
            error: message.into(),
            event: None,
        })
    }

    /// Error answering a specific client event, e.g. `"send-message"`.
    pub fn rejected(event: &str, message: impl Into<String>) -> Self {
        Self::MessageError(MessageError {
            error: message.into(),
            event: Some(event.to_string()),
        })
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_browser_send_message() {
        let raw = r#"{"event":"send-message","data":{"sender":"u@x.com","receiver":"admin@chat.com","text":"hi","type":"image","senderEmail":"u@x.com","tempId":"tmp-1"}}"#;
        let ClientEvent::SendMessage(send) = ClientEvent::from_json(raw).unwrap() else {
            panic!("expected send-message");
        };
        assert_eq!(send.kind, MessageKind::Image);
        assert_eq!(send.sender_email.as_deref(), Some("u@x.com"));
        assert_eq!(send.temp_id.as_deref(), Some("tmp-1"));
    }

    #[test]
    fn missing_fields_parse_as_empty() {
        let raw = r#"{"event":"send-message","data":{"sender":"u@x.com"}}"#;
        let ClientEvent::SendMessage(send) = ClientEvent::from_json(raw).unwrap() else {
            panic!("expected send-message");
        };
        assert!(send.receiver.is_empty());
        assert!(send.text.is_empty());
        assert_eq!(send.kind, MessageKind::Text);
    }

    #[test]
    fn read_ack_accepts_partial_payloads() {
        let raw = r#"{"event":"message-read","data":{"admin":"admin@chat.com","user":"u@x.com"}}"#;
        let ClientEvent::MessageRead(ack) = ClientEvent::from_json(raw).unwrap() else {
            panic!("expected message-read");
        };
        assert!(ack.message_id.is_none());
        assert_eq!(ack.user.as_deref(), Some("u@x.com"));
    }

    #[test]
    fn unread_events_use_camel_case() {
        let event = ServerEvent::UnreadCountReset(UnreadCount {
            user_email: "admin@chat.com".into(),
            sender_email: "u@x.com".into(),
            count: 0,
        });
        let json: serde_json::Value = serde_json::from_str(&event.to_json().unwrap()).unwrap();
        assert_eq!(json["event"], "unread-count-reset");
        assert_eq!(json["data"]["userEmail"], "admin@chat.com");
        assert_eq!(json["data"]["count"], 0);
    }

    #[test]
    fn rejection_names_the_failed_event() {
        let json = ServerEvent::rejected("send-message", "Rate limit exceeded")
            .to_json()
            .unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["data"]["event"], "send-message");

        let bare = ServerEvent::error("Invalid event format").to_json().unwrap();
        let value: serde_json::Value = serde_json::from_str(&bare).unwrap();
        assert!(value["data"].get("event").is_none());
        let ServerEvent::MessageError(parsed) = ServerEvent::from_json(&bare).unwrap() else {
            panic!("expected message-error");
        };
        assert!(parsed.event.is_none());
    }

    #[test]
    fn unknown_event_is_rejected() {
        assert!(ClientEvent::from_json(r#"{"event":"delete-message","data":{}}"#).is_err());
    }
}
