use std::str::FromStr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::OnceLock;

use rand::RngCore;
use serde::{Deserialize, Serialize};

/// Number of bytes in a store-assigned message id.
const MESSAGE_ID_LEN: usize = 12;

/// Server-assigned message identifier.
///
/// Twelve bytes rendered as 24 lowercase hex characters:
/// 4-byte big-endian seconds since the epoch, 5 random bytes fixed per
/// process, and a 3-byte wrapping counter. Ids generated later in time sort
/// after earlier ones, which keeps them roughly in creation order.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(String);

fn process_bytes() -> &'static [u8; 5] {
    static BYTES: OnceLock<[u8; 5]> = OnceLock::new();
    BYTES.get_or_init(|| {
        let mut bytes = [0u8; 5];
        rand::thread_rng().fill_bytes(&mut bytes);
        bytes
    })
}

fn next_counter() -> u32 {
    static COUNTER: OnceLock<AtomicU32> = OnceLock::new();
    COUNTER
        .get_or_init(|| AtomicU32::new(rand::thread_rng().next_u32()))
        .fetch_add(1, Ordering::Relaxed)
}

impl MessageId {
    pub fn generate() -> Self {
        let secs = chrono::Utc::now().timestamp().clamp(0, u32::MAX as i64) as u32;
        let counter = next_counter();

        let mut raw = [0u8; MESSAGE_ID_LEN];
        raw[..4].copy_from_slice(&secs.to_be_bytes());
        raw[4..9].copy_from_slice(process_bytes());
        raw[9..].copy_from_slice(&counter.to_be_bytes()[1..]);
        Self(hex::encode(raw))
    }

    /// Parse a store id. Returns `None` for anything that is not exactly
    /// 24 hex characters, which covers client temporary ids.
    pub fn parse(s: &str) -> Option<Self> {
        let s = s.trim();
        if s.len() != MESSAGE_ID_LEN * 2 {
            return None;
        }
        hex::decode(s).ok()?;
        Some(Self(s.to_ascii_lowercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// What a message body holds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    #[default]
    Text,
    Image,
    Video,
}

impl MessageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Image => "image",
            Self::Video => "video",
        }
    }

    /// Media kind for an uploaded file's mimetype; `None` for anything that
    /// is neither `image/*` nor `video/*`.
    pub fn from_mime(mime: &str) -> Option<Self> {
        let mime = mime.trim().to_ascii_lowercase();
        if mime.starts_with("image/") {
            Some(Self::Image)
        } else if mime.starts_with("video/") {
            Some(Self::Video)
        } else {
            None
        }
    }
}

impl FromStr for MessageKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "text" => Ok(Self::Text),
            "image" => Ok(Self::Image),
            "video" => Ok(Self::Video),
            other => Err(format!("unknown message kind: {other}")),
        }
    }
}

/// Delivery status of a persisted message.
///
/// Variants are declared in lifecycle order so the derived `Ord` matches the
/// only allowed direction of travel: `Sent < Delivered < Read`.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum MessageStatus {
    #[default]
    Sent,
    Delivered,
    Read,
}

impl MessageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sent => "sent",
            Self::Delivered => "delivered",
            Self::Read => "read",
        }
    }

    /// The status after applying `next`, or `None` when `next` would not move
    /// the message forward.
    pub fn advance(self, next: MessageStatus) -> Option<MessageStatus> {
        (next > self).then_some(next)
    }
}

impl FromStr for MessageStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sent" => Ok(Self::Sent),
            "delivered" => Ok(Self::Delivered),
            "read" => Ok(Self::Read),
            other => Err(format!("unknown message status: {other}")),
        }
    }
}

/// Canonical form of an email used as an identity key.
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_ids_parse_back() {
        let id = MessageId::generate();
        assert_eq!(id.as_str().len(), 24);
        assert_eq!(MessageId::parse(id.as_str()), Some(id));
    }

    #[test]
    fn ids_from_one_process_differ_only_in_time_and_counter() {
        let a = MessageId::generate();
        let b = MessageId::generate();
        assert_ne!(a, b);
        assert_eq!(a.as_str()[8..18], b.as_str()[8..18]);
    }

    #[test]
    fn temporary_ids_are_not_store_ids() {
        assert!(MessageId::parse("tmp-4f0c1a52-6a7e-4a53-8f3e-2b0e5a1f9c11").is_none());
        assert!(MessageId::parse("1718031234567").is_none());
        assert!(MessageId::parse("zzzzzzzzzzzzzzzzzzzzzzzz").is_none());
        assert!(MessageId::parse("").is_none());
    }

    #[test]
    fn status_only_moves_forward() {
        assert_eq!(
            MessageStatus::Sent.advance(MessageStatus::Delivered),
            Some(MessageStatus::Delivered)
        );
        assert_eq!(
            MessageStatus::Sent.advance(MessageStatus::Read),
            Some(MessageStatus::Read)
        );
        assert_eq!(MessageStatus::Read.advance(MessageStatus::Delivered), None);
        assert_eq!(MessageStatus::Delivered.advance(MessageStatus::Delivered), None);
    }

    #[test]
    fn kind_from_mime() {
        assert_eq!(MessageKind::from_mime("image/png"), Some(MessageKind::Image));
        assert_eq!(MessageKind::from_mime("VIDEO/mp4"), Some(MessageKind::Video));
        assert_eq!(MessageKind::from_mime("application/pdf"), None);
    }

    #[test]
    fn email_normalization() {
        assert_eq!(normalize_email("  U@X.Com "), "u@x.com");
    }
}
