use thiserror::Error;

use crate::constants::{MAX_NAME_LEN, MAX_TEXT_LEN};
use crate::protocol::SendMessage;
use crate::types::{normalize_email, MessageKind};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("missing field {0}")]
    Missing(&'static str),
    #[error("field too long: {0}")]
    TooLong(&'static str),
    #[error("invalid email address")]
    InvalidEmail,
    #[error("unsupported media type: {0}")]
    UnsupportedMediaType(String),
}

/// A `send-message` payload that passed validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedSend {
    pub sender: String,
    pub receiver: String,
    pub text: String,
    pub kind: MessageKind,
    pub sender_email: Option<String>,
    pub temp_id: Option<String>,
}

/// Check a `send-message` payload: sender, receiver and a body that is
/// non-empty after trimming are all required. Identities are trimmed and the
/// sender email normalized; the body is kept as typed.
pub fn validate_send(req: &SendMessage) -> Result<ValidatedSend, ValidationError> {
    let sender = req.sender.trim();
    let receiver = req.receiver.trim();
    if sender.is_empty() {
        return Err(ValidationError::Missing("sender"));
    }
    if receiver.is_empty() {
        return Err(ValidationError::Missing("receiver"));
    }
    if req.text.trim().is_empty() {
        return Err(ValidationError::Missing("text"));
    }
    if req.text.len() > MAX_TEXT_LEN {
        return Err(ValidationError::TooLong("text"));
    }

    let sender_email = req
        .sender_email
        .as_deref()
        .map(normalize_email)
        .filter(|e| !e.is_empty());

    Ok(ValidatedSend {
        sender: sender.to_string(),
        receiver: receiver.to_string(),
        text: req.text.clone(),
        kind: req.kind,
        sender_email,
        temp_id: req.temp_id.clone().filter(|t| !t.is_empty()),
    })
}

/// Validate login input, returning the trimmed name and normalized email.
pub fn validate_login(name: &str, email: &str) -> Result<(String, String), ValidationError> {
    let name = name.trim();
    if name.is_empty() {
        return Err(ValidationError::Missing("name"));
    }
    if name.chars().count() > MAX_NAME_LEN {
        return Err(ValidationError::TooLong("name"));
    }
    let email = validate_email(email)?;
    Ok((name.to_string(), email))
}

/// Normalize and sanity-check an email used as an identity key.
pub fn validate_email(email: &str) -> Result<String, ValidationError> {
    let email = normalize_email(email);
    if email.is_empty() {
        return Err(ValidationError::Missing("email"));
    }
    match email.split_once('@') {
        Some((local, domain)) if !local.is_empty() && !domain.is_empty() => Ok(email),
        _ => Err(ValidationError::InvalidEmail),
    }
}

/// Only images and videos may be uploaded.
pub fn validate_upload_mime(mime: &str) -> Result<MessageKind, ValidationError> {
    MessageKind::from_mime(mime).ok_or_else(|| ValidationError::UnsupportedMediaType(mime.into()))
}
