//! # tandem-shared
//!
//! Types shared by the tandem server and client: the message/user data
//! model, store identifiers, the JSON event protocol spoken over the
//! WebSocket, the REST request/response shapes, and input validation.

pub mod api;
pub mod constants;
pub mod message;
pub mod protocol;
pub mod types;
pub mod validation;

pub use message::ChatMessage;
pub use types::{normalize_email, MessageId, MessageKind, MessageStatus};
pub use validation::ValidationError;
