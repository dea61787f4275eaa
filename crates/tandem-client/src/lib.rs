//! # tandem-client
//!
//! Client side of tandem chat: the per-conversation reconciliation layer,
//! local unread/presence/typing state, the REST client and the event
//! channel connection.

pub mod api;
pub mod connection;
pub mod conversation;
pub mod error;
pub mod events;
pub mod session;
pub mod state;

pub use api::ApiClient;
pub use connection::Connection;
pub use conversation::{Conversation, Entry, EntryKey, LocalStatus, Reconciled};
pub use error::{ClientError, Result};
pub use events::{apply_event, read_receipts};
pub use session::Session;
pub use state::ClientState;

use tracing_subscriber::{fmt, EnvFilter};

/// Install a `RUST_LOG`-aware subscriber for applications embedding the
/// client. Safe to call more than once.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("tandem_client=debug,warn"));

    let _ = fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .try_init();
}
