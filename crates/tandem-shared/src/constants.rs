/// Application name
pub const APP_NAME: &str = "tandem";

/// Display name of the fixed admin identity
pub const DEFAULT_ADMIN_NAME: &str = "Admin";

/// Email of the fixed admin identity
pub const DEFAULT_ADMIN_EMAIL: &str = "admin@chat.com";

/// Default HTTP port (REST + WebSocket)
pub const DEFAULT_HTTP_PORT: u16 = 5000;

/// Maximum sends per sender inside the rate-limit window
pub const SEND_RATE_LIMIT: usize = 10;

/// Length of the trailing send rate-limit window in seconds
pub const SEND_RATE_WINDOW_SECS: u64 = 60;

/// Default page size for history and directory listings
pub const DEFAULT_PAGE_SIZE: u32 = 20;

/// Upper bound a client may request per page
pub const MAX_PAGE_SIZE: u32 = 100;

/// Maximum message body size in bytes (text or media URL)
pub const MAX_TEXT_LEN: usize = 4096;

/// Maximum display name length in characters
pub const MAX_NAME_LEN: usize = 64;

/// Maximum upload size in bytes (10 MiB)
pub const MAX_UPLOAD_BYTES: usize = 10 * 1024 * 1024;

/// Prefix of client-generated temporary message ids
pub const TEMP_ID_PREFIX: &str = "tmp-";

/// How far apart (ms) an optimistic entry and its server copy may be
/// timestamped and still be treated as the same message.
pub const RECONCILE_TOLERANCE_MS: i64 = 5_000;

/// WebSocket endpoint path
pub const WS_PATH: &str = "/ws";
