//! Server configuration loaded from environment variables.
//!
//! All settings have sensible defaults so the server can start with zero
//! configuration for local development.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use tandem_shared::constants::{
    DEFAULT_ADMIN_EMAIL, DEFAULT_ADMIN_NAME, DEFAULT_HTTP_PORT, MAX_UPLOAD_BYTES, SEND_RATE_LIMIT,
    SEND_RATE_WINDOW_SECS,
};
use tandem_shared::normalize_email;

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Socket address for the HTTP API and WebSocket endpoint.
    /// Env: `HTTP_ADDR`
    /// Default: `0.0.0.0:5000`
    pub http_addr: SocketAddr,

    /// SQLite database file.
    /// Env: `DATABASE_PATH`
    /// Default: `None` (platform data directory).
    pub database_path: Option<PathBuf>,

    /// Directory where uploaded media files are written.
    /// Env: `UPLOAD_DIR`
    /// Default: `./uploads`
    pub upload_dir: PathBuf,

    /// Externally reachable base URL, used to build media URLs.
    /// Env: `PUBLIC_URL`
    /// Default: `http://localhost:5000`
    pub public_url: String,

    /// Display name of the fixed admin identity.
    /// Env: `ADMIN_NAME`
    pub admin_name: String,

    /// Email of the fixed admin identity (stored normalized).
    /// Env: `ADMIN_EMAIL`
    pub admin_email: String,

    /// Origins allowed by CORS. An empty list means any origin.
    /// Env: `ALLOWED_ORIGINS` (comma-separated, `*` for any)
    /// Default: `http://localhost:3000`
    pub allowed_origins: Vec<String>,

    /// Sends allowed per sender inside `send_rate_window`.
    /// Env: `SEND_RATE_LIMIT`
    pub send_rate_limit: usize,

    /// Trailing window for the send rate limit.
    /// Env: `SEND_RATE_WINDOW_SECS`
    pub send_rate_window: Duration,

    /// REST requests allowed per client IP per minute.
    /// Env: `HTTP_RATE_LIMIT`
    pub http_rate_limit: usize,

    /// Maximum accepted upload size in bytes.
    /// Env: `MAX_UPLOAD_BYTES`
    pub max_upload_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: ([0, 0, 0, 0], DEFAULT_HTTP_PORT).into(),
            database_path: None,
            upload_dir: PathBuf::from("./uploads"),
            public_url: format!("http://localhost:{DEFAULT_HTTP_PORT}"),
            admin_name: DEFAULT_ADMIN_NAME.to_string(),
            admin_email: DEFAULT_ADMIN_EMAIL.to_string(),
            allowed_origins: vec!["http://localhost:3000".to_string()],
            send_rate_limit: SEND_RATE_LIMIT,
            send_rate_window: Duration::from_secs(SEND_RATE_WINDOW_SECS),
            http_rate_limit: 300,
            max_upload_bytes: MAX_UPLOAD_BYTES,
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        config.http_addr = env_parse("HTTP_ADDR", config.http_addr);

        if let Ok(path) = std::env::var("DATABASE_PATH") {
            if !path.trim().is_empty() {
                config.database_path = Some(PathBuf::from(path));
            }
        }

        if let Ok(path) = std::env::var("UPLOAD_DIR") {
            config.upload_dir = PathBuf::from(path);
        }

        if let Ok(url) = std::env::var("PUBLIC_URL") {
            config.public_url = url.trim_end_matches('/').to_string();
        }

        if let Ok(name) = std::env::var("ADMIN_NAME") {
            if !name.trim().is_empty() {
                config.admin_name = name.trim().to_string();
            }
        }

        if let Ok(email) = std::env::var("ADMIN_EMAIL") {
            if !email.trim().is_empty() {
                config.admin_email = normalize_email(&email);
            }
        }

        if let Ok(origins) = std::env::var("ALLOWED_ORIGINS") {
            config.allowed_origins = parse_origins(&origins);
        }

        config.send_rate_limit = env_parse("SEND_RATE_LIMIT", config.send_rate_limit);
        config.send_rate_window = Duration::from_secs(env_parse(
            "SEND_RATE_WINDOW_SECS",
            config.send_rate_window.as_secs(),
        ));
        config.http_rate_limit = env_parse("HTTP_RATE_LIMIT", config.http_rate_limit);
        config.max_upload_bytes = env_parse("MAX_UPLOAD_BYTES", config.max_upload_bytes);

        // RUST_LOG is handled directly by tracing-subscriber's EnvFilter.

        config
    }

    pub fn is_admin_email(&self, email: &str) -> bool {
        normalize_email(email) == self.admin_email
    }
}

/// Read and parse `key`, keeping `default` when unset or unparseable.
fn env_parse<T: FromStr + std::fmt::Debug>(key: &str, default: T) -> T {
    match std::env::var(key) {
        Ok(raw) => match raw.trim().parse::<T>() {
            Ok(value) => value,
            Err(_) => {
                tracing::warn!(key, value = %raw, ?default, "Invalid setting, using default");
                default
            }
        },
        Err(_) => default,
    }
}

/// Split a comma-separated origin list. `*` anywhere means any origin.
fn parse_origins(raw: &str) -> Vec<String> {
    let origins: Vec<String> = raw
        .split(',')
        .map(|o| o.trim().trim_end_matches('/').to_string())
        .filter(|o| !o.is_empty())
        .collect();

    if origins.iter().any(|o| o == "*") {
        Vec::new()
    } else {
        origins
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ServerConfig::default();
        assert_eq!(config.http_addr, ([0, 0, 0, 0], 5000).into());
        assert_eq!(config.send_rate_limit, 10);
        assert_eq!(config.send_rate_window, Duration::from_secs(60));
        assert_eq!(config.max_upload_bytes, 10 * 1024 * 1024);
        assert!(config.is_admin_email(" Admin@Chat.com"));
    }

    #[test]
    fn test_parse_origins() {
        assert_eq!(
            parse_origins("http://a.test/, https://b.test"),
            vec!["http://a.test".to_string(), "https://b.test".to_string()]
        );
        assert!(parse_origins("http://a.test,*").is_empty());
    }
}
