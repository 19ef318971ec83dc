// src/logging.rs

use tracing_subscriber::EnvFilter;

/// Installs a global `fmt` subscriber.
///
/// Respects `RUST_LOG`, falling back to `default_directive` (e.g.
/// `"nila_oauth_config=info"`). Fails if a subscriber is already installed.
pub fn try_init(default_directive: &str) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(default_directive)?,
    };
    tracing_subscriber::fmt().with_env_filter(filter).try_init()
}
