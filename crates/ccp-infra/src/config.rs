//! Configuration loader for the ccp server.
//!
//! Reads a TOML file into [`ServerConfig`]. Falls back to the defaults when
//! the file is missing or malformed, so the server always starts.

use std::path::Path;

use ccp_types::config::ServerConfig;

/// Load server configuration from `path`.
///
/// - If the file does not exist, returns [`ServerConfig::default()`].
/// - If the file exists but fails to parse, logs a warning and returns the default.
/// - Otherwise returns the parsed config with its limits clamped.
pub async fn load_config(path: &Path) -> ServerConfig {
    let content = match tokio::fs::read_to_string(path).await {
        Ok(content) => content,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!("no config found at {}, using defaults", path.display());
            return ServerConfig::default();
        }
        Err(err) => {
            tracing::warn!("failed to read {}: {err}, using defaults", path.display());
            return ServerConfig::default();
        }
    };

    match toml::from_str::<ServerConfig>(&content) {
        Ok(config) => clamp_limits(config),
        Err(err) => {
            tracing::warn!("failed to parse {}: {err}, using defaults", path.display());
            ServerConfig::default()
        }
    }
}

/// Raise zero-valued limits to one. A zero batch size or admission ceiling
/// would stall every package.
pub fn clamp_limits(mut config: ServerConfig) -> ServerConfig {
    config.max_concurrent_packages = config.max_concurrent_packages.max(1);
    config.max_in_flight = config.max_in_flight.max(1);
    config.batch_size = config.batch_size.max(1);
    config.pick_interval_ms = config.pick_interval_ms.max(1);
    config
}
