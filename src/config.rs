//! Startup configuration, loaded once from a JSON file.

use serde::{Deserialize, Serialize};
use std::path::Path;

/// Process configuration. Upstream credentials are empty strings when the
/// feature they gate is disabled (no upstream session, no metadata fetcher).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Username used to authenticate against the upstream service. Empty
    /// disables the upstream session entirely.
    #[serde(default)]
    pub osu_username: String,
    /// Password paired with `osu_username`.
    #[serde(default)]
    pub osu_password: String,
    /// API key for the upstream metadata JSON endpoint. Empty disables the
    /// metadata fetcher.
    #[serde(default)]
    pub osu_api_key: String,
    /// LRU store capacity.
    #[serde(default = "default_cache_size")]
    pub maximum_cache_size: usize,
    /// Megabytes of disk space reserved and never written into.
    #[serde(default = "default_free_space")]
    pub required_free_space: u64,
    /// Address the HTTP server binds to.
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    /// `sqlx` connection string for the name registry and beatmaps table.
    #[serde(default = "default_database_url")]
    pub database_url: String,
    /// Directory holding one archive file per identifier.
    #[serde(default = "default_beatmaps_path")]
    pub beatmaps_path: String,
    /// `tracing_subscriber` filter string.
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_cache_size() -> usize {
    256
}

fn default_free_space() -> u64 {
    512
}

fn default_bind_address() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_database_url() -> String {
    "sqlite://beatmaps.db".to_string()
}

fn default_beatmaps_path() -> String {
    "beatmaps".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            osu_username: String::new(),
            osu_password: String::new(),
            osu_api_key: String::new(),
            maximum_cache_size: default_cache_size(),
            required_free_space: default_free_space(),
            bind_address: default_bind_address(),
            database_url: default_database_url(),
            beatmaps_path: default_beatmaps_path(),
            log_level: default_log_level(),
        }
    }
}

impl Config {
    /// Loads configuration from a JSON file at `path`.
    pub fn from_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref())
            .map_err(|e| anyhow::anyhow!("reading config {}: {e}", path.as_ref().display()))?;
        let config: Config = serde_json::from_str(&raw)
            .map_err(|e| anyhow::anyhow!("parsing config {}: {e}", path.as_ref().display()))?;
        Ok(config)
    }

    /// Writes configuration back out as JSON, mainly useful for generating a
    /// starter file.
    pub fn save(&self, path: impl AsRef<Path>) -> anyhow::Result<()> {
        let raw = serde_json::to_string_pretty(self)?;
        std::fs::write(path, raw)?;
        Ok(())
    }

    /// True when upstream credentials are present and the download pipeline
    /// may reach the archive host.
    pub fn upstream_enabled(&self) -> bool {
        !self.osu_username.is_empty() && !self.osu_password.is_empty()
    }

    /// True when the metadata fetcher may call the upstream JSON API.
    pub fn metadata_enabled(&self) -> bool {
        !self.osu_api_key.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_disable_upstream() {
        let config = Config::default();
        assert!(!config.upstream_enabled());
        assert!(!config.metadata_enabled());
        assert_eq!(config.maximum_cache_size, 256);
    }

    #[test]
    fn round_trips_through_json() {
        let config = Config {
            osu_username: "user".into(),
            osu_password: "pass".into(),
            ..Config::default()
        };
        let raw = serde_json::to_string(&config).unwrap();
        let back: Config = serde_json::from_str(&raw).unwrap();
        assert!(back.upstream_enabled());
    }
}
