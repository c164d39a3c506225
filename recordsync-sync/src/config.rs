//! Runtime configuration.

use crate::error::{SyncError, SyncResult};
use reqwest::Url;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Configuration for the sync runtime. Every field has a default, so a
/// config file only needs to name what it overrides.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Base URL of the remote authority.
    pub remote_base_url: String,
    /// Path of the records collection, relative to the base URL.
    pub records_path: String,
    /// Path of the liveness endpoint.
    pub health_path: String,
    /// WebSocket URL for change notifications. Derived from the base URL
    /// (`ws(s)://<host>/changes`) when unset.
    pub push_url: Option<String>,
    /// SQLite database file holding records and the operation queue.
    pub database_path: PathBuf,
    /// Timeout for each remote request (ms).
    pub request_timeout_ms: u64,
    /// Timeout for one liveness probe (ms).
    pub probe_timeout_ms: u64,
    /// Interval between probes while the remote is unconfirmed (ms).
    pub probe_interval_ms: u64,
    /// Grace wait before giving up on an unreachable drain (ms).
    pub drain_grace_ms: u64,
    /// Pause between pushing local intents and pulling the remote snapshot (ms).
    pub settle_delay_ms: u64,
    /// Reconnect attempts before the push channel gives up.
    pub push_max_reconnect_attempts: u32,
    /// Fixed delay between push reconnect attempts (ms).
    pub push_reconnect_delay_ms: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            remote_base_url: "http://localhost:3000".to_string(),
            records_path: "/records".to_string(),
            health_path: "/health".to_string(),
            push_url: None,
            database_path: PathBuf::from("recordsync.db"),
            request_timeout_ms: 10_000,
            probe_timeout_ms: 5_000,
            probe_interval_ms: 10_000,
            drain_grace_ms: 1_000,
            settle_delay_ms: 1_000,
            push_max_reconnect_attempts: 5,
            push_reconnect_delay_ms: 3_000,
        }
    }
}

impl SyncConfig {
    /// Loads a JSON config file.
    pub fn from_json_file(path: impl AsRef<Path>) -> SyncResult<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| SyncError::Config(format!("cannot read {}: {e}", path.display())))?;
        let config: Self = serde_json::from_str(&raw)
            .map_err(|e| SyncError::Config(format!("cannot parse {}: {e}", path.display())))?;
        config.validate()?;
        Ok(config)
    }

    /// Checks that the URLs parse.
    pub fn validate(&self) -> SyncResult<()> {
        self.base_url()?;
        self.push_url()?;
        Ok(())
    }

    /// The parsed base URL.
    pub fn base_url(&self) -> SyncResult<Url> {
        if self.remote_base_url.trim().is_empty() {
            return Err(SyncError::Config("remote_base_url is empty".into()));
        }
        Url::parse(&self.remote_base_url)
            .map_err(|e| SyncError::Config(format!("invalid remote_base_url: {e}")))
    }

    /// The push channel URL, explicit or derived from the base URL by
    /// switching to `ws` and appending `/changes` to its path.
    ///
    /// Only plain `ws://` feeds are supported, so an `https` base needs an
    /// explicit `push_url`.
    pub fn push_url(&self) -> SyncResult<String> {
        let url = match &self.push_url {
            Some(raw) => {
                Url::parse(raw).map_err(|e| SyncError::Config(format!("invalid push_url: {e}")))?
            }
            None => {
                let mut url = self.base_url()?;
                let scheme = if url.scheme() == "https" { "wss" } else { "ws" };
                url.set_scheme(scheme).map_err(|()| {
                    SyncError::Config(format!("cannot derive push URL from {url}"))
                })?;
                let path = format!("{}/changes", url.path().trim_end_matches('/'));
                url.set_path(&path);
                url.set_query(None);
                url.set_fragment(None);
                url
            }
        };

        match url.scheme() {
            "ws" => Ok(url.to_string()),
            "wss" => Err(SyncError::Config(format!(
                "TLS push feeds are not supported ({url}); set push_url to a ws:// endpoint"
            ))),
            other => Err(SyncError::Config(format!(
                "push_url must be a ws:// URL, got {other}://"
            ))),
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    pub fn probe_interval(&self) -> Duration {
        Duration::from_millis(self.probe_interval_ms)
    }

    pub fn drain_grace(&self) -> Duration {
        Duration::from_millis(self.drain_grace_ms)
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    pub fn push_reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.push_reconnect_delay_ms)
    }
}
