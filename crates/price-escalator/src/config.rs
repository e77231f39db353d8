use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use indexing::McpClientConfig;
use serde::Deserialize;

use crate::refresh::RefreshPolicy;

const DEFAULT_MCP_URL: &str = "http://localhost:8000/mcp";
const DEFAULT_STORE_PATH: &str = "data/index_store.json";

/// Runtime configuration for the escalation service.
///
/// Defaults come from `PRICE_ESCALATOR_*` environment variables; a TOML file
/// passed with `--config` overrides individual fields.
#[derive(Debug, Clone, PartialEq)]
pub struct ServiceConfig {
    /// MCP endpoint of the remote index service.
    pub mcp_url: String,
    /// JSON file backing the index store.
    pub store_path: PathBuf,
    /// Upper bound on one remote fetch before falling back (default 5 s).
    pub remote_timeout: Duration,
    pub connect_timeout: Duration,
    /// Pause between remote calls during batch refresh (default 500 ms).
    pub refresh_delay: Duration,
    /// Remote-sourced records younger than this are not refreshed (default 24 h).
    pub freshness: Duration,
    /// Append a metrics report line here after each command (None = off).
    pub metrics_log: Option<PathBuf>,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }
}

/// On-disk overrides. Every field is optional.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct ConfigFile {
    mcp_url: Option<String>,
    store_path: Option<PathBuf>,
    remote_timeout_secs: Option<u64>,
    connect_timeout_secs: Option<u64>,
    refresh_delay_ms: Option<u64>,
    freshness_hours: Option<u64>,
    metrics_log: Option<PathBuf>,
}

impl ServiceConfig {
    /// Build from an environment-like lookup. Unparseable numbers fall back
    /// to the defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let num = |key: &str, default: u64| {
            lookup(key)
                .and_then(|v| v.trim().parse::<u64>().ok())
                .unwrap_or(default)
        };
        Self {
            mcp_url: lookup("PRICE_ESCALATOR_MCP_URL").unwrap_or_else(|| DEFAULT_MCP_URL.into()),
            store_path: lookup("PRICE_ESCALATOR_STORE_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_STORE_PATH)),
            remote_timeout: Duration::from_secs(num("PRICE_ESCALATOR_REMOTE_TIMEOUT_SECS", 5)),
            connect_timeout: Duration::from_secs(num("PRICE_ESCALATOR_CONNECT_TIMEOUT_SECS", 3)),
            refresh_delay: Duration::from_millis(num("PRICE_ESCALATOR_REFRESH_DELAY_MS", 500)),
            freshness: Duration::from_secs(num("PRICE_ESCALATOR_FRESHNESS_HOURS", 24) * 3600),
            metrics_log: lookup("PRICE_ESCALATOR_METRICS_LOG")
                .filter(|v| !v.trim().is_empty())
                .map(PathBuf::from),
        }
    }

    /// Environment defaults, overlaid with `path` when given.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config = Self::default();
        match path {
            Some(path) => {
                let content = std::fs::read_to_string(path)
                    .with_context(|| format!("Failed to read config file {}", path.display()))?;
                config
                    .overlay_toml(&content)
                    .with_context(|| format!("Invalid config file {}", path.display()))
            }
            None => Ok(config),
        }
    }

    /// Apply the fields present in a TOML document on top of `self`.
    pub fn overlay_toml(mut self, content: &str) -> Result<Self> {
        let file: ConfigFile = toml::from_str(content).context("Failed to parse config TOML")?;
        if let Some(url) = file.mcp_url {
            self.mcp_url = url;
        }
        if let Some(path) = file.store_path {
            self.store_path = path;
        }
        if let Some(secs) = file.remote_timeout_secs {
            self.remote_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = file.connect_timeout_secs {
            self.connect_timeout = Duration::from_secs(secs);
        }
        if let Some(ms) = file.refresh_delay_ms {
            self.refresh_delay = Duration::from_millis(ms);
        }
        if let Some(hours) = file.freshness_hours {
            self.freshness = Duration::from_secs(hours * 3600);
        }
        if let Some(path) = file.metrics_log {
            self.metrics_log = Some(path);
        }
        Ok(self)
    }

    pub fn mcp_client_config(&self) -> McpClientConfig {
        McpClientConfig {
            url: self.mcp_url.clone(),
            connect_timeout: self.connect_timeout,
            ..McpClientConfig::default()
        }
    }

    pub fn refresh_policy(&self) -> RefreshPolicy {
        RefreshPolicy::new()
            .with_freshness(self.freshness)
            .with_delay(self.refresh_delay)
    }
}
