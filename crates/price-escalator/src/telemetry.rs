//! Logging setup and metrics reporting.
//!
//! Metrics live in-process, so each CLI run can append its report to a JSONL
//! log (`PRICE_ESCALATOR_METRICS_LOG`); the `metrics` command reads the last
//! line back.

use std::io::{BufRead, BufReader, Write};
use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use indexing::MetricsSnapshot;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// Install the global fmt subscriber. `RUST_LOG` overrides the `info` default.
///
/// Logs go to stderr; stdout is reserved for command output.
pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with_writer(std::io::stderr)
        .init();
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheReport {
    pub hits: u64,
    pub misses: u64,
    /// e.g. `"66.7%"`
    pub hit_rate: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteReport {
    pub total_calls: u64,
    pub successes: u64,
    pub errors: u64,
    pub success_rate: String,
    pub avg_latency_ms: u64,
    pub session_handshakes: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FallbackReport {
    pub stale_serves: u64,
    pub estimate_serves: u64,
}

/// Operator-facing rendering of a [`MetricsSnapshot`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsReport {
    pub cache: CacheReport,
    pub remote: RemoteReport,
    pub fallbacks: FallbackReport,
    pub last_updated: DateTime<Utc>,
}

impl From<&MetricsSnapshot> for MetricsReport {
    fn from(snap: &MetricsSnapshot) -> Self {
        Self {
            cache: CacheReport {
                hits: snap.cache_hits,
                misses: snap.cache_misses,
                hit_rate: format!("{}%", snap.cache_hit_rate),
            },
            remote: RemoteReport {
                total_calls: snap.remote_calls,
                successes: snap.remote_successes,
                errors: snap.remote_errors,
                success_rate: format!("{}%", snap.remote_success_rate),
                avg_latency_ms: snap.avg_remote_latency_ms,
                session_handshakes: snap.session_handshakes,
            },
            fallbacks: FallbackReport {
                stale_serves: snap.stale_serves,
                estimate_serves: snap.estimate_serves,
            },
            last_updated: snap.last_updated,
        }
    }
}

/// Append one report as a JSON line. Failures are logged, never fatal.
pub fn append_report(report: &MetricsReport, path: &Path) {
    let json = match serde_json::to_string(report) {
        Ok(json) => json,
        Err(e) => {
            warn!("Failed to serialize metrics report: {e}");
            return;
        }
    };
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        if let Err(e) = std::fs::create_dir_all(parent) {
            warn!("Failed to create metrics log directory: {e}");
            return;
        }
    }
    match std::fs::OpenOptions::new().create(true).append(true).open(path) {
        Ok(mut file) => {
            if let Err(e) = writeln!(file, "{json}") {
                warn!("Failed to append metrics report: {e}");
            } else {
                info!(path = %path.display(), "Appended metrics report");
            }
        }
        Err(e) => warn!("Failed to open metrics log: {e}"),
    }
}

/// Last well-formed report in a JSONL log. Malformed lines are skipped.
pub fn read_last_report(path: &Path) -> Result<Option<MetricsReport>> {
    let file = std::fs::File::open(path)
        .with_context(|| format!("Failed to open metrics log {}", path.display()))?;
    let mut last = None;
    for line in BufReader::new(file).lines() {
        let line = line.context("Failed to read metrics log")?;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<MetricsReport>(&line) {
            Ok(report) => last = Some(report),
            Err(e) => warn!("Skipping malformed metrics line: {e}"),
        }
    }
    Ok(last)
}
