//! Batch refresh of the primary index over a trailing window of months.
//!
//! ```text
//! for period in trailing_window(today):
//!   stored remote record younger than freshness → fresh   (no remote call)
//!   otherwise (after `delay` since the last call) → refresh
//!       value    → updated
//!       no value → no-data
//! ```
//!
//! Each period is isolated: a failure is recorded in the report and the run
//! moves on. Cancellation stops the run between periods or mid-delay.

use std::fmt;
use std::time::{Duration, Instant};

use chrono::{DateTime, NaiveDate, Utc};
use indexing::{trailing_window, IndexRecord, IndexResolver, IndexType, Period, RefreshOutcome};
use serde::{Serialize, Serializer};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// When a stored value is worth refreshing, and how hard to hit the remote.
#[derive(Debug, Clone, PartialEq)]
pub struct RefreshPolicy {
    /// Remote-sourced records younger than this are skipped (default: 24 h).
    pub freshness: Duration,
    /// Pause between consecutive remote calls (default: 500 ms).
    pub delay: Duration,
}

impl Default for RefreshPolicy {
    fn default() -> Self {
        Self {
            freshness: Duration::from_secs(24 * 3600),
            delay: Duration::from_millis(500),
        }
    }
}

impl RefreshPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_freshness(mut self, freshness: Duration) -> Self {
        self.freshness = freshness;
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Whether `record` can be left alone at `now`.
    pub fn is_fresh(&self, record: &IndexRecord, now: DateTime<Utc>) -> bool {
        if !record.is_remote_sourced() {
            return false;
        }
        match (now - record.observed_at).to_std() {
            Ok(age) => age < self.freshness,
            // Observed in the future: clock skew, treat as just fetched.
            Err(_) => true,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RefreshStatus {
    Fresh,
    Updated,
    NoData,
    Error(String),
}

impl fmt::Display for RefreshStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fresh => write!(f, "fresh"),
            Self::Updated => write!(f, "updated"),
            Self::NoData => write!(f, "no-data"),
            Self::Error(msg) => write!(f, "error: {msg}"),
        }
    }
}

impl Serialize for RefreshStatus {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RefreshDetail {
    pub period: Period,
    pub status: RefreshStatus,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RefreshReport {
    /// Periods in the window, including any not reached before cancellation.
    pub total: usize,
    pub updated: usize,
    /// Fresh values plus periods the remote had no value for.
    pub skipped: usize,
    pub errors: usize,
    pub duration_ms: u64,
    pub cancelled: bool,
    pub details: Vec<RefreshDetail>,
}

impl RefreshReport {
    fn record(&mut self, period: Period, status: RefreshStatus) {
        match &status {
            RefreshStatus::Fresh | RefreshStatus::NoData => self.skipped += 1,
            RefreshStatus::Updated => self.updated += 1,
            RefreshStatus::Error(_) => self.errors += 1,
        }
        self.details.push(RefreshDetail { period, status });
    }
}

pub struct BatchRefresher {
    resolver: IndexResolver,
    policy: RefreshPolicy,
}

impl BatchRefresher {
    pub fn new(resolver: IndexResolver, policy: RefreshPolicy) -> Self {
        Self { resolver, policy }
    }

    pub fn policy(&self) -> &RefreshPolicy {
        &self.policy
    }

    /// Refresh every period of [`trailing_window`]`(today)`.
    pub async fn run(&self, today: NaiveDate, cancel: &CancellationToken) -> RefreshReport {
        self.run_periods(&trailing_window(today), cancel).await
    }

    /// Refresh the given periods in order.
    pub async fn run_periods(&self, periods: &[Period], cancel: &CancellationToken) -> RefreshReport {
        let started = Instant::now();
        let mut report = RefreshReport {
            total: periods.len(),
            ..RefreshReport::default()
        };
        let mut called_remote = false;

        for &period in periods {
            if cancel.is_cancelled() {
                report.cancelled = true;
                break;
            }

            if self.stored_fresh(period).await {
                debug!(%period, "Stored value is fresh, skipping");
                report.record(period, RefreshStatus::Fresh);
                continue;
            }

            if called_remote && !self.policy.delay.is_zero() {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        report.cancelled = true;
                        break;
                    }
                    _ = tokio::time::sleep(self.policy.delay) => {}
                }
            }
            called_remote = true;

            let outcome = tokio::select! {
                _ = cancel.cancelled() => {
                    report.cancelled = true;
                    break;
                }
                outcome = self.resolver.refresh(IndexType::Primary, period) => outcome,
            };

            let status = match outcome {
                RefreshOutcome::Updated(value) => {
                    info!(%period, value, "Refreshed index");
                    RefreshStatus::Updated
                }
                RefreshOutcome::NoData => RefreshStatus::NoData,
                RefreshOutcome::Unsupported => {
                    RefreshStatus::Error("no remote source configured".to_string())
                }
            };
            report.record(period, status);
        }

        report.duration_ms = started.elapsed().as_millis() as u64;
        if report.cancelled {
            warn!(processed = report.details.len(), total = report.total, "Refresh cancelled");
        }
        info!(
            total = report.total,
            updated = report.updated,
            skipped = report.skipped,
            errors = report.errors,
            duration_ms = report.duration_ms,
            "Refresh finished"
        );
        report
    }

    async fn stored_fresh(&self, period: Period) -> bool {
        match self.resolver.store().get_exact(IndexType::Primary, period).await {
            Ok(Some(record)) => self.policy.is_fresh(&record, Utc::now()),
            Ok(None) => false,
            Err(e) => {
                warn!(%period, "Store lookup failed, refreshing anyway: {e}");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeDelta;
    use indexing::{REMOTE_SOURCE_LABEL, SEED_SOURCE_LABEL};

    fn record(source: &str, observed_at: DateTime<Utc>) -> IndexRecord {
        IndexRecord::new(IndexType::Primary, Period::new(2024, 10).unwrap(), 156.7, source)
            .unwrap()
            .with_observed_at(observed_at)
    }

    #[test]
    fn recent_remote_record_is_fresh() {
        let now = Utc::now();
        let policy = RefreshPolicy::new();
        assert!(policy.is_fresh(&record(REMOTE_SOURCE_LABEL, now - TimeDelta::hours(2)), now));
        assert!(!policy.is_fresh(&record(REMOTE_SOURCE_LABEL, now - TimeDelta::hours(25)), now));
    }

    #[test]
    fn seeded_record_is_never_fresh() {
        let now = Utc::now();
        assert!(!RefreshPolicy::new().is_fresh(&record(SEED_SOURCE_LABEL, now), now));
    }

    #[test]
    fn future_observation_counts_as_fresh() {
        let now = Utc::now();
        assert!(RefreshPolicy::new().is_fresh(&record(REMOTE_SOURCE_LABEL, now + TimeDelta::hours(1)), now));
    }

    #[test]
    fn status_strings() {
        assert_eq!(RefreshStatus::NoData.to_string(), "no-data");
        assert_eq!(
            serde_json::to_value(RefreshStatus::Error("boom".into())).unwrap(),
            "error: boom"
        );
    }

    #[test]
    fn builder_overrides_defaults() {
        let policy = RefreshPolicy::new()
            .with_freshness(Duration::from_secs(60))
            .with_delay(Duration::ZERO);
        assert_eq!(policy.freshness, Duration::from_secs(60));
        assert!(policy.delay.is_zero());
    }
}
