//! Batch refresh over a trailing window, with a fake remote and paused time.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{NaiveDate, TimeDelta, Utc};
use indexing::{
    IndexRecord, IndexResolver, IndexSource, IndexStore, IndexType, MemoryStore, Metrics, Period,
    REMOTE_SOURCE_LABEL, SEED_SOURCE_LABEL,
};
use price_escalator::{BatchRefresher, RefreshPolicy, RefreshStatus};
use tokio_util::sync::CancellationToken;

struct FixedSource {
    value: Option<f64>,
    calls: AtomicUsize,
}

impl FixedSource {
    fn new(value: Option<f64>) -> Arc<Self> {
        Arc::new(Self {
            value,
            calls: AtomicUsize::new(0),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl IndexSource for FixedSource {
    fn supports(&self, index_type: IndexType) -> bool {
        index_type.supports_remote()
    }

    async fn fetch(&self, _index_type: IndexType, _period: Period) -> Option<f64> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.value
    }
}

fn period(year: i32, month: u32) -> Period {
    Period::new(year, month).unwrap()
}

fn remote_record(p: Period, age: TimeDelta) -> IndexRecord {
    IndexRecord::new(IndexType::Primary, p, 150.0, REMOTE_SOURCE_LABEL)
        .unwrap()
        .with_observed_at(Utc::now() - age)
}

fn refresher(
    store: Arc<MemoryStore>,
    source: Option<Arc<FixedSource>>,
    policy: RefreshPolicy,
) -> BatchRefresher {
    let mut builder = IndexResolver::builder(store).with_metrics(Arc::new(Metrics::new()));
    if let Some(source) = source {
        builder = builder.with_source(source);
    }
    BatchRefresher::new(builder.build(), policy)
}

fn no_delay() -> RefreshPolicy {
    RefreshPolicy::new().with_delay(Duration::ZERO)
}

#[tokio::test]
async fn fresh_remote_records_are_skipped() {
    let store = Arc::new(MemoryStore::with_records([
        remote_record(period(2024, 10), TimeDelta::hours(1)),
        IndexRecord::new(IndexType::Primary, period(2024, 11), 157.2, SEED_SOURCE_LABEL).unwrap(),
        remote_record(period(2024, 12), TimeDelta::hours(48)),
    ]));
    let source = FixedSource::new(Some(160.0));
    let refresher = refresher(store.clone(), Some(source.clone()), no_delay());

    let periods = [period(2024, 10), period(2024, 11), period(2024, 12)];
    let report = refresher.run_periods(&periods, &CancellationToken::new()).await;

    assert_eq!(report.total, 3);
    assert_eq!(report.skipped, 1);
    assert_eq!(report.updated, 2);
    assert_eq!(report.errors, 0);
    assert!(!report.cancelled);
    assert_eq!(source.calls(), 2);
    assert_eq!(report.details[0].status, RefreshStatus::Fresh);
    assert_eq!(report.details[1].status, RefreshStatus::Updated);

    let refreshed = store
        .get_exact(IndexType::Primary, period(2024, 11))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(refreshed.value, 160.0);
    assert!(refreshed.is_remote_sourced());
}

#[tokio::test]
async fn missing_remote_value_is_no_data() {
    let store = Arc::new(MemoryStore::new());
    let refresher = refresher(store.clone(), Some(FixedSource::new(None)), no_delay());

    let report = refresher
        .run_periods(&[period(2025, 1)], &CancellationToken::new())
        .await;

    assert_eq!(report.details[0].status, RefreshStatus::NoData);
    assert_eq!(report.updated, 0);
    assert_eq!(report.skipped, 1);
    assert_eq!(report.errors, 0);
    assert_eq!(store.len().await.unwrap(), 0);
}

#[tokio::test]
async fn no_remote_source_is_an_error_per_period() {
    let refresher = refresher(Arc::new(MemoryStore::new()), None, no_delay());

    let report = refresher
        .run_periods(&[period(2025, 1), period(2025, 2)], &CancellationToken::new())
        .await;

    assert_eq!(report.errors, 2);
    let json = serde_json::to_value(&report).unwrap();
    assert_eq!(json["details"][0]["status"], "error: no remote source configured");
    assert_eq!(json["details"][0]["period"]["month"], 1);
}

#[tokio::test(start_paused = true)]
async fn delay_separates_remote_calls() {
    let source = FixedSource::new(Some(160.0));
    let refresher = refresher(
        Arc::new(MemoryStore::new()),
        Some(source.clone()),
        RefreshPolicy::new().with_delay(Duration::from_millis(500)),
    );

    let started = tokio::time::Instant::now();
    let report = refresher
        .run_periods(
            &[period(2025, 1), period(2025, 2), period(2025, 3)],
            &CancellationToken::new(),
        )
        .await;

    assert_eq!(report.updated, 3);
    assert!(started.elapsed() >= Duration::from_millis(1000));
    assert!(started.elapsed() < Duration::from_millis(1500));
}

#[tokio::test]
async fn cancelled_before_start_does_nothing() {
    let source = FixedSource::new(Some(160.0));
    let refresher = refresher(Arc::new(MemoryStore::new()), Some(source.clone()), no_delay());
    let cancel = CancellationToken::new();
    cancel.cancel();

    let report = refresher.run_periods(&[period(2025, 1)], &cancel).await;

    assert!(report.cancelled);
    assert!(report.details.is_empty());
    assert_eq!(report.total, 1);
    assert_eq!(source.calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn cancellation_during_delay_stops_run() {
    let source = FixedSource::new(Some(160.0));
    let refresher = refresher(
        Arc::new(MemoryStore::new()),
        Some(source.clone()),
        RefreshPolicy::new().with_delay(Duration::from_millis(500)),
    );
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(700)).await;
        trigger.cancel();
    });

    let periods: Vec<Period> = (1..=5).map(|m| period(2025, m)).collect();
    let report = refresher.run_periods(&periods, &cancel).await;

    assert!(report.cancelled);
    assert_eq!(report.details.len(), 2);
    assert_eq!(source.calls(), 2);
}

#[tokio::test]
async fn run_covers_trailing_window() {
    let source = FixedSource::new(Some(160.0));
    let refresher = refresher(Arc::new(MemoryStore::new()), Some(source.clone()), no_delay());
    let today = NaiveDate::from_ymd_opt(2025, 3, 20).unwrap();

    let report = refresher.run(today, &CancellationToken::new()).await;

    assert_eq!(report.total, 15);
    assert_eq!(report.details.first().unwrap().period, period(2024, 1));
    assert_eq!(report.details.last().unwrap().period, period(2025, 3));
    assert_eq!(source.calls(), 15);
}

#[tokio::test]
async fn counters_add_up_to_total() {
    let store = Arc::new(MemoryStore::with_records([remote_record(
        period(2024, 10),
        TimeDelta::hours(1),
    )]));
    let periods = [period(2024, 10), period(2024, 11), period(2024, 12)];

    let updating = refresher(store.clone(), Some(FixedSource::new(Some(160.0))), no_delay());
    let report = updating.run_periods(&periods, &CancellationToken::new()).await;
    assert_eq!(report.updated + report.skipped + report.errors, report.total);

    let empty_remote = refresher(Arc::new(MemoryStore::new()), Some(FixedSource::new(None)), no_delay());
    let report = empty_remote.run_periods(&periods, &CancellationToken::new()).await;
    assert_eq!(report.skipped, 3);
    assert_eq!(report.updated + report.skipped + report.errors, report.total);

    let unsupported = refresher(Arc::new(MemoryStore::new()), None, no_delay());
    let report = unsupported.run_periods(&periods, &CancellationToken::new()).await;
    assert_eq!(report.updated + report.skipped + report.errors, report.total);
}
