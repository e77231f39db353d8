//! IndexService use cases over the shipped seed data and a fake remote.

use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use indexing::{
    load_seed, IndexResolver, IndexSource, IndexStore, IndexType, JsonFileStore, MemoryStore,
    Metrics, Origin, Period,
};
use price_escalator::{IndexService, ServiceError};

/// Remote that answers a fixed value for every primary request.
struct FixedSource {
    value: Option<f64>,
    calls: AtomicUsize,
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

fn seed_path() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../../data/seed_indices.json")
}

fn period(year: i32, month: u32) -> Period {
    Period::new(year, month).unwrap()
}

fn seeded_service(remote: Option<f64>) -> (IndexService, Arc<FixedSource>) {
    let store = MemoryStore::with_records(load_seed(&seed_path()).unwrap());
    let source = Arc::new(FixedSource {
        value: remote,
        calls: AtomicUsize::new(0),
    });
    let resolver = IndexResolver::builder(Arc::new(store))
        .with_source(source.clone())
        .with_metrics(Arc::new(Metrics::new()))
        .build();
    (IndexService::new(resolver), source)
}

fn assert_close(actual: f64, expected: f64) {
    assert!((actual - expected).abs() < 0.011, "expected {expected}, got {actual}");
}

#[tokio::test]
async fn calculate_from_seeded_months() {
    let (service, source) = seeded_service(None);

    let report = service
        .calculate(1_000_000.0, period(2022, 3), period(2024, 10))
        .await
        .unwrap();

    assert_close(report.result.p0, 141.96);
    assert_close(report.result.pc, 153.04);
    assert_eq!(report.result.pim, 1.0781);
    assert_close(report.result.escalation_amount, 78_050.15);
    assert!(!report.result.is_de_escalation);
    assert_eq!(report.pim_display, "1.08");
    assert!(report.warnings.is_empty());
    assert_eq!(report.base.primary.origin, Origin::Cached);
    assert_eq!(source.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn unpublished_month_is_estimated_with_warnings() {
    let (service, _) = seeded_service(None);

    // Seed ends at Dec 2024 (primary) and Dec 2025 (secondary).
    let report = service
        .calculate(500_000.0, period(2022, 3), period(2025, 3))
        .await
        .unwrap();

    assert!(report.current.primary.is_estimate);
    assert_eq!(report.current.primary.value, 157.8);
    assert_eq!(report.current.primary.estimate_label.as_deref(), Some("Dec 2024"));
    assert!(!report.current.secondary.is_estimate);
    assert_eq!(report.warnings.len(), 1);
    assert!(report.warnings[0].contains("WPI for March 2025"));
}

#[tokio::test]
async fn remote_value_is_used_for_missing_primary() {
    let (service, source) = seeded_service(Some(158.9));

    let month = service.indices_for_month(period(2025, 1)).await;

    let primary = month.primary.unwrap();
    assert_eq!(primary.value, 158.9);
    assert_eq!(primary.origin, Origin::Remote);
    assert_eq!(month.secondary.unwrap().value, 143.2);
    assert_eq!(source.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn empty_store_reports_data_unavailable() {
    let resolver = IndexResolver::builder(Arc::new(MemoryStore::new()))
        .with_metrics(Arc::new(Metrics::new()))
        .build();
    let service = IndexService::new(resolver);

    let err = service
        .calculate(1000.0, period(2024, 1), period(2024, 6))
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::DataUnavailable { .. }), "got {err:?}");

    let month = service.indices_for_month(period(2024, 1)).await;
    assert!(month.primary.is_none());
    assert!(month.secondary.is_none());
}

#[tokio::test]
async fn negative_work_value_is_calculation_error() {
    let (service, _) = seeded_service(None);
    let err = service
        .calculate(-1.0, period(2022, 3), period(2024, 10))
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::Calculation(_)));
    assert_eq!(err.to_string(), "Invalid input: negative work value");
}

#[tokio::test]
async fn import_persists_to_file_store() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("store.json");

    let store = Arc::new(JsonFileStore::open(&path).await.unwrap());
    let resolver = IndexResolver::builder(store)
        .with_metrics(Arc::new(Metrics::new()))
        .build();
    let service = IndexService::new(resolver);

    let records = load_seed(&seed_path()).unwrap();
    let expected = records.len();
    assert_eq!(service.import(records).await.unwrap(), expected);

    let reopened = JsonFileStore::open(&path).await.unwrap();
    assert_eq!(reopened.len().await.unwrap(), expected);
    let cpi = reopened
        .get_exact(IndexType::Secondary, period(2024, 10))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(cpi.value, 144.5);
}
