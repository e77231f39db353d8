//! Tiered index resolution.
//!
//! ```text
//! resolve(index_type, period)
//!   ├─ store.get_exact hit            → Cached | Remote (by record source)
//!   ├─ miss + remote-capable type     → source.fetch raced against remote_timeout
//!   │    └─ value                     → upsert (remote label) → Remote
//!   ├─ latest record before period,
//!   │  else latest record at all      → EstimateFromStore (labelled)
//!   └─ nothing of that type           → NotFound
//! ```
//!
//! Resolutions are single-flight per (index type, period): concurrent callers
//! for the same key await one shared future. The in-flight table only holds
//! weak handles, so when every caller has gone away the shared future is
//! dropped and its remote call is torn down with it.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use futures::future::{BoxFuture, Shared, WeakShared};
use futures::FutureExt;
use thiserror::Error;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::metrics::Metrics;
use crate::period::Period;
use crate::remote::IndexSource;
use crate::store::IndexStore;
use crate::types::{IndexRecord, IndexType, Origin, ResolvedIndex, REMOTE_SOURCE_LABEL};

/// Upper bound on a single remote fetch.
pub const DEFAULT_REMOTE_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolveError {
    #[error("no {index_type} data available for {period}")]
    NotFound { index_type: IndexType, period: Period },

    #[error("resolution of {index_type} for {period} was cancelled")]
    Cancelled { index_type: IndexType, period: Period },
}

/// Result of a forced remote refresh.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RefreshOutcome {
    /// Remote value fetched and written to the store.
    Updated(f64),
    /// The source answered without a value, failed, or timed out.
    NoData,
    /// No remote source exists for this index type.
    Unsupported,
}

type ResolveKey = (IndexType, Period);
type ResolveOutcome = Result<ResolvedIndex, ResolveError>;
type ResolveFuture = BoxFuture<'static, ResolveOutcome>;

pub struct ResolverBuilder {
    store: Arc<dyn IndexStore>,
    source: Option<Arc<dyn IndexSource>>,
    metrics: Option<Arc<Metrics>>,
    remote_timeout: Duration,
}

impl ResolverBuilder {
    pub fn with_source(mut self, source: Arc<dyn IndexSource>) -> Self {
        self.source = Some(source);
        self
    }

    /// Defaults to [`Metrics::global`].
    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn with_remote_timeout(mut self, timeout: Duration) -> Self {
        self.remote_timeout = timeout;
        self
    }

    pub fn build(self) -> IndexResolver {
        IndexResolver {
            inner: Arc::new(Inner {
                store: self.store,
                source: self.source,
                metrics: self.metrics.unwrap_or_else(Metrics::global),
                remote_timeout: self.remote_timeout,
                in_flight: Mutex::new(HashMap::new()),
            }),
        }
    }
}

/// Cheap to clone; clones share the store, source, metrics and in-flight table.
#[derive(Clone)]
pub struct IndexResolver {
    inner: Arc<Inner>,
}

struct Inner {
    store: Arc<dyn IndexStore>,
    source: Option<Arc<dyn IndexSource>>,
    metrics: Arc<Metrics>,
    remote_timeout: Duration,
    in_flight: Mutex<HashMap<ResolveKey, WeakShared<ResolveFuture>>>,
}

impl IndexResolver {
    pub fn builder(store: Arc<dyn IndexStore>) -> ResolverBuilder {
        ResolverBuilder {
            store,
            source: None,
            metrics: None,
            remote_timeout: DEFAULT_REMOTE_TIMEOUT,
        }
    }

    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.inner.metrics
    }

    pub fn store(&self) -> &Arc<dyn IndexStore> {
        &self.inner.store
    }

    /// Resolve one index value, degrading through the tiers.
    ///
    /// Only fails with [`ResolveError::NotFound`] when the store holds no
    /// record of `index_type` at all and the remote tier produced nothing.
    pub async fn resolve(&self, index_type: IndexType, period: Period) -> ResolveOutcome {
        self.shared_resolution((index_type, period)).await
    }

    /// Like [`resolve`](Self::resolve), but gives up as soon as `cancel` fires.
    ///
    /// If this was the last caller waiting on the key, the in-flight remote
    /// call is dropped.
    pub async fn resolve_until(
        &self,
        index_type: IndexType,
        period: Period,
        cancel: &CancellationToken,
    ) -> ResolveOutcome {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!(%index_type, %period, "Resolution cancelled by caller");
                Err(ResolveError::Cancelled { index_type, period })
            }
            outcome = self.resolve(index_type, period) => outcome,
        }
    }

    /// Fetch from the remote source regardless of what the store holds and
    /// write the value through on success.
    pub async fn refresh(&self, index_type: IndexType, period: Period) -> RefreshOutcome {
        let Some(source) = self.inner.remote_for(index_type) else {
            return RefreshOutcome::Unsupported;
        };
        match self.inner.fetch_remote(source, index_type, period).await {
            Some(value) => {
                self.inner.write_through(index_type, period, value).await;
                RefreshOutcome::Updated(value)
            }
            None => RefreshOutcome::NoData,
        }
    }

    fn shared_resolution(&self, key: ResolveKey) -> Shared<ResolveFuture> {
        let mut in_flight = self
            .inner
            .in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        if let Some(existing) = in_flight.get(&key).and_then(WeakShared::upgrade) {
            debug!(index_type = %key.0, period = %key.1, "Joining in-flight resolution");
            return existing;
        }

        let inner = Arc::clone(&self.inner);
        let future: ResolveFuture = async move {
            let outcome = inner.resolve_tiers(key.0, key.1).await;
            inner.finish(&key);
            outcome
        }
        .boxed();

        let shared = future.shared();
        if let Some(weak) = shared.downgrade() {
            // Abandoned resolutions never reach `finish`; sweep their handles.
            in_flight.retain(|_, w| w.upgrade().is_some());
            in_flight.insert(key, weak);
        }
        shared
    }

    #[cfg(test)]
    fn in_flight_len(&self) -> usize {
        self.inner
            .in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

impl Inner {
    fn remote_for(&self, index_type: IndexType) -> Option<&Arc<dyn IndexSource>> {
        self.source
            .as_ref()
            .filter(|s| index_type.supports_remote() && s.supports(index_type))
    }

    fn finish(&self, key: &ResolveKey) {
        self.in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key);
    }

    async fn resolve_tiers(&self, index_type: IndexType, period: Period) -> ResolveOutcome {
        match self.store.get_exact(index_type, period).await {
            Ok(Some(record)) => {
                self.metrics.record_cache_hit();
                let origin = if record.is_remote_sourced() {
                    Origin::Remote
                } else {
                    Origin::Cached
                };
                debug!(%index_type, %period, %origin, "Store hit");
                return Ok(ResolvedIndex::exact(record.value, origin));
            }
            Ok(None) => self.metrics.record_cache_miss(),
            Err(e) => {
                warn!(%index_type, %period, "Store lookup failed, treating as miss: {e}");
                self.metrics.record_cache_miss();
            }
        }

        let mut remote_failed = false;
        if let Some(source) = self.remote_for(index_type) {
            match self.fetch_remote(source, index_type, period).await {
                Some(value) => {
                    self.write_through(index_type, period, value).await;
                    return Ok(ResolvedIndex::exact(value, Origin::Remote));
                }
                None => {
                    warn!(%index_type, %period, "Remote unavailable, using fallback");
                    remote_failed = true;
                }
            }
        }

        match self.fallback_record(index_type, period).await {
            Some(record) => {
                self.metrics.record_estimate_serve();
                if remote_failed {
                    self.metrics.record_stale_serve();
                }
                info!(
                    %index_type,
                    %period,
                    substituted = %record.period,
                    value = record.value,
                    "Serving estimate"
                );
                Ok(ResolvedIndex::estimate(&record))
            }
            None => {
                warn!(%index_type, %period, "No data in any tier");
                Err(ResolveError::NotFound { index_type, period })
            }
        }
    }

    /// Remote fetch bounded by `remote_timeout`. On expiry the fetch future is
    /// dropped, which aborts the underlying request.
    async fn fetch_remote(
        &self,
        source: &Arc<dyn IndexSource>,
        index_type: IndexType,
        period: Period,
    ) -> Option<f64> {
        let started = Instant::now();
        let outcome = tokio::time::timeout(self.remote_timeout, source.fetch(index_type, period)).await;
        let latency = started.elapsed();

        let value = match outcome {
            Ok(Some(value)) if value.is_finite() && value > 0.0 => Some(value),
            Ok(Some(value)) => {
                warn!(%index_type, %period, value, "Remote returned an unusable value");
                None
            }
            Ok(None) => None,
            Err(_) => {
                warn!(
                    %index_type,
                    %period,
                    timeout_ms = self.remote_timeout.as_millis() as u64,
                    "Remote fetch timed out"
                );
                None
            }
        };

        self.metrics.record_remote_call(value.is_some(), latency);
        debug!(
            %index_type,
            %period,
            latency_ms = latency.as_millis() as u64,
            success = value.is_some(),
            "Remote fetch finished"
        );
        value
    }

    async fn write_through(&self, index_type: IndexType, period: Period, value: f64) {
        let record = match IndexRecord::new(index_type, period, value, REMOTE_SOURCE_LABEL) {
            Ok(record) => record,
            Err(e) => {
                warn!(%index_type, %period, "Not caching remote value: {e}");
                return;
            }
        };
        if let Err(e) = self.store.upsert(record).await {
            warn!(%index_type, %period, "Failed to cache remote value: {e}");
        }
    }

    /// Latest record strictly before `period`, otherwise the latest record of
    /// the type. Store errors count as "no fallback".
    async fn fallback_record(&self, index_type: IndexType, period: Period) -> Option<IndexRecord> {
        match self.store.get_most_recent_before(index_type, period).await {
            Ok(Some(record)) => return Some(record),
            Ok(None) => {}
            Err(e) => warn!(%index_type, %period, "Fallback lookup failed: {e}"),
        }
        match self.store.get_most_recent(index_type).await {
            Ok(record) => record,
            Err(e) => {
                warn!(%index_type, "Most-recent lookup failed: {e}");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use async_trait::async_trait;

    /// Remote that never answers.
    struct StalledSource;

    #[async_trait]
    impl IndexSource for StalledSource {
        fn supports(&self, index_type: IndexType) -> bool {
            index_type.supports_remote()
        }

        async fn fetch(&self, _index_type: IndexType, _period: Period) -> Option<f64> {
            std::future::pending().await
        }
    }

    fn stalled_resolver() -> IndexResolver {
        IndexResolver::builder(Arc::new(MemoryStore::new()))
            .with_source(Arc::new(StalledSource))
            .with_metrics(Arc::new(Metrics::new()))
            .build()
    }

    #[tokio::test]
    async fn abandoned_resolutions_do_not_accumulate() {
        let resolver = stalled_resolver();

        for month in 1..=12 {
            let period = Period::new(2023, month).unwrap();
            // One poll registers the key, then the only caller walks away.
            assert!(resolver.resolve(IndexType::Primary, period).now_or_never().is_none());
        }

        assert!(resolver.in_flight_len() <= 1, "table kept {} entries", resolver.in_flight_len());
    }

    #[tokio::test]
    async fn live_resolution_survives_sweep() {
        let resolver = stalled_resolver();
        let january = Period::new(2024, 1).unwrap();
        let mut held = resolver.resolve(IndexType::Primary, january).boxed();
        assert!((&mut held).now_or_never().is_none());

        for month in 2..=6 {
            let period = Period::new(2024, month).unwrap();
            assert!(resolver.resolve(IndexType::Primary, period).now_or_never().is_none());
        }

        // The held key plus the last abandoned one.
        assert_eq!(resolver.in_flight_len(), 2);
        let _joined = resolver.shared_resolution((IndexType::Primary, january));
        assert_eq!(resolver.in_flight_len(), 2);
    }
}
