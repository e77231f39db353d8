//! Application use cases on top of the index resolver.

use std::sync::Arc;

use anyhow::{Context, Result};
use indexing::{
    escalate, format_pim, CalcError, EscalationResult, IndexPair, IndexRecord, IndexResolver,
    IndexType, JsonFileStore, McpIndexClient, Metrics, Period, ResolveError, ResolvedIndex,
    StoreError,
};
use serde::Serialize;
use thiserror::Error;
use tracing::{info, warn};

use crate::config::ServiceConfig;

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("{index_type} data unavailable for {}", .period.long_label())]
    DataUnavailable {
        index_type: IndexType,
        period: Period,
    },

    #[error(transparent)]
    Calculation(#[from] CalcError),
}

/// Both indices for one month; either may be missing.
#[derive(Debug, Clone, Serialize)]
pub struct MonthIndices {
    pub period: Period,
    pub primary: Option<ResolvedIndex>,
    pub secondary: Option<ResolvedIndex>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ResolvedPair {
    pub primary: ResolvedIndex,
    pub secondary: ResolvedIndex,
}

impl ResolvedPair {
    fn values(&self) -> IndexPair {
        IndexPair::new(self.primary.value, self.secondary.value)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CalculationReport {
    pub base_period: Period,
    pub current_period: Period,
    pub base: ResolvedPair,
    pub current: ResolvedPair,
    pub result: EscalationResult,
    /// PIM to two decimals, e.g. `1.08`.
    pub pim_display: String,
    /// One line per index that was served as an estimate.
    pub warnings: Vec<String>,
}

pub struct IndexService {
    resolver: IndexResolver,
}

impl IndexService {
    pub fn new(resolver: IndexResolver) -> Self {
        Self { resolver }
    }

    /// Wire the JSON file store, the MCP client and the process metrics.
    pub async fn from_config(config: &ServiceConfig) -> Result<Self> {
        let store = JsonFileStore::open(&config.store_path)
            .await
            .with_context(|| format!("Failed to open index store {}", config.store_path.display()))?;
        let metrics = Metrics::global();
        let client = McpIndexClient::new(config.mcp_client_config(), Arc::clone(&metrics))
            .context("Failed to build MCP client")?;

        let resolver = IndexResolver::builder(Arc::new(store))
            .with_source(Arc::new(client))
            .with_metrics(metrics)
            .with_remote_timeout(config.remote_timeout)
            .build();

        info!(
            mcp_url = %config.mcp_url,
            store = %config.store_path.display(),
            "Index service ready"
        );
        Ok(Self::new(resolver))
    }

    pub fn resolver(&self) -> &IndexResolver {
        &self.resolver
    }

    pub fn metrics(&self) -> &Arc<Metrics> {
        self.resolver.metrics()
    }

    /// Resolve both indices for `period` concurrently.
    pub async fn indices_for_month(&self, period: Period) -> MonthIndices {
        let (primary, secondary) = tokio::join!(
            self.resolver.resolve(IndexType::Primary, period),
            self.resolver.resolve(IndexType::Secondary, period),
        );
        MonthIndices {
            period,
            primary: log_missing(primary),
            secondary: log_missing(secondary),
        }
    }

    /// Resolve the four indices and apply the escalation formula.
    pub async fn calculate(
        &self,
        work_value: f64,
        base_period: Period,
        current_period: Period,
    ) -> Result<CalculationReport, ServiceError> {
        let (base_primary, base_secondary, current_primary, current_secondary) = tokio::join!(
            self.resolver.resolve(IndexType::Primary, base_period),
            self.resolver.resolve(IndexType::Secondary, base_period),
            self.resolver.resolve(IndexType::Primary, current_period),
            self.resolver.resolve(IndexType::Secondary, current_period),
        );

        let base = ResolvedPair {
            primary: required(base_primary)?,
            secondary: required(base_secondary)?,
        };
        let current = ResolvedPair {
            primary: required(current_primary)?,
            secondary: required(current_secondary)?,
        };

        let result = escalate(work_value, base.values(), current.values())?;

        let mut warnings = Vec::new();
        for (index_type, period, resolved) in [
            (IndexType::Primary, base_period, &base.primary),
            (IndexType::Secondary, base_period, &base.secondary),
            (IndexType::Primary, current_period, &current.primary),
            (IndexType::Secondary, current_period, &current.secondary),
        ] {
            if let Some(warning) = estimate_warning(index_type, period, resolved) {
                warnings.push(warning);
            }
        }

        info!(
            %base_period,
            %current_period,
            pim = result.pim,
            estimates = warnings.len(),
            "Escalation calculated"
        );

        Ok(CalculationReport {
            base_period,
            current_period,
            pim_display: format_pim(result.pim),
            base,
            current,
            result,
            warnings,
        })
    }

    /// Upsert `records` into the store; returns how many were written.
    pub async fn import(&self, records: Vec<IndexRecord>) -> Result<usize, StoreError> {
        let store = self.resolver.store();
        let mut written = 0;
        for record in records {
            store.upsert(record).await?;
            written += 1;
        }
        info!(written, "Imported index records");
        Ok(written)
    }
}

fn log_missing(outcome: Result<ResolvedIndex, ResolveError>) -> Option<ResolvedIndex> {
    match outcome {
        Ok(resolved) => Some(resolved),
        Err(e) => {
            warn!("{e}");
            None
        }
    }
}

fn required(outcome: Result<ResolvedIndex, ResolveError>) -> Result<ResolvedIndex, ServiceError> {
    outcome.map_err(|e| match e {
        ResolveError::NotFound { index_type, period }
        | ResolveError::Cancelled { index_type, period } => {
            ServiceError::DataUnavailable { index_type, period }
        }
    })
}

fn estimate_warning(index_type: IndexType, period: Period, resolved: &ResolvedIndex) -> Option<String> {
    let label = resolved.estimate_label.as_deref()?;
    Some(format!(
        "{index_type} for {} not yet available; using {label} value {} as an estimate",
        period.long_label(),
        resolved.value
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use indexing::Origin;

    #[test]
    fn warning_only_for_estimates() {
        let period = Period::new(2025, 3).unwrap();
        let exact = ResolvedIndex::exact(150.0, Origin::Cached);
        assert!(estimate_warning(IndexType::Primary, period, &exact).is_none());

        let record =
            IndexRecord::new(IndexType::Secondary, Period::new(2024, 12).unwrap(), 143.7, "x")
                .unwrap();
        let warning =
            estimate_warning(IndexType::Secondary, period, &ResolvedIndex::estimate(&record))
                .unwrap();
        assert_eq!(
            warning,
            "CPI-IW for March 2025 not yet available; using Dec 2024 value 143.7 as an estimate"
        );
    }

    #[test]
    fn not_found_maps_to_data_unavailable() {
        let period = Period::new(2024, 10).unwrap();
        let err = required(Err(ResolveError::NotFound {
            index_type: IndexType::Primary,
            period,
        }))
        .unwrap_err();
        assert_eq!(err.to_string(), "WPI data unavailable for October 2024");
    }
}
