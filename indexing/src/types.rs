//! Shared index types: record keys, stored records and resolution results.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::period::Period;
use crate::store::StoreError;

/// Source label written on records fetched from the remote index service.
pub const REMOTE_SOURCE_LABEL: &str = "MoSPI MCP";
/// Source label used for seeded secondary-index records.
pub const SEED_SOURCE_LABEL: &str = "Labour Bureau";

/// The two indicators combined by the escalation formula.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexType {
    /// Wholesale Price Index, All Commodities (weight 0.70).
    Primary,
    /// Consumer Price Index for Industrial Workers (weight 0.30).
    Secondary,
}

impl IndexType {
    /// Published name of the index.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Primary => "WPI",
            Self::Secondary => "CPI-IW",
        }
    }

    /// Whether the remote index service publishes this index.
    /// The secondary index is only ever available from seeded data.
    pub fn supports_remote(&self) -> bool {
        matches!(self, Self::Primary)
    }
}

impl fmt::Display for IndexType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// One authoritative value per (index type, year, month).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexRecord {
    pub index_type: IndexType,
    #[serde(flatten)]
    pub period: Period,
    pub value: f64,
    pub source: String,
    pub observed_at: DateTime<Utc>,
}

impl IndexRecord {
    pub fn new(
        index_type: IndexType,
        period: Period,
        value: f64,
        source: impl Into<String>,
    ) -> Result<Self, StoreError> {
        let record = Self {
            index_type,
            period,
            value,
            source: source.into(),
            observed_at: Utc::now(),
        };
        record.validate()?;
        Ok(record)
    }

    pub fn with_observed_at(mut self, observed_at: DateTime<Utc>) -> Self {
        self.observed_at = observed_at;
        self
    }

    pub fn validate(&self) -> Result<(), StoreError> {
        if !(1..=12).contains(&self.period.month) {
            return Err(StoreError::InvalidRecord(format!(
                "{} {}: month out of range",
                self.index_type, self.period
            )));
        }
        if !self.value.is_finite() || self.value <= 0.0 {
            return Err(StoreError::InvalidRecord(format!(
                "{} {}: value {} must be positive",
                self.index_type, self.period, self.value
            )));
        }
        Ok(())
    }

    pub fn is_remote_sourced(&self) -> bool {
        self.source == REMOTE_SOURCE_LABEL
    }
}

/// Which tier produced a resolved value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Origin {
    Cached,
    Remote,
    EstimateFromStore,
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cached => write!(f, "cached"),
            Self::Remote => write!(f, "remote"),
            Self::EstimateFromStore => write!(f, "estimate_from_store"),
        }
    }
}

/// Result of a resolution. Never persisted; only the underlying record is.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedIndex {
    pub value: f64,
    pub origin: Origin,
    pub is_estimate: bool,
    /// Period whose value was substituted, e.g. `Oct 2024`. Set iff `is_estimate`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub estimate_label: Option<String>,
}

impl ResolvedIndex {
    pub fn exact(value: f64, origin: Origin) -> Self {
        Self {
            value,
            origin,
            is_estimate: false,
            estimate_label: None,
        }
    }

    pub fn estimate(record: &IndexRecord) -> Self {
        Self {
            value: record.value,
            origin: Origin::EstimateFromStore,
            is_estimate: true,
            estimate_label: Some(record.period.short_label()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_primary_is_remote_capable() {
        assert!(IndexType::Primary.supports_remote());
        assert!(!IndexType::Secondary.supports_remote());
    }

    #[test]
    fn record_rejects_non_positive_value() {
        let period = Period::new(2024, 10).unwrap();
        assert!(IndexRecord::new(IndexType::Primary, period, 0.0, REMOTE_SOURCE_LABEL).is_err());
        assert!(IndexRecord::new(IndexType::Primary, period, f64::NAN, REMOTE_SOURCE_LABEL).is_err());
        assert!(IndexRecord::new(IndexType::Primary, period, 156.7, REMOTE_SOURCE_LABEL).is_ok());
    }

    #[test]
    fn estimate_carries_period_label() {
        let record = IndexRecord::new(
            IndexType::Secondary,
            Period::new(2024, 10).unwrap(),
            144.5,
            SEED_SOURCE_LABEL,
        )
        .unwrap();
        let resolved = ResolvedIndex::estimate(&record);
        assert!(resolved.is_estimate);
        assert_eq!(resolved.origin, Origin::EstimateFromStore);
        assert_eq!(resolved.estimate_label.as_deref(), Some("Oct 2024"));
    }

    #[test]
    fn record_serializes_flat_period() {
        let record = IndexRecord::new(
            IndexType::Primary,
            Period::new(2022, 3).unwrap(),
            148.8,
            REMOTE_SOURCE_LABEL,
        )
        .unwrap();
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["index_type"], "primary");
        assert_eq!(json["year"], 2022);
        assert_eq!(json["month"], 3);
    }
}
