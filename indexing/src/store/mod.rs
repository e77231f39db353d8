//! Persistent index store contract and implementations.
//!
//! The resolver only depends on [`IndexStore`]. Two implementations ship
//! with the crate:
//! - [`MemoryStore`]: ordered in-memory map, used by tests and as the
//!   working set of the file store
//! - [`JsonFileStore`]: memory store persisted as a JSON array on every upsert

mod json_file;
mod memory;

use std::path::Path;

use async_trait::async_trait;
use thiserror::Error;

use crate::period::Period;
use crate::types::{IndexRecord, IndexType};

pub use json_file::JsonFileStore;
pub use memory::MemoryStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("Invalid record: {0}")]
    InvalidRecord(String),
}

/// Key-value access to index records by (index type, year, month).
///
/// At most one record exists per key; `upsert` replaces any previous one.
#[async_trait]
pub trait IndexStore: Send + Sync {
    async fn get_exact(
        &self,
        index_type: IndexType,
        period: Period,
    ) -> Result<Option<IndexRecord>, StoreError>;

    /// Chronologically latest record of `index_type`, any period.
    async fn get_most_recent(&self, index_type: IndexType)
        -> Result<Option<IndexRecord>, StoreError>;

    /// Chronologically latest record of `index_type` strictly before `period`.
    async fn get_most_recent_before(
        &self,
        index_type: IndexType,
        period: Period,
    ) -> Result<Option<IndexRecord>, StoreError>;

    async fn upsert(&self, record: IndexRecord) -> Result<(), StoreError>;

    async fn len(&self) -> Result<usize, StoreError>;
}

/// Read seed records from a JSON array file. Every record is validated.
pub fn load_seed(path: &Path) -> Result<Vec<IndexRecord>, StoreError> {
    let json = std::fs::read_to_string(path)?;
    let records: Vec<IndexRecord> = serde_json::from_str(&json)?;
    for record in &records {
        record.validate()?;
    }
    Ok(records)
}
