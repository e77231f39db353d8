use std::collections::BTreeMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{IndexStore, StoreError};
use crate::period::Period;
use crate::types::{IndexRecord, IndexType};

/// Records ordered by (index type, period), so "most recent" is a range scan
/// from the back.
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: RwLock<BTreeMap<(IndexType, Period), IndexRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_records(records: impl IntoIterator<Item = IndexRecord>) -> Self {
        let map = records
            .into_iter()
            .map(|r| ((r.index_type, r.period), r))
            .collect();
        Self {
            records: RwLock::new(map),
        }
    }

    pub(crate) async fn all(&self) -> Vec<IndexRecord> {
        self.records.read().await.values().cloned().collect()
    }
}

fn type_range(index_type: IndexType) -> std::ops::RangeInclusive<(IndexType, Period)> {
    let lowest = Period {
        year: i32::MIN,
        month: 1,
    };
    let highest = Period {
        year: i32::MAX,
        month: 12,
    };
    (index_type, lowest)..=(index_type, highest)
}

#[async_trait]
impl IndexStore for MemoryStore {
    async fn get_exact(
        &self,
        index_type: IndexType,
        period: Period,
    ) -> Result<Option<IndexRecord>, StoreError> {
        Ok(self.records.read().await.get(&(index_type, period)).cloned())
    }

    async fn get_most_recent(
        &self,
        index_type: IndexType,
    ) -> Result<Option<IndexRecord>, StoreError> {
        let records = self.records.read().await;
        Ok(records
            .range(type_range(index_type))
            .next_back()
            .map(|(_, r)| r.clone()))
    }

    async fn get_most_recent_before(
        &self,
        index_type: IndexType,
        period: Period,
    ) -> Result<Option<IndexRecord>, StoreError> {
        let records = self.records.read().await;
        Ok(records
            .range(type_range(index_type))
            .rev()
            .find(|((_, p), _)| *p < period)
            .map(|(_, r)| r.clone()))
    }

    async fn upsert(&self, record: IndexRecord) -> Result<(), StoreError> {
        record.validate()?;
        self.records
            .write()
            .await
            .insert((record.index_type, record.period), record);
        Ok(())
    }

    async fn len(&self) -> Result<usize, StoreError> {
        Ok(self.records.read().await.len())
    }
}
