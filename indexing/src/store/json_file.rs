use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::debug;

use super::{IndexStore, MemoryStore, StoreError};
use crate::period::Period;
use crate::types::{IndexRecord, IndexType};

/// A [`MemoryStore`] persisted to a JSON array file.
///
/// Reads are served from memory. Every upsert rewrites the file through a
/// temporary sibling and a rename, so a crash never leaves a truncated file.
pub struct JsonFileStore {
    path: PathBuf,
    inner: MemoryStore,
    /// Serialises file rewrites so concurrent upserts land in order.
    write_lock: Mutex<()>,
}

impl JsonFileStore {
    /// Open `path`, loading existing records. A missing file is an empty store.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let records = match tokio::fs::read_to_string(&path).await {
            Ok(json) => {
                let records: Vec<IndexRecord> = serde_json::from_str(&json)?;
                for record in &records {
                    record.validate()?;
                }
                records
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(e.into()),
        };
        debug!(path = %path.display(), records = records.len(), "Opened index store");
        Ok(Self {
            path,
            inner: MemoryStore::with_records(records),
            write_lock: Mutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Rewrite the file with `records`. Memory is untouched.
    async fn persist(&self, records: &[IndexRecord]) -> Result<(), StoreError> {
        let json = serde_json::to_string_pretty(records)?;
        let tmp = self.path.with_extension("json.tmp");
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        tokio::fs::write(&tmp, json).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}

#[async_trait]
impl IndexStore for JsonFileStore {
    async fn get_exact(
        &self,
        index_type: IndexType,
        period: Period,
    ) -> Result<Option<IndexRecord>, StoreError> {
        self.inner.get_exact(index_type, period).await
    }

    async fn get_most_recent(
        &self,
        index_type: IndexType,
    ) -> Result<Option<IndexRecord>, StoreError> {
        self.inner.get_most_recent(index_type).await
    }

    async fn get_most_recent_before(
        &self,
        index_type: IndexType,
        period: Period,
    ) -> Result<Option<IndexRecord>, StoreError> {
        self.inner.get_most_recent_before(index_type, period).await
    }

    async fn upsert(&self, record: IndexRecord) -> Result<(), StoreError> {
        record.validate()?;
        let _guard = self.write_lock.lock().await;

        // Disk first: a failed write must not leave the record visible.
        let mut records = self.inner.all().await;
        match records
            .iter_mut()
            .find(|r| r.index_type == record.index_type && r.period == record.period)
        {
            Some(existing) => *existing = record.clone(),
            None => {
                records.push(record.clone());
                records.sort_by_key(|r| (r.index_type, r.period));
            }
        }
        self.persist(&records).await?;
        self.inner.upsert(record).await
    }

    async fn len(&self) -> Result<usize, StoreError> {
        self.inner.len().await
    }
}
