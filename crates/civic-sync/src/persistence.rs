//! # Error Log Persistence
//!
//! Storage backends for the reporter's persisted suffix.
//!
//! The reporter calls `save()` from a single writer task with the whole
//! suffix each time, so backends replace rather than append. A failing backend
//! is logged by the writer and otherwise ignored.

use std::path::Path;

use async_trait::async_trait;
use civic_core::ErrorRecord;
use civic_db::{Database, DbConfig, ErrorLogRepository};
use parking_lot::Mutex;
use tracing::info;

use crate::error::ClientResult;

/// Where the reporter keeps records across restarts.
#[async_trait]
pub trait ErrorPersistence: Send + Sync {
    /// Returns the stored records, oldest first.
    async fn load(&self) -> ClientResult<Vec<ErrorRecord>>;

    /// Replaces the stored records with `records` (oldest first).
    async fn save(&self, records: &[ErrorRecord]) -> ClientResult<()>;
}

// =============================================================================
// Memory
// =============================================================================

/// Keeps the suffix in memory. Lost on restart.
#[derive(Debug, Default)]
pub struct MemoryPersistence {
    records: Mutex<Vec<ErrorRecord>>,
}

impl MemoryPersistence {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts with `records` already stored.
    pub fn with_records(records: Vec<ErrorRecord>) -> Self {
        MemoryPersistence {
            records: Mutex::new(records),
        }
    }

    /// Copy of what is currently stored.
    pub fn snapshot(&self) -> Vec<ErrorRecord> {
        self.records.lock().clone()
    }
}

#[async_trait]
impl ErrorPersistence for MemoryPersistence {
    async fn load(&self) -> ClientResult<Vec<ErrorRecord>> {
        Ok(self.snapshot())
    }

    async fn save(&self, records: &[ErrorRecord]) -> ClientResult<()> {
        *self.records.lock() = records.to_vec();
        Ok(())
    }
}

// =============================================================================
// SQLite
// =============================================================================

/// Keeps the suffix in the `error_log` table.
#[derive(Debug, Clone)]
pub struct SqlitePersistence {
    repo: ErrorLogRepository,
}

impl SqlitePersistence {
    /// Uses an already-open database.
    pub fn new(db: &Database) -> Self {
        SqlitePersistence { repo: db.error_log() }
    }

    /// Opens (creating if needed) the database file at `path`.
    pub async fn open(path: impl AsRef<Path>) -> ClientResult<Self> {
        let path = path.as_ref();
        let db = Database::new(DbConfig::new(path)).await?;
        info!(path = %path.display(), "Error log database opened");
        Ok(Self::new(&db))
    }
}

#[async_trait]
impl ErrorPersistence for SqlitePersistence {
    async fn load(&self) -> ClientResult<Vec<ErrorRecord>> {
        Ok(self.repo.load_all().await?)
    }

    async fn save(&self, records: &[ErrorRecord]) -> ClientResult<()> {
        Ok(self.repo.replace_all(records).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use civic_core::{ErrorContext, ErrorSource};

    fn record(message: &str) -> ErrorRecord {
        ErrorRecord::new(message, message, ErrorContext::new(), ErrorSource::Reported)
    }

    #[tokio::test]
    async fn test_memory_persistence_replaces() {
        let store = MemoryPersistence::with_records(vec![record("old")]);
        assert_eq!(store.load().await.unwrap().len(), 1);

        store.save(&[record("a"), record("b")]).await.unwrap();
        let loaded = store.load().await.unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[0].message, "a");
    }

    #[tokio::test]
    async fn test_sqlite_persistence_round_trip() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let store = SqlitePersistence::new(&db);

        store.save(&[record("first"), record("second")]).await.unwrap();
        let loaded = store.load().await.unwrap();
        assert_eq!(
            loaded.iter().map(|r| r.message.as_str()).collect::<Vec<_>>(),
            vec!["first", "second"]
        );
    }
}
