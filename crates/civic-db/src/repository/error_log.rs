//! # Error Log Repository
//!
//! Stores the most recent suffix of the reporter's error log.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  error_log                                                              │
//! │                                                                         │
//! │  id | seq | timestamp | message | stack_summary | context | source     │
//! │  ───┼─────┼───────────┼─────────┼───────────────┼─────────┼─────────── │
//! │  a1 │ 0   │ 09:12:44Z │ ...     │ ...           │ {...}   │ reported   │
//! │  b7 │ 1   │ 09:13:02Z │ ...     │ ...           │ {...}   │ uncaught   │
//! │                                                                         │
//! │  replace_all() rewrites the table in one transaction, so a crash never │
//! │  leaves a half-written suffix behind.                                  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::{DateTime, Utc};
use civic_core::{ErrorContext, ErrorRecord, ErrorSource};
use sqlx::{Row, SqlitePool};
use tracing::debug;

use crate::error::{DbError, DbResult};

/// Repository for the persisted error log.
#[derive(Debug, Clone)]
pub struct ErrorLogRepository {
    pool: SqlitePool,
}

impl ErrorLogRepository {
    /// Creates a new ErrorLogRepository.
    pub fn new(pool: SqlitePool) -> Self {
        ErrorLogRepository { pool }
    }

    /// Loads every stored record, oldest first.
    pub async fn load_all(&self) -> DbResult<Vec<ErrorRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT id, timestamp, message, stack_summary, context, source
            FROM error_log
            ORDER BY seq ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                let id: String = row.try_get("id")?;
                let timestamp: DateTime<Utc> = row.try_get("timestamp")?;
                let context_json: String = row.try_get("context")?;
                let source_str: String = row.try_get("source")?;

                let context: ErrorContext =
                    serde_json::from_str(&context_json).map_err(|e| DbError::CorruptRow {
                        id: id.clone(),
                        reason: e.to_string(),
                    })?;
                let source: ErrorSource = source_str
                    .parse()
                    .map_err(|reason| DbError::CorruptRow { id: id.clone(), reason })?;

                Ok(ErrorRecord {
                    id,
                    timestamp,
                    message: row.try_get("message")?,
                    stack_summary: row.try_get("stack_summary")?,
                    context,
                    source,
                })
            })
            .collect()
    }

    /// Replaces the stored log with `records` (oldest first).
    pub async fn replace_all(&self, records: &[ErrorRecord]) -> DbResult<()> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| DbError::TransactionFailed(e.to_string()))?;

        sqlx::query("DELETE FROM error_log").execute(&mut *tx).await?;

        for (seq, record) in records.iter().enumerate() {
            let context = serde_json::to_string(&record.context).map_err(|e| DbError::CorruptRow {
                id: record.id.clone(),
                reason: e.to_string(),
            })?;

            sqlx::query(
                r#"
                INSERT INTO error_log (id, seq, timestamp, message, stack_summary, context, source)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                "#,
            )
            .bind(&record.id)
            .bind(seq as i64)
            .bind(record.timestamp)
            .bind(&record.message)
            .bind(&record.stack_summary)
            .bind(context)
            .bind(record.source.as_str())
            .execute(&mut *tx)
            .await?;
        }

        tx.commit()
            .await
            .map_err(|e| DbError::TransactionFailed(e.to_string()))?;

        debug!(count = records.len(), "Error log persisted");
        Ok(())
    }

    /// Deletes every stored record.
    pub async fn clear(&self) -> DbResult<u64> {
        let result = sqlx::query("DELETE FROM error_log").execute(&self.pool).await?;
        Ok(result.rows_affected())
    }

    /// Returns the number of stored records.
    pub async fn count(&self) -> DbResult<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM error_log")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }
}
