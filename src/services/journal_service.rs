//! src/services/journal_service.rs
//!
//! Journal: an append-only SQLite record of every transfer outcome. The
//! journal is advisory: callers log its failures and carry on.

use crate::models::{journal::JournalEntry, transfer::TransferResult};
use chrono::{DateTime, Utc};
use sqlx::{SqlitePool, sqlite::SqlitePoolOptions};
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

/// Schema applied by `--migrate` and by [`Journal::migrate`].
const SCHEMA: &str = include_str!("../../migrations/0001_init.sql");

/// Rows returned by [`Journal::recent`] when no limit is given.
pub const DEFAULT_RECENT_LIMIT: u32 = 50;
const MAX_RECENT_LIMIT: u32 = 1000;

#[derive(Debug, Error)]
pub enum JournalError {
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
    #[error("journal health check returned {0}")]
    Unhealthy(i64),
}

pub type JournalResult<T> = Result<T, JournalError>;

#[derive(Clone)]
pub struct Journal {
    db: Arc<SqlitePool>,
}

impl Journal {
    pub fn new(db: Arc<SqlitePool>) -> Self {
        Self { db }
    }

    /// Open a pool for `database_url`, creating the database file if needed.
    pub async fn connect(database_url: &str) -> JournalResult<Self> {
        let options = database_url
            .parse::<sqlx::sqlite::SqliteConnectOptions>()?
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;
        Ok(Self::new(Arc::new(pool)))
    }

    /// Apply the embedded schema. Statements are idempotent.
    pub async fn migrate(&self) -> JournalResult<()> {
        let statements = SCHEMA
            .split(';')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>();

        tracing::info!("Running {} migration statements...", statements.len());
        for stmt in statements {
            debug!("Executing migration SQL: {}", stmt);
            sqlx::query(stmt).execute(&*self.db).await?;
        }
        Ok(())
    }

    /// Append one outcome and return its row id.
    pub async fn record(
        &self,
        result: &TransferResult,
        started_at: DateTime<Utc>,
    ) -> JournalResult<Uuid> {
        let id = Uuid::new_v4();
        sqlx::query(
            r#"
            INSERT INTO transfers (
                id, source, destination, strategy, status, bytes_transferred,
                parts, remote_transaction_id, error_kind, error_message,
                started_at, finished_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(id)
        .bind(result.source.to_string())
        .bind(result.destination.to_string())
        .bind(result.strategy.map(|s| s.as_str()))
        .bind(result.status.as_str())
        .bind(result.bytes_transferred as i64)
        .bind(i64::from(result.parts))
        .bind(result.remote_transaction_id.as_deref())
        .bind(result.error.as_ref().map(|e| e.kind.as_str()))
        .bind(result.error.as_ref().map(|e| e.message.as_str()))
        .bind(started_at)
        .bind(Utc::now())
        .execute(&*self.db)
        .await?;

        debug!(%id, status = result.status.as_str(), "journaled transfer");
        Ok(id)
    }

    /// Most recent outcomes first. `limit` is clamped to `1..=1000`.
    pub async fn recent(&self, limit: u32) -> JournalResult<Vec<JournalEntry>> {
        let limit = limit.clamp(1, MAX_RECENT_LIMIT);
        let rows = sqlx::query_as::<_, JournalEntry>(
            r#"
            SELECT id, source, destination, strategy, status, bytes_transferred,
                   parts, remote_transaction_id, error_kind, error_message,
                   started_at, finished_at
            FROM transfers
            ORDER BY finished_at DESC, rowid DESC
            LIMIT ?
            "#,
        )
        .bind(i64::from(limit))
        .fetch_all(&*self.db)
        .await?;
        Ok(rows)
    }

    /// `SELECT 1` round trip for readiness checks.
    pub async fn ping(&self) -> JournalResult<()> {
        match sqlx::query_scalar::<_, i64>("SELECT 1")
            .fetch_one(&*self.db)
            .await?
        {
            1 => Ok(()),
            other => Err(JournalError::Unhealthy(other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{
        object::{ObjectLocation, StoreKind},
        transfer::{FailureKind, TransferRequest, TransferStrategy},
    };

    async fn journal() -> Journal {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        let journal = Journal::new(Arc::new(pool));
        journal.migrate().await.unwrap();
        journal
    }

    fn request(key: &str) -> TransferRequest {
        TransferRequest {
            source: ObjectLocation::new(StoreKind::S3, "rds-src", key, "ap-south-1"),
            destination: ObjectLocation::new(
                StoreKind::Oss,
                "iotdb-backup",
                format!("rds-backup/india/{}", key),
                "cn-hangzhou",
            ),
        }
    }

    #[tokio::test]
    async fn migrate_is_repeatable() {
        let journal = journal().await;
        journal.migrate().await.unwrap();
        journal.ping().await.unwrap();
    }

    #[tokio::test]
    async fn records_success_and_failure_rows() {
        let journal = journal().await;
        let ok = TransferResult::succeeded(
            &request("mysql/a.gz"),
            TransferStrategy::Multipart,
            205,
            11,
            "etag-1".into(),
        );
        let failed = TransferResult::failed(
            &request("mysql/b.gz"),
            None,
            FailureKind::NotFound,
            "object not found",
        );
        journal.record(&ok, Utc::now()).await.unwrap();
        journal.record(&failed, Utc::now()).await.unwrap();

        let rows = journal.recent(DEFAULT_RECENT_LIMIT).await.unwrap();
        assert_eq!(rows.len(), 2);

        let newest = &rows[0];
        assert_eq!(newest.source, "s3://rds-src/mysql/b.gz");
        assert_eq!(newest.status, "failed");
        assert_eq!(newest.strategy, None);
        assert_eq!(newest.error_kind.as_deref(), Some("not_found"));

        let oldest = &rows[1];
        assert_eq!(oldest.destination, "oss://iotdb-backup/rds-backup/india/mysql/a.gz");
        assert_eq!(oldest.strategy.as_deref(), Some("multipart"));
        assert_eq!(oldest.parts, 11);
        assert_eq!(oldest.remote_transaction_id.as_deref(), Some("etag-1"));
    }

    #[tokio::test]
    async fn recent_honours_limit() {
        let journal = journal().await;
        for i in 0..5 {
            let result = TransferResult::succeeded(
                &request(&format!("mysql/{i}.gz")),
                TransferStrategy::Simple,
                1,
                0,
                format!("etag-{i}"),
            );
            journal.record(&result, Utc::now()).await.unwrap();
        }
        assert_eq!(journal.recent(3).await.unwrap().len(), 3);
        assert_eq!(journal.recent(0).await.unwrap().len(), 1);
    }
}
