//! A journaled transfer outcome.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// One row of the `transfers` table.
///
/// Locations are stored in their `scheme://bucket/key` display form so rows
/// stay readable without joining anything.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug)]
pub struct JournalEntry {
    pub id: Uuid,

    pub source: String,

    pub destination: String,

    /// `simple` or `multipart`; absent when the size lookup failed.
    pub strategy: Option<String>,

    /// `success` or `failed`.
    pub status: String,

    pub bytes_transferred: i64,

    pub parts: i64,

    pub remote_transaction_id: Option<String>,

    pub error_kind: Option<String>,

    pub error_message: Option<String>,

    pub started_at: DateTime<Utc>,

    pub finished_at: DateTime<Utc>,
}
