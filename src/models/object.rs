//! Identifies objects in a named store and the metadata captured before a transfer.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The store an [`ObjectLocation`] lives in.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StoreKind {
    /// AWS S3 (the replication source).
    S3,
    /// Aliyun OSS, addressed through its S3-compatible API.
    Oss,
    /// A directory on the local filesystem.
    Local,
}

impl StoreKind {
    /// URI scheme used when rendering locations in logs.
    pub fn scheme(self) -> &'static str {
        match self {
            StoreKind::S3 => "s3",
            StoreKind::Oss => "oss",
            StoreKind::Local => "file",
        }
    }
}

/// A single object in a named store.
///
/// Locations are immutable once built; derive a new one instead of editing.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct ObjectLocation {
    /// Which store holds the object.
    pub store: StoreKind,

    /// Bucket (or top-level directory for [`StoreKind::Local`]).
    pub bucket: String,

    /// Object key, path-like (e.g. `mysql/2025/backup.sql.gz`).
    pub key: String,

    /// Region the bucket is hosted in (e.g. "ap-south-1").
    pub region: String,
}

impl ObjectLocation {
    pub fn new(
        store: StoreKind,
        bucket: impl Into<String>,
        key: impl Into<String>,
        region: impl Into<String>,
    ) -> Self {
        Self {
            store,
            bucket: bucket.into(),
            key: key.into(),
            region: region.into(),
        }
    }
}

impl fmt::Display for ObjectLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}/{}", self.store.scheme(), self.bucket, self.key)
    }
}

/// Metadata fetched once per transfer by `head_object`, read-only afterwards.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct ObjectMetadata {
    /// Size in bytes.
    pub size: u64,

    /// Store-defined content hash (usually the ETag). Opaque to the engine.
    pub content_hash: Option<String>,

    /// Where the metadata was read from.
    pub source: ObjectLocation,
}
