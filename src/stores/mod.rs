//! Store abstractions used by the transfer orchestrator.
//!
//! [`ObjectReader`] and [`ObjectWriter`] hide which store is read or written.
//! Concrete stores:
//! - [`s3_store::S3Store`]: AWS S3 and S3-compatible endpoints (Aliyun OSS)
//! - [`local_store::LocalStore`]: a directory on local disk
//!
//! Every call either returns a value or fails with a [`StoreError`]; nothing in
//! this layer retries.

use crate::models::{
    multipart::{CompletedPart, MultipartSession, PartLayout},
    object::{ObjectLocation, ObjectMetadata},
    transfer::FailureKind,
};
use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use std::io;
use thiserror::Error;

pub mod local_store;
#[cfg(test)]
pub mod memory_store;
pub mod s3_store;

/// Forward-only stream of object bytes. Dropping it releases the underlying
/// connection or file handle.
pub type ObjectStream = BoxStream<'static, io::Result<Bytes>>;

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("object `{0}` not found")]
    NotFound(String),
    #[error("access denied to `{0}`")]
    AccessDenied(String),
    #[error("quota exceeded writing `{0}`")]
    QuotaExceeded(String),
    #[error("store unavailable during {operation} on `{location}`: {source}")]
    Unavailable {
        operation: &'static str,
        location: String,
        source: BoxError,
    },
    #[error("range {offset}+{length} not satisfiable for `{location}`")]
    RangeUnsatisfiable {
        location: String,
        offset: u64,
        length: u64,
    },
    #[error("multipart session `{session_id}` is missing parts {missing:?}")]
    IncompletePartSet { session_id: String, missing: Vec<u32> },
    #[error("`{location}` rejected by the store: {reason}")]
    InvalidRequest { location: String, reason: String },
    #[error("unexpected failure during {operation} on `{location}`: {source}")]
    Unexpected {
        operation: &'static str,
        location: String,
        source: BoxError,
    },
}

pub type StoreResult<T> = Result<T, StoreError>;

impl StoreError {
    pub fn kind(&self) -> FailureKind {
        match self {
            StoreError::NotFound(_) => FailureKind::NotFound,
            StoreError::AccessDenied(_) => FailureKind::AccessDenied,
            StoreError::QuotaExceeded(_) => FailureKind::QuotaExceeded,
            StoreError::Unavailable { .. } => FailureKind::StoreUnavailable,
            StoreError::RangeUnsatisfiable { .. } => FailureKind::RangeUnsatisfiable,
            StoreError::IncompletePartSet { .. } => FailureKind::IncompletePartSet,
            StoreError::InvalidRequest { .. } => FailureKind::InvalidRequest,
            StoreError::Unexpected { .. } => FailureKind::Unexpected,
        }
    }

    /// Unclassified failures escalate past the per-request boundary.
    pub fn is_unexpected(&self) -> bool {
        matches!(self, StoreError::Unexpected { .. })
    }

    /// Map a local I/O error onto the store taxonomy.
    pub fn from_io(operation: &'static str, location: &ObjectLocation, err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::NotFound => StoreError::NotFound(location.to_string()),
            io::ErrorKind::PermissionDenied => StoreError::AccessDenied(location.to_string()),
            io::ErrorKind::StorageFull => StoreError::QuotaExceeded(location.to_string()),
            _ => StoreError::Unavailable {
                operation,
                location: location.to_string(),
                source: Box::new(err),
            },
        }
    }
}

/// Read side of a store.
#[async_trait]
pub trait ObjectReader: Send + Sync {
    /// Fetch size and content hash.
    async fn head_object(&self, location: &ObjectLocation) -> StoreResult<ObjectMetadata>;

    /// Open a lazily consumed stream over the whole object.
    async fn open_stream(&self, location: &ObjectLocation) -> StoreResult<ObjectStream>;

    /// Read exactly `length` bytes starting at `offset`.
    async fn read_range(
        &self,
        location: &ObjectLocation,
        offset: u64,
        length: u64,
    ) -> StoreResult<Bytes>;
}

/// Write side of a store.
#[async_trait]
pub trait ObjectWriter: Send + Sync {
    /// Single-shot write of a whole object. Returns the store's transaction id (ETag).
    async fn put_object(
        &self,
        location: &ObjectLocation,
        body: ObjectStream,
        content_length: u64,
    ) -> StoreResult<String>;

    /// Open a new multipart session. Not idempotent: every call allocates a
    /// fresh remote session.
    async fn begin_multipart(
        &self,
        location: &ObjectLocation,
        layout: PartLayout,
    ) -> StoreResult<MultipartSession>;

    /// Upload one part. Parts may arrive in any order.
    async fn upload_part(
        &self,
        session: &MultipartSession,
        part_number: u32,
        bytes: Bytes,
    ) -> StoreResult<CompletedPart>;

    /// Finalize the session. Fails with [`StoreError::IncompletePartSet`]
    /// unless parts `1..=total_parts` are all recorded on `session`.
    async fn complete_multipart(&self, session: &MultipartSession) -> StoreResult<String>;

    /// Release every resource held by the session. Safe with zero parts and
    /// safe to call more than once.
    async fn abort_multipart(&self, session: &MultipartSession) -> StoreResult<()>;
}

/// Shared completion precondition for every writer.
pub(crate) fn ensure_complete(session: &MultipartSession) -> StoreResult<()> {
    if session.is_complete() {
        Ok(())
    } else {
        Err(StoreError::IncompletePartSet {
            session_id: session.session_id.clone(),
            missing: session.missing_parts(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::object::StoreKind;

    #[test]
    fn io_errors_map_to_taxonomy() {
        let loc = ObjectLocation::new(StoreKind::Local, "b", "k", "local");
        let not_found = StoreError::from_io("head", &loc, io::Error::from(io::ErrorKind::NotFound));
        assert_eq!(not_found.kind(), FailureKind::NotFound);

        let denied =
            StoreError::from_io("head", &loc, io::Error::from(io::ErrorKind::PermissionDenied));
        assert_eq!(denied.kind(), FailureKind::AccessDenied);

        let other = StoreError::from_io("read", &loc, io::Error::other("disk on fire"));
        assert_eq!(other.kind(), FailureKind::StoreUnavailable);
        assert!(!other.is_unexpected());
    }
}
