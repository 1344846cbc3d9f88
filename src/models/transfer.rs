//! Transfer requests, strategies and the per-request outcome.

use super::object::ObjectLocation;
use serde::{Deserialize, Serialize};

pub const MIB: u64 = 1024 * 1024;

/// Objects up to and including this size are copied with a single streamed put.
pub const MULTIPART_THRESHOLD: u64 = 100 * MIB;

/// Nominal part size for multipart transfers.
pub const PART_SIZE: u64 = 20 * MIB;

/// Most parts an S3-compatible multipart upload accepts.
pub const MAX_PARTS: u32 = 10_000;

/// A source object and where it must land. The destination is always computed
/// by the location resolver, never taken from the notification.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct TransferRequest {
    pub source: ObjectLocation,
    pub destination: ObjectLocation,
}

/// How the bytes are moved.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TransferStrategy {
    /// One streamed `put_object`.
    Simple,
    /// A multipart session filled from ranged reads.
    Multipart,
}

impl TransferStrategy {
    /// `size <= threshold` selects [`TransferStrategy::Simple`], anything larger multipart.
    pub fn select(size: u64, threshold: u64) -> Self {
        if size <= threshold {
            TransferStrategy::Simple
        } else {
            TransferStrategy::Multipart
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TransferStrategy::Simple => "simple",
            TransferStrategy::Multipart => "multipart",
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TransferStatus {
    Success,
    Failed,
}

impl TransferStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            TransferStatus::Success => "success",
            TransferStatus::Failed => "failed",
        }
    }
}

/// Classification of a failed transfer, as reported to callers.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    NotFound,
    AccessDenied,
    QuotaExceeded,
    StoreUnavailable,
    RangeUnsatisfiable,
    IncompletePartSet,
    InvalidRequest,
    Unexpected,
}

impl FailureKind {
    pub fn as_str(self) -> &'static str {
        match self {
            FailureKind::NotFound => "not_found",
            FailureKind::AccessDenied => "access_denied",
            FailureKind::QuotaExceeded => "quota_exceeded",
            FailureKind::StoreUnavailable => "store_unavailable",
            FailureKind::RangeUnsatisfiable => "range_unsatisfiable",
            FailureKind::IncompletePartSet => "incomplete_part_set",
            FailureKind::InvalidRequest => "invalid_request",
            FailureKind::Unexpected => "unexpected",
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct TransferFailure {
    pub kind: FailureKind,
    pub message: String,
}

/// Outcome of exactly one [`TransferRequest`].
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct TransferResult {
    pub status: TransferStatus,

    pub source: ObjectLocation,

    pub destination: ObjectLocation,

    /// Strategy chosen after the size lookup; `None` when the lookup failed.
    pub strategy: Option<TransferStrategy>,

    pub bytes_transferred: u64,

    /// Parts committed in multipart mode, zero otherwise.
    pub parts: u32,

    /// Final ETag (or equivalent) reported by the destination.
    pub remote_transaction_id: Option<String>,

    pub error: Option<TransferFailure>,
}

impl TransferResult {
    pub fn succeeded(
        request: &TransferRequest,
        strategy: TransferStrategy,
        bytes_transferred: u64,
        parts: u32,
        remote_transaction_id: String,
    ) -> Self {
        Self {
            status: TransferStatus::Success,
            source: request.source.clone(),
            destination: request.destination.clone(),
            strategy: Some(strategy),
            bytes_transferred,
            parts,
            remote_transaction_id: Some(remote_transaction_id),
            error: None,
        }
    }

    pub fn failed(
        request: &TransferRequest,
        strategy: Option<TransferStrategy>,
        kind: FailureKind,
        message: impl Into<String>,
    ) -> Self {
        Self {
            status: TransferStatus::Failed,
            source: request.source.clone(),
            destination: request.destination.clone(),
            strategy,
            bytes_transferred: 0,
            parts: 0,
            remote_transaction_id: None,
            error: Some(TransferFailure {
                kind,
                message: message.into(),
            }),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == TransferStatus::Success
    }
}
