//! Turns a storage notification into the records worth replicating.
//!
//! A record qualifies when it is an `ObjectCreated:*` event, carries a
//! resolvable region, and its decoded key lives under the configured prefix.
//! Everything else is reported as skipped, never as an error.

use crate::models::event::{NotificationEvent, NotificationRecord, SourceRecord};
use percent_encoding::percent_decode_str;
use serde::Serialize;
use tracing::{info, warn};

/// A record that was dropped, and why.
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct SkippedRecord {
    pub key: String,
    pub reason: String,
}

#[derive(Debug, Default)]
pub struct RoutedRecords {
    pub accepted: Vec<SourceRecord>,
    pub skipped: Vec<SkippedRecord>,
}

#[derive(Debug, Clone)]
pub struct EventRouter {
    key_prefix: String,
}

impl EventRouter {
    pub fn new(key_prefix: impl Into<String>) -> Self {
        Self {
            key_prefix: key_prefix.into(),
        }
    }

    pub fn route(&self, event: &NotificationEvent) -> RoutedRecords {
        let mut routed = RoutedRecords::default();
        for record in &event.records {
            match self.accept(record) {
                Ok(source) => routed.accepted.push(source),
                Err(skipped) => {
                    info!("Skipping `{}`: {}", skipped.key, skipped.reason);
                    routed.skipped.push(skipped);
                }
            }
        }
        routed
    }

    fn accept(&self, record: &NotificationRecord) -> Result<SourceRecord, SkippedRecord> {
        let key = decode_key(&record.s3.object.key);
        let skip = |reason: String| SkippedRecord {
            key: key.clone(),
            reason,
        };

        if let Some(name) = record.event_name.as_deref() {
            if !name.starts_with("ObjectCreated:") {
                return Err(skip(format!("event `{}` is not an object creation", name)));
            }
        }

        if !key.starts_with(&self.key_prefix) {
            return Err(skip(format!(
                "key is outside the `{}` prefix",
                self.key_prefix
            )));
        }

        let Some(region) = record_region(record) else {
            warn!("No region on notification record for `{}`", key);
            return Err(skip("no region in record or bucket ARN".into()));
        };

        Ok(SourceRecord {
            bucket: record.s3.bucket.name.clone().filter(|b| !b.is_empty()),
            key,
            region,
        })
    }
}

/// Notification keys are form-encoded: `+` is a space, then percent escapes.
/// Undecodable UTF-8 falls back to the raw key.
pub fn decode_key(raw: &str) -> String {
    let spaced = raw.replace('+', " ");
    percent_decode_str(&spaced)
        .decode_utf8()
        .map(|s| s.to_string())
        .unwrap_or(spaced)
}

/// `awsRegion`, else the fourth field of `arn:aws:s3:<region>:...`.
fn record_region(record: &NotificationRecord) -> Option<String> {
    record
        .aws_region
        .clone()
        .filter(|r| !r.is_empty())
        .or_else(|| {
            record
                .s3
                .bucket
                .arn
                .as_deref()
                .and_then(|arn| arn.split(':').nth(3))
                .filter(|r| !r.is_empty())
                .map(str::to_string)
        })
}
