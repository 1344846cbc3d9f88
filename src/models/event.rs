//! Storage notification documents as delivered by S3 event notifications.
//!
//! Only the fields the replicator reads are modelled; everything else in the
//! payload is ignored by serde.

use serde::{Deserialize, Serialize};

/// Top-level notification body: `{"Records": [...]}`.
#[derive(Deserialize, Debug, Default)]
pub struct NotificationEvent {
    #[serde(rename = "Records", default)]
    pub records: Vec<NotificationRecord>,
}

#[derive(Deserialize, Debug)]
pub struct NotificationRecord {
    #[serde(rename = "awsRegion")]
    pub aws_region: Option<String>,

    #[serde(rename = "eventName")]
    pub event_name: Option<String>,

    pub s3: S3Entity,
}

#[derive(Deserialize, Debug)]
pub struct S3Entity {
    pub bucket: BucketEntity,
    pub object: ObjectEntity,
}

#[derive(Deserialize, Debug)]
pub struct BucketEntity {
    pub name: Option<String>,
    pub arn: Option<String>,
}

#[derive(Deserialize, Debug)]
pub struct ObjectEntity {
    /// URL-encoded object key.
    pub key: String,
}

/// A validated, normalized record ready for resolution.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct SourceRecord {
    /// Bucket named in the notification, when present.
    pub bucket: Option<String>,

    /// Decoded object key.
    pub key: String,

    pub region: String,
}
