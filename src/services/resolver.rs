//! Location resolution: region → source bucket, region → destination prefix,
//! and the source key → destination key mapping.
//!
//! Destination keys always carry a region prefix
//! (`{prefix_root}/{region segment}/{source key}`) so replicas from different
//! regions never collide and unmapped regions land in a clearly separate
//! `unknown` namespace instead of being dropped.

use crate::{
    config::{ConfigError, DestinationConfig},
    models::{
        event::SourceRecord,
        object::{ObjectLocation, StoreKind},
        transfer::TransferRequest,
    },
};
use std::collections::HashMap;

/// Segment used for regions missing from the prefix table.
pub const FALLBACK_SEGMENT: &str = "unknown";

/// Static region tables, read-only after startup.
#[derive(Debug, Clone)]
pub struct RegionMapping {
    source_buckets: HashMap<String, String>,
    segments: HashMap<String, String>,
    prefix_root: String,
}

impl RegionMapping {
    pub fn new(
        source_buckets: HashMap<String, String>,
        segments: HashMap<String, String>,
        prefix_root: impl Into<String>,
    ) -> Self {
        Self {
            source_buckets,
            segments,
            prefix_root: prefix_root.into(),
        }
    }

    /// Strict lookup; an unmapped region is a configuration error.
    pub fn source_bucket(&self, region: &str) -> Result<&str, ConfigError> {
        self.source_buckets
            .get(region)
            .map(String::as_str)
            .ok_or_else(|| ConfigError::UnmappedRegion(region.to_string()))
    }

    /// Total lookup; unmapped regions resolve to the fallback segment.
    pub fn destination_prefix(&self, region: &str) -> String {
        let segment = self
            .segments
            .get(region)
            .map(String::as_str)
            .unwrap_or(FALLBACK_SEGMENT);
        join_key(&self.prefix_root, segment)
    }
}

impl Default for RegionMapping {
    fn default() -> Self {
        let segments = [("ap-southeast-2", "australia"), ("ap-south-1", "india")]
            .into_iter()
            .map(|(r, s)| (r.to_string(), s.to_string()))
            .collect();
        Self::new(HashMap::new(), segments, "rds-backup")
    }
}

/// `prefix + "/" + key` without doubling or dropping separators.
///
/// An empty prefix returns the key unchanged; the key's own sub-path is kept.
pub fn join_key(prefix: &str, key: &str) -> String {
    let prefix = prefix.trim_end_matches('/');
    let key = key.trim_start_matches('/');
    match (prefix.is_empty(), key.is_empty()) {
        (true, _) => key.to_string(),
        (false, true) => prefix.to_string(),
        (false, false) => format!("{}/{}", prefix, key),
    }
}

/// Fixed destination identity the resolver writes into.
#[derive(Debug, Clone)]
pub struct DestinationTarget {
    pub store: StoreKind,
    pub bucket: String,
    pub region: String,
}

impl From<&DestinationConfig> for DestinationTarget {
    fn from(config: &DestinationConfig) -> Self {
        Self {
            store: config.store_kind(),
            bucket: config.bucket().to_string(),
            region: config.region().to_string(),
        }
    }
}

/// Pure mapping from a notification record to a [`TransferRequest`].
#[derive(Debug, Clone)]
pub struct LocationResolver {
    mapping: RegionMapping,
    destination: DestinationTarget,
}

impl LocationResolver {
    pub fn new(mapping: RegionMapping, destination: DestinationTarget) -> Self {
        Self {
            mapping,
            destination,
        }
    }

    /// `(source bucket, destination prefix)` for a region. Fails only when the
    /// strict source-bucket lookup has no entry.
    pub fn resolve_region(&self, region: &str) -> Result<(String, String), ConfigError> {
        let bucket = self.mapping.source_bucket(region)?.to_string();
        Ok((bucket, self.mapping.destination_prefix(region)))
    }

    /// Build the request for one record. The notification's own bucket is used
    /// when present; otherwise the strict region table must supply it.
    pub fn resolve(&self, record: &SourceRecord) -> Result<TransferRequest, ConfigError> {
        let (source_bucket, prefix) = match &record.bucket {
            Some(bucket) => (
                bucket.clone(),
                self.mapping.destination_prefix(&record.region),
            ),
            None => self.resolve_region(&record.region)?,
        };

        Ok(TransferRequest {
            source: ObjectLocation::new(
                StoreKind::S3,
                source_bucket,
                record.key.clone(),
                record.region.clone(),
            ),
            destination: ObjectLocation::new(
                self.destination.store,
                self.destination.bucket.clone(),
                join_key(&prefix, &record.key),
                self.destination.region.clone(),
            ),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolver() -> LocationResolver {
        let mut mapping = RegionMapping::default();
        mapping
            .source_buckets
            .insert("ap-south-1".into(), "rds-backups-mumbai".into());
        LocationResolver::new(
            mapping,
            DestinationTarget {
                store: StoreKind::Oss,
                bucket: "iotdb-backup".into(),
                region: "cn-hangzhou".into(),
            },
        )
    }

    fn record(bucket: Option<&str>, key: &str, region: &str) -> SourceRecord {
        SourceRecord {
            bucket: bucket.map(str::to_string),
            key: key.into(),
            region: region.into(),
        }
    }

    #[test]
    fn join_never_doubles_or_drops_slashes() {
        assert_eq!(join_key("rds-backup/india", "mysql/a.gz"), "rds-backup/india/mysql/a.gz");
        assert_eq!(join_key("rds-backup/india/", "/mysql/a.gz"), "rds-backup/india/mysql/a.gz");
        assert_eq!(join_key("", "mysql/a.gz"), "mysql/a.gz");
        assert_eq!(join_key("p", "a/b/c/d.gz"), "p/a/b/c/d.gz");
    }

    #[test]
    fn known_regions_get_their_segment() {
        let r = resolver();
        assert_eq!(r.mapping.destination_prefix("ap-south-1"), "rds-backup/india");
        assert_eq!(r.mapping.destination_prefix("ap-southeast-2"), "rds-backup/australia");
    }

    #[test]
    fn destination_prefix_is_total() {
        let r = resolver();
        for region in ["eu-west-9", "", "AP-SOUTH-1", "us-east-1"] {
            assert_eq!(r.mapping.destination_prefix(region), "rds-backup/unknown");
        }
    }

    #[test]
    fn strict_source_lookup_fails_for_unmapped_region() {
        let r = resolver();
        assert_eq!(
            r.resolve_region("ap-south-1").unwrap(),
            ("rds-backups-mumbai".to_string(), "rds-backup/india".to_string())
        );
        assert!(matches!(
            r.resolve_region("eu-west-9"),
            Err(ConfigError::UnmappedRegion(region)) if region == "eu-west-9"
        ));
    }

    #[test]
    fn scenario_a_key_mapping() {
        let request = resolver()
            .resolve(&record(Some("rds-src"), "mysql/backup.sql.gz", "ap-south-1"))
            .unwrap();
        assert_eq!(request.source.bucket, "rds-src");
        assert_eq!(request.destination.key, "rds-backup/india/mysql/backup.sql.gz");
        assert_eq!(request.destination.bucket, "iotdb-backup");
        assert_eq!(request.destination.store, StoreKind::Oss);
    }

    #[test]
    fn unmapped_region_with_bucket_still_resolves() {
        let request = resolver()
            .resolve(&record(Some("eu-src"), "mysql/x.gz", "eu-west-9"))
            .unwrap();
        assert_eq!(request.destination.key, "rds-backup/unknown/mysql/x.gz");
    }

    #[test]
    fn record_without_bucket_uses_region_table() {
        let r = resolver();
        let request = r.resolve(&record(None, "mysql/x.gz", "ap-south-1")).unwrap();
        assert_eq!(request.source.bucket, "rds-backups-mumbai");
        assert!(r.resolve(&record(None, "mysql/x.gz", "eu-west-9")).is_err());
    }
}
