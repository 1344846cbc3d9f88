use crate::{models::object::StoreKind, services::resolver::RegionMapping};
use clap::Parser;
use std::{collections::HashMap, env, fmt, path::PathBuf};
use thiserror::Error;

const DEFAULT_KEY_PREFIX: &str = "mysql/";
const DEFAULT_REGION_PREFIXES: &str = "ap-southeast-2=australia,ap-south-1=india";
const DEFAULT_PREFIX_ROOT: &str = "rds-backup";
const DEFAULT_SOURCE_REGION: &str = "us-east-1";
const DEFAULT_DEST_ENDPOINT: &str = "https://oss-cn-hangzhou.aliyuncs.com";
const DEFAULT_DEST_REGION: &str = "cn-hangzhou";
const DEFAULT_DEST_BUCKET: &str = "iotdb-backup";
const DEFAULT_DEST_DIR: &str = "./data/replica";

/// Startup-time configuration failures. Any of these aborts the invocation
/// before a single transfer is attempted.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variables: {}", .0.join(", "))]
    MissingEnv(Vec<String>),
    #[error("invalid value `{value}` for {name}: {reason}")]
    InvalidValue {
        name: String,
        value: String,
        reason: String,
    },
    #[error("no source bucket is mapped for region `{0}`")]
    UnmappedRegion(String),
}

/// Connection settings for one S3-compatible endpoint.
#[derive(Clone)]
pub struct S3Settings {
    pub kind: StoreKind,
    /// Custom endpoint (required for OSS, optional for AWS).
    pub endpoint: Option<String>,
    /// Default signing region.
    pub region: String,
    pub access_key: String,
    pub secret_key: String,
    pub session_token: Option<String>,
    pub force_path_style: bool,
}

impl fmt::Debug for S3Settings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("S3Settings")
            .field("kind", &self.kind)
            .field("endpoint", &self.endpoint)
            .field("region", &self.region)
            .field("access_key", &redact(&self.access_key))
            .field("secret_key", &"***")
            .field("force_path_style", &self.force_path_style)
            .finish()
    }
}

/// Where replicas are written.
#[derive(Debug, Clone)]
pub enum DestinationConfig {
    /// Aliyun OSS through its S3-compatible API.
    Oss { settings: S3Settings, bucket: String },
    /// A local directory; `bucket` becomes the first path segment.
    Local { root: PathBuf, bucket: String },
}

impl DestinationConfig {
    pub fn store_kind(&self) -> StoreKind {
        match self {
            DestinationConfig::Oss { .. } => StoreKind::Oss,
            DestinationConfig::Local { .. } => StoreKind::Local,
        }
    }

    pub fn bucket(&self) -> &str {
        match self {
            DestinationConfig::Oss { bucket, .. } | DestinationConfig::Local { bucket, .. } => {
                bucket
            }
        }
    }

    pub fn region(&self) -> &str {
        match self {
            DestinationConfig::Oss { settings, .. } => &settings.region,
            DestinationConfig::Local { .. } => "local",
        }
    }
}

/// Everything the replication engine needs, resolved once at startup.
#[derive(Debug, Clone)]
pub struct ReplicationConfig {
    /// Only keys under this prefix are replicated.
    pub key_prefix: String,
    pub region_mapping: RegionMapping,
    pub source: S3Settings,
    pub destination: DestinationConfig,
    /// Number of parts in flight during a multipart transfer.
    pub part_concurrency: usize,
}

/// Centralized application configuration.
/// Combines environment variables and CLI arguments.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub database_url: Option<String>,
    pub replication: ReplicationConfig,
}

/// What the process was asked to do.
#[derive(Debug)]
pub enum Launch {
    /// Run the HTTP service.
    Serve(AppConfig),
    /// Replicate the records of one notification document, then exit.
    Replicate { config: AppConfig, event_file: PathBuf },
    /// Apply the journal schema, then exit.
    Migrate { database_url: String },
}

/// Command-line + environment configuration.
#[derive(Parser, Debug, Default)]
#[command(author, version, about = "Replicates new S3 objects into OSS")]
pub struct Args {
    /// Host to bind to (overrides REPLICATOR_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides REPLICATOR_PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Journal database URL (overrides REPLICATOR_DATABASE_URL)
    #[arg(long)]
    pub database_url: Option<String>,

    /// Destination kind, `oss` or `local` (overrides REPLICATOR_DEST_KIND)
    #[arg(long)]
    pub dest_kind: Option<String>,

    /// Root directory for the local destination (overrides REPLICATOR_DEST_DIR)
    #[arg(long)]
    pub dest_dir: Option<PathBuf>,

    /// Process one notification document from this file and exit
    #[arg(long)]
    pub event_file: Option<PathBuf>,

    /// Run migrations and exit
    #[arg(long)]
    pub migrate: bool,
}

impl AppConfig {
    /// Parse CLI args and the process environment into a [`Launch`].
    pub fn from_env_and_args() -> Result<Launch, ConfigError> {
        let args = Args::parse();
        Self::launch(args, |name| env::var(name).ok().filter(|v| !v.is_empty()))
    }

    /// Same as [`AppConfig::from_env_and_args`] with an explicit variable lookup.
    pub fn launch(
        args: Args,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Launch, ConfigError> {
        if args.migrate {
            let database_url = args
                .database_url
                .or_else(|| lookup("REPLICATOR_DATABASE_URL"))
                .ok_or_else(|| ConfigError::MissingEnv(vec!["REPLICATOR_DATABASE_URL".into()]))?;
            return Ok(Launch::Migrate { database_url });
        }

        let event_file = args.event_file.clone();
        let config = Self::from_parts(args, &lookup)?;
        Ok(match event_file {
            Some(event_file) => Launch::Replicate { config, event_file },
            None => Launch::Serve(config),
        })
    }

    fn from_parts(
        args: Args,
        lookup: &impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        let mut missing = Vec::new();
        let mut require = |name: &str| {
            lookup(name).unwrap_or_else(|| {
                missing.push(name.to_string());
                String::new()
            })
        };

        // --- Source credentials ---
        let source_access = require("AWS_ACCESS_KEY_ID");
        let source_secret = require("AWS_SECRET_ACCESS_KEY");

        // --- Destination ---
        let dest_kind = args
            .dest_kind
            .or_else(|| lookup("REPLICATOR_DEST_KIND"))
            .unwrap_or_else(|| "oss".into())
            .to_ascii_lowercase();
        let dest_bucket =
            lookup("REPLICATOR_DEST_BUCKET").unwrap_or_else(|| DEFAULT_DEST_BUCKET.into());
        let destination = match dest_kind.as_str() {
            "oss" => {
                let access_key = require("ALIYUN_ACCESS_KEY");
                let secret_key = require("ALIYUN_SECRET_KEY");
                DestinationConfig::Oss {
                    settings: S3Settings {
                        kind: StoreKind::Oss,
                        endpoint: Some(
                            lookup("REPLICATOR_DEST_ENDPOINT")
                                .unwrap_or_else(|| DEFAULT_DEST_ENDPOINT.into()),
                        ),
                        region: lookup("REPLICATOR_DEST_REGION")
                            .unwrap_or_else(|| DEFAULT_DEST_REGION.into()),
                        access_key,
                        secret_key,
                        session_token: None,
                        force_path_style: false,
                    },
                    bucket: dest_bucket,
                }
            }
            "local" => DestinationConfig::Local {
                root: args
                    .dest_dir
                    .or_else(|| lookup("REPLICATOR_DEST_DIR").map(PathBuf::from))
                    .unwrap_or_else(|| PathBuf::from(DEFAULT_DEST_DIR)),
                bucket: dest_bucket,
            },
            other => {
                return Err(ConfigError::InvalidValue {
                    name: "REPLICATOR_DEST_KIND".into(),
                    value: other.into(),
                    reason: "expected `oss` or `local`".into(),
                });
            }
        };

        if !missing.is_empty() {
            tracing::error!("Missing required environment variables: {}", missing.join(", "));
            return Err(ConfigError::MissingEnv(missing));
        }

        let source = S3Settings {
            kind: StoreKind::S3,
            endpoint: lookup("REPLICATOR_SOURCE_ENDPOINT"),
            region: lookup("REPLICATOR_SOURCE_REGION")
                .or_else(|| lookup("S3_REGION"))
                .unwrap_or_else(|| DEFAULT_SOURCE_REGION.into()),
            access_key: source_access,
            secret_key: source_secret,
            session_token: lookup("AWS_SESSION_TOKEN"),
            force_path_style: lookup("REPLICATOR_SOURCE_PATH_STYLE").is_some_and(|v| v == "true"),
        };

        // --- Region tables ---
        let segments = parse_pairs(
            "REPLICATOR_REGION_PREFIXES",
            &lookup("REPLICATOR_REGION_PREFIXES").unwrap_or_else(|| DEFAULT_REGION_PREFIXES.into()),
        )?;
        let source_buckets = match lookup("REPLICATOR_SOURCE_BUCKETS") {
            Some(raw) => parse_pairs("REPLICATOR_SOURCE_BUCKETS", &raw)?,
            None => HashMap::new(),
        };
        let prefix_root =
            lookup("REPLICATOR_PREFIX_ROOT").unwrap_or_else(|| DEFAULT_PREFIX_ROOT.into());
        let region_mapping = RegionMapping::new(source_buckets, segments, prefix_root);

        let part_concurrency = match lookup("REPLICATOR_PART_CONCURRENCY") {
            Some(raw) => match raw.parse::<usize>() {
                Ok(n) if n >= 1 => n,
                _ => {
                    return Err(ConfigError::InvalidValue {
                        name: "REPLICATOR_PART_CONCURRENCY".into(),
                        value: raw,
                        reason: "expected a positive integer".into(),
                    });
                }
            },
            None => 1,
        };

        // --- Service ---
        let port = match args.port {
            Some(port) => port,
            None => match lookup("REPLICATOR_PORT") {
                Some(raw) => raw.parse::<u16>().map_err(|err| ConfigError::InvalidValue {
                    name: "REPLICATOR_PORT".into(),
                    value: raw.clone(),
                    reason: err.to_string(),
                })?,
                None => 3000,
            },
        };

        Ok(Self {
            host: args
                .host
                .or_else(|| lookup("REPLICATOR_HOST"))
                .unwrap_or_else(|| "0.0.0.0".into()),
            port,
            database_url: args
                .database_url
                .or_else(|| lookup("REPLICATOR_DATABASE_URL")),
            replication: ReplicationConfig {
                key_prefix: lookup("REPLICATOR_KEY_PREFIX")
                    .unwrap_or_else(|| DEFAULT_KEY_PREFIX.into()),
                region_mapping,
                source,
                destination,
                part_concurrency,
            },
        })
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Parse `region=value,region=value` into a map. Whitespace around entries is ignored.
fn parse_pairs(name: &str, raw: &str) -> Result<HashMap<String, String>, ConfigError> {
    raw.split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| match entry.split_once('=') {
            Some((k, v)) if !k.trim().is_empty() && !v.trim().is_empty() => {
                Ok((k.trim().to_string(), v.trim().to_string()))
            }
            _ => Err(ConfigError::InvalidValue {
                name: name.to_string(),
                value: entry.to_string(),
                reason: "expected `region=value`".into(),
            }),
        })
        .collect()
}

fn redact(value: &str) -> String {
    let visible: String = value.chars().take(4).collect();
    format!("{}***", visible)
}
