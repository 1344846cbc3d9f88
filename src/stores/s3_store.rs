//! src/stores/s3_store.rs
//!
//! S3Store: reader and writer over the S3 API. Serves the AWS S3 source and
//! the Aliyun OSS destination (through its S3-compatible endpoint) alike; the
//! only difference between the two is the [`S3Settings`] it is built from.
//!
//! SDK retries are disabled: every call either returns or fails once.

use super::{
    BoxError, ObjectReader, ObjectStream, ObjectWriter, StoreError, StoreResult, ensure_complete,
};
use crate::{
    config::S3Settings,
    models::{
        multipart::{CompletedPart, MultipartSession, PartLayout},
        object::{ObjectLocation, ObjectMetadata, StoreKind},
    },
};
use async_trait::async_trait;
use aws_config::{BehaviorVersion, Region, retry::RetryConfig};
use aws_sdk_s3::{
    Client,
    config::{Builder as S3ConfigBuilder, Credentials, RequestChecksumCalculation},
    error::{ProvideErrorMetadata, SdkError},
    primitives::ByteStream,
    types::{CompletedMultipartUpload, CompletedPart as S3CompletedPart},
};
use base64::{Engine as _, engine::general_purpose};
use bytes::Bytes;
use futures::{Stream, StreamExt, TryStreamExt};
use http_body::Frame;
use http_body_util::StreamBody;
use std::{
    io,
    pin::Pin,
    sync::{Mutex, PoisonError},
    task::{Context, Poll},
};
use tokio_util::io::ReaderStream;
use tracing::debug;

/// What an S3 error response means for the transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ErrorClass {
    NotFound,
    NoSuchUpload,
    AccessDenied,
    QuotaExceeded,
    InvalidRange,
    InvalidPart,
    /// Deterministic rejection of this one request; retrying cannot help.
    Rejected,
    Unavailable,
    Unexpected,
}

/// Request context carried into error classification.
struct CallContext<'a> {
    operation: &'static str,
    location: &'a ObjectLocation,
    range: Option<(u64, u64)>,
    session_id: Option<&'a str>,
}

impl<'a> CallContext<'a> {
    fn new(operation: &'static str, location: &'a ObjectLocation) -> Self {
        Self {
            operation,
            location,
            range: None,
            session_id: None,
        }
    }
}

#[derive(Clone)]
pub struct S3Store {
    client: Client,
    kind: StoreKind,
    region: String,
}

impl S3Store {
    /// Build a store from explicit settings. Credentials never come from the
    /// ambient environment here; `config` has already resolved them.
    pub fn new(settings: &S3Settings) -> Self {
        let credentials = Credentials::new(
            &settings.access_key,
            &settings.secret_key,
            settings.session_token.clone(),
            None,
            "replicator-config",
        );

        let mut builder = aws_sdk_s3::Config::builder()
            .behavior_version(BehaviorVersion::latest())
            .region(Region::new(settings.region.clone()))
            .credentials_provider(credentials)
            .retry_config(RetryConfig::disabled())
            .request_checksum_calculation(checksum_policy(settings.endpoint.as_deref()))
            .force_path_style(settings.force_path_style);
        if let Some(endpoint) = &settings.endpoint {
            builder = builder.endpoint_url(endpoint);
        }

        Self {
            client: Client::from_conf(builder.build()),
            kind: settings.kind,
            region: settings.region.clone(),
        }
    }

    pub fn kind(&self) -> StoreKind {
        self.kind
    }

    /// Per-request override that pins the signing region to the location's
    /// region, so one source client can read buckets in several regions.
    fn region_override(&self, location: &ObjectLocation) -> S3ConfigBuilder {
        let region = if location.region.is_empty() {
            self.region.clone()
        } else {
            location.region.clone()
        };
        S3ConfigBuilder::default().region(Region::new(region))
    }
}

#[async_trait]
impl ObjectReader for S3Store {
    async fn head_object(&self, location: &ObjectLocation) -> StoreResult<ObjectMetadata> {
        let output = self
            .client
            .head_object()
            .bucket(&location.bucket)
            .key(&location.key)
            .customize()
            .config_override(self.region_override(location))
            .send()
            .await
            .map_err(|err| classify(CallContext::new("head_object", location), err))?;

        let size = output
            .content_length()
            .and_then(|len| u64::try_from(len).ok())
            .ok_or_else(|| StoreError::Unexpected {
                operation: "head_object",
                location: location.to_string(),
                source: "response carried no usable content length".into(),
            })?;

        Ok(ObjectMetadata {
            size,
            content_hash: output.e_tag().map(trim_etag),
            source: location.clone(),
        })
    }

    async fn open_stream(&self, location: &ObjectLocation) -> StoreResult<ObjectStream> {
        let output = self
            .client
            .get_object()
            .bucket(&location.bucket)
            .key(&location.key)
            .customize()
            .config_override(self.region_override(location))
            .send()
            .await
            .map_err(|err| classify(CallContext::new("get_object", location), err))?;

        Ok(ReaderStream::new(output.body.into_async_read()).boxed())
    }

    async fn read_range(
        &self,
        location: &ObjectLocation,
        offset: u64,
        length: u64,
    ) -> StoreResult<Bytes> {
        if length == 0 {
            return Ok(Bytes::new());
        }
        let ctx = || CallContext {
            range: Some((offset, length)),
            ..CallContext::new("get_object_range", location)
        };

        let output = self
            .client
            .get_object()
            .bucket(&location.bucket)
            .key(&location.key)
            .range(range_header(offset, length))
            .customize()
            .config_override(self.region_override(location))
            .send()
            .await
            .map_err(|err| classify(ctx(), err))?;

        let bytes = output
            .body
            .collect()
            .await
            .map_err(|err| StoreError::Unavailable {
                operation: "get_object_range",
                location: location.to_string(),
                source: Box::new(err),
            })?
            .into_bytes();

        if bytes.len() as u64 != length {
            return Err(StoreError::RangeUnsatisfiable {
                location: location.to_string(),
                offset,
                length,
            });
        }
        Ok(bytes)
    }
}

#[async_trait]
impl ObjectWriter for S3Store {
    async fn put_object(
        &self,
        location: &ObjectLocation,
        body: ObjectStream,
        content_length: u64,
    ) -> StoreResult<String> {
        let body = StreamBody::new(SyncStream(Mutex::new(body)).map_ok(Frame::data));
        let output = self
            .client
            .put_object()
            .bucket(&location.bucket)
            .key(&location.key)
            .content_length(to_i64(content_length))
            .body(ByteStream::from_body_1_x(body))
            .customize()
            .config_override(self.region_override(location))
            .send()
            .await
            .map_err(|err| classify(CallContext::new("put_object", location), err))?;

        require_etag("put_object", location, output.e_tag())
    }

    async fn begin_multipart(
        &self,
        location: &ObjectLocation,
        layout: PartLayout,
    ) -> StoreResult<MultipartSession> {
        let output = self
            .client
            .create_multipart_upload()
            .bucket(&location.bucket)
            .key(&location.key)
            .customize()
            .config_override(self.region_override(location))
            .send()
            .await
            .map_err(|err| classify(CallContext::new("create_multipart_upload", location), err))?;

        let upload_id = output.upload_id().ok_or_else(|| StoreError::Unexpected {
            operation: "create_multipart_upload",
            location: location.to_string(),
            source: "response carried no upload id".into(),
        })?;
        debug!("opened multipart upload {} for {}", upload_id, location);

        Ok(MultipartSession::new(upload_id, location.clone(), layout))
    }

    async fn upload_part(
        &self,
        session: &MultipartSession,
        part_number: u32,
        bytes: Bytes,
    ) -> StoreResult<CompletedPart> {
        let location = &session.destination;
        let content_md5 = general_purpose::STANDARD.encode(md5::compute(&bytes).0);
        let content_length = to_i64(bytes.len() as u64);

        let output = self
            .client
            .upload_part()
            .bucket(&location.bucket)
            .key(&location.key)
            .upload_id(&session.session_id)
            .part_number(part_number_i32(part_number))
            .content_length(content_length)
            .content_md5(content_md5)
            .body(ByteStream::from(bytes))
            .customize()
            .config_override(self.region_override(location))
            .send()
            .await
            .map_err(|err| {
                classify(
                    CallContext {
                        session_id: Some(&session.session_id),
                        ..CallContext::new("upload_part", location)
                    },
                    err,
                )
            })?;

        Ok(CompletedPart {
            part_number,
            checksum: require_etag("upload_part", location, output.e_tag())?,
        })
    }

    async fn complete_multipart(&self, session: &MultipartSession) -> StoreResult<String> {
        ensure_complete(session)?;
        let location = &session.destination;

        let parts = session
            .completed_parts
            .iter()
            .map(|part| {
                S3CompletedPart::builder()
                    .part_number(part_number_i32(part.part_number))
                    .e_tag(format!("\"{}\"", part.checksum))
                    .build()
            })
            .collect::<Vec<_>>();
        let upload = CompletedMultipartUpload::builder()
            .set_parts(Some(parts))
            .build();

        let output = self
            .client
            .complete_multipart_upload()
            .bucket(&location.bucket)
            .key(&location.key)
            .upload_id(&session.session_id)
            .multipart_upload(upload)
            .customize()
            .config_override(self.region_override(location))
            .send()
            .await
            .map_err(|err| {
                classify(
                    CallContext {
                        session_id: Some(&session.session_id),
                        ..CallContext::new("complete_multipart_upload", location)
                    },
                    err,
                )
            })?;

        require_etag("complete_multipart_upload", location, output.e_tag())
    }

    async fn abort_multipart(&self, session: &MultipartSession) -> StoreResult<()> {
        let location = &session.destination;
        let result = self
            .client
            .abort_multipart_upload()
            .bucket(&location.bucket)
            .key(&location.key)
            .upload_id(&session.session_id)
            .customize()
            .config_override(self.region_override(location))
            .send()
            .await;

        match result {
            Ok(_) => Ok(()),
            Err(err) => {
                let class = classify_response(
                    err.as_service_error().and_then(|e| e.code()),
                    err.raw_response().map(|r| r.status().as_u16()),
                );
                // Already aborted (or never existed): nothing left to release.
                if matches!(class, ErrorClass::NoSuchUpload | ErrorClass::NotFound) {
                    debug!("multipart upload {} already released", session.session_id);
                    return Ok(());
                }
                Err(classify(
                    CallContext {
                        session_id: Some(&session.session_id),
                        ..CallContext::new("abort_multipart_upload", location)
                    },
                    err,
                ))
            }
        }
    }
}

/// Lets a `Send`-only stream back an SDK body, which must also be `Sync`.
/// The stream is only ever polled through `&mut`, so the lock is never contended.
struct SyncStream(Mutex<ObjectStream>);

impl Stream for SyncStream {
    type Item = io::Result<Bytes>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.get_mut()
            .0
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .as_mut()
            .poll_next(cx)
    }
}

/// S3-compatible endpoints may reject aws-chunked checksum trailers, so only
/// AWS itself gets the SDK's default checksums. Parts still carry Content-MD5.
fn checksum_policy(endpoint: Option<&str>) -> RequestChecksumCalculation {
    match endpoint {
        Some(_) => RequestChecksumCalculation::WhenRequired,
        None => RequestChecksumCalculation::WhenSupported,
    }
}

/// HTTP `Range` header for `length` bytes starting at `offset` (inclusive end).
fn range_header(offset: u64, length: u64) -> String {
    format!("bytes={}-{}", offset, offset + length - 1)
}

fn trim_etag(etag: &str) -> String {
    etag.trim_matches('"').to_string()
}

fn require_etag(
    operation: &'static str,
    location: &ObjectLocation,
    etag: Option<&str>,
) -> StoreResult<String> {
    etag.map(trim_etag).ok_or_else(|| StoreError::Unexpected {
        operation,
        location: location.to_string(),
        source: "response carried no ETag".into(),
    })
}

fn to_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

fn part_number_i32(part_number: u32) -> i32 {
    i32::try_from(part_number).unwrap_or(i32::MAX)
}

/// Classify an S3 failure from its error code and HTTP status.
///
/// Codes win over statuses; OSS reports the same codes through its S3 API.
fn classify_response(code: Option<&str>, status: Option<u16>) -> ErrorClass {
    match code {
        Some("NoSuchUpload") => return ErrorClass::NoSuchUpload,
        Some("NoSuchKey" | "NotFound" | "NoSuchBucket") => return ErrorClass::NotFound,
        Some(
            "AccessDenied" | "Forbidden" | "InvalidAccessKeyId" | "SignatureDoesNotMatch"
            | "AccountProblem",
        ) => return ErrorClass::AccessDenied,
        Some(
            "QuotaExceeded" | "ServiceQuotaExceeded" | "InsufficientStorage" | "EntityTooLarge",
        ) => {
            return ErrorClass::QuotaExceeded;
        }
        Some("InvalidRange") => return ErrorClass::InvalidRange,
        Some("InvalidPart" | "InvalidPartOrder" | "EntityTooSmall") => {
            return ErrorClass::InvalidPart;
        }
        Some(
            "InvalidArgument" | "InvalidRequest" | "KeyTooLongError" | "InvalidObjectName"
            | "MalformedXML" | "MethodNotAllowed" | "PreconditionFailed" | "InvalidStorageClass"
            | "InvalidBucketName" | "MissingContentLength",
        ) => return ErrorClass::Rejected,
        // A Content-MD5 mismatch means the bytes were damaged in flight.
        Some(
            "BadDigest" | "SlowDown" | "ServiceUnavailable" | "InternalError" | "RequestTimeout"
            | "RequestTimeTooSkewed",
        ) => return ErrorClass::Unavailable,
        _ => {}
    }

    match status {
        Some(404) => ErrorClass::NotFound,
        Some(401 | 403) => ErrorClass::AccessDenied,
        Some(416) => ErrorClass::InvalidRange,
        Some(507) => ErrorClass::QuotaExceeded,
        Some(408 | 429) => ErrorClass::Unavailable,
        Some(400 | 405 | 409 | 411 | 412 | 413 | 414) => ErrorClass::Rejected,
        Some(status) if status >= 500 => ErrorClass::Unavailable,
        _ => ErrorClass::Unexpected,
    }
}

fn classify<E>(ctx: CallContext<'_>, err: SdkError<E>) -> StoreError
where
    E: ProvideErrorMetadata + std::error::Error + Send + Sync + 'static,
{
    let location = ctx.location.to_string();
    let class = match &err {
        SdkError::DispatchFailure(_) | SdkError::TimeoutError(_) | SdkError::ResponseError(_) => {
            ErrorClass::Unavailable
        }
        _ => classify_response(
            err.as_service_error().and_then(|e| e.code()),
            err.raw_response().map(|r| r.status().as_u16()),
        ),
    };

    match class {
        ErrorClass::NotFound | ErrorClass::NoSuchUpload => StoreError::NotFound(location),
        ErrorClass::AccessDenied => StoreError::AccessDenied(location),
        ErrorClass::QuotaExceeded => StoreError::QuotaExceeded(location),
        ErrorClass::InvalidRange => {
            let (offset, length) = ctx.range.unwrap_or_default();
            StoreError::RangeUnsatisfiable {
                location,
                offset,
                length,
            }
        }
        ErrorClass::InvalidPart => StoreError::IncompletePartSet {
            session_id: ctx.session_id.unwrap_or_default().to_string(),
            missing: Vec::new(),
        },
        ErrorClass::Rejected => StoreError::InvalidRequest {
            location,
            reason: format!(
                "{} failed: {}",
                ctx.operation,
                err.as_service_error()
                    .and_then(|e| e.message().or(e.code()))
                    .unwrap_or("request rejected")
            ),
        },
        ErrorClass::Unavailable => StoreError::Unavailable {
            operation: ctx.operation,
            location,
            source: Box::new(err) as BoxError,
        },
        ErrorClass::Unexpected => StoreError::Unexpected {
            operation: ctx.operation,
            location,
            source: Box::new(err) as BoxError,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;

    #[test]
    fn range_header_is_inclusive() {
        assert_eq!(range_header(0, 1), "bytes=0-0");
        assert_eq!(range_header(20, 10), "bytes=20-29");
    }

    #[test]
    fn codes_take_precedence_over_status() {
        assert_eq!(classify_response(Some("NoSuchKey"), Some(404)), ErrorClass::NotFound);
        assert_eq!(classify_response(Some("SlowDown"), Some(503)), ErrorClass::Unavailable);
        assert_eq!(
            classify_response(Some("NoSuchUpload"), Some(404)),
            ErrorClass::NoSuchUpload
        );
        assert_eq!(
            classify_response(Some("InvalidPart"), Some(400)),
            ErrorClass::InvalidPart
        );
    }

    #[test]
    fn head_errors_fall_back_to_status() {
        // HEAD responses carry no body, so there is no error code.
        assert_eq!(classify_response(None, Some(404)), ErrorClass::NotFound);
        assert_eq!(classify_response(None, Some(403)), ErrorClass::AccessDenied);
        assert_eq!(classify_response(None, Some(416)), ErrorClass::InvalidRange);
        assert_eq!(classify_response(None, Some(500)), ErrorClass::Unavailable);
        assert_eq!(classify_response(None, Some(429)), ErrorClass::Unavailable);
        assert_eq!(classify_response(None, Some(400)), ErrorClass::Rejected);
        assert_eq!(classify_response(None, Some(418)), ErrorClass::Unexpected);
        assert_eq!(classify_response(None, None), ErrorClass::Unexpected);
    }

    #[test]
    fn per_object_rejections_stay_per_request() {
        assert_eq!(
            classify_response(Some("InvalidArgument"), Some(400)),
            ErrorClass::Rejected
        );
        assert_eq!(
            classify_response(Some("KeyTooLongError"), Some(400)),
            ErrorClass::Rejected
        );
        assert_eq!(classify_response(Some("BadDigest"), Some(400)), ErrorClass::Unavailable);
    }

    #[test]
    fn custom_endpoints_only_send_required_checksums() {
        assert_eq!(
            checksum_policy(Some("https://oss-cn-hangzhou.aliyuncs.com")),
            RequestChecksumCalculation::WhenRequired
        );
        assert_eq!(checksum_policy(None), RequestChecksumCalculation::WhenSupported);
    }

    #[test]
    fn etag_quotes_are_stripped() {
        assert_eq!(trim_etag("\"abc-3\""), "abc-3");
        assert_eq!(trim_etag("abc"), "abc");
    }

    #[tokio::test]
    async fn sync_stream_forwards_chunks() {
        let inner: ObjectStream = stream::iter(vec![
            Ok(Bytes::from_static(b"ab")),
            Ok(Bytes::from_static(b"cd")),
        ])
        .boxed();
        let collected: Vec<Bytes> = SyncStream(Mutex::new(inner)).try_collect().await.unwrap();
        assert_eq!(collected.concat(), b"abcd");
    }
}
