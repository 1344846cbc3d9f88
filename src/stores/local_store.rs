//! src/stores/local_store.rs
//!
//! LocalStore: reader and writer backed by a directory on local disk. Object
//! payloads are sharded beneath `base_path/{bucket}/{shard}/{shard}/{key}`;
//! multipart sessions are staging directories under
//! `base_path/.multipart/{session_id}` holding one file per part.

use super::{ObjectReader, ObjectStream, ObjectWriter, StoreError, StoreResult, ensure_complete};
use crate::models::{
    multipart::{CompletedPart, MultipartSession, PartLayout},
    object::{ObjectLocation, ObjectMetadata},
};
use async_trait::async_trait;
use bytes::Bytes;
use futures::{StreamExt, pin_mut};
use md5::Context;
use std::{
    io::{self, ErrorKind, SeekFrom},
    path::{Path, PathBuf},
};
use tokio::{
    fs::{self, File},
    io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt},
};
use tokio_util::io::ReaderStream;
use tracing::{debug, warn};
use uuid::Uuid;

const MAX_OBJECT_KEY_LEN: usize = 1024;
const MULTIPART_DIR: &str = ".multipart";

#[derive(Clone, Debug)]
pub struct LocalStore {
    /// Base directory on disk where object payloads are stored.
    pub base_path: PathBuf,
}

impl LocalStore {
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
        }
    }

    /// Basic key validation to avoid trivial path traversal vectors.
    ///
    /// Rejects keys that begin with `/` or contain `..`.
    fn ensure_key_safe(location: &ObjectLocation) -> StoreResult<()> {
        let key = location.key.as_str();
        let unsafe_key = key.is_empty()
            || key.len() > MAX_OBJECT_KEY_LEN
            || key.starts_with('/')
            || key.contains("..")
            || key
                .bytes()
                .any(|b| b.is_ascii_control() || b == b'\\' || b == b'\0');
        let unsafe_bucket = location.bucket.is_empty()
            || location.bucket.contains(['/', '\\'])
            || location.bucket.starts_with('.');

        if unsafe_key || unsafe_bucket {
            return Err(StoreError::AccessDenied(location.to_string()));
        }
        Ok(())
    }

    /// Two-level shard identifiers: the first two bytes of MD5(bucket/key) as hex.
    fn object_shards(bucket_name: &str, key: &str) -> (String, String) {
        let digest = md5::compute(format!("{}/{}", bucket_name, key));
        (format!("{:02x}", digest[0]), format!("{:02x}", digest[1]))
    }

    fn object_path(&self, location: &ObjectLocation) -> PathBuf {
        let (shard_a, shard_b) = Self::object_shards(&location.bucket, &location.key);
        let mut path = self.base_path.clone();
        path.push(&location.bucket);
        path.push(shard_a);
        path.push(shard_b);
        path.push(&location.key);
        path
    }

    fn session_dir(&self, session_id: &str) -> PathBuf {
        self.base_path.join(MULTIPART_DIR).join(session_id)
    }

    fn part_path(&self, session_id: &str, part_number: u32) -> PathBuf {
        self.session_dir(session_id)
            .join(format!("part-{:05}", part_number))
    }

    /// Stream chunks into a temp file beside `file_path`, fsync, then rename
    /// into place. Returns `(size, md5 hex)`. The temp file is removed on error,
    /// and a body that disagrees with `expected_len` never replaces `file_path`.
    async fn write_atomically(
        &self,
        location: &ObjectLocation,
        file_path: &Path,
        stream: ObjectStream,
        expected_len: Option<u64>,
    ) -> StoreResult<(u64, String)> {
        let io_err = |err| StoreError::from_io("put_object", location, err);
        let parent = file_path
            .parent()
            .map(Path::to_path_buf)
            .ok_or_else(|| io_err(io::Error::other("object path missing parent directory")))?;
        fs::create_dir_all(&parent).await.map_err(io_err)?;
        let tmp_path = parent.join(format!(".tmp-{}", Uuid::new_v4()));
        let mut file = File::create(&tmp_path).await.map_err(io_err)?;

        let mut size: u64 = 0;
        let mut digest = Context::new();
        pin_mut!(stream);
        while let Some(chunk_res) = stream.next().await {
            let chunk = match chunk_res {
                Ok(chunk) => chunk,
                Err(err) => {
                    let _ = fs::remove_file(&tmp_path).await;
                    return Err(io_err(err));
                }
            };
            size += chunk.len() as u64;
            digest.consume(&chunk);
            if let Err(err) = file.write_all(&chunk).await {
                let _ = fs::remove_file(&tmp_path).await;
                return Err(io_err(err));
            }
        }
        if let Err(err) = file.flush().await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(io_err(err));
        }
        if let Err(err) = file.sync_all().await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(io_err(err));
        }
        drop(file);

        if let Some(expected) = expected_len.filter(|expected| *expected != size) {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(StoreError::Unavailable {
                operation: "put_object",
                location: location.to_string(),
                source: format!("stream ended after {} of {} bytes", size, expected).into(),
            });
        }

        if let Err(err) = fs::rename(&tmp_path, file_path).await {
            if err.kind() == ErrorKind::AlreadyExists {
                fs::remove_file(file_path).await.map_err(io_err)?;
                fs::rename(&tmp_path, file_path).await.map_err(io_err)?;
            } else {
                let _ = fs::remove_file(&tmp_path).await;
                return Err(io_err(err));
            }
        }

        Ok((size, format!("{:x}", digest.compute())))
    }

    /// Compute the MD5 hex of a file without loading it whole.
    async fn file_md5(path: &Path) -> io::Result<String> {
        let file = File::open(path).await?;
        let mut digest = Context::new();
        let stream = ReaderStream::new(file);
        pin_mut!(stream);
        while let Some(chunk) = stream.next().await {
            digest.consume(&chunk?);
        }
        Ok(format!("{:x}", digest.compute()))
    }
}

#[async_trait]
impl ObjectReader for LocalStore {
    async fn head_object(&self, location: &ObjectLocation) -> StoreResult<ObjectMetadata> {
        Self::ensure_key_safe(location)?;
        let path = self.object_path(location);
        let meta = fs::metadata(&path)
            .await
            .map_err(|err| StoreError::from_io("head_object", location, err))?;
        if !meta.is_file() {
            return Err(StoreError::NotFound(location.to_string()));
        }
        let content_hash = Self::file_md5(&path)
            .await
            .map_err(|err| StoreError::from_io("head_object", location, err))?;

        Ok(ObjectMetadata {
            size: meta.len(),
            content_hash: Some(content_hash),
            source: location.clone(),
        })
    }

    async fn open_stream(&self, location: &ObjectLocation) -> StoreResult<ObjectStream> {
        Self::ensure_key_safe(location)?;
        let file = File::open(self.object_path(location))
            .await
            .map_err(|err| StoreError::from_io("open_stream", location, err))?;
        Ok(ReaderStream::new(file).boxed())
    }

    async fn read_range(
        &self,
        location: &ObjectLocation,
        offset: u64,
        length: u64,
    ) -> StoreResult<Bytes> {
        Self::ensure_key_safe(location)?;
        let io_err = |err| StoreError::from_io("read_range", location, err);
        let mut file = File::open(self.object_path(location))
            .await
            .map_err(io_err)?;
        let size = file.metadata().await.map_err(io_err)?.len();
        if offset.checked_add(length).is_none_or(|end| end > size) {
            return Err(StoreError::RangeUnsatisfiable {
                location: location.to_string(),
                offset,
                length,
            });
        }

        file.seek(SeekFrom::Start(offset)).await.map_err(io_err)?;
        let mut buf = vec![0u8; length as usize];
        file.read_exact(&mut buf).await.map_err(io_err)?;
        Ok(Bytes::from(buf))
    }
}

#[async_trait]
impl ObjectWriter for LocalStore {
    async fn put_object(
        &self,
        location: &ObjectLocation,
        body: ObjectStream,
        content_length: u64,
    ) -> StoreResult<String> {
        Self::ensure_key_safe(location)?;
        let file_path = self.object_path(location);
        let (size, etag) = self
            .write_atomically(location, &file_path, body, Some(content_length))
            .await?;
        debug!("stored {} ({} bytes) at {}", location, size, file_path.display());
        Ok(etag)
    }

    async fn begin_multipart(
        &self,
        location: &ObjectLocation,
        layout: PartLayout,
    ) -> StoreResult<MultipartSession> {
        Self::ensure_key_safe(location)?;
        let session_id = Uuid::new_v4().to_string();
        fs::create_dir_all(self.session_dir(&session_id))
            .await
            .map_err(|err| StoreError::from_io("begin_multipart", location, err))?;
        Ok(MultipartSession::new(session_id, location.clone(), layout))
    }

    async fn upload_part(
        &self,
        session: &MultipartSession,
        part_number: u32,
        bytes: Bytes,
    ) -> StoreResult<CompletedPart> {
        let location = &session.destination;
        let dir = self.session_dir(&session.session_id);
        if !fs::try_exists(&dir).await.unwrap_or(false) {
            return Err(StoreError::NotFound(format!(
                "multipart session {}",
                session.session_id
            )));
        }
        let checksum = format!("{:x}", md5::compute(&bytes));
        fs::write(self.part_path(&session.session_id, part_number), &bytes)
            .await
            .map_err(|err| StoreError::from_io("upload_part", location, err))?;
        Ok(CompletedPart {
            part_number,
            checksum,
        })
    }

    async fn complete_multipart(&self, session: &MultipartSession) -> StoreResult<String> {
        ensure_complete(session)?;
        let location = &session.destination;

        // Parts are concatenated in part-number order through the same
        // temp-file + rename path as a whole-object put.
        let part_paths: Vec<PathBuf> = session
            .completed_parts
            .iter()
            .map(|p| self.part_path(&session.session_id, p.part_number))
            .collect();
        let parts = futures::stream::iter(part_paths)
            .then(|path| async move { File::open(path).await.map(ReaderStream::new) })
            .map(|opened| match opened {
                Ok(reader) => reader.boxed(),
                Err(err) => futures::stream::once(async move { Err(err) }).boxed(),
            })
            .flatten()
            .boxed();

        let file_path = self.object_path(location);
        let (size, etag) = self
            .write_atomically(location, &file_path, parts, None)
            .await?;
        debug!(
            "assembled {} parts ({} bytes) into {}",
            session.total_parts,
            size,
            file_path.display()
        );

        if let Err(err) = fs::remove_dir_all(self.session_dir(&session.session_id)).await {
            warn!(
                "could not remove staging directory for session {}: {}",
                session.session_id, err
            );
        }
        Ok(format!("{}-{}", etag, session.total_parts))
    }

    async fn abort_multipart(&self, session: &MultipartSession) -> StoreResult<()> {
        match fs::remove_dir_all(self.session_dir(&session.session_id)).await {
            Ok(_) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => {
                debug!("multipart session {} already released", session.session_id);
                Ok(())
            }
            Err(err) => Err(StoreError::from_io(
                "abort_multipart",
                &session.destination,
                err,
            )),
        }
    }
}
