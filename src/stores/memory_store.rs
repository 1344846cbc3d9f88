//! In-memory store that records every call and injects failures on demand.
//!
//! Source objects may be synthetic: only a size is kept and bytes are
//! generated on read, so multi-hundred-MiB scenarios stay cheap. Writes keep
//! only lengths and checksums, never payloads.

use super::{ObjectReader, ObjectStream, ObjectWriter, StoreError, StoreResult, ensure_complete};
use crate::models::{
    multipart::{CompletedPart, MultipartSession, PartLayout},
    object::{ObjectLocation, ObjectMetadata},
};
use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use std::{
    collections::{HashMap, HashSet},
    sync::Mutex,
};

const STREAM_CHUNK: u64 = 1024 * 1024;

/// Calls observed by the store, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Head(String),
    OpenStream(String),
    ReadRange { offset: u64, length: u64 },
    Put { key: String, bytes: u64 },
    Begin(String),
    UploadPart { part_number: u32, bytes: u64 },
    Complete(String),
    Abort(String),
}

/// Operation a fault can be attached to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    Head,
    OpenStream,
    ReadRange,
    Put,
    Begin,
    UploadPart,
    Complete,
    Abort,
}

#[derive(Debug, Clone, Copy)]
pub enum Fault {
    NotFound,
    AccessDenied,
    Unavailable,
    Unexpected,
}

impl Fault {
    fn into_error(self, operation: &'static str, location: &str) -> StoreError {
        match self {
            Fault::NotFound => StoreError::NotFound(location.to_string()),
            Fault::AccessDenied => StoreError::AccessDenied(location.to_string()),
            Fault::Unavailable => StoreError::Unavailable {
                operation,
                location: location.to_string(),
                source: "injected outage".into(),
            },
            Fault::Unexpected => StoreError::Unexpected {
                operation,
                location: location.to_string(),
                source: "injected bug".into(),
            },
        }
    }
}

#[derive(Default)]
struct State {
    objects: HashMap<String, u64>,
    written: HashMap<String, u64>,
    open_sessions: HashSet<String>,
    next_session: u32,
    calls: Vec<Call>,
    /// `(op, part number or 0)` → fault.
    faults: HashMap<(Op, u32), Fault>,
}

#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a synthetic source object of `size` bytes.
    pub fn with_object(self, location: &ObjectLocation, size: u64) -> Self {
        self.lock().objects.insert(location.to_string(), size);
        self
    }

    /// Fail every call of `op`.
    pub fn fail(self, op: Op, fault: Fault) -> Self {
        self.lock().faults.insert((op, 0), fault);
        self
    }

    /// Fail `upload_part` / `read_range` for one part number only.
    pub fn fail_part(self, op: Op, part_number: u32, fault: Fault) -> Self {
        self.lock().faults.insert((op, part_number), fault);
        self
    }

    pub fn calls(&self) -> Vec<Call> {
        self.lock().calls.clone()
    }

    pub fn count(&self, pred: impl Fn(&Call) -> bool) -> usize {
        self.lock().calls.iter().filter(|c| pred(c)).count()
    }

    pub fn open_sessions(&self) -> usize {
        self.lock().open_sessions.len()
    }

    pub fn written_size(&self, location: &ObjectLocation) -> Option<u64> {
        self.lock().written.get(&location.to_string()).copied()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn record(
        &self,
        call: Call,
        op: Op,
        part: u32,
        operation: &'static str,
        loc: &str,
    ) -> StoreResult<()> {
        let mut state = self.lock();
        state.calls.push(call);
        let fault = state
            .faults
            .get(&(op, part))
            .or_else(|| state.faults.get(&(op, 0)))
            .copied();
        match fault {
            Some(fault) => Err(fault.into_error(operation, loc)),
            None => Ok(()),
        }
    }

    fn size_of(&self, location: &ObjectLocation) -> StoreResult<u64> {
        self.lock()
            .objects
            .get(&location.to_string())
            .copied()
            .ok_or_else(|| StoreError::NotFound(location.to_string()))
    }
}

#[async_trait]
impl ObjectReader for MemoryStore {
    async fn head_object(&self, location: &ObjectLocation) -> StoreResult<ObjectMetadata> {
        let loc = location.to_string();
        self.record(Call::Head(loc.clone()), Op::Head, 0, "head_object", &loc)?;
        Ok(ObjectMetadata {
            size: self.size_of(location)?,
            content_hash: Some("synthetic".into()),
            source: location.clone(),
        })
    }

    async fn open_stream(&self, location: &ObjectLocation) -> StoreResult<ObjectStream> {
        let loc = location.to_string();
        self.record(Call::OpenStream(loc.clone()), Op::OpenStream, 0, "open_stream", &loc)?;
        let size = self.size_of(location)?;
        let chunks = (0..size.div_ceil(STREAM_CHUNK)).map(move |i| {
            let len = STREAM_CHUNK.min(size - i * STREAM_CHUNK);
            Ok(Bytes::from(vec![0u8; len as usize]))
        });
        Ok(futures::stream::iter(chunks).boxed())
    }

    async fn read_range(
        &self,
        location: &ObjectLocation,
        offset: u64,
        length: u64,
    ) -> StoreResult<Bytes> {
        let loc = location.to_string();
        // Reads happen in part order, so the ordinal is the part number.
        let part = self.count(|c| matches!(c, Call::ReadRange { .. })) as u32 + 1;
        self.record(
            Call::ReadRange { offset, length },
            Op::ReadRange,
            part,
            "read_range",
            &loc,
        )?;
        let size = self.size_of(location)?;
        if offset + length > size {
            return Err(StoreError::RangeUnsatisfiable {
                location: loc,
                offset,
                length,
            });
        }
        Ok(Bytes::from(vec![0u8; length as usize]))
    }
}

#[async_trait]
impl ObjectWriter for MemoryStore {
    async fn put_object(
        &self,
        location: &ObjectLocation,
        mut body: ObjectStream,
        content_length: u64,
    ) -> StoreResult<String> {
        let loc = location.to_string();
        let mut total = 0u64;
        while let Some(chunk) = body.next().await {
            let chunk = chunk.map_err(|err| StoreError::from_io("put_object", location, err))?;
            total += chunk.len() as u64;
        }
        self.record(
            Call::Put {
                key: location.key.clone(),
                bytes: total,
            },
            Op::Put,
            0,
            "put_object",
            &loc,
        )?;
        assert_eq!(total, content_length, "stream length disagrees with head");
        self.lock().written.insert(loc, total);
        Ok("etag-simple".into())
    }

    async fn begin_multipart(
        &self,
        location: &ObjectLocation,
        layout: PartLayout,
    ) -> StoreResult<MultipartSession> {
        let loc = location.to_string();
        self.record(Call::Begin(loc.clone()), Op::Begin, 0, "begin_multipart", &loc)?;
        let mut state = self.lock();
        state.next_session += 1;
        let id = format!("session-{}", state.next_session);
        state.open_sessions.insert(id.clone());
        Ok(MultipartSession::new(id, location.clone(), layout))
    }

    async fn upload_part(
        &self,
        session: &MultipartSession,
        part_number: u32,
        bytes: Bytes,
    ) -> StoreResult<CompletedPart> {
        let loc = session.destination.to_string();
        self.record(
            Call::UploadPart {
                part_number,
                bytes: bytes.len() as u64,
            },
            Op::UploadPart,
            part_number,
            "upload_part",
            &loc,
        )?;
        Ok(CompletedPart {
            part_number,
            checksum: format!("part-{}-{}", part_number, bytes.len()),
        })
    }

    async fn complete_multipart(&self, session: &MultipartSession) -> StoreResult<String> {
        let loc = session.destination.to_string();
        self.record(
            Call::Complete(session.session_id.clone()),
            Op::Complete,
            0,
            "complete_multipart",
            &loc,
        )?;
        ensure_complete(session)?;
        let mut state = self.lock();
        state.open_sessions.remove(&session.session_id);
        state.written.insert(loc, session_bytes(session));
        Ok(format!("etag-multipart-{}", session.total_parts))
    }

    async fn abort_multipart(&self, session: &MultipartSession) -> StoreResult<()> {
        let loc = session.destination.to_string();
        self.record(
            Call::Abort(session.session_id.clone()),
            Op::Abort,
            0,
            "abort_multipart",
            &loc,
        )?;
        self.lock().open_sessions.remove(&session.session_id);
        Ok(())
    }
}

/// Bytes committed to a session, recovered from the part checksums.
fn session_bytes(session: &MultipartSession) -> u64 {
    session
        .completed_parts
        .iter()
        .filter_map(|p| p.checksum.rsplit('-').next()?.parse::<u64>().ok())
        .sum()
}
