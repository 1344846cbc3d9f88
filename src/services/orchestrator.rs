//! src/services/orchestrator.rs
//!
//! TransferOrchestrator: drives one [`TransferRequest`] through
//! `Initialized → SizeProbed → {SimpleTransfer | MultipartTransfer} →
//! Completed | Failed`.
//!
//! Invariants held by every call:
//! - at most one `begin_multipart` per request;
//! - once a session is open, any failure (including a failed completion) is
//!   followed by exactly one `abort_multipart` before the call returns;
//! - peak memory is `part_concurrency × part_size`; the simple path streams.

use crate::{
    errors::ReplicationError,
    models::{
        multipart::{CompletedPart, MultipartSession, PartPlan, PartRange},
        object::ObjectLocation,
        transfer::{
            MAX_PARTS, MULTIPART_THRESHOLD, PART_SIZE, TransferRequest, TransferResult,
            TransferStrategy,
        },
    },
    stores::{ObjectReader, ObjectWriter, StoreError, StoreResult},
};
use futures::StreamExt;
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};

/// Size knobs for a transfer. The defaults are the production constants.
#[derive(Debug, Clone, Copy)]
pub struct TransferTuning {
    /// Largest object copied with a single streamed put.
    pub multipart_threshold: u64,
    /// Nominal multipart part size.
    pub part_size: u64,
    /// Parts in flight at once; 1 uploads strictly in order.
    pub part_concurrency: usize,
}

impl Default for TransferTuning {
    fn default() -> Self {
        Self {
            multipart_threshold: MULTIPART_THRESHOLD,
            part_size: PART_SIZE,
            part_concurrency: 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Initialized,
    SizeProbed,
    SimpleTransfer,
    MultipartTransfer,
    Completed,
    Failed,
}

impl Phase {
    fn as_str(self) -> &'static str {
        match self {
            Phase::Initialized => "initialized",
            Phase::SizeProbed => "size_probed",
            Phase::SimpleTransfer => "simple_transfer",
            Phase::MultipartTransfer => "multipart_transfer",
            Phase::Completed => "completed",
            Phase::Failed => "failed",
        }
    }
}

#[derive(Clone)]
pub struct TransferOrchestrator {
    reader: Arc<dyn ObjectReader>,
    writer: Arc<dyn ObjectWriter>,
    tuning: TransferTuning,
}

impl TransferOrchestrator {
    pub fn new(
        reader: Arc<dyn ObjectReader>,
        writer: Arc<dyn ObjectWriter>,
        tuning: TransferTuning,
    ) -> Self {
        Self {
            reader,
            writer,
            tuning,
        }
    }

    /// Replicate one object.
    ///
    /// Store failures come back as a failed [`TransferResult`]; only
    /// unclassified failures are returned as `Err`, after any open session has
    /// been aborted.
    #[instrument(skip_all, fields(source = %request.source, destination = %request.destination))]
    pub async fn transfer(
        &self,
        request: &TransferRequest,
    ) -> Result<TransferResult, ReplicationError> {
        debug!(phase = Phase::Initialized.as_str());

        let metadata = match self.reader.head_object(&request.source).await {
            Ok(metadata) => metadata,
            Err(err) => return self.fail(request, None, err),
        };
        let size = metadata.size;
        let strategy = TransferStrategy::select(size, self.tuning.multipart_threshold);
        info!(
            phase = Phase::SizeProbed.as_str(),
            size,
            ?strategy,
            "File size: {:.2} MB",
            size as f64 / 1024.0 / 1024.0
        );

        let outcome = match strategy {
            TransferStrategy::Simple => self.simple_transfer(request, size).await.map(|id| (id, 0)),
            TransferStrategy::Multipart => self.multipart_transfer(request, size).await,
        };

        match outcome {
            Ok((transaction_id, parts)) => {
                info!(
                    phase = Phase::Completed.as_str(),
                    etag = %transaction_id,
                    parts,
                    "replicated {} bytes",
                    size
                );
                Ok(TransferResult::succeeded(
                    request,
                    strategy,
                    size,
                    parts,
                    transaction_id,
                ))
            }
            Err(err) => self.fail(request, Some(strategy), err),
        }
    }

    fn fail(
        &self,
        request: &TransferRequest,
        strategy: Option<TransferStrategy>,
        err: StoreError,
    ) -> Result<TransferResult, ReplicationError> {
        error!(
            phase = Phase::Failed.as_str(),
            kind = err.kind().as_str(),
            "transfer failed: {}",
            err
        );
        if err.is_unexpected() {
            return Err(ReplicationError::Unexpected {
                source_location: request.source.to_string(),
                error: err,
            });
        }
        Ok(TransferResult::failed(
            request,
            strategy,
            err.kind(),
            err.to_string(),
        ))
    }

    /// Stream the source straight into a single put; nothing is buffered whole.
    async fn simple_transfer(&self, request: &TransferRequest, size: u64) -> StoreResult<String> {
        debug!(phase = Phase::SimpleTransfer.as_str());
        let stream = self.reader.open_stream(&request.source).await?;
        self.writer
            .put_object(&request.destination, stream, size)
            .await
    }

    async fn multipart_transfer(
        &self,
        request: &TransferRequest,
        size: u64,
    ) -> StoreResult<(String, u32)> {
        let plan = PartPlan::new(size, self.tuning.part_size);
        let layout = plan.layout();
        info!(
            phase = Phase::MultipartTransfer.as_str(),
            total_parts = layout.total_parts,
            part_size = layout.part_size,
            "Total parts: {}, Part size: {:.2} MB",
            layout.total_parts,
            layout.part_size as f64 / 1024.0 / 1024.0
        );

        if layout.total_parts > MAX_PARTS {
            return Err(StoreError::InvalidRequest {
                location: request.destination.to_string(),
                reason: format!(
                    "{} parts of {} bytes exceed the {} part limit",
                    layout.total_parts, layout.part_size, MAX_PARTS
                ),
            });
        }

        // No session exists if this fails, so there is nothing to release.
        let mut session = self
            .writer
            .begin_multipart(&request.destination, layout)
            .await?;
        info!(session = %session.session_id, "initialized multipart upload");

        match self.fill_and_complete(&request.source, &plan, &mut session).await {
            Ok(transaction_id) => Ok((transaction_id, session.total_parts)),
            Err(err) => {
                self.release(&session, &err).await;
                Err(err)
            }
        }
    }

    async fn fill_and_complete(
        &self,
        source: &ObjectLocation,
        plan: &PartPlan,
        session: &mut MultipartSession,
    ) -> StoreResult<String> {
        let parts = self.upload_parts(source, plan, session).await?;
        session.record_parts(parts);
        info!(session = %session.session_id, "completing multipart upload");
        self.writer.complete_multipart(session).await
    }

    /// Consume the part queue with `part_concurrency` workers. The first error
    /// drops the queue, cancelling in-flight parts and abandoning the rest.
    async fn upload_parts(
        &self,
        source: &ObjectLocation,
        plan: &PartPlan,
        session: &MultipartSession,
    ) -> StoreResult<Vec<CompletedPart>> {
        let total = plan.layout().total_parts;
        let mut uploads = futures::stream::iter(plan.parts())
            .map(|part| self.transfer_part(source, session, part, total))
            .buffered(self.tuning.part_concurrency.max(1));

        let mut completed = Vec::with_capacity(total as usize);
        while let Some(result) = uploads.next().await {
            completed.push(result?);
        }
        Ok(completed)
    }

    async fn transfer_part(
        &self,
        source: &ObjectLocation,
        session: &MultipartSession,
        part: PartRange,
        total: u32,
    ) -> StoreResult<CompletedPart> {
        debug!(
            part = part.part_number,
            offset = part.offset,
            length = part.length,
            "Uploading part {}/{} ({:.2} MB)",
            part.part_number,
            total,
            part.length as f64 / 1024.0 / 1024.0
        );
        let bytes = self
            .reader
            .read_range(source, part.offset, part.length)
            .await?;
        if bytes.len() as u64 != part.length {
            return Err(StoreError::RangeUnsatisfiable {
                location: source.to_string(),
                offset: part.offset,
                length: part.length,
            });
        }

        let completed = self
            .writer
            .upload_part(session, part.part_number, bytes)
            .await?;
        debug!("uploaded part {}/{}", part.part_number, total);
        Ok(completed)
    }

    /// Best-effort abort. Its own failure is logged and never replaces `cause`.
    async fn release(&self, session: &MultipartSession, cause: &StoreError) {
        warn!(
            session = %session.session_id,
            "Aborting multipart upload after failure: {}",
            cause
        );
        if let Err(abort_err) = self.writer.abort_multipart(session).await {
            error!(
                session = %session.session_id,
                "abort failed ({}); session may need an out-of-band sweep. original cause: {}",
                abort_err,
                cause
            );
        }
    }
}
