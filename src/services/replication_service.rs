//! src/services/replication_service.rs
//!
//! ReplicationService: one notification in, one [`BatchReport`] out.
//!
//! Every qualifying record is resolved before anything moves, so a
//! configuration problem fails the whole invocation with no side effects.
//! Transfers then run one after another; a failed transfer is reported and
//! the batch continues, an unexpected failure stops it.

use crate::{
    config::ReplicationConfig,
    errors::ReplicationError,
    models::{
        event::NotificationEvent,
        transfer::{TransferRequest, TransferResult},
    },
    services::{
        event_router::{EventRouter, SkippedRecord},
        journal_service::Journal,
        orchestrator::{TransferOrchestrator, TransferTuning},
        resolver::{DestinationTarget, LocationResolver},
    },
    stores::{ObjectReader, ObjectWriter},
};
use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, instrument, warn};

/// Outcome of one notification.
#[derive(Debug, Default)]
pub struct BatchReport {
    pub results: Vec<TransferResult>,
    pub skipped: Vec<SkippedRecord>,
}

impl BatchReport {
    /// 400 when nothing qualified, 200 when every transfer succeeded, else 500.
    pub fn status_code(&self) -> u16 {
        if self.results.is_empty() {
            400
        } else if self.results.iter().all(TransferResult::is_success) {
            200
        } else {
            500
        }
    }

    pub fn into_reply(self) -> ReplicationResponse {
        let status_code = self.status_code();
        let message = match status_code {
            400 => "No qualifying records in notification".to_string(),
            200 => format!("{} file(s) transferred successfully", self.results.len()),
            _ => {
                let failed = self.results.iter().filter(|r| !r.is_success()).count();
                format!("{} of {} transfer(s) failed", failed, self.results.len())
            }
        };

        ReplicationResponse {
            status_code,
            body: ResponseBody {
                message,
                transfers: self
                    .results
                    .into_iter()
                    .map(|details| TransferSummary {
                        source: details.source.to_string(),
                        destination: details.destination.to_string(),
                        details,
                    })
                    .collect(),
                skipped: self.skipped,
            },
        }
    }
}

/// The serverless-style reply: a status code and a JSON body.
#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct ReplicationResponse {
    pub status_code: u16,
    pub body: ResponseBody,
}

impl ReplicationResponse {
    /// Reply for an invocation that failed as a whole.
    pub fn from_error(err: &ReplicationError) -> Self {
        let status_code = match err {
            ReplicationError::InvalidEvent(_) => 400,
            _ => 500,
        };
        Self {
            status_code,
            body: ResponseBody {
                message: err.to_string(),
                transfers: Vec::new(),
                skipped: Vec::new(),
            },
        }
    }
}

#[derive(Serialize, Debug)]
pub struct ResponseBody {
    pub message: String,
    pub transfers: Vec<TransferSummary>,
    pub skipped: Vec<SkippedRecord>,
}

#[derive(Serialize, Debug)]
pub struct TransferSummary {
    pub source: String,
    pub destination: String,
    pub details: TransferResult,
}

#[derive(Clone)]
pub struct ReplicationService {
    router: EventRouter,
    resolver: LocationResolver,
    orchestrator: TransferOrchestrator,
    journal: Option<Journal>,
}

impl ReplicationService {
    pub fn new(
        router: EventRouter,
        resolver: LocationResolver,
        orchestrator: TransferOrchestrator,
        journal: Option<Journal>,
    ) -> Self {
        Self {
            router,
            resolver,
            orchestrator,
            journal,
        }
    }

    pub fn from_config(
        config: &ReplicationConfig,
        reader: Arc<dyn ObjectReader>,
        writer: Arc<dyn ObjectWriter>,
        journal: Option<Journal>,
    ) -> Self {
        let tuning = TransferTuning {
            part_concurrency: config.part_concurrency,
            ..TransferTuning::default()
        };
        Self::new(
            EventRouter::new(&config.key_prefix),
            LocationResolver::new(
                config.region_mapping.clone(),
                DestinationTarget::from(&config.destination),
            ),
            TransferOrchestrator::new(reader, writer, tuning),
            journal,
        )
    }

    pub fn journal(&self) -> Option<&Journal> {
        self.journal.as_ref()
    }

    /// Parse a raw notification document and replicate it.
    pub async fn replicate_json(&self, body: &[u8]) -> Result<BatchReport, ReplicationError> {
        let event: NotificationEvent = serde_json::from_slice(body)?;
        self.replicate(&event).await
    }

    #[instrument(skip_all, fields(records = event.records.len()))]
    pub async fn replicate(
        &self,
        event: &NotificationEvent,
    ) -> Result<BatchReport, ReplicationError> {
        let routed = self.router.route(event);

        let requests = routed
            .accepted
            .iter()
            .map(|record| self.resolver.resolve(record))
            .collect::<Result<Vec<TransferRequest>, _>>()?;

        info!(
            qualifying = requests.len(),
            skipped = routed.skipped.len(),
            "replicating notification"
        );

        let mut results = Vec::with_capacity(requests.len());
        for request in &requests {
            info!(
                "Transferring {} -> {}",
                request.source, request.destination
            );
            let started_at = Utc::now();
            let result = self.orchestrator.transfer(request).await?;
            self.journal_result(&result, started_at).await;
            results.push(result);
        }

        Ok(BatchReport {
            results,
            skipped: routed.skipped,
        })
    }

    async fn journal_result(&self, result: &TransferResult, started_at: chrono::DateTime<Utc>) {
        if let Some(journal) = &self.journal {
            if let Err(err) = journal.record(result, started_at).await {
                warn!("Failed to journal transfer of {}: {}", result.source, err);
            }
        }
    }
}
