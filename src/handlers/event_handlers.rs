//! Notification intake and journal listing.
//!
//! - POST /events     -> replicate a notification, reply with the batch report
//! - GET  /transfers  -> recent journal rows, newest first

use crate::{
    errors::AppError,
    models::journal::JournalEntry,
    routes::routes::AppState,
    services::journal_service::DEFAULT_RECENT_LIMIT,
};
use axum::{
    Json,
    body::Bytes,
    extract::{Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde::Deserialize;

/// `POST /events`
///
/// The body is an S3 event notification. The reply status follows the batch:
/// 400 when no record qualified, 200 when all transfers succeeded, 500 when
/// any failed. Invocation-level failures go through [`AppError`].
pub async fn post_event(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<impl IntoResponse, AppError> {
    let report = state.service.replicate_json(&body).await?;
    let response = report.into_reply();
    let status =
        StatusCode::from_u16(response.status_code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    Ok((status, Json(response.body)))
}

#[derive(Deserialize, Debug)]
pub struct TransfersQuery {
    pub limit: Option<u32>,
}

/// `GET /transfers?limit=N`
pub async fn list_transfers(
    State(state): State<AppState>,
    Query(query): Query<TransfersQuery>,
) -> Result<Json<Vec<JournalEntry>>, AppError> {
    let journal = state
        .service
        .journal()
        .ok_or_else(|| AppError::new(StatusCode::NOT_FOUND, "transfer journal is not configured"))?;
    let rows = journal
        .recent(query.limit.unwrap_or(DEFAULT_RECENT_LIMIT))
        .await?;
    Ok(Json(rows))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::DestinationConfig,
        models::object::{ObjectLocation, StoreKind},
        services::{
            event_router::EventRouter,
            orchestrator::{TransferOrchestrator, TransferTuning},
            replication_service::ReplicationService,
            resolver::{DestinationTarget, LocationResolver, RegionMapping},
        },
        stores::memory_store::MemoryStore,
    };
    use serde_json::json;
    use std::{path::PathBuf, sync::Arc};

    fn state(source: MemoryStore) -> AppState {
        let service = ReplicationService::new(
            EventRouter::new("mysql/"),
            LocationResolver::new(
                RegionMapping::default(),
                DestinationTarget {
                    store: StoreKind::Local,
                    bucket: "replica".into(),
                    region: "local".into(),
                },
            ),
            TransferOrchestrator::new(
                Arc::new(source),
                Arc::new(MemoryStore::new()),
                TransferTuning::default(),
            ),
            None,
        );
        AppState {
            service,
            destination: Arc::new(DestinationConfig::Local {
                root: PathBuf::from("unused"),
                bucket: "replica".into(),
            }),
        }
    }

    fn body(key: &str) -> Bytes {
        Bytes::from(
            json!({
                "Records": [{
                    "awsRegion": "ap-south-1",
                    "eventName": "ObjectCreated:Put",
                    "s3": { "bucket": { "name": "rds-src" }, "object": { "key": key } }
                }]
            })
            .to_string(),
        )
    }

    #[tokio::test]
    async fn replicated_event_is_a_200() {
        let source = MemoryStore::new().with_object(
            &ObjectLocation::new(StoreKind::S3, "rds-src", "mysql/a.gz", "ap-south-1"),
            64,
        );
        let response = post_event(State(state(source)), body("mysql/a.gz"))
            .await
            .into_response();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn irrelevant_event_is_a_400() {
        let response = post_event(State(state(MemoryStore::new())), body("other/a.gz"))
            .await
            .into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn missing_object_is_a_500() {
        let response = post_event(State(state(MemoryStore::new())), body("mysql/gone.gz"))
            .await
            .into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn transfers_without_journal_is_a_404() {
        let response = list_transfers(
            State(state(MemoryStore::new())),
            Query(TransfersQuery { limit: None }),
        )
        .await
        .into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
