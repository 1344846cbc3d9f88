//! Defines the HTTP surface of the replicator.
//!
//! ## Structure
//! - `POST /events`    : replicate the records of one notification document
//! - `GET  /transfers` : recent journaled outcomes (`?limit=`)
//! - `GET  /healthz`   : liveness
//! - `GET  /readyz`    : journal and destination readiness

use crate::{
    config::DestinationConfig,
    handlers::{
        event_handlers::{list_transfers, post_event},
        health_handlers::{healthz, readyz},
    },
    services::replication_service::ReplicationService,
};
use axum::{
    Router,
    routing::{get, post},
};
use std::sync::Arc;

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub service: ReplicationService,
    pub destination: Arc<DestinationConfig>,
}

/// Build and return the router with all endpoints mounted.
pub fn routes() -> Router<AppState> {
    Router::new()
        // health endpoints (mounted at root)
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/events", post(post_event))
        .route("/transfers", get(list_transfers))
}
