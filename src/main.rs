use anyhow::{Context, Result};
use axum::Router;
use std::{io::ErrorKind, sync::Arc};
use tokio::{fs, net::TcpListener};
use tracing_subscriber::EnvFilter;

mod config;
mod errors;
mod handlers;
mod models;
mod routes;
mod services;
mod stores;

use config::{AppConfig, DestinationConfig, Launch};
use routes::routes::AppState;
use services::{
    journal_service::Journal,
    replication_service::{ReplicationResponse, ReplicationService},
};
use stores::{ObjectWriter, local_store::LocalStore, s3_store::S3Store};

#[tokio::main]
async fn main() -> Result<()> {
    // --- Logging setup ---
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // --- Parse config + launch mode ---
    let launch = AppConfig::from_env_and_args()?;

    match launch {
        Launch::Migrate { database_url } => {
            let journal = Journal::connect(&database_url).await?;
            journal.migrate().await?;
            tracing::info!("Database migration complete.");
            Ok(())
        }
        Launch::Replicate { config, event_file } => {
            tracing::info!("Replicating notification from {}", event_file.display());
            let service = build_service(&config).await?;
            let body = fs::read(&event_file)
                .await
                .with_context(|| format!("reading {}", event_file.display()))?;

            let response = match service.replicate_json(&body).await {
                Ok(report) => report.into_reply(),
                Err(err) => {
                    tracing::error!("Replication failed: {}", err);
                    ReplicationResponse::from_error(&err)
                }
            };
            println!("{}", serde_json::to_string_pretty(&response)?);

            if response.status_code != 200 {
                anyhow::bail!("replication finished with status {}", response.status_code);
            }
            Ok(())
        }
        Launch::Serve(config) => serve(config).await,
    }
}

async fn serve(cfg: AppConfig) -> Result<()> {
    tracing::info!("Starting object-replicator with config: {:?}", cfg);

    let service = build_service(&cfg).await?;
    let state = AppState {
        service,
        destination: Arc::new(cfg.replication.destination.clone()),
    };

    // --- Build router ---
    let app: Router = routes::routes::routes().with_state(state);

    // --- Start server ---
    let addr = cfg.addr();
    let listener = match TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(err)
            if err.kind() == ErrorKind::PermissionDenied
                && matches!(cfg.host.as_str(), "0.0.0.0" | "::") =>
        {
            let fallback_addr = format!("127.0.0.1:{}", cfg.port);
            tracing::warn!(
                "Permission denied binding to {} ({}). Falling back to {}",
                addr,
                err,
                fallback_addr
            );
            TcpListener::bind(&fallback_addr).await?
        }
        Err(err) => return Err(err.into()),
    };

    tracing::info!("Server listening on http://{}", listener.local_addr()?);
    axum::serve(listener, app).await?;

    Ok(())
}

/// Wire stores, the optional journal and the replication service from config.
async fn build_service(cfg: &AppConfig) -> Result<ReplicationService> {
    let replication = &cfg.replication;

    let source = S3Store::new(&replication.source);
    tracing::debug!("Source store: {:?} ({})", source.kind(), replication.source.region);

    let destination: Arc<dyn ObjectWriter> = match &replication.destination {
        DestinationConfig::Oss { settings, bucket } => {
            tracing::info!(
                "Destination: {:?} bucket `{}` via {:?}",
                settings.kind,
                bucket,
                settings.endpoint
            );
            Arc::new(S3Store::new(settings))
        }
        DestinationConfig::Local { root, bucket } => {
            fs::create_dir_all(root).await?;
            tracing::info!("Destination: local bucket `{}` under {}", bucket, root.display());
            Arc::new(LocalStore::new(root.clone()))
        }
    };

    let journal = match &cfg.database_url {
        Some(url) => {
            tracing::debug!("Connecting journal => {}", url);
            let journal = Journal::connect(url).await?;
            journal.migrate().await?;
            Some(journal)
        }
        None => {
            tracing::info!("REPLICATOR_DATABASE_URL not set; transfer journal disabled");
            None
        }
    };

    Ok(ReplicationService::from_config(
        replication,
        Arc::new(source),
        destination,
        journal,
    ))
}
