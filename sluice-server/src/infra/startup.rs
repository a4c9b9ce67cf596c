use std::sync::Arc;

use anyhow::Context;
use sluice_config::SluiceConfig;
use sluice_core::{
    BroadcastEventPublisher, FileEvent, FileStore, InMemoryFileStore, IngestSupervisor,
    LibraryCatalog, LibraryIngestor, PostgresFileStore, Sha256Fingerprinter,
};
use sqlx::postgres::PgPoolOptions;
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::infra::app_state::AppState;

/// Connect the configured store. Without a database URL files live in
/// memory and are lost on restart.
pub async fn open_store(
    config: &SluiceConfig,
) -> anyhow::Result<(Arc<dyn FileStore>, &'static str)> {
    let Some(url) = config.database.primary_url() else {
        warn!("no database configured, using the in-memory file store");
        return Ok((Arc::new(InMemoryFileStore::new()), "memory"));
    };

    let store = connect_postgres(config, url).await?;
    if config.database.run_migrations {
        store.migrate().await.context("database migration failed")?;
    }
    Ok((Arc::new(store), "postgres"))
}

pub async fn connect_postgres(
    config: &SluiceConfig,
    url: &str,
) -> anyhow::Result<PostgresFileStore> {
    let pool = PgPoolOptions::new()
        .max_connections(config.database.max_connections.max(1))
        .connect(url)
        .await
        .context("failed to connect to PostgreSQL")?;
    PostgresFileStore::new(pool)
        .await
        .context("PostgreSQL health check failed")
}

/// Recover stranded claims, then start watching and scanning every enabled
/// library.
pub async fn start_ingest(
    state: &AppState,
    config: &SluiceConfig,
    cancel: CancellationToken,
) -> anyhow::Result<Arc<IngestSupervisor>> {
    let swept = state
        .claims
        .startup_sweep(&config.node_ids())
        .await
        .context("startup claim sweep failed")?;
    if swept > 0 {
        warn!(swept, "reset claims held by unknown nodes");
    }

    let ingestor = Arc::new(LibraryIngestor::new(
        state.store.clone(),
        Arc::new(Sha256Fingerprinter::default()),
        state.events.clone(),
        config.ingest.clone(),
    ));
    let supervisor = Arc::new(IngestSupervisor::new(
        state.catalog.clone(),
        ingestor,
        config.ingest.clone(),
        cancel,
    ));
    let started = supervisor
        .start()
        .await
        .context("failed to start library ingestion")?;
    let total = state.catalog.list().await?.len();
    info!(started, total, "library ingestion started");
    Ok(supervisor)
}

/// Mirror file events into the log until `cancel` fires.
pub fn spawn_event_log(events: &BroadcastEventPublisher, cancel: CancellationToken) {
    let mut rx = events.subscribe();
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                event = rx.recv() => match event {
                    Ok(event) => log_event(&event),
                    Err(RecvError::Lagged(skipped)) => {
                        debug!(target: "events", skipped, "event log lagged");
                    }
                    Err(RecvError::Closed) => break,
                },
            }
        }
    });
}

fn log_event(event: &FileEvent) {
    match event {
        FileEvent::FileAdded { library_id, file } => {
            debug!(target: "events", library = %library_id, file = %file.uid, name = %file.name, "file added");
        }
        FileEvent::ProcessingStarted { file } => {
            debug!(target: "events", file = %file.uid, node = ?file.node_id, "processing started");
        }
        FileEvent::ProcessingCompleted { file, success } => {
            debug!(target: "events", file = %file.uid, success, "processing completed");
        }
    }
}
