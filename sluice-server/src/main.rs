use std::{net::SocketAddr, sync::Arc};

use anyhow::{Context, anyhow};
use clap::{Args as ClapArgs, Parser, Subcommand};
use sluice_config::{ConfigLoad, ConfigLoader, SluiceConfig};
use sluice_core::InMemoryLibraryCatalog;
use sluice_server::{
    AppState, create_app,
    infra::startup::{connect_postgres, open_store, spawn_event_log, start_ingest},
};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// CLI entry point
#[derive(Parser, Debug)]
#[command(name = "sluice-server")]
#[command(about = "Library ingestion and work distribution server")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,

    #[command(flatten)]
    serve: ServeArgs,
}

#[derive(ClapArgs, Debug, Clone)]
struct ServeArgs {
    /// Server port (overrides config)
    #[arg(short, long, env = "SERVER_PORT")]
    port: Option<u16>,

    /// Server host (overrides config)
    #[arg(long, env = "SERVER_HOST")]
    host: Option<String>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Load and validate the configuration, print the libraries and exit
    CheckConfig,
    /// Apply database migrations and exit
    Migrate,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing();

    let load = load_runtime_config(&cli.serve)?;

    match cli.command {
        Some(Command::CheckConfig) => check_config(&load),
        Some(Command::Migrate) => run_db_migrate(&load.config).await,
        None => run_server(load).await,
    }
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tower_http=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

fn load_runtime_config(args: &ServeArgs) -> anyhow::Result<ConfigLoad> {
    let mut load = ConfigLoader::new()
        .load()
        .context("failed to load configuration")?;

    if let Some(port) = args.port {
        load.config.server.port = port;
    }
    if let Some(host) = args.host.clone() {
        load.config.server.host = host;
    }
    Ok(load)
}

fn check_config(load: &ConfigLoad) -> anyhow::Result<()> {
    println!("configuration source: {:?}", load.source);
    println!(
        "server: {}:{}",
        load.config.server.host, load.config.server.port
    );
    println!(
        "database: {}",
        if load.config.database.primary_url().is_some() {
            "postgres"
        } else {
            "in-memory"
        }
    );
    println!("nodes: {}", load.config.nodes.len());
    println!("libraries: {}", load.libraries.len());
    for library in &load.libraries {
        println!(
            "  {} [{}] {} order={} mode={:?} enabled={} max_runners={}",
            library.name,
            library.id,
            library.path.display(),
            library.processing_order,
            library.scan_mode,
            library.enabled,
            library.max_runners,
        );
    }
    Ok(())
}

async fn run_db_migrate(config: &SluiceConfig) -> anyhow::Result<()> {
    let url = config
        .database
        .primary_url()
        .ok_or_else(|| anyhow!("migrate requires database.url or DATABASE_URL"))?;
    let store = connect_postgres(config, url).await?;
    store.migrate().await.context("database migration failed")?;
    info!("Database migrations applied successfully");
    Ok(())
}

async fn run_server(load: ConfigLoad) -> anyhow::Result<()> {
    let ConfigLoad {
        config, libraries, ..
    } = load;

    let (store, backend) = open_store(&config).await?;
    let catalog = Arc::new(InMemoryLibraryCatalog::new(libraries));
    let state = AppState::new(store, catalog, &config, backend);

    let cancel = CancellationToken::new();
    spawn_event_log(&state.events, cancel.child_token());
    let supervisor = start_ingest(&state, &config, cancel.child_token()).await?;
    let state = state.with_supervisor(supervisor.clone());

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .with_context(|| {
            format!(
                "invalid bind address {}:{}",
                config.server.host, config.server.port
            )
        })?;

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!(%addr, backend, "Starting sluice server");

    let shutdown = cancel.clone();
    axum::serve(listener, create_app(state))
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            shutdown.cancel();
        })
        .await?;

    supervisor.shutdown().await;
    info!("sluice server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!(error = %err, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                warn!(error = %err, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("shutdown signal received");
}
