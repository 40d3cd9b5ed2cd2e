use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use receipt_mirror::config::{AppConfig, MirrorBackend};
use receipt_mirror::web::{AppState, build_router};
use receipt_mirror::{
    ExpiringUrlSigner, InMemoryMirror, MemoryStore, MirrorClient, ReconcileEngine,
    SheetsMirrorClient, SystemClock, spawn_drain_worker,
};
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "receipt-mirror")]
#[command(about = "Mirrors receipts into an external spreadsheet ledger through a retrying outbox")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the periodic drain worker and the admin HTTP server.
    Serve,
    /// Run a single drain pass and print what it processed.
    RunOnce,
    /// Print the outbox entries of one organization as JSON.
    Inspect {
        #[arg(long)]
        org_id: Uuid,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let cli = Cli::parse();
    let config = AppConfig::from_env().context("failed to load application configuration")?;
    let engine = build_engine(&config).await?;

    match cli.command {
        Command::Serve => serve(&config, engine).await,
        Command::RunOnce => {
            let report = engine.run_once().await.context("drain pass failed")?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(())
        }
        Command::Inspect { org_id } => {
            let records = engine
                .list_sync_records(org_id)
                .await
                .context("failed to list sync records")?;
            println!("{}", serde_json::to_string_pretty(&records)?);
            Ok(())
        }
    }
}

async fn build_engine(config: &AppConfig) -> Result<Arc<ReconcileEngine>> {
    let store = match &config.store_path {
        Some(path) => Arc::new(
            MemoryStore::open(path)
                .await
                .with_context(|| format!("failed to open store snapshot '{}'", path.display()))?,
        ),
        None => {
            warn!("STORE_PATH not set, outbox will not survive a restart");
            Arc::new(MemoryStore::new())
        }
    };

    let mirror: Arc<dyn MirrorClient> = match config.mirror_backend {
        MirrorBackend::Memory => {
            info!("mirror backend: memory");
            Arc::new(InMemoryMirror::new())
        }
        MirrorBackend::Http => {
            info!(base_url = %config.mirror.base_url, "mirror backend: http");
            Arc::new(
                SheetsMirrorClient::new(config.mirror.clone())
                    .context("failed to build mirror client")?,
            )
        }
    };

    let clock = Arc::new(SystemClock);
    let signer = Arc::new(ExpiringUrlSigner::new(config.signer.clone(), clock.clone()));

    Ok(Arc::new(
        ReconcileEngine::builder(store.clone(), store, mirror)
            .clock(clock)
            .signer(signer)
            .policy(config.policy.clone())
            .worker_id(config.worker_id.clone())
            .build(),
    ))
}

async fn serve(config: &AppConfig, engine: Arc<ReconcileEngine>) -> Result<()> {
    let worker = spawn_drain_worker(engine.clone());
    let app = build_router(AppState::new(engine));

    let addr = config.address();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind to {addr}"))?;

    info!(address = %addr, worker_id = %config.worker_id, "receipt mirror started");

    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error");

    worker.stop().await.context("failed to stop drain worker")?;
    info!("receipt mirror stopped");
    served
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("receipt_mirror=info,tower_http=info")),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!(error = %err, "unable to install Ctrl+C signal handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};

        match signal(SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                error!(error = %err, "unable to install SIGTERM handler");
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
}
