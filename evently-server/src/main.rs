//! Evently Server
//!
//! Runs the lottery pipeline: initial draws, redraws after cancellations,
//! winner notifications and push delivery.

mod config;
mod server;
mod shutdown;
mod state;

use clap::Parser;
use config::{ConfigLoader, get_database_url};
use evently_core::config::ConfigStore;
use evently_core::events::{
    EventSenders, entrants_changed_channel, notification_created_channel, selection_sweep_channel,
};
use evently_core::processors::{
    EventChangeRouter, NotificationDispatcher, PgChangeListener, PushFanout, RedrawCoordinator,
    SelectionScheduler,
};
use evently_core::push::FcmTransport;
use evently_core::store::PgDocumentStore;
use server::{build_router, run_server};
use shutdown::{ReloadTargets, spawn_config_reload_handler};
use sqlx::postgres::PgPoolOptions;
use state::AppState;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::watch;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Evently - lottery selection and winner notification service
#[derive(Parser, Debug)]
#[command(name = "evently-server")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to the configuration file
    #[arg(short, long, default_value = "./evently-config.toml")]
    config: PathBuf,

    /// Override the listen address (e.g., 0.0.0.0:3000)
    #[arg(short, long)]
    listen: Option<SocketAddr>,

    /// Run database migrations on startup
    #[arg(long, default_value = "false")]
    migrate: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let args = Args::parse();

    tracing::info!("Starting evently-server v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let config_loader = Arc::new(ConfigLoader::new(&args.config, args.listen));
    let loaded_config = config_loader.load().map_err(|e| {
        tracing::error!("Failed to load configuration: {}", e);
        e
    })?;
    tracing::info!("Configuration loaded from {:?}", args.config);

    let database_url = get_database_url().map_err(|e| {
        tracing::error!("DATABASE_URL environment variable not set");
        e
    })?;

    tracing::info!("Connecting to database...");
    let db_pool = PgPoolOptions::new()
        .max_connections(loaded_config.store.max_connections)
        .connect(&database_url)
        .await
        .map_err(|e| {
            tracing::error!("Failed to connect to database: {}", e);
            e
        })?;
    tracing::info!("Database connection established");

    if args.migrate {
        tracing::info!("Running database migrations...");
        sqlx::migrate!("../migrations")
            .run(&db_pool)
            .await
            .map_err(|e| {
                tracing::error!("Failed to run migrations: {}", e);
                e
            })?;
        tracing::info!("Migrations completed successfully");
    }

    // Channels
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let (entrants_tx, entrants_rx) = entrants_changed_channel();
    let (created_tx, created_rx) = notification_created_channel();
    let (sweep_tx, sweep_rx) = selection_sweep_channel();

    // Reloadable configuration
    let scheduler_config = ConfigStore::new(loaded_config.scheduler.clone());
    let templates = ConfigStore::new(loaded_config.templates.clone());

    // Processors
    let store = Arc::new(
        PgDocumentStore::new(db_pool.clone())
            .with_max_attempts(loaded_config.store.transaction_attempts),
    );
    let transport = Arc::new(FcmTransport::new(&loaded_config.push)?);

    let router = Arc::new(EventChangeRouter::new(
        Arc::new(RedrawCoordinator::new(store.clone())),
        Arc::new(NotificationDispatcher::new(store.clone(), templates.clone())),
    ));
    let fanout = Arc::new(PushFanout::new(store.clone(), transport));
    let scheduler = SelectionScheduler::new(store.clone());
    let listener = PgChangeListener::new(db_pool.clone(), EventSenders::new(entrants_tx, created_tx))
        .with_drain_interval(loaded_config.store.outbox_drain_interval);

    let tasks = vec![
        tokio::spawn(router.run(shutdown_rx.clone(), entrants_rx)),
        tokio::spawn(fanout.run(shutdown_rx.clone(), created_rx)),
        tokio::spawn(scheduler.run(
            shutdown_rx.clone(),
            sweep_rx,
            scheduler_config.subscribe(),
        )),
        tokio::spawn({
            let shutdown_rx = shutdown_rx.clone();
            async move {
                if let Err(e) = listener.run(shutdown_rx).await {
                    tracing::error!("Change listener failed: {}", e);
                }
            }
        }),
    ];

    // Spawn config reload handler (listens for SIGHUP)
    let reload_notify = spawn_config_reload_handler(
        config_loader,
        ReloadTargets {
            scheduler: scheduler_config,
            templates,
        },
    );

    let listen_addr = loaded_config.server.listen;
    let app = build_router(AppState::new(db_pool.clone(), sweep_tx));

    tracing::info!("Starting HTTP server on {}", listen_addr);
    let result = run_server(app, listen_addr).await;

    // Stop processors and the reload handler
    let _ = shutdown_tx.send(true);
    reload_notify.notify_one();
    for task in tasks {
        if let Err(e) = task.await {
            tracing::error!("Processor task failed: {}", e);
        }
    }

    tracing::info!("Closing database connections...");
    db_pool.close().await;
    tracing::info!("Server shutdown complete");

    result.map_err(Into::into)
}

/// Initialize the tracing subscriber with environment-based filtering.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,sqlx=warn"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}
