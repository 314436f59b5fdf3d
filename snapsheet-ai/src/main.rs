//! snapsheet-ai - document-to-spreadsheet extraction service
//!
//! Serves editing sessions over HTTP + SSE. Images added to a session run
//! through schema discovery, title naming and value extraction against the
//! Upstage API; sheets persist to SQLite with image binaries on disk.

use anyhow::Result;
use clap::Parser;
use snapsheet_ai::config::AiSettings;
use snapsheet_ai::services::{SqliteProjectGateway, UpstageClient};
use snapsheet_ai::AppState;
use snapsheet_common::events::EventBus;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Command-line arguments
#[derive(Parser, Debug)]
#[command(name = "snapsheet-ai", version, about = "SnapSheet extraction service")]
struct Args {
    /// Root folder holding snapsheet.db and stored images
    #[arg(long, env = "SNAPSHEET_ROOT")]
    root_folder: Option<String>,

    /// Address to listen on, e.g. 127.0.0.1:5790
    #[arg(long)]
    bind: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let toml_config = snapsheet_common::config::load_default_toml_config("snapsheet-ai")?;

    // RUST_LOG wins over the TOML level
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&toml_config.logging.level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!(
        "Starting snapsheet-ai v{} [{}] built {} ({})",
        env!("CARGO_PKG_VERSION"),
        env!("SNAPSHEET_GIT_HASH"),
        env!("SNAPSHEET_BUILD_TIMESTAMP"),
        env!("SNAPSHEET_BUILD_PROFILE")
    );

    let settings = AiSettings::resolve(args.root_folder.as_deref(), args.bind.as_deref(), &toml_config)?;
    info!("Root folder: {}", settings.root_folder.display());
    info!("Database: {}", settings.db_path.display());

    let db_pool = snapsheet_ai::db::init_database_pool(&settings.db_path).await?;
    info!("Database connection established");

    let event_bus = EventBus::new(256);

    let extractor = Arc::new(UpstageClient::new(
        settings.upstage_api_key.clone(),
        settings.upstage_base_url.clone(),
        settings.requests_per_second,
        settings.request_timeout,
    )?);
    info!(
        base_url = %settings.upstage_base_url,
        requests_per_second = settings.requests_per_second,
        "Extraction client initialized"
    );

    let gateway = Arc::new(SqliteProjectGateway::new(
        db_pool.clone(),
        event_bus.clone(),
        settings.blob_root.clone(),
        settings.public_base_url.clone(),
        settings.max_lock_wait_ms,
    ));

    let state = AppState::new(db_pool, event_bus, extractor, gateway, settings.blob_root.clone());
    let app = snapsheet_ai::build_router(state);

    let listener = tokio::net::TcpListener::bind(&settings.bind_address).await?;
    info!("Listening on http://{}", settings.bind_address);
    info!("Health check: http://{}/health", settings.bind_address);

    axum::serve(listener, app).await?;

    Ok(())
}
