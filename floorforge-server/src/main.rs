use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use floorforge_core::{DeviceMap, SdLoader};
use floorforge_server::routes;
use floorforge_server::settings::Settings;
use floorforge_server::state::AppState;
use hf_hub::api::tokio::Api;
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about = "FloorForge floor plan generation server")]
struct Args {
    /// Use CPU even when a GPU is available
    #[arg(long)]
    cpu: bool,

    /// Fallback hub model used when no local fine-tuned pipeline is found
    #[arg(long)]
    model: Option<String>,

    /// Host address to bind the server to
    #[arg(long, default_value = "0.0.0.0")]
    host: String,

    /// Port to bind the server to
    #[arg(long, default_value_t = 5000)]
    port: u16,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let mut settings = Settings::from_env();
    if let Some(model) = args.model {
        settings.base_model_id = model;
    }
    settings
        .ensure_directories()
        .context("failed to create data directories")?;

    let device_map = if args.cpu {
        DeviceMap::ForceCpu
    } else {
        DeviceMap::from_use_gpu(settings.use_gpu)
    };
    let loader = SdLoader::new(
        Api::new()?,
        device_map,
        settings.tuning_flags(),
        settings.image_width,
        settings.image_height,
    );
    let state = Arc::new(AppState::new(settings, loader));

    if state.settings.eager_load_model {
        match state.pipeline.get_or_load().await {
            Ok(handle) => info!(provenance = ?handle.provenance, "model ready at startup"),
            Err(err) => warn!(error = %err, "eager load failed, will retry on first request"),
        }
    }

    let app = routes::router(state);

    let bind_address = format!("{}:{}", args.host, args.port);
    let listener = TcpListener::bind(&bind_address)
        .await
        .with_context(|| format!("failed to bind {bind_address}"))?;
    info!(address = %listener.local_addr()?, "started FloorForge server");
    axum::serve(listener, app.into_make_service()).await?;

    Ok(())
}
