//! floorsync relay binary.
//!
//! Reads `relay.toml` (or the path given with `--config`) layered under
//! `FLOORSYNC_*` environment variables, starts the hub, and serves the
//! WebSocket and REST endpoints over HTTP.

use std::{path::PathBuf, sync::Arc};

use anyhow::Context as _;
use clap::Parser;
use floorsync_relay::{AppState, RelayConfig, hub::Hub};
use tokio::net::TcpListener;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(author, version, about = "Production-floor real-time relay")]
struct Cli {
  /// Path to the TOML configuration file.
  #[arg(short, long, default_value = "relay.toml")]
  config: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
  tracing_subscriber::fmt()
    .with_env_filter(
      EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy(),
    )
    .init();

  let cli = Cli::parse();

  let settings = config::Config::builder()
    .add_source(config::File::from(cli.config).required(false))
    .add_source(config::Environment::with_prefix("FLOORSYNC").try_parsing(true))
    .build()
    .context("failed to read config file")?;

  let relay_cfg: RelayConfig = settings
    .try_deserialize()
    .context("failed to deserialise RelayConfig")?;

  let (hub, handle) = Hub::new(&relay_cfg);
  tokio::spawn(hub.run());

  let state = AppState {
    hub:    handle,
    config: Arc::new(relay_cfg.clone()),
  };

  let app = floorsync_relay::router(state);
  let address = format!("{}:{}", relay_cfg.host, relay_cfg.port);

  tracing::info!("Listening on ws://{address}/ws");
  let listener = TcpListener::bind(&address)
    .await
    .with_context(|| format!("failed to bind {address}"))?;

  axum::serve(listener, app).await.context("server error")?;

  Ok(())
}
