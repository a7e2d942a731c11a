use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use hub_models::{HubConfig, ModelRegistry};
use hub_runtime::TinyBackend;
use hub_server::{run_server, AppState};
use hub_session::SessionRegistry;
use tracing_subscriber::EnvFilter;

/// llama-hub session server
#[derive(Parser)]
#[command(name = "hub-server")]
struct Cli {
    /// Hub configuration file listing the available models.
    #[arg(short, long)]
    config: PathBuf,

    /// Address to listen on.
    #[arg(short, long, default_value = "127.0.0.1:8080")]
    addr: SocketAddr,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let config = HubConfig::from_file(&cli.config)?;
    tracing::info!(path = %cli.config.display(), models = config.models.len(), "config loaded");

    let models = Arc::new(ModelRegistry::with_config(Arc::new(TinyBackend::new()), &config));
    let state = AppState::new(SessionRegistry::new(models));

    run_server(state, cli.addr).await
}
