use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tiltzero::config::TiltzeroConfig;
use tiltzero::scheduler::RoundEngine;
use tiltzero::server::ApiServer;
use tiltzero::store::{MemoryStore, UserStore};
use tracing::info;

#[derive(Parser, Debug)]
#[command(
    name = "tiltzero",
    version,
    about = "Recurring two-outcome betting round server"
)]
struct Args {
    /// Path to a TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the listen port
    #[arg(short, long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tiltzero=info,tower_http=info".into()),
        )
        .init();

    let args = Args::parse();
    let mut config = TiltzeroConfig::load(args.config.as_deref())?;
    if let Some(port) = args.port {
        config.server.port = port;
    }
    config.validate()?;

    info!(version = env!("CARGO_PKG_VERSION"), "starting tiltzero");

    let store: Arc<dyn UserStore> = Arc::new(MemoryStore::new(
        config.engine.starting_chips,
        config.engine.starting_rating,
    ));
    let engine = RoundEngine::new(config.engine.clone(), store);
    engine.start();

    ApiServer::new(config.server, engine).run().await
}
