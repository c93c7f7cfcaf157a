//! AutoQA web service binary

use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

use autoqa_web::{AppConfig, WebServer};

#[derive(Parser)]
#[command(name = "autoqa-web")]
#[command(about = "AutoQA - generate, run and record AI-authored browser tests")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, default_value = "autoqa.toml")]
    config: PathBuf,

    /// HTTP listen address (overrides config and AUTOQA_LISTEN)
    #[arg(short, long)]
    listen: Option<String>,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.debug {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    info!("AutoQA v{}", autoqa_common::VERSION);

    let mut cfg = AppConfig::load(&cli.config)?.with_env_overrides()?;
    if let Some(listen) = cli.listen {
        cfg.server.listen = listen;
    }
    let addr: SocketAddr = cfg.server.listen.parse()?;

    if cfg.model.api_key.is_none() {
        info!("No model API key configured; runs need a request apiKey");
    }
    info!("Auth mode: {:?}", cfg.auth.mode);

    WebServer::new(cfg)?.serve(addr).await
}
