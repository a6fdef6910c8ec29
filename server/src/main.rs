use anyhow::Result;
use axum::Router;
use clap::Parser;
use simcheck_core::config::load_or_default;
use simcheck_server::build_app;
use std::net::SocketAddr;
use std::path::PathBuf;
use tokio::net::TcpListener;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser)]
struct Args {
    /// TOML config file
    #[arg(long)]
    config: Option<PathBuf>,
    /// Data directory (overrides the config file)
    #[arg(long)]
    data_dir: Option<PathBuf>,
    /// Host to bind
    #[arg(long)]
    host: Option<String>,
    /// Port to bind
    #[arg(long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<()> {
    fmt().with_env_filter(EnvFilter::from_default_env()).init();
    let args = Args::parse();
    let mut config = load_or_default(args.config.as_deref())?;
    if let Some(dir) = args.data_dir {
        config.storage.data_dir = dir;
    }
    if let Some(host) = args.host {
        config.server.host = host;
    }
    if let Some(port) = args.port {
        config.server.port = port;
    }
    let app: Router = build_app(&config)?;

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    let listener = TcpListener::bind(addr).await?;
    tracing::info!(%addr, "server listening");
    axum::serve(listener, app).await?;
    Ok(())
}
