use std::{
    net::{IpAddr, SocketAddr},
    path::PathBuf,
};

use anyhow::{Context, Result};
use clap::Parser;
use rewrite_proxy::{ProxyConfig, load_config, spawn_proxy};
use tracing::info;

#[derive(Parser)]
#[command(name = "rewrite-proxy")]
#[command(about = "HTTP proxy that rewrites HTML responses with selector rules")]
#[command(version)]
struct Cli {
    /// JSON config file with port, sslRewrite and modifications
    #[arg(short, long, env = "REWRITE_PROXY_CONFIG", default_value = "./config.json")]
    config: PathBuf,

    /// Overrides the port from the config file
    #[arg(short, long, env = "REWRITE_PROXY_PORT")]
    port: Option<u16>,

    /// Address to bind to
    #[arg(long, env = "REWRITE_PROXY_BIND", default_value = "0.0.0.0")]
    bind: IpAddr,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let cli = Cli::parse();
    let config = load_config(&cli.config)?;
    let port = cli.port.unwrap_or(config.port);
    let proxy_config = ProxyConfig::from_config(&config, SocketAddr::new(cli.bind, port))?;
    let scheme = if proxy_config.tls.is_some() { "https" } else { "http" };

    let handle = spawn_proxy(proxy_config)
        .await
        .context("failed to start proxy")?;
    info!(
        addr = %handle.addr,
        scheme,
        rules = config.modifications.len(),
        "listening"
    );

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    info!("shutting down");
    handle.shutdown().await;
    Ok(())
}
