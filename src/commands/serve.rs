use anyhow::{Context, Result};
use std::net::{IpAddr, SocketAddr};
use tracing::info;

use crate::config::GatewayConfig;
use crate::server;

/// Load configuration and run the gateway until ctrl-c.
pub fn run(host: IpAddr, port: u16) -> Result<()> {
    match dotenvy::dotenv() {
        Ok(path) => info!(path = %path.display(), "Loaded environment file"),
        Err(e) if e.not_found() => {}
        Err(e) => return Err(e).context("Reading .env file"),
    }

    let config = GatewayConfig::from_env().context("Loading gateway configuration")?;
    info!(
        thread_endpoint = %config.thread_endpoint,
        stream_endpoint = %config.stream_endpoint,
        grant = ?config.token_grant,
        "Configuration loaded"
    );

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(server::start_server_async(
        config,
        SocketAddr::new(host, port),
    ))
}
