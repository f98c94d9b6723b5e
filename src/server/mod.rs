pub mod dto;
pub mod error;
pub mod extractors;
pub mod handlers;

use anyhow::{Context, Result};
use axum::{
    routing::{get, post},
    Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;

use crate::config::GatewayConfig;

pub fn routes(config: Arc<GatewayConfig>) -> Router {
    Router::new()
        .route("/", get(handlers::root))
        .route("/health", get(handlers::health))
        .route("/get-result", get(handlers::get_result))
        .route("/chat", get(handlers::chat_stream))
        .route("/api/chat", post(handlers::simple_chat))
        .with_state(config)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

/// Serve the gateway until ctrl-c.
pub async fn start_server_async(config: GatewayConfig, addr: SocketAddr) -> Result<()> {
    let listener = bind_with_reuse(addr).await?;
    info!(%addr, "Gateway listening");

    axum::serve(listener, routes(Arc::new(config)))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Gateway server failed")?;

    info!("Gateway stopped");
    Ok(())
}

/// Bind a TCP listener with SO_REUSEADDR so restarts reclaim the port instantly.
pub async fn bind_with_reuse(addr: SocketAddr) -> Result<tokio::net::TcpListener> {
    let socket = socket2::Socket::new(
        socket2::Domain::for_address(addr),
        socket2::Type::STREAM,
        Some(socket2::Protocol::TCP),
    )?;
    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket
        .bind(&addr.into())
        .with_context(|| format!("Binding {addr}"))?;
    socket.listen(1024)?;
    let std_listener: std::net::TcpListener = socket.into();
    Ok(tokio::net::TcpListener::from_std(std_listener)?)
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_ok() {
        info!("Shutdown requested");
    }
}
