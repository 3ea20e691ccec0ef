use std::net::SocketAddr;

use axum::{routing::get, Router};
use tokio::net::TcpListener;

pub const ALIVE: &str = "I'm alive!";

pub fn router() -> Router {
    Router::new().route("/", get(alive))
}

pub async fn alive() -> &'static str {
    ALIVE
}

/// Answers uptime pings until the process exits.
pub async fn serve(addr: SocketAddr) -> std::io::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    tracing::info!(addr = %listener.local_addr()?, "Liveness endpoint listening");
    axum::serve(listener, router()).await
}
