//! Liveness endpoint for container platforms: `GET /` and `GET /health` answer `ok`.

use std::future::Future;
use std::net::SocketAddr;

use anyhow::{Context, Result};
use axum::routing::get;
use axum::Router;
use tokio::net::TcpListener;
use tracing::info;

async fn ok() -> &'static str {
    "ok"
}

pub fn router() -> Router {
    Router::new().route("/", get(ok)).route("/health", get(ok))
}

/// Bind `0.0.0.0:<port>` and serve until `shutdown` resolves.
pub async fn serve(port: u16, shutdown: impl Future<Output = ()> + Send + 'static) -> Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding health endpoint on {addr}"))?;
    serve_on(listener, shutdown).await
}

pub async fn serve_on(
    listener: TcpListener,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<()> {
    info!(addr = ?listener.local_addr().ok(), "Health endpoint listening");
    axum::serve(listener, router())
        .with_graceful_shutdown(shutdown)
        .await
        .context("health endpoint stopped")
}
