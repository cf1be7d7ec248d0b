//! # webflo
//!
//! Gateway binary: loads settings, starts the HTTP/WebSocket server and
//! shuts it down gracefully on Ctrl-C.

#![deny(unsafe_code)]

use anyhow::{Context, Result};
use webflo_server::{ServerConfig, WebfloServer};

#[tokio::main]
async fn main() -> Result<()> {
    let settings = webflo_settings::get_settings();
    webflo_core::logging::init_subscriber(&settings.logging.level);

    let config = ServerConfig::from_settings(settings);
    let bind = config.bind_addr();
    let server = WebfloServer::new(config);
    let addr = server
        .listen()
        .await
        .with_context(|| format!("failed to bind {bind}"))?;
    tracing::info!(%addr, "webflo gateway ready");

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl-c")?;

    tracing::info!("shutting down");
    server.shutdown().await;
    Ok(())
}
