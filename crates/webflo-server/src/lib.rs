//! # webflo-server
//!
//! Axum HTTP + `WebSocket` gateway over the Webflo core.
//!
//! - HTTP endpoints: `/health`
//! - Per-request state: cookie session and signal thread opened by
//!   [`middleware::request_state`], committed to the response
//! - `WebSocket` gateway: `/ws/{tenant}` connections become client ports of
//!   the tenant, exchanging JSON envelopes
//! - Graceful shutdown via `tokio::signal` + `CancellationToken`

#![deny(unsafe_code)]

pub mod config;
pub mod errors;
pub mod health;
pub mod middleware;
pub mod server;
pub mod shutdown;
pub mod websocket;

pub use config::ServerConfig;
pub use errors::ServerError;
pub use middleware::{RequestContext, THREAD_HEADER};
pub use server::{AppState, WebfloServer};
