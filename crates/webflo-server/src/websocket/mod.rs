//! `WebSocket` gateway: each connection becomes a client port of a tenant.

pub mod session;
pub mod transport;

pub use session::run_ws_session;
pub use transport::WsTransport;
