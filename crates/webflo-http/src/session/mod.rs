//! Sessions.
//!
//! - [`HttpCookieSession`]: values travel as cookies; the session ID is
//!   HMAC-signed when a secret is configured
//! - [`ServerSideSession`]: values live in a [`KvStore`](webflo_core::KvStore)
//!   keyed by session ID

mod cookie;
mod server_side;
pub mod signing;

pub use cookie::{HttpCookieSession, SessionConfig};
pub use server_side::ServerSideSession;
pub use signing::SessionSigner;

pub(crate) use server_side::json_kind;
