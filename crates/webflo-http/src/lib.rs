//! # webflo-http
//!
//! State threaded through one HTTP request/response lifecycle:
//!
//! - [`headers`]: the minimal header surface the rest of the crate needs
//! - [`cookies`]: cookie parsing, rendering and the diff-based [`CookieJar`]
//! - [`session`]: [`HttpCookieSession`] with HMAC-signed IDs and the
//!   store-backed [`ServerSideSession`]
//! - [`thread`]: [`HttpThread`], an ordered multi-value signal store scoped
//!   to one request lineage

#![deny(unsafe_code)]

pub mod cookies;
pub mod errors;
pub mod headers;
pub mod session;
pub mod thread;

pub use cookies::{AttrValue, Cookie, CookieJar, parse_cookie_header};
pub use errors::{HttpError, Result};
pub use headers::{Headers, SimpleHeaders};
pub use session::{HttpCookieSession, ServerSideSession, SessionConfig, SessionSigner};
pub use thread::{Filter, HttpThread, ThreadStore};
