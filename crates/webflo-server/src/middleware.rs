//! Per-request session and thread state.
//!
//! [`request_state`] opens an [`HttpCookieSession`] and an [`HttpThread`]
//! for every request, hands them to handlers as a [`RequestContext`]
//! extension, and commits both into the response on the way out.

use std::sync::Arc;

use axum::extract::{Request, State};
use axum::http::header::{HeaderMap, HeaderName, HeaderValue};
use axum::middleware::Next;
use axum::response::Response;
use parking_lot::Mutex;
use tracing::warn;
use webflo_core::KvStore;
use webflo_http::{Headers, HttpCookieSession, HttpThread, ServerSideSession};

use crate::errors::Result;
use crate::server::AppState;

/// Request and response header carrying the thread ID.
pub const THREAD_HEADER: &str = "x-webflo-thread";

/// [`Headers`] over an axum [`HeaderMap`].
pub struct AxumHeaders<'a>(pub &'a mut HeaderMap);

impl Headers for AxumHeaders<'_> {
    fn get_all(&self, name: &str) -> Vec<String> {
        self.0
            .get_all(name)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .map(str::to_owned)
            .collect()
    }

    fn append(&mut self, name: &str, value: String) {
        let parsed = HeaderName::from_bytes(name.as_bytes())
            .ok()
            .zip(HeaderValue::from_str(&value).ok());
        match parsed {
            Some((name, value)) => {
                let _ = self.0.append(name, value);
            }
            None => warn!(header = name, "dropping unrepresentable header"),
        }
    }
}

/// Session and thread of the current request.
#[derive(Clone)]
pub struct RequestContext {
    /// Cookie session, committed after the handler returns.
    pub session: Arc<Mutex<HttpCookieSession>>,
    /// Signal thread of this request lineage.
    pub thread: Arc<HttpThread>,
    session_store: Arc<dyn KvStore>,
}

impl RequestContext {
    /// ID of the cookie session.
    pub fn session_id(&self) -> String {
        self.session.lock().id().to_owned()
    }

    /// Open the store-backed session keyed on the cookie session ID.
    pub async fn server_session(&self) -> webflo_http::Result<ServerSideSession> {
        let id = self.session_id();
        ServerSideSession::open(&id, self.session_store.clone()).await
    }
}

impl std::fmt::Debug for RequestContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestContext")
            .field("session_id", &self.session_id())
            .field("thread_id", &self.thread.id())
            .finish_non_exhaustive()
    }
}

/// Middleware opening and committing per-request state.
pub async fn request_state(State(state): State<AppState>, mut req: Request, next: Next) -> Result<Response> {
    let session = HttpCookieSession::open(
        &AxumHeaders(req.headers_mut()),
        state.config.session.clone(),
        state.ids.as_ref(),
    )?;
    let requested = req
        .headers()
        .get(THREAD_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned);
    let thread = state.threads.open(&state.config.realm, requested.as_deref());

    let context = RequestContext {
        session: Arc::new(Mutex::new(session)),
        thread: Arc::new(thread),
        session_store: state.session_store.clone(),
    };
    let _ = req.extensions_mut().insert(context.clone());

    let mut response = next.run(req).await;

    context
        .session
        .lock()
        .commit(&mut AxumHeaders(response.headers_mut()));
    if let Ok(value) = HeaderValue::from_str(context.thread.id()) {
        let _ = response.headers_mut().insert(THREAD_HEADER, value);
    }
    Ok(response)
}
