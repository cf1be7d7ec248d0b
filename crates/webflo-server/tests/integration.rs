//! End-to-end tests over the router and a live listener.

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::extract::Extension;
use axum::http::{Request, StatusCode};
use axum::response::Json;
use axum::routing::get;
use axum::Router;
use futures::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio_tungstenite::tungstenite::Message;
use tower::ServiceExt;
use webflo_core::{CorrelationId, KvStore, MemoryStore, StoreError, TenantId};
use webflo_http::Filter;
use webflo_messaging::{Disposition, Envelope, EnvelopeKind, MessageEvent};
use webflo_server::{RequestContext, ServerConfig, ServerError, THREAD_HEADER, WebfloServer};

type WsStream = tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

async fn visit(Extension(ctx): Extension<RequestContext>) -> Result<Json<Value>, ServerError> {
    let flash = ctx.thread.consume("flash", Filter::Latest).await?;
    ctx.thread.append("flash", json!("hello")).await?;

    let mut stored = ctx.server_session().await?;
    let visits = stored.get("visits").and_then(Value::as_u64).unwrap_or(0) + 1;
    stored.set("visits", json!(visits));
    let _ = stored.commit().await?;

    ctx.session.lock().set("theme", "dark");
    Ok(Json(json!({ "visits": visits, "flash": flash })))
}

fn set_cookies(resp: &axum::response::Response) -> Vec<String> {
    resp.headers()
        .get_all("set-cookie")
        .iter()
        .map(|v| v.to_str().unwrap().to_owned())
        .collect()
}

async fn body_json(resp: axum::response::Response) -> Value {
    let body = axum::body::to_bytes(resp.into_body(), 10_000).await.unwrap();
    serde_json::from_slice(&body).unwrap()
}

async fn wait_for<T>(mut probe: impl FnMut() -> Option<T>) -> T {
    for _ in 0..500 {
        if let Some(value) = probe() {
            return value;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached");
}

async fn next_envelope(ws: &mut WsStream) -> Envelope {
    loop {
        let frame = tokio::time::timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("timed out waiting for a frame")
            .expect("stream ended")
            .unwrap();
        if let Message::Text(text) = frame {
            return Envelope::from_json(text.as_str()).unwrap();
        }
    }
}

#[tokio::test]
async fn health_endpoint() {
    let server = WebfloServer::new(ServerConfig::default());
    let req = Request::builder().uri("/health").body(Body::empty()).unwrap();
    let resp = server.router().oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(body_json(resp).await["tenants"], 0);
}

#[tokio::test]
async fn session_and_thread_carry_across_requests() {
    let server = WebfloServer::new(ServerConfig::default());
    let app = server.router_with(Router::new().route("/visit", get(visit)));

    let first = app
        .clone()
        .oneshot(Request::builder().uri("/visit").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(first.status(), StatusCode::OK);
    let cookies = set_cookies(&first);
    let session_cookie = cookies
        .iter()
        .find(|c| c.starts_with("__sessid="))
        .expect("session cookie");
    assert!(session_cookie.contains("HttpOnly"));
    assert!(cookies.contains(&"theme=dark".to_string()));
    let session_pair = session_cookie.split(';').next().unwrap().to_owned();
    let thread_id = first.headers()[THREAD_HEADER].to_str().unwrap().to_owned();
    assert!(thread_id.starts_with("wq.default."));
    assert_eq!(body_json(first).await, json!({ "visits": 1, "flash": null }));

    let second = app
        .oneshot(
            Request::builder()
                .uri("/visit")
                .header("cookie", format!("{session_pair}; theme=dark"))
                .header(THREAD_HEADER, &thread_id)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(second.headers()[THREAD_HEADER].to_str().unwrap(), thread_id);
    let cookies = set_cookies(&second);
    assert_eq!(cookies.len(), 1);
    assert!(cookies[0].starts_with(&session_pair));
    assert_eq!(body_json(second).await, json!({ "visits": 2, "flash": "hello" }));
}

/// Yields between reading and writing so concurrent requests interleave.
struct YieldingStore(MemoryStore);

#[async_trait::async_trait]
impl KvStore for YieldingStore {
    async fn get(&self, key: &str) -> Result<Option<Value>, StoreError> {
        let value = self.0.get(key).await;
        tokio::task::yield_now().await;
        value
    }
    async fn set(&self, key: &str, value: Value) -> Result<(), StoreError> {
        self.0.set(key, value).await
    }
    async fn delete(&self, key: &str) -> Result<bool, StoreError> {
        self.0.delete(key).await
    }
}

async fn note(Extension(ctx): Extension<RequestContext>) -> Result<Json<Value>, ServerError> {
    ctx.thread.append("notes", json!("seen")).await?;
    Ok(Json(json!({})))
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_requests_on_one_thread_keep_every_append() {
    let threads: Arc<dyn KvStore> = Arc::new(YieldingStore(MemoryStore::new()));
    let server = WebfloServer::new(ServerConfig::default()).with_stores(Arc::new(MemoryStore::new()), threads.clone());
    let app = server.router_with(Router::new().route("/note", get(note)));

    let requests = (0..16).map(|_| {
        let app = app.clone();
        tokio::spawn(async move {
            let req = Request::builder()
                .uri("/note")
                .header(THREAD_HEADER, "wq.default.shared")
                .body(Body::empty())
                .unwrap();
            app.oneshot(req).await.unwrap().status()
        })
    });
    for status in futures::future::join_all(requests).await {
        assert_eq!(status.unwrap(), StatusCode::OK);
    }

    let record = threads.get("wq.default.shared").await.unwrap().unwrap();
    assert_eq!(record["notes"].as_array().unwrap().len(), 16);
}

#[tokio::test]
async fn foreign_thread_header_is_replaced() {
    let server = WebfloServer::new(ServerConfig::default());
    let req = Request::builder()
        .uri("/health")
        .header(THREAD_HEADER, "wq.other.abc")
        .body(Body::empty())
        .unwrap();
    let resp = server.router().oneshot(req).await.unwrap();
    let thread_id = resp.headers()[THREAD_HEADER].to_str().unwrap();
    assert!(thread_id.starts_with("wq.default."));
}

#[tokio::test]
async fn websocket_client_joins_tenant_hub() {
    let server = WebfloServer::new(ServerConfig::default());
    let addr = server.listen().await.unwrap();
    let (mut ws, _) = tokio_tungstenite::connect_async(format!("ws://{addr}/ws/lobby"))
        .await
        .unwrap();

    let lobby = TenantId::from("lobby");
    let tenant = wait_for(|| {
        server
            .tenants()
            .get_tenant(&lobby, false)
            .filter(|t| t.client_count() == 1)
    })
    .await;
    let _ = tenant.hub().add_listener("ping", |e: &MessageEvent| {
        let _ = e.respond_with(json!("pong"));
        Disposition::Continue
    });

    assert_eq!(tenant.hub().post_message("greet", &json!({ "hi": 1 })), 1);
    let greet = next_envelope(&mut ws).await;
    assert_eq!(greet.message_type, "greet");
    assert_eq!(greet.data, json!({ "hi": 1 }));

    let request = Envelope::request("ping", json!(null), CorrelationId::from("c-1"));
    ws.send(Message::Text(request.to_json().unwrap().into()))
        .await
        .unwrap();
    let reply = next_envelope(&mut ws).await;
    assert_eq!(reply.kind, EnvelopeKind::Response);
    assert_eq!(reply.correlation_id.as_deref(), Some("c-1"));
    assert_eq!(reply.data, json!("pong"));

    ws.close(None).await.unwrap();
    wait_for(|| server.tenants().get_tenant(&lobby, false).is_none().then_some(())).await;
    assert!(tenant.is_closed());

    server.shutdown().await;
}

#[tokio::test]
async fn malformed_frames_are_ignored() {
    let server = WebfloServer::new(ServerConfig::default());
    let addr = server.listen().await.unwrap();
    let (mut ws, _) = tokio_tungstenite::connect_async(format!("ws://{addr}/ws/t1"))
        .await
        .unwrap();
    let t1 = TenantId::from("t1");
    let tenant = wait_for(|| server.tenants().get_tenant(&t1, false)).await;

    let (seen_tx, mut seen_rx) = tokio::sync::mpsc::unbounded_channel();
    let _ = tenant.hub().add_wildcard_listener(move |e: &MessageEvent| {
        let _ = seen_tx.send(e.message_type.clone());
        Disposition::Continue
    });

    ws.send(Message::Text("not json".to_owned().into())).await.unwrap();
    let envelope = Envelope::message("still-here", json!(1));
    ws.send(Message::Binary(envelope.to_json().unwrap().into_bytes().into()))
        .await
        .unwrap();

    let seen = tokio::time::timeout(Duration::from_secs(5), seen_rx.recv())
        .await
        .unwrap();
    assert_eq!(seen.as_deref(), Some("still-here"));
    assert_eq!(tenant.client_count(), 1);

    server.shutdown().await;
}

#[tokio::test]
async fn shutdown_disconnects_clients() {
    let server = WebfloServer::new(ServerConfig::default());
    let addr = server.listen().await.unwrap();
    let (mut ws, _) = tokio_tungstenite::connect_async(format!("ws://{addr}/ws/t2"))
        .await
        .unwrap();
    let t2 = TenantId::from("t2");
    let _ = wait_for(|| server.tenants().get_tenant(&t2, false)).await;

    server.shutdown().await;

    let mut saw_close_envelope = false;
    loop {
        match tokio::time::timeout(Duration::from_secs(5), ws.next()).await {
            Ok(Some(Ok(Message::Text(text)))) => {
                let env = Envelope::from_json(text.as_str()).unwrap();
                saw_close_envelope |= env.kind == EnvelopeKind::Close;
            }
            Ok(Some(Ok(Message::Close(_)) | Err(_)) | None) => break,
            Ok(Some(Ok(_))) => {}
            Err(_) => panic!("connection not closed after shutdown"),
        }
    }
    assert!(saw_close_envelope);
    assert!(server.tenants().is_empty());
}

#[tokio::test]
async fn invalid_tenant_id_is_rejected() {
    let server = WebfloServer::new(ServerConfig::default());
    let addr = server.listen().await.unwrap();
    let err = tokio_tungstenite::connect_async(format!("ws://{addr}/ws/a%20b"))
        .await
        .unwrap_err();
    assert_matches::assert_matches!(
        err,
        tokio_tungstenite::tungstenite::Error::Http(resp) if resp.status().as_u16() == 400
    );
    assert!(server.tenants().is_empty());
    server.shutdown().await;
}
