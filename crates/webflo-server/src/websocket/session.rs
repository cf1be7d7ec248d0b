//! `WebSocket` connection lifecycle, from upgrade through disconnect.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use webflo_core::TenantId;
use webflo_messaging::{Envelope, Tenant, TenantRegistry};

use super::transport::WsTransport;
use crate::server::AppState;

/// Upper bound between server-initiated Ping frames.
const MAX_PING_INTERVAL: Duration = Duration::from_secs(30);

/// Attempts at finding an open tenant before giving up.
const TENANT_ATTEMPTS: usize = 3;

/// Run one client connection of `tenant_id`.
///
/// The socket becomes a client port of the tenant. Text (and UTF-8 binary)
/// frames carry JSON envelopes. Pongs count as port activity, so a live
/// connection survives the client-port idle timeout. Disconnecting closes
/// the port; closing the port (idle eviction, close notice) ends the socket.
#[instrument(skip_all, fields(tenant_id = %tenant_id))]
pub async fn run_ws_session(socket: WebSocket, tenant_id: TenantId, state: AppState) {
    let Some(tenant) = open_tenant(&state.tenants, &tenant_id) else {
        warn!("no open tenant, dropping connection");
        return;
    };

    let (out_tx, out_rx) = mpsc::channel(state.config.send_queue);
    let transport = Arc::new(WsTransport::new(state.ids.generate(), out_tx));
    let port = tenant.add_client(transport.clone());
    let port_id = port.id().clone();
    info!(port_id = %port_id, clients = tenant.client_count(), "client connected");

    let (sink, mut stream) = socket.split();
    let closed = transport.closed_token();
    let shutdown = state.shutdown.token();
    let writer = tokio::spawn(pump_outbound(
        sink,
        out_rx,
        closed.clone(),
        ping_interval(state.config.tenancy.client_port_idle),
    ));

    loop {
        tokio::select! {
            () = closed.cancelled() => {
                debug!(port_id = %port_id, "port closed, ending connection");
                break;
            }
            () = shutdown.cancelled() => break,
            frame = stream.next() => match frame {
                Some(Ok(Message::Text(text))) => receive(&transport, text.as_str()),
                Some(Ok(Message::Binary(bytes))) => match std::str::from_utf8(&bytes) {
                    Ok(text) => receive(&transport, text),
                    Err(_) => debug!(len = bytes.len(), "ignoring non-UTF8 binary frame"),
                },
                Some(Ok(Message::Ping(_) | Message::Pong(_))) => port.touch(),
                Some(Ok(Message::Close(_))) | None => break,
                Some(Err(error)) => {
                    debug!(%error, "websocket read failed");
                    break;
                }
            },
        }
    }

    port.close();
    let _ = writer.await;
    info!(port_id = %port_id, "client disconnected");
}

/// Find the tenant, skipping one that is closing.
///
/// A tenant whose hub just lost its last member closes on a separate task;
/// it is closed here and a fresh one created in its place.
fn open_tenant(tenants: &TenantRegistry, id: &TenantId) -> Option<Arc<Tenant>> {
    for _ in 0..TENANT_ATTEMPTS {
        let tenant = tenants.get_tenant(id, true)?;
        if !tenant.is_closed() && !tenant.hub().is_closed() {
            return Some(tenant);
        }
        tenant.close();
    }
    None
}

fn receive(transport: &WsTransport, text: &str) {
    match Envelope::from_json(text) {
        Ok(envelope) => transport.deliver(envelope),
        Err(error) => warn!(%error, "ignoring malformed envelope"),
    }
}

fn ping_interval(idle: Duration) -> Duration {
    (idle / 2).clamp(Duration::from_millis(10), MAX_PING_INTERVAL)
}

/// Write queued envelopes and periodic pings until the transport closes,
/// then flush what is left and send a Close frame.
async fn pump_outbound(
    mut sink: SplitSink<WebSocket, Message>,
    mut queue: mpsc::Receiver<Envelope>,
    closed: CancellationToken,
    every: Duration,
) {
    let mut ping = tokio::time::interval(every);
    let _ = ping.tick().await;

    loop {
        tokio::select! {
            () = closed.cancelled() => break,
            envelope = queue.recv() => match envelope {
                Some(envelope) => {
                    if write(&mut sink, &envelope).await.is_err() {
                        return;
                    }
                }
                None => break,
            },
            _ = ping.tick() => {
                if sink.send(Message::Ping(Vec::new().into())).await.is_err() {
                    return;
                }
            }
        }
    }

    while let Ok(envelope) = queue.try_recv() {
        if write(&mut sink, &envelope).await.is_err() {
            return;
        }
    }
    let _ = sink.send(Message::Close(None)).await;
}

async fn write(sink: &mut SplitSink<WebSocket, Message>, envelope: &Envelope) -> Result<(), axum::Error> {
    match envelope.to_json() {
        Ok(json) => sink.send(Message::Text(json.into())).await,
        Err(error) => {
            warn!(%error, message_type = %envelope.message_type, "failed to encode envelope");
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use webflo_messaging::TenancyConfig;

    #[test]
    fn ping_interval_is_half_idle_capped() {
        assert_eq!(ping_interval(Duration::from_secs(10)), Duration::from_secs(5));
        assert_eq!(ping_interval(Duration::from_secs(600)), MAX_PING_INTERVAL);
        assert_eq!(ping_interval(Duration::ZERO), Duration::from_millis(10));
    }

    #[tokio::test]
    async fn open_tenant_replaces_a_closing_one() {
        let tenants = TenantRegistry::new(TenancyConfig::default());
        let id = TenantId::from("lobby");
        let first = tenants.get_tenant(&id, true).unwrap();
        first.hub().close();

        let fresh = open_tenant(&tenants, &id).unwrap();
        assert!(!Arc::ptr_eq(&first, &fresh));
        assert!(first.is_closed());
        assert!(!fresh.is_closed());
    }
}
