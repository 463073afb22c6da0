//! WebSocket server: accept loop and per-connection tasks.
//!
//! This module is responsible for:
//!
//! 1. Binding a TCP listener (or adopting an already bound one).
//! 2. Accepting connections until the relay is destroyed.
//! 3. Upgrading each connection to a WebSocket, checking the request path and
//!    extracting the `from` query parameter.
//! 4. Running two halves per connection:
//!    - **reader**: feeds binary frames to the connection's
//!      [`ConnectionLifecycle`], in arrival order;
//!    - **writer**: drains the connection's outbound queue, encodes signals
//!      and sends keepalive pings.
//!
//! The session ends as soon as either half finishes.  Whatever the reason,
//! the lifecycle's `on_disconnect` runs exactly once afterwards.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use futures_util::{SinkExt, StreamExt};
use relay_core::encode_signal;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::time::{interval, Duration, MissedTickBehavior};
use tokio_tungstenite::{
    accept_hdr_async_with_config,
    tungstenite::{
        handshake::server::{ErrorResponse, Request, Response},
        http::StatusCode,
        protocol::WebSocketConfig,
        Error as WsError, Message as WsMessage,
    },
    WebSocketStream,
};
use tracing::{debug, error, info, trace, warn};

use crate::application::{ConnectionHandle, Outbound, Relay};
use crate::domain::config::normalize_path;
use crate::domain::RelayConfig;

type WsSink = futures_util::stream::SplitSink<WebSocketStream<TcpStream>, WsMessage>;

// ── Public API ───────────────────────────────────────────────────────────────

/// Binds the listener and serves `relay` until it is destroyed.
///
/// `existing` is an already bound listener to adopt instead of binding
/// `relay.config().port`.
///
/// # Errors
///
/// Returns an error if the configuration offers neither a port nor a
/// listener, or if the listener cannot be bound.
pub async fn run_server(
    relay: Relay,
    existing: Option<std::net::TcpListener>,
) -> anyhow::Result<()> {
    let listener = bind_listener(relay.config(), existing).await?;
    serve(relay, listener).await
}

/// Produces the tokio listener the relay will accept on.
///
/// # Errors
///
/// - [`crate::domain::RelayError::Configuration`] when neither a port nor a
///   listener is available (or another setting is invalid).
/// - An I/O error when binding or adopting the listener fails.
pub async fn bind_listener(
    config: &RelayConfig,
    existing: Option<std::net::TcpListener>,
) -> anyhow::Result<TcpListener> {
    config.validate(existing.is_some())?;

    match existing {
        Some(listener) => {
            listener
                .set_nonblocking(true)
                .context("failed to make the supplied listener non-blocking")?;
            TcpListener::from_std(listener).context("failed to adopt the supplied listener")
        }
        None => {
            let addr = config.bind_addr()?;
            TcpListener::bind(addr)
                .await
                .with_context(|| format!("failed to bind WebSocket listener on {addr}"))
        }
    }
}

/// Accepts connections on `listener` until `relay` is destroyed.
///
/// Each accepted connection runs in its own task, so one slow peer never
/// blocks the others.
///
/// # Errors
///
/// Currently infallible once the listener exists; accept errors are logged
/// and the loop continues.
pub async fn serve(relay: Relay, listener: TcpListener) -> anyhow::Result<()> {
    match listener.local_addr() {
        Ok(addr) => info!(
            "relay listening on ws://{addr}{}",
            relay.config().normalized_path()
        ),
        Err(e) => warn!("relay listening on an unknown address: {e}"),
    }

    let mut shutdown = relay.shutdown_signal();

    loop {
        if *shutdown.borrow_and_update() {
            info!("relay destroyed; stopping accept loop");
            break;
        }

        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() {
                    break;
                }
            }
            accepted = listener.accept() => match accepted {
                Ok((stream, peer_addr)) => {
                    debug!("new connection from {peer_addr}");
                    let relay = relay.clone();
                    tokio::spawn(async move {
                        handle_connection(relay, stream, peer_addr).await;
                    });
                }
                Err(e) => {
                    // Transient (e.g. too many open files); keep accepting.
                    error!("accept error: {e}");
                }
            },
        }
    }

    Ok(())
}

// ── Per-connection handler ───────────────────────────────────────────────────

async fn handle_connection(relay: Relay, stream: TcpStream, peer_addr: SocketAddr) {
    match run_connection(relay, stream, peer_addr).await {
        Ok(()) => debug!("connection {peer_addr} closed"),
        Err(e) => warn!("connection {peer_addr} closed with error: {e:#}"),
    }
}

async fn run_connection(
    relay: Relay,
    stream: TcpStream,
    peer_addr: SocketAddr,
) -> anyhow::Result<()> {
    let base_path = relay.config().normalized_path();
    let mut ws_config = WebSocketConfig::default();
    ws_config.max_message_size = Some(relay.config().max_frame_size);
    ws_config.max_frame_size = Some(relay.config().max_frame_size);

    let mut offered = None;
    let ws_stream = accept_hdr_async_with_config(
        stream,
        |request: &Request, response: Response| {
            if normalize_path(request.uri().path()) != base_path {
                return Err(reject(StatusCode::NOT_FOUND, "unknown path"));
            }
            offered = identifier_from_query(request.uri().query());
            Ok(response)
        },
        Some(ws_config),
    )
    .await
    .with_context(|| format!("WebSocket handshake failed with {peer_addr}"))?;

    let (ws_tx, mut ws_rx) = ws_stream.split();
    let (handle, outbound) = ConnectionHandle::channel();
    let handle = Arc::new(handle);
    let conn_id = handle.id();
    debug!(conn = %conn_id, identifier = ?offered, "WebSocket session established: {peer_addr}");

    let mut writer = tokio::spawn(write_outbound(
        ws_tx,
        outbound,
        relay.config().ping_interval,
    ));
    let mut lifecycle = relay.open_connection(handle, offered);

    if let Err(e) = lifecycle.on_connect() {
        // The lifecycle already queued the close; let the writer deliver it.
        debug!(conn = %conn_id, "connection refused: {e}");
    }

    loop {
        tokio::select! {
            frame = ws_rx.next() => match frame {
                Some(Ok(WsMessage::Binary(bytes))) => lifecycle.on_frame(&bytes),
                Some(Ok(WsMessage::Text(_))) => {
                    trace!(conn = %conn_id, "ignoring text frame");
                }
                Some(Ok(WsMessage::Close(_))) => {
                    debug!(conn = %conn_id, "close frame received");
                    break;
                }
                // Ping replies are queued by tungstenite itself.
                Some(Ok(WsMessage::Ping(_) | WsMessage::Pong(_) | WsMessage::Frame(_))) => {}
                Some(Err(WsError::ConnectionClosed | WsError::AlreadyClosed)) | None => {
                    debug!(conn = %conn_id, "stream ended");
                    break;
                }
                Some(Err(e)) => {
                    lifecycle.on_transport_error(&e);
                    break;
                }
            },
            _ = &mut writer => {
                debug!(conn = %conn_id, "writer finished");
                break;
            }
        }
    }

    lifecycle.on_disconnect();
    writer.abort();
    Ok(())
}

/// Drains `outbound` into the socket and pings every `ping_interval`.
///
/// Returns when a close is requested, the queue is dropped, or a write fails.
async fn write_outbound(
    mut ws_tx: WsSink,
    mut outbound: UnboundedReceiver<Outbound>,
    ping_interval: Duration,
) {
    let mut ticker = interval(ping_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker.tick().await; // first tick resolves immediately

    loop {
        tokio::select! {
            next = outbound.recv() => match next {
                Some(Outbound::Signal(signal)) => {
                    let bytes = match encode_signal(&signal) {
                        Ok(bytes) => bytes,
                        Err(e) => {
                            warn!("dropping unencodable {} signal: {e}", signal.signal_type().name());
                            continue;
                        }
                    };
                    if let Err(e) = ws_tx.send(WsMessage::Binary(bytes)).await {
                        debug!("write failed: {e}");
                        break;
                    }
                }
                Some(Outbound::Close { forced }) => {
                    // Forced: drop the socket without a close handshake.
                    if !forced {
                        let _ = ws_tx.close().await;
                    }
                    break;
                }
                None => break,
            },
            _ = ticker.tick() => {
                if let Err(e) = ws_tx.send(WsMessage::Ping(Vec::new())).await {
                    debug!("keepalive ping failed: {e}");
                    break;
                }
            }
        }
    }
}

// ── Helpers ──────────────────────────────────────────────────────────────────

/// Extracts and percent-decodes the `from` parameter of a query string.
///
/// Empty or undecodable values count as absent.
fn identifier_from_query(query: Option<&str>) -> Option<String> {
    query?
        .split('&')
        .filter_map(|pair| pair.split_once('=').or(Some((pair, ""))))
        .find(|(key, _)| *key == "from")
        .and_then(|(_, value)| {
            urlencoding::decode(&value.replace('+', " "))
                .ok()
                .map(|decoded| decoded.into_owned())
        })
        .filter(|identifier| !identifier.is_empty())
}

fn reject(status: StatusCode, reason: &str) -> ErrorResponse {
    let mut response = ErrorResponse::new(Some(reason.to_string()));
    *response.status_mut() = status;
    response
}

// ── Tests ────────────────────────────────────────────────────────────────────
