//! WebSocket session lifecycle: one task per connection, from upgrade to
//! close.
//!
//! The session awaits every reactor call before reading the next frame, so
//! `open`, each `message`, and `close` reach the reactors in order and never
//! overlap for the same connection. Writes go through the connection's
//! bounded queue and a separate writer task.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::ws::{Message, WebSocket};
use bytes::Bytes;
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use metrics::{counter, gauge, histogram};
use tokio::sync::{OwnedSemaphorePermit, Semaphore, mpsc};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};

use super::connection::{ConnectionState, Outbound};
use super::frame::Frame;
use crate::context::AppContext;
use crate::events::Event;
use crate::events::registry::report;
use crate::metrics::{
    WS_CONNECTION_DURATION_SECONDS, WS_CONNECTIONS_ACTIVE, WS_CONNECTIONS_TOTAL,
    WS_DISCONNECTIONS_TOTAL, WS_FRAMES_RECEIVED_TOTAL,
};

/// Upper bound on flushing queued frames after the session ends.
const WRITER_GRACE: Duration = Duration::from_secs(5);

/// Why the read loop stopped.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum CloseReason {
    Peer,
    ReadError,
    Idle,
    Application,
    Shutdown,
}

impl CloseReason {
    fn as_str(self) -> &'static str {
        match self {
            Self::Peer => "peer",
            Self::ReadError => "read_error",
            Self::Idle => "idle",
            Self::Application => "application",
            Self::Shutdown => "shutdown",
        }
    }
}

/// Run a session for an upgraded socket. The permit is held until the
/// session ends.
#[instrument(skip_all, fields(conn_id = tracing::field::Empty))]
pub(crate) async fn run_session(
    ws: WebSocket,
    ctx: Arc<AppContext>,
    permit: OwnedSemaphorePermit,
    peer: Option<SocketAddr>,
) {
    let options = &ctx.settings().server.options;
    let (ws_tx, mut ws_rx) = ws.split();

    let queue = options.send_queue_size.clamp(1, Semaphore::MAX_PERMITS);
    let (send_tx, send_rx) = mpsc::channel::<Outbound>(queue);
    let connections = ctx.connections().clone();
    let connection = connections.open(send_tx);
    let id = connection.id();
    let _ = tracing::Span::current().record("conn_id", id.get());

    let started = Instant::now();
    info!(peer = ?peer, "connection opened");
    counter!(WS_CONNECTIONS_TOTAL).increment(1);
    gauge!(WS_CONNECTIONS_ACTIVE).increment(1.0);

    let writer_done = CancellationToken::new();
    let mut writer = tokio::spawn(write_loop(ws_tx, send_rx, writer_done.clone()));

    if let Err(e) = ctx.events().dispatch(Event::Open(&connections, id)).await {
        report(&e);
    }
    connection.set_state(ConnectionState::Active);

    let idle_limit = Duration::from_secs(options.heartbeat_idle_time);
    let mut heartbeat =
        tokio::time::interval(Duration::from_secs(options.heartbeat_check_interval.max(1)));
    heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // Skip the immediate first tick
    let _ = heartbeat.tick().await;

    let shutdown = ctx.shutdown().token();
    let close = connection.close_token().clone();

    let reason = loop {
        tokio::select! {
            () = shutdown.cancelled() => break CloseReason::Shutdown,
            () = close.cancelled() => break CloseReason::Application,
            _ = heartbeat.tick() => {
                if !idle_limit.is_zero() && connection.idle() > idle_limit {
                    break CloseReason::Idle;
                }
                let _ = connection.enqueue(Outbound::Ping);
            }
            next = ws_rx.next() => match next {
                None | Some(Ok(Message::Close(_))) => break CloseReason::Peer,
                Some(Err(e)) => {
                    debug!(error = %e, "read failed");
                    break CloseReason::ReadError;
                }
                Some(Ok(message)) => {
                    connection.mark_seen();
                    let Some(frame) = Frame::from_message(message) else {
                        continue;
                    };
                    counter!(WS_FRAMES_RECEIVED_TOTAL).increment(1);
                    let event = Event::Message(&connections, id, frame);
                    if let Err(e) = ctx.events().dispatch(event).await {
                        report(&e);
                    }
                }
            },
        }
    };

    connection.set_state(ConnectionState::Closed);
    if let Err(e) = ctx.events().dispatch(Event::Close(&connections, id)).await {
        report(&e);
    }
    let _ = connections.remove(id);
    drop(connection);

    writer_done.cancel();
    if tokio::time::timeout(WRITER_GRACE, &mut writer).await.is_err() {
        debug!("writer did not flush in time");
        writer.abort();
    }

    let elapsed = started.elapsed();
    counter!(WS_DISCONNECTIONS_TOTAL).increment(1);
    gauge!(WS_CONNECTIONS_ACTIVE).decrement(1.0);
    histogram!(WS_CONNECTION_DURATION_SECONDS).record(elapsed.as_secs_f64());
    info!(
        reason = reason.as_str(),
        duration_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
        "connection closed"
    );
    drop(permit);
}

/// Forward queued frames to the socket until cancelled, then flush what is
/// left and send a close frame.
async fn write_loop(
    mut ws_tx: SplitSink<WebSocket, Message>,
    mut queue: mpsc::Receiver<Outbound>,
    done: CancellationToken,
) {
    loop {
        let next = tokio::select! {
            biased;
            next = queue.recv() => next,
            () = done.cancelled() => None,
        };
        let Some(outbound) = next else { break };
        if ws_tx.send(to_message(outbound)).await.is_err() {
            return;
        }
    }
    while let Ok(outbound) = queue.try_recv() {
        if ws_tx.send(to_message(outbound)).await.is_err() {
            return;
        }
    }
    let _ = ws_tx.send(Message::Close(None)).await;
}

fn to_message(outbound: Outbound) -> Message {
    match outbound {
        Outbound::Frame(frame) => frame.into_message(),
        Outbound::Ping => Message::Ping(Bytes::new()),
    }
}
