//! Per-connection state.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use axum::http::Extensions;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::frame::Frame;

/// Identifies a live WebSocket connection. Never reused within a process.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Numeric value.
    pub fn get(self) -> u64 {
        self.0
    }
}

impl From<u64> for ConnectionId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Where a connection is in its lifetime.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    /// Handshake done, `open` not yet delivered.
    Open,
    /// `open` delivered; frames are being dispatched.
    Active,
    /// `close` delivered or in progress.
    Closed,
}

/// What the session writer sends to the client.
#[derive(Debug)]
pub(crate) enum Outbound {
    Frame(Frame),
    Ping,
}

/// A connected WebSocket client.
pub struct Connection {
    id: ConnectionId,
    opened_at: DateTime<Utc>,
    state: Mutex<ConnectionState>,
    attachments: Mutex<Extensions>,
    tx: mpsc::Sender<Outbound>,
    close: CancellationToken,
    last_seen: Mutex<Instant>,
    dropped: AtomicU64,
}

impl Connection {
    pub(crate) fn new(id: ConnectionId, tx: mpsc::Sender<Outbound>) -> Self {
        Self {
            id,
            opened_at: Utc::now(),
            state: Mutex::new(ConnectionState::Open),
            attachments: Mutex::new(Extensions::new()),
            tx,
            close: CancellationToken::new(),
            last_seen: Mutex::new(Instant::now()),
            dropped: AtomicU64::new(0),
        }
    }

    /// Connection id.
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// When the handshake completed.
    pub fn opened_at(&self) -> DateTime<Utc> {
        self.opened_at
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ConnectionState {
        *self.state.lock()
    }

    pub(crate) fn set_state(&self, state: ConnectionState) {
        *self.state.lock() = state;
    }

    /// Queue `frame` for delivery.
    ///
    /// Returns `false` when the queue is full or the writer is gone; the
    /// frame is dropped and counted.
    pub fn send(&self, frame: Frame) -> bool {
        self.enqueue(Outbound::Frame(frame))
    }

    pub(crate) fn enqueue(&self, outbound: Outbound) -> bool {
        if self.tx.try_send(outbound).is_ok() {
            true
        } else {
            let _ = self.dropped.fetch_add(1, Ordering::Relaxed);
            false
        }
    }

    /// Frames dropped because the queue was full or closed.
    pub fn drop_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Ask the session to close this connection.
    pub fn close(&self) {
        self.close.cancel();
    }

    /// Whether a close was requested.
    pub fn is_closing(&self) -> bool {
        self.close.is_cancelled()
    }

    pub(crate) fn close_token(&self) -> &CancellationToken {
        &self.close
    }

    /// Attach application state, replacing any value of the same type.
    pub fn attach<T: Clone + Send + Sync + 'static>(&self, value: T) -> Option<T> {
        self.attachments.lock().insert(value)
    }

    /// A copy of the attached value of type `T`.
    pub fn attachment<T: Clone + Send + Sync + 'static>(&self) -> Option<T> {
        self.attachments.lock().get::<T>().cloned()
    }

    /// Run `f` against the attached value of type `T`, if any.
    pub fn with_attachment<T, R>(&self, f: impl FnOnce(&mut T) -> R) -> Option<R>
    where
        T: Clone + Send + Sync + 'static,
    {
        self.attachments.lock().get_mut::<T>().map(f)
    }

    /// Remove and return the attached value of type `T`.
    pub fn detach<T: Clone + Send + Sync + 'static>(&self) -> Option<T> {
        self.attachments.lock().remove::<T>()
    }

    pub(crate) fn mark_seen(&self) {
        *self.last_seen.lock() = Instant::now();
    }

    /// Time since the last frame from the client.
    pub fn idle(&self) -> Duration {
        self.last_seen.lock().elapsed()
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("opened_at", &self.opened_at)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make(capacity: usize) -> (Connection, mpsc::Receiver<Outbound>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Connection::new(ConnectionId::from(1), tx), rx)
    }

    #[test]
    fn starts_open() {
        let (conn, _rx) = make(4);
        assert_eq!(conn.id().get(), 1);
        assert_eq!(conn.state(), ConnectionState::Open);
        assert!(!conn.is_closing());
        assert!(conn.opened_at() <= Utc::now());
    }

    #[tokio::test]
    async fn send_queues_frame() {
        let (conn, mut rx) = make(4);
        assert!(conn.send(Frame::text("hello")));
        match rx.recv().await.unwrap() {
            Outbound::Frame(frame) => assert_eq!(frame, Frame::text("hello")),
            Outbound::Ping => panic!("expected frame"),
        }
    }

    #[test]
    fn full_queue_drops() {
        let (conn, _rx) = make(1);
        assert!(conn.send(Frame::text("one")));
        assert!(!conn.send(Frame::text("two")));
        assert_eq!(conn.drop_count(), 1);
    }

    #[test]
    fn closed_queue_drops() {
        let (conn, rx) = make(4);
        drop(rx);
        assert!(!conn.send(Frame::text("late")));
        assert_eq!(conn.drop_count(), 1);
    }

    #[derive(Clone, Debug, PartialEq)]
    struct Nick(String);

    #[test]
    fn attachments_by_type() {
        let (conn, _rx) = make(1);
        assert_eq!(conn.attachment::<Nick>(), None);
        assert_eq!(conn.attach(Nick("ada".into())), None);
        assert_eq!(conn.attachment::<Nick>(), Some(Nick("ada".into())));
        let len = conn.with_attachment(|n: &mut Nick| {
            n.0.push('!');
            n.0.len()
        });
        assert_eq!(len, Some(4));
        assert_eq!(conn.detach::<Nick>(), Some(Nick("ada!".into())));
        assert_eq!(conn.attachment::<Nick>(), None);
    }

    #[test]
    fn close_sets_token() {
        let (conn, _rx) = make(1);
        conn.close();
        assert!(conn.is_closing());
        assert!(conn.close_token().is_cancelled());
    }
}
