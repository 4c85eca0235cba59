//! The connection table shared by sessions and reactors.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use metrics::counter;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::debug;

use super::connection::{Connection, ConnectionId, Outbound};
use super::frame::Frame;
use crate::metrics::WS_FRAMES_DROPPED_TOTAL;
use crate::task_pool::TaskPool;

/// Why a frame could not be queued for a connection.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PushError {
    /// No live connection has this id.
    #[error("connection {0} not found")]
    UnknownConnection(ConnectionId),
    /// The outbound queue is full or its writer has stopped.
    #[error("outbound queue for connection {0} is full or closed")]
    QueueFull(ConnectionId),
}

/// Live connections, keyed by id.
///
/// Cheap to clone; all clones share one table.
#[derive(Clone, Debug)]
pub struct Connections {
    table: Arc<DashMap<ConnectionId, Arc<Connection>>>,
    next_id: Arc<AtomicU64>,
    task_pool: TaskPool,
}

impl Connections {
    /// Empty table using `task_pool` for offloaded work.
    pub fn new(task_pool: TaskPool) -> Self {
        Self {
            table: Arc::new(DashMap::new()),
            next_id: Arc::new(AtomicU64::new(1)),
            task_pool,
        }
    }

    pub(crate) fn open(&self, tx: mpsc::Sender<Outbound>) -> Arc<Connection> {
        let id = ConnectionId::from(self.next_id.fetch_add(1, Ordering::Relaxed));
        let connection = Arc::new(Connection::new(id, tx));
        let _ = self.table.insert(id, Arc::clone(&connection));
        connection
    }

    pub(crate) fn remove(&self, id: ConnectionId) -> Option<Arc<Connection>> {
        self.table.remove(&id).map(|(_, conn)| conn)
    }

    /// The connection with `id`, if still open.
    pub fn get(&self, id: ConnectionId) -> Option<Arc<Connection>> {
        self.table.get(&id).map(|entry| Arc::clone(entry.value()))
    }

    /// Whether `id` is live.
    pub fn contains(&self, id: ConnectionId) -> bool {
        self.table.contains_key(&id)
    }

    /// Number of live connections.
    pub fn len(&self) -> usize {
        self.table.len()
    }

    /// Whether no connection is live.
    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    /// Ids of all live connections, sorted.
    pub fn ids(&self) -> Vec<ConnectionId> {
        let mut ids: Vec<_> = self.table.iter().map(|entry| *entry.key()).collect();
        ids.sort_unstable();
        ids
    }

    /// Queue `frame` for the connection `id` only.
    pub fn push(&self, id: ConnectionId, frame: Frame) -> Result<(), PushError> {
        let connection = self.get(id).ok_or(PushError::UnknownConnection(id))?;
        if connection.send(frame) {
            Ok(())
        } else {
            counter!(WS_FRAMES_DROPPED_TOTAL).increment(1);
            debug!(conn_id = %id, "outbound frame dropped");
            Err(PushError::QueueFull(id))
        }
    }

    /// Queue `frame` for every live connection. Returns how many accepted it.
    pub fn broadcast(&self, frame: &Frame) -> usize {
        self.broadcast_filtered(frame, |_| true)
    }

    /// Queue `frame` for every live connection except `skip`.
    pub fn broadcast_except(&self, skip: ConnectionId, frame: &Frame) -> usize {
        self.broadcast_filtered(frame, |id| id != skip)
    }

    fn broadcast_filtered(&self, frame: &Frame, keep: impl Fn(ConnectionId) -> bool) -> usize {
        // Collect first so no shard lock is held while sending.
        let targets: Vec<Arc<Connection>> = self
            .table
            .iter()
            .filter(|entry| keep(*entry.key()))
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        let mut delivered = 0;
        for connection in targets {
            if connection.send(frame.clone()) {
                delivered += 1;
            } else {
                counter!(WS_FRAMES_DROPPED_TOTAL).increment(1);
            }
        }
        delivered
    }

    /// Ask the session for `id` to close. Returns whether it was live.
    pub fn close(&self, id: ConnectionId) -> bool {
        match self.get(id) {
            Some(connection) => {
                connection.close();
                true
            }
            None => false,
        }
    }

    /// Ask every session to close.
    pub fn close_all(&self) {
        for entry in self.table.iter() {
            entry.value().close();
        }
    }

    /// Attach application state to connection `id`.
    pub fn attach<T: Clone + Send + Sync + 'static>(&self, id: ConnectionId, value: T) -> bool {
        self.get(id).map(|conn| conn.attach(value)).is_some()
    }

    /// Pool for blocking work.
    pub fn task_pool(&self) -> &TaskPool {
        &self.task_pool
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> Connections {
        Connections::new(TaskPool::new(1))
    }

    #[test]
    fn ids_are_unique_and_increasing() {
        let conns = table();
        let (tx, _rx) = mpsc::channel(1);
        let a = conns.open(tx.clone());
        let b = conns.open(tx);
        assert!(a.id() < b.id());
        assert_eq!(conns.ids(), vec![a.id(), b.id()]);
        assert_eq!(conns.len(), 2);
    }

    #[test]
    fn remove_forgets_connection() {
        let conns = table();
        let (tx, _rx) = mpsc::channel(1);
        let id = conns.open(tx).id();
        assert!(conns.contains(id));
        assert!(conns.remove(id).is_some());
        assert!(!conns.contains(id));
        assert!(conns.is_empty());
        assert!(conns.remove(id).is_none());
    }

    #[tokio::test]
    async fn push_targets_one_connection() {
        let conns = table();
        let (tx_a, mut rx_a) = mpsc::channel(4);
        let (tx_b, mut rx_b) = mpsc::channel(4);
        let a = conns.open(tx_a).id();
        let _b = conns.open(tx_b).id();

        conns.push(a, Frame::text("pong")).unwrap();
        assert!(matches!(rx_a.recv().await, Some(Outbound::Frame(f)) if f == Frame::text("pong")));
        assert!(rx_b.try_recv().is_err());
    }

    #[test]
    fn push_unknown_fails() {
        let conns = table();
        let id = ConnectionId::from(99);
        assert_eq!(conns.push(id, Frame::text("x")), Err(PushError::UnknownConnection(id)));
    }

    #[test]
    fn push_to_full_queue_fails() {
        let conns = table();
        let (tx, _rx) = mpsc::channel(1);
        let id = conns.open(tx).id();
        conns.push(id, Frame::text("1")).unwrap();
        assert_eq!(conns.push(id, Frame::text("2")), Err(PushError::QueueFull(id)));
        assert_eq!(conns.get(id).unwrap().drop_count(), 1);
    }

    #[test]
    fn broadcast_counts_deliveries() {
        let conns = table();
        let (tx_a, _rx_a) = mpsc::channel(4);
        let (tx_b, _rx_b) = mpsc::channel(4);
        let a = conns.open(tx_a).id();
        let _ = conns.open(tx_b);
        assert_eq!(conns.broadcast(&Frame::text("hi")), 2);
        assert_eq!(conns.broadcast_except(a, &Frame::text("hi")), 1);
    }

    #[test]
    fn close_marks_connection() {
        let conns = table();
        let (tx, _rx) = mpsc::channel(1);
        let id = conns.open(tx).id();
        assert!(conns.close(id));
        assert!(conns.get(id).unwrap().is_closing());
        assert!(!conns.close(ConnectionId::from(1000)));
    }

    #[test]
    fn attach_through_table() {
        let conns = table();
        let (tx, _rx) = mpsc::channel(1);
        let id = conns.open(tx).id();
        assert!(conns.attach(id, 5_u32));
        assert_eq!(conns.get(id).unwrap().attachment::<u32>(), Some(5));
    }
}
