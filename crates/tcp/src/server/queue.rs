use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use tokio::sync::{Mutex, OwnedSemaphorePermit, Semaphore, mpsc};

use crate::connection::Connection;

/// Bounded FIFO of connections shared by the accept loop and every worker.
///
/// A connection is admitted once, when accepted, and then travels between
/// the queue and the worker serving it until it is closed. Admission blocks
/// while `capacity + workers` connections are outstanding, so a worker
/// putting a kept-alive connection back never waits on the accept loop.
#[derive(Debug, Clone)]
pub struct ConnectionQueue {
    tx: mpsc::Sender<QueuedConnection>,
    rx: Arc<Mutex<mpsc::Receiver<QueuedConnection>>>,
    admission: Arc<Semaphore>,
    capacity: usize,
}

/// A connection holding one admission slot of a [`ConnectionQueue`].
///
/// The slot is released when the connection is dropped.
#[derive(Debug)]
pub struct QueuedConnection {
    conn: Connection,
    _slot: OwnedSemaphorePermit,
}

impl ConnectionQueue {
    /// Creates a queue for `workers` workers. `capacity` must be positive.
    pub(crate) fn new(capacity: usize, workers: usize) -> Self {
        let outstanding = capacity + workers;
        let (tx, rx) = mpsc::channel(outstanding.max(1));
        Self { tx, rx: Arc::new(Mutex::new(rx)), admission: Arc::new(Semaphore::new(outstanding)), capacity }
    }

    /// Waits for a free slot. Returns the connection back when the queue is closed.
    pub async fn admit(&self, conn: Connection) -> Result<QueuedConnection, Connection> {
        match Arc::clone(&self.admission).acquire_owned().await {
            Ok(slot) => Ok(QueuedConnection { conn, _slot: slot }),
            Err(_closed) => Err(conn),
        }
    }

    /// Appends a connection at the tail, for both new and kept-alive connections.
    pub async fn push(&self, conn: QueuedConnection) -> Result<(), QueuedConnection> {
        self.tx.send(conn).await.map_err(|e| e.0)
    }

    /// Takes the connection at the head, waiting while the queue is empty.
    pub async fn pop(&self) -> Option<QueuedConnection> {
        self.rx.lock().await.recv().await
    }

    /// Stops admitting connections. Queued ones can still be popped.
    pub(crate) fn close(&self) {
        self.admission.close();
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of connections waiting for a worker.
    pub fn len(&self) -> usize {
        self.tx.max_capacity() - self.tx.capacity()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Deref for QueuedConnection {
    type Target = Connection;

    fn deref(&self) -> &Self::Target {
        &self.conn
    }
}

impl DerefMut for QueuedConnection {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.conn
    }
}
