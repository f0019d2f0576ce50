//! The handler pool server.
//!
//! A [`Server`] owns a listener and, once [`serve`](Server::serve)d, a pool
//! of workers. Each worker owns one handler instance spawned from the
//! prototype and pulls connections from a shared [`ConnectionQueue`]:
//!
//! ```text
//! accept -> admit -> push -> pop -> handle -> push (keep) | close
//! ```
//!
//! A connection is owned by exactly one worker at a time; after a
//! successful cycle it goes back to the tail of the queue and may be picked
//! up by any worker.

mod queue;
mod worker;

pub use queue::{ConnectionQueue, QueuedConnection};

use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, error, info, info_span, warn};

use crate::connection::{Connection, DEFAULT_MAX_RECORD_SIZE};
use crate::error::{ConnectionError, ServeError};
use crate::handler::Handler;
use crate::tls::TlsConfig;

const DEFAULT_ADDRESS: &str = "0.0.0.0:80";
const DEFAULT_TLS_ADDRESS: &str = "0.0.0.0:443";
const DEFAULT_TLS_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);
const ACCEPT_RETRY_DELAY: Duration = Duration::from_millis(5);

/// What a worker does after its handler panicked.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FaultPolicy {
    /// Clean up and stop the worker, the pool shrinks by one.
    #[default]
    RetireWorker,
    /// Drop the faulting connection and keep serving the queue.
    ResumeWorker,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    record_read_data: bool,
    max_record_size: usize,
    read_timeout: Option<Duration>,
    write_timeout: Option<Duration>,
    tls_handshake_timeout: Duration,
    fault_policy: FaultPolicy,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            record_read_data: true,
            max_record_size: DEFAULT_MAX_RECORD_SIZE,
            read_timeout: None,
            write_timeout: None,
            tls_handshake_timeout: DEFAULT_TLS_HANDSHAKE_TIMEOUT,
            fault_policy: FaultPolicy::default(),
        }
    }
}

impl ServerConfig {
    /// Enables raw capture on accepted connections, for handlers that ask for it.
    #[must_use]
    pub fn with_record_read_data(mut self, record: bool) -> Self {
        self.record_read_data = record;
        self
    }

    #[must_use]
    pub fn with_max_record_size(mut self, size: usize) -> Self {
        self.max_record_size = size;
        self
    }

    #[must_use]
    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = Some(timeout);
        self
    }

    #[must_use]
    pub fn with_write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout = Some(timeout);
        self
    }

    /// Bounds the TLS handshake of an accepted connection.
    ///
    /// Handshakes run on the accept loop, so a client that stalls its
    /// handshake delays every other accept for up to this long. Lower it
    /// when clients are not trusted.
    #[must_use]
    pub fn with_tls_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.tls_handshake_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_fault_policy(mut self, policy: FaultPolicy) -> Self {
        self.fault_policy = policy;
        self
    }

    pub fn fault_policy(&self) -> FaultPolicy {
        self.fault_policy
    }

    fn validate(&self) -> Result<(), ConnectionError> {
        let timeouts = [("read", self.read_timeout), ("write", self.write_timeout), ("tls handshake", Some(self.tls_handshake_timeout))];
        for (kind, timeout) in timeouts {
            if let Some(timeout) = timeout.filter(Duration::is_zero) {
                return Err(ConnectionError::InvalidTimeout { kind, timeout });
            }
        }
        Ok(())
    }

    fn configure(&self, conn: &mut Connection, record: bool) -> Result<(), ConnectionError> {
        conn.set_max_record_size(self.max_record_size);
        conn.set_read_timeout(self.read_timeout)?;
        conn.set_write_timeout(self.write_timeout)?;
        if record {
            conn.enable_save_read_data();
        }
        Ok(())
    }
}

#[derive(Debug)]
pub struct Server {
    listener: TcpListener,
    tls: Option<TlsConfig>,
    config: ServerConfig,
}

impl Server {
    /// Binds a plain TCP listener. An empty address means `0.0.0.0:80`.
    pub async fn bind(addr: &str) -> Result<Self, ServeError> {
        let addr = if addr.is_empty() { DEFAULT_ADDRESS } else { addr };
        let listener = TcpListener::bind(addr).await.map_err(|e| ServeError::bind(addr, e))?;
        info!(address = addr, "start listening");
        Ok(Self { listener, tls: None, config: ServerConfig::default() })
    }

    /// Binds a TLS listener. An empty address means `0.0.0.0:443`.
    pub async fn bind_tls(addr: &str, tls: TlsConfig) -> Result<Self, ServeError> {
        let addr = if addr.is_empty() { DEFAULT_TLS_ADDRESS } else { addr };
        let listener = TcpListener::bind(addr).await.map_err(|e| ServeError::bind(addr, e))?;
        info!(address = addr, "start listening with tls");
        Ok(Self { listener, tls: Some(tls), config: ServerConfig::default() })
    }

    #[must_use]
    pub fn with_config(mut self, config: ServerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Serves connections with a pool spawned from `prototype`.
    ///
    /// Returns only on a fatal accept error or a configuration fault.
    pub async fn serve<H: Handler>(self, prototype: H) -> Result<(), ServeError> {
        self.run(prototype, CancellationToken::new()).await
    }

    /// Serves in a background task, configuration faults surface from [`ServerHandle::join`].
    pub fn spawn<H: Handler>(self, prototype: H) -> Result<ServerHandle, ServeError> {
        let local_addr = self.local_addr().map_err(ServeError::accept)?;
        let token = CancellationToken::new();
        let task = tokio::spawn(self.run(prototype, token.clone()));
        Ok(ServerHandle { local_addr, token, task })
    }

    async fn run<H: Handler>(self, mut prototype: H, token: CancellationToken) -> Result<(), ServeError> {
        self.config.validate()?;

        let tag = prototype.tag();
        let capacity = prototype.connection_queue_capacity();
        if capacity == 0 {
            return Err(ServeError::InvalidQueueCapacity { capacity, tag });
        }

        let mut handlers = Vec::new();
        while let Ok(handler) = prototype.spawn() {
            handlers.push(handler);
        }
        if handlers.is_empty() {
            return Err(ServeError::NoHandlers { tag });
        }

        let queue = ConnectionQueue::new(capacity, handlers.len());
        let record = self.config.record_read_data && prototype.record_read_data();
        info!(tag = %tag, workers = handlers.len(), queue_capacity = capacity, record, "handler pool created");

        let mut workers = JoinSet::new();
        for handler in handlers {
            let span = info_span!("worker", tag = %handler.tag());
            workers.spawn(worker::run(handler, queue.clone(), token.clone(), self.config.fault_policy).instrument(span));
        }

        let result = self.accept_loop(&queue, &token, record).await;

        token.cancel();
        queue.close();
        while let Some(joined) = workers.join_next().await {
            if let Err(e) = joined {
                error!(cause = %e, "worker task failed");
            }
        }

        result
    }

    async fn accept_loop(&self, queue: &ConnectionQueue, token: &CancellationToken, record: bool) -> Result<(), ServeError> {
        loop {
            let (stream, peer) = tokio::select! {
                biased;
                () = token.cancelled() => return Ok(()),
                accepted = self.listener.accept() => match accepted {
                    Ok(accepted) => accepted,
                    Err(e) if is_temporary(&e) => {
                        error!(cause = %e, "temporary accept error, retrying");
                        tokio::time::sleep(ACCEPT_RETRY_DELAY).await;
                        continue;
                    }
                    Err(e) => {
                        error!(cause = %e, "fatal accept error");
                        return Err(ServeError::accept(e));
                    }
                },
            };

            let Some(mut conn) = self.wrap(stream, peer).await else {
                continue;
            };
            self.config.configure(&mut conn, record)?;

            let admitted = tokio::select! {
                biased;
                () = token.cancelled() => return Ok(()),
                admitted = queue.admit(conn) => admitted,
            };
            let Ok(conn) = admitted else {
                return Ok(());
            };
            if queue.push(conn).await.is_err() {
                return Ok(());
            }
            debug!(%peer, "connection queued");
        }
    }

    /// Wraps an accepted socket, running the TLS handshake when configured.
    async fn wrap(&self, stream: TcpStream, peer: SocketAddr) -> Option<Connection> {
        let Some(tls) = &self.tls else {
            return Some(Connection::new(stream));
        };

        match tokio::time::timeout(self.config.tls_handshake_timeout, Connection::accept_tls(tls, stream)).await {
            Ok(Ok(conn)) => Some(conn),
            Ok(Err(e)) => {
                warn!(%peer, cause = %e, "tls handshake failed");
                None
            }
            Err(_elapsed) => {
                let e = ConnectionError::TlsHandshakeTimeout { timeout: self.config.tls_handshake_timeout };
                warn!(%peer, cause = %e, "tls handshake failed");
                None
            }
        }
    }
}

/// Controls a server started with [`Server::spawn`].
#[derive(Debug)]
pub struct ServerHandle {
    local_addr: SocketAddr,
    token: CancellationToken,
    task: JoinHandle<Result<(), ServeError>>,
}

impl ServerHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stops accepting. Workers abandon the cycle in progress, close its
    /// connection, clean up and exit.
    pub fn shutdown(&self) {
        self.token.cancel();
    }

    /// Waits for the server task to end.
    pub async fn join(self) -> Result<(), ServeError> {
        self.task.await.map_err(|e| ServeError::Join { reason: e.to_string() })?
    }
}

/// Accept errors that do not stop the server: per connection failures and descriptor exhaustion.
fn is_temporary(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::ConnectionAborted
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionRefused
            | io::ErrorKind::Interrupted
            | io::ErrorKind::WouldBlock
            | io::ErrorKind::TimedOut
    ) || is_fd_exhaustion(e)
}

#[cfg(unix)]
fn is_fd_exhaustion(e: &io::Error) -> bool {
    // ENFILE, EMFILE
    matches!(e.raw_os_error(), Some(23 | 24))
}

#[cfg(not(unix))]
fn is_fd_exhaustion(_e: &io::Error) -> bool {
    false
}
