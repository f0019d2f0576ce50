use std::error::Error;
use std::io;
use std::time::Duration;
use thiserror::Error;

/// Errors raised while building or configuring a [`Connection`](crate::connection::Connection).
#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("tls handshake incomplete: {source}")]
    TlsHandshake { source: io::Error },

    #[error("tls handshake timed out after {timeout:?}")]
    TlsHandshakeTimeout { timeout: Duration },

    #[error("invalid tls configuration: {reason}")]
    TlsConfig { reason: String },

    #[error("invalid server name: {name}")]
    InvalidServerName { name: String },

    #[error("invalid {kind} timeout: {timeout:?}")]
    InvalidTimeout { kind: &'static str, timeout: Duration },

    #[error("io error: {source}")]
    Io {
        #[from]
        source: io::Error,
    },
}

impl ConnectionError {
    pub fn tls_handshake<E: Into<io::Error>>(e: E) -> Self {
        Self::TlsHandshake { source: e.into() }
    }

    pub fn tls_config<S: ToString>(str: S) -> Self {
        Self::TlsConfig { reason: str.to_string() }
    }

    pub fn invalid_server_name<S: ToString>(name: S) -> Self {
        Self::InvalidServerName { name: name.to_string() }
    }

    pub fn io<E: Into<io::Error>>(e: E) -> Self {
        Self::Io { source: e.into() }
    }
}

impl From<rustls::Error> for ConnectionError {
    fn from(e: rustls::Error) -> Self {
        Self::tls_config(e)
    }
}

/// Outcome of a [`Handler::handle`](crate::handler::Handler::handle) call that ends the
/// current connection.
///
/// `Ok(())` from a handler means "keep serving", every variant here means "close".
#[derive(Debug, Error)]
pub enum HandleError {
    /// The peer has closed the connection (end of stream).
    #[error("client has closed the connection")]
    ClientClosed,

    /// The handler decided to close the connection after replying.
    #[error("server needs to close the connection")]
    ServerClose,

    #[error("io error: {source}")]
    Io {
        #[from]
        source: io::Error,
    },

    #[error("{source}")]
    Other { source: Box<dyn Error + Send + Sync> },
}

impl HandleError {
    pub fn other<E: Into<Box<dyn Error + Send + Sync>>>(e: E) -> Self {
        Self::Other { source: e.into() }
    }

    /// Returns true for the two outcomes that close a connection without being an error.
    #[inline]
    pub fn is_graceful(&self) -> bool {
        matches!(self, HandleError::ClientClosed | HandleError::ServerClose)
    }
}

/// Returned by [`Handler::spawn`](crate::handler::Handler::spawn) once the configured number
/// of handler instances has been created.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("handler limit reached: {limit}")]
pub struct HandlerLimitReached {
    pub limit: usize,
}

/// Errors that stop (or prevent starting) a server loop.
#[derive(Debug, Error)]
pub enum ServeError {
    #[error("invalid connection queue capacity {capacity} for handler {tag}")]
    InvalidQueueCapacity { capacity: usize, tag: String },

    #[error("handler {tag} spawned no instances")]
    NoHandlers { tag: String },

    #[error("bind {address} error: {source}")]
    Bind { address: String, source: io::Error },

    #[error("fatal accept error: {source}")]
    Accept { source: io::Error },

    #[error("connection setup error: {source}")]
    Connection {
        #[from]
        source: ConnectionError,
    },

    #[error("server task failed: {reason}")]
    Join { reason: String },
}

impl ServeError {
    pub fn bind<S: ToString>(address: S, source: io::Error) -> Self {
        Self::Bind { address: address.to_string(), source }
    }

    pub fn accept(source: io::Error) -> Self {
        Self::Accept { source }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn graceful_outcomes() {
        assert!(HandleError::ClientClosed.is_graceful());
        assert!(HandleError::ServerClose.is_graceful());
        assert!(!HandleError::from(io::Error::from(io::ErrorKind::BrokenPipe)).is_graceful());
        assert!(!HandleError::other("boom").is_graceful());
    }

    #[test]
    fn limit_message() {
        assert_eq!(HandlerLimitReached { limit: 8 }.to_string(), "handler limit reached: 8");
    }
}
