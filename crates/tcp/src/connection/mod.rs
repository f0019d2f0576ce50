//! A TCP connection that can mirror everything it reads.
//!
//! [`Connection`] behaves like a regular async stream. On top of that a
//! handler may switch on raw capture: every byte returned by a successful
//! read is appended to a side buffer, which the HTTP layer later uses to
//! reproduce the exact bytes that came over the wire.
//!
//! Capture is orthogonal to TLS: for TLS connections the recorded bytes are
//! the decrypted application data.

mod recorder;
mod stream;

pub use recorder::{DEFAULT_MAX_RECORD_SIZE, RawData};

use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, ReadBuf};
use tokio::net::TcpStream;
use tokio::time::Sleep;
use tracing::trace;

use crate::error::ConnectionError;
use crate::tls::{self, ClientTlsConfig, TlsConfig, TlsInfo};
use recorder::Recorder;
use stream::Stream;

#[derive(Debug)]
pub struct Connection {
    stream: Stream,
    recorder: Recorder,
    tls: Option<TlsInfo>,
    read_timeout: Option<Duration>,
    write_timeout: Option<Duration>,
    read_deadline: Option<Pin<Box<Sleep>>>,
    write_deadline: Option<Pin<Box<Sleep>>>,
    closed: bool,
}

impl Connection {
    /// Wraps a plain TCP stream. Recording starts disabled.
    pub fn new(stream: TcpStream) -> Self {
        Self::with_stream(Stream::Plain(stream), None)
    }

    fn with_stream(stream: Stream, tls: Option<TlsInfo>) -> Self {
        Self {
            stream,
            recorder: Recorder::default(),
            tls,
            read_timeout: None,
            write_timeout: None,
            read_deadline: None,
            write_deadline: None,
            closed: false,
        }
    }

    /// Terminates TLS on an accepted socket.
    ///
    /// The connection only exists once the handshake has completed; on failure
    /// the socket is dropped and therefore closed.
    pub async fn accept_tls(config: &TlsConfig, stream: TcpStream) -> Result<Self, ConnectionError> {
        let (stream, info) = tls::accept(&config.acceptor(), stream).await?;
        Ok(Self::with_stream(Stream::Tls(Box::new(stream)), Some(info)))
    }

    /// Starts a client side TLS session on a dialed socket.
    pub async fn connect_tls(config: &ClientTlsConfig, server_name: &str, stream: TcpStream) -> Result<Self, ConnectionError> {
        let (stream, info) = tls::connect(config, server_name, stream).await?;
        Ok(Self::with_stream(Stream::Tls(Box::new(stream)), Some(info)))
    }

    /// Starts mirroring read bytes. Calling it while already recording keeps
    /// what has been captured in the current cycle.
    pub fn enable_save_read_data(&mut self) {
        self.recorder.enable();
    }

    /// Stops mirroring and drops the capture.
    pub fn disable_save_read_data(&mut self) {
        self.recorder.disable();
    }

    /// Clears the capture, recording stays enabled if it was.
    pub fn reset_read_data(&mut self) {
        self.recorder.reset();
    }

    pub fn raw_data(&self) -> RawData<'_> {
        self.recorder.raw_data()
    }

    pub fn set_max_record_size(&mut self, size: usize) {
        self.recorder.set_limit(size);
    }

    pub fn max_record_size(&self) -> usize {
        self.recorder.limit()
    }

    /// The negotiated TLS session, `None` for plain TCP.
    pub fn tls(&self) -> Option<&TlsInfo> {
        self.tls.as_ref()
    }

    pub fn set_read_timeout(&mut self, timeout: Option<Duration>) -> Result<(), ConnectionError> {
        self.read_timeout = check_timeout("read", timeout)?;
        self.read_deadline = None;
        Ok(())
    }

    pub fn set_write_timeout(&mut self, timeout: Option<Duration>) -> Result<(), ConnectionError> {
        self.write_timeout = check_timeout("write", timeout)?;
        self.write_deadline = None;
        Ok(())
    }

    pub fn read_timeout(&self) -> Option<Duration> {
        self.read_timeout
    }

    pub fn write_timeout(&self) -> Option<Duration> {
        self.write_timeout
    }

    pub fn peer_addr(&self) -> io::Result<SocketAddr> {
        self.stream.tcp().peer_addr()
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.stream.tcp().local_addr()
    }

    #[inline]
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Drops the capture and shuts the stream down.
    ///
    /// Only the first call does anything. A peer that already went away is not an error.
    /// Reads and writes after a close fail with [`io::ErrorKind::NotConnected`];
    /// the socket itself is released when the connection is dropped.
    pub async fn close(&mut self) -> io::Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.recorder.disable();

        match self.stream.shutdown().await {
            Ok(()) => Ok(()),
            Err(e) if matches!(e.kind(), io::ErrorKind::NotConnected | io::ErrorKind::BrokenPipe | io::ErrorKind::ConnectionReset) => {
                trace!(cause = %e, "peer gone before shutdown");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}

fn closed_error() -> io::Error {
    io::Error::new(io::ErrorKind::NotConnected, "connection closed")
}

fn check_timeout(kind: &'static str, timeout: Option<Duration>) -> Result<Option<Duration>, ConnectionError> {
    match timeout {
        Some(timeout) if timeout.is_zero() => Err(ConnectionError::InvalidTimeout { kind, timeout }),
        other => Ok(other),
    }
}

/// Polls the deadline of an I/O operation that is still pending.
///
/// The deadline is armed on the first pending poll and disarmed once the
/// operation completes, so it bounds a single stalled operation.
fn poll_deadline<T>(deadline: &mut Option<Pin<Box<Sleep>>>, timeout: Option<Duration>, cx: &mut Context<'_>, op: &str) -> Poll<io::Result<T>> {
    let Some(timeout) = timeout else {
        return Poll::Pending;
    };

    let sleep = deadline.get_or_insert_with(|| Box::pin(tokio::time::sleep(timeout)));
    match sleep.as_mut().poll(cx) {
        Poll::Ready(()) => {
            *deadline = None;
            Poll::Ready(Err(io::Error::new(io::ErrorKind::TimedOut, format!("{op} timed out after {timeout:?}"))))
        }
        Poll::Pending => Poll::Pending,
    }
}

impl AsyncRead for Connection {
    fn poll_read(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &mut ReadBuf<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        if this.closed {
            return Poll::Ready(Err(closed_error()));
        }
        let before = buf.filled().len();

        match Pin::new(&mut this.stream).poll_read(cx, buf) {
            Poll::Ready(result) => {
                this.read_deadline = None;
                if result.is_ok() {
                    this.recorder.record(&buf.filled()[before..]);
                }
                Poll::Ready(result)
            }
            Poll::Pending => poll_deadline(&mut this.read_deadline, this.read_timeout, cx, "read"),
        }
    }
}

impl AsyncWrite for Connection {
    fn poll_write(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        if this.closed {
            return Poll::Ready(Err(closed_error()));
        }
        match Pin::new(&mut this.stream).poll_write(cx, buf) {
            Poll::Ready(result) => {
                this.write_deadline = None;
                Poll::Ready(result)
            }
            Poll::Pending => poll_deadline(&mut this.write_deadline, this.write_timeout, cx, "write"),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        if this.closed {
            return Poll::Ready(Err(closed_error()));
        }
        match Pin::new(&mut this.stream).poll_flush(cx) {
            Poll::Ready(result) => {
                this.write_deadline = None;
                Poll::Ready(result)
            }
            Poll::Pending => poll_deadline(&mut this.write_deadline, this.write_timeout, cx, "flush"),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().stream).poll_shutdown(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;

    async fn pair() -> (Connection, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (client, accepted) = tokio::join!(TcpStream::connect(addr), listener.accept());
        (Connection::new(accepted.unwrap().0), client.unwrap())
    }

    #[tokio::test]
    async fn records_partial_reads_in_order() {
        let (mut conn, mut peer) = pair().await;
        conn.enable_save_read_data();

        peer.write_all(b"GET / HTTP/1.1\r\n").await.unwrap();
        peer.write_all(b"Host: a\r\n\r\n").await.unwrap();
        peer.shutdown().await.unwrap();

        let mut received = Vec::new();
        let mut buf = [0u8; 3];
        loop {
            let n = conn.read(&mut buf).await.unwrap();
            if n == 0 {
                break;
            }
            received.extend_from_slice(&buf[..n]);
        }

        assert_eq!(received, b"GET / HTTP/1.1\r\nHost: a\r\n\r\n");
        assert_eq!(conn.raw_data().captured(), Some(&received[..]));
    }

    #[tokio::test]
    async fn second_cycle_only_after_toggle() {
        let (mut conn, mut peer) = pair().await;
        let mut buf = [0u8; 16];

        conn.enable_save_read_data();
        peer.write_all(b"first").await.unwrap();
        conn.read_exact(&mut buf[..5]).await.unwrap();

        conn.disable_save_read_data();
        assert_eq!(conn.raw_data(), RawData::NotRecording);
        conn.enable_save_read_data();

        peer.write_all(b"second").await.unwrap();
        conn.read_exact(&mut buf[..6]).await.unwrap();
        assert_eq!(conn.raw_data(), RawData::Captured(b"second"));
    }

    #[tokio::test]
    async fn writes_are_not_recorded() {
        let (mut conn, mut peer) = pair().await;
        conn.enable_save_read_data();
        conn.write_all(b"reply").await.unwrap();

        let mut buf = [0u8; 5];
        peer.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"reply");
        assert_eq!(conn.raw_data(), RawData::Captured(b""));
    }

    #[tokio::test]
    async fn read_timeout_fires() {
        let (mut conn, _peer) = pair().await;
        conn.set_read_timeout(Some(Duration::from_millis(20))).unwrap();

        let mut buf = [0u8; 4];
        let err = conn.read(&mut buf).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::TimedOut);
    }

    #[tokio::test]
    async fn zero_timeout_is_rejected() {
        let (mut conn, _peer) = pair().await;
        let result = conn.set_write_timeout(Some(Duration::ZERO));
        assert!(matches!(result, Err(ConnectionError::InvalidTimeout { kind: "write", .. })));

        conn.set_write_timeout(None).unwrap();
        assert_eq!(conn.write_timeout(), None);
    }

    #[tokio::test]
    async fn close_clears_capture_once() {
        let (mut conn, mut peer) = pair().await;
        conn.enable_save_read_data();
        peer.write_all(b"x").await.unwrap();
        let mut buf = [0u8; 1];
        conn.read_exact(&mut buf).await.unwrap();

        conn.close().await.unwrap();
        assert!(conn.is_closed());
        assert_eq!(conn.raw_data(), RawData::NotRecording);
        conn.close().await.unwrap();

        let n = peer.read(&mut buf).await.unwrap();
        assert_eq!(n, 0);
        assert!(conn.tls().is_none());
    }

    #[tokio::test]
    async fn io_after_close_is_refused() {
        let (mut conn, mut peer) = pair().await;
        conn.close().await.unwrap();

        // still unread on the socket, but the connection no longer serves it
        peer.write_all(b"late").await.unwrap();
        let mut buf = [0u8; 4];
        assert_eq!(conn.read(&mut buf).await.unwrap_err().kind(), io::ErrorKind::NotConnected);
        assert_eq!(conn.write(b"x").await.unwrap_err().kind(), io::ErrorKind::NotConnected);
        assert_eq!(conn.flush().await.unwrap_err().kind(), io::ErrorKind::NotConnected);
        assert_eq!(conn.raw_data(), RawData::NotRecording);
    }
}
