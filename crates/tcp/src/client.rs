//! Dialing and single request/response exchanges.

use std::io;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::net::TcpStream;
use tracing::debug;

use crate::connection::Connection;
use crate::error::ConnectionError;
use crate::tls::ClientTlsConfig;

const DEFAULT_CLIENT_ADDRESS: &str = "127.0.0.1:80";

/// A request that can be put on the wire as is.
pub trait RawRequest {
    fn bytes(&self) -> Bytes;
}

/// A response that can be reproduced as raw bytes.
pub trait RawResponse {
    fn bytes(&self) -> Bytes;
}

/// The client half of a protocol: writes one request, reads one response.
#[async_trait]
pub trait ClientHandler: Send {
    type Request: RawRequest + Sync;
    type Response: RawResponse;
    type Error;

    async fn handle(&mut self, conn: &mut Connection, request: &Self::Request) -> Result<Self::Response, Self::Error>;
}

/// Dials `addr` over plain TCP. An empty address means `127.0.0.1:80`.
pub async fn connect(addr: &str) -> io::Result<Connection> {
    let addr = if addr.is_empty() { DEFAULT_CLIENT_ADDRESS } else { addr };
    let stream = TcpStream::connect(addr).await?;
    debug!(address = addr, "connected");
    Ok(Connection::new(stream))
}

/// Dials `addr` and completes a TLS handshake for `server_name`.
pub async fn connect_tls(addr: &str, server_name: &str, config: &ClientTlsConfig) -> Result<Connection, ConnectionError> {
    let addr = if addr.is_empty() { DEFAULT_CLIENT_ADDRESS } else { addr };
    let stream = TcpStream::connect(addr).await?;
    let conn = Connection::connect_tls(config, server_name, stream).await?;
    debug!(address = addr, server_name, verify_host = config.verify_host(), "connected with tls");
    Ok(conn)
}

/// Performs one exchange of `handler` on `conn`.
pub async fn send_and_receive<H: ClientHandler>(conn: &mut Connection, handler: &mut H, request: &H::Request) -> Result<H::Response, H::Error> {
    handler.handle(conn, request).await
}
