//! A small TCP server and client toolkit with pluggable protocol handlers.
//!
//! The crate is built for intercepting proxies: a connection can mirror
//! every byte it reads into a side buffer, so a protocol handler can use a
//! structured parser and still reproduce the exact bytes that were received.
//!
//! # Components
//!
//! - [`connection::Connection`]: a plain or TLS stream with optional raw capture
//! - [`handler::Handler`]: the protocol contract, spawned into a fixed pool
//! - [`server::Server`]: accept loop, connection queue and worker pool
//! - [`client`]: dialing and one-shot request/response exchanges
//!
//! # Example
//!
//! ```no_run
//! use micro_tcp::client::{connect, send_and_receive};
//! use micro_tcp::handler::{DataStream, EchoClientHandler, EchoHandler};
//! use micro_tcp::server::Server;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
//!     let server = Server::bind("127.0.0.1:0").await?.spawn(EchoHandler::new("echo", 4))?;
//!
//!     let mut conn = connect(&server.local_addr().to_string()).await?;
//!     let request = DataStream("Hello".into());
//!     let reply = send_and_receive(&mut conn, &mut EchoClientHandler::new(), &request).await?;
//!     assert_eq!(&reply.0[..], b"World");
//!
//!     conn.close().await?;
//!     server.shutdown();
//!     server.join().await?;
//!     Ok(())
//! }
//! ```

pub mod client;
pub mod connection;
pub mod error;
pub mod handler;
pub mod server;
pub mod tls;
