//! HTTP on top of `micro_tcp`, for intercepting proxies.
//!
//! Requests and responses are parsed with structured decoders while the
//! connection records the raw bytes. The result pairs both views: the parsed
//! head and body for inspection, and bytes that reproduce the message
//! exactly as it was received (chunked responses are flattened into an
//! equivalent `Content-Length` message).
//!
//! # Example
//!
//! ```no_run
//! use micro_tcp::client::{RawResponse, connect, send_and_receive};
//! use micro_tcp::server::Server;
//! use micro_tcp_http::handler::{HttpClientHandler, HttpServerHandler};
//! use micro_tcp_http::protocol::{DEFAULT_OK_RESPONSE, UpstreamHttpRequest};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
//!     let server = Server::bind("127.0.0.1:0").await?.spawn(HttpServerHandler::new("http", 4))?;
//!
//!     let mut conn = connect(&server.local_addr().to_string()).await?;
//!     conn.enable_save_read_data();
//!
//!     let request = UpstreamHttpRequest::from_bytes("GET / HTTP/1.1\r\nHost: local\r\n\r\n", false)?;
//!     let response = send_and_receive(&mut conn, &mut HttpClientHandler, &request).await?;
//!     assert_eq!(&response.bytes()[..], DEFAULT_OK_RESPONSE);
//!
//!     server.shutdown();
//!     server.join().await?;
//!     Ok(())
//! }
//! ```
//!
//! # Limits
//!
//! - HTTP/1.0 and HTTP/1.1 only
//! - Maximum header size: 8KB
//! - Maximum number of headers: 64

pub mod codec;
pub mod content;
pub mod exchange;
pub mod handler;
pub mod protocol;

mod utils;
