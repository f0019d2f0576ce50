//! HTTP handlers for the `micro_tcp` server and client.
//!
//! - [`HttpServerHandler`]: reads captured requests and answers them through a [`Responder`]
//! - [`HttpClientHandler`]: forwards a captured request upstream and rebuilds the response

mod client;
mod server;

pub use client::HttpClientHandler;
pub use server::{BoxError, DEFAULT_CONNECTION_QUEUE_CAPACITY, DefaultResponder, HttpServerHandler, Responder, wants_connection_alive};
