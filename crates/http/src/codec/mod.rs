//! Codecs for HTTP/1.x messages, built on [`tokio_util::codec`].
//!
//! - [`RequestDecoder`] and [`ResponseDecoder`] turn bytes into a head
//!   followed by body pieces with transfer framing removed
//! - [`header::HeaderEncoder`] writes a response head back to bytes
//!
//! Decoders consume exactly one message from the buffer and leave whatever
//! follows it untouched, so the caller can tell how many bytes belonged to
//! the message.

pub mod body;
pub mod header;
mod message_decoder;

pub use message_decoder::{MessageDecoder, RequestDecoder, ResponseDecoder};
