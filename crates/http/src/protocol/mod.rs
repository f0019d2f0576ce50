//! HTTP message types.
//!
//! - [`Message`], [`PayloadItem`], [`PayloadSize`]: what the decoders yield
//! - [`RequestHeader`], [`ResponseHeader`]: parsed heads
//! - [`UpstreamHttpRequest`], [`UpstreamHttpResponse`]: parsed messages
//!   paired with their raw bytes
//! - errors for parsing, serializing, exchanging and content decoding

mod message;
pub use message::Message;
pub use message::PayloadItem;
pub use message::PayloadSize;

mod request;
pub use request::RequestHeader;

mod response;
pub use response::ResponseHeader;

mod upstream;
pub use upstream::{DEFAULT_ERROR_RESPONSE, DEFAULT_OK_RESPONSE, HTTP_HEADER_BODY_SEP, UpstreamHttpRequest, UpstreamHttpResponse};

mod error;
pub use error::DecodeError;
pub use error::ExchangeError;
pub use error::ParseError;
pub use error::SendError;
