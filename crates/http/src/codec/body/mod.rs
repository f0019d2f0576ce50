//! Body decoders.
//!
//! - [`ChunkedDecoder`]: `Transfer-Encoding: chunked`
//! - [`LengthDecoder`]: `Content-Length`
//! - [`PayloadDecoder`]: picks one of the above, or reads until the peer
//!   closes for responses without framing

mod chunked_decoder;
mod length_decoder;
mod payload_decoder;

pub use chunked_decoder::ChunkedDecoder;
pub use length_decoder::LengthDecoder;
pub use payload_decoder::PayloadDecoder;
