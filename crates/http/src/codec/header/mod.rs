//! Header codecs.
//!
//! - [`RequestHeaderDecoder`] / [`ResponseHeaderDecoder`]: parse a request or
//!   response head with `httparse` and pick the body framing
//! - [`HeaderEncoder`]: serializes a response head again, used when a
//!   chunked response has to be rewritten with a fixed length

mod header_decoder;
mod header_encoder;
mod response_header_decoder;

pub use header_decoder::RequestHeaderDecoder;
pub use header_encoder::HeaderEncoder;
pub use response_header_decoder::{MAX_RESPONSE_HEADER_BYTES, ResponseHeaderDecoder};

use bytes::Bytes;
use http::{HeaderMap, HeaderName, HeaderValue};

use crate::protocol::{ParseError, PayloadSize};

/// Maximum number of headers allowed in a message head
pub(crate) const MAX_HEADER_NUM: usize = 64;

/// Maximum size in bytes allowed for an entire request head
pub(crate) const MAX_HEADER_BYTES: usize = 8 * 1024;

/// Byte ranges of one header's name and value inside the parsed buffer.
///
/// Recording ranges lets the decoder release the `httparse` borrow and then
/// build the header map from a frozen slice of the buffer without copying.
#[derive(Clone, Copy)]
pub(crate) struct HeaderIndex {
    name: (usize, usize),
    value: (usize, usize),
}

pub(crate) const EMPTY_HEADER_INDEX_ARRAY: [HeaderIndex; MAX_HEADER_NUM] = [HeaderIndex { name: (0, 0), value: (0, 0) }; MAX_HEADER_NUM];

impl HeaderIndex {
    pub(crate) fn record(bytes: &[u8], headers: &[httparse::Header<'_>], indices: &mut [HeaderIndex]) {
        let bytes_ptr = bytes.as_ptr() as usize;
        for (header, indices) in headers.iter().zip(indices.iter_mut()) {
            let name_start = header.name.as_ptr() as usize - bytes_ptr;
            indices.name = (name_start, name_start + header.name.len());
            let value_start = header.value.as_ptr() as usize - bytes_ptr;
            indices.value = (value_start, value_start + header.value.len());
        }
    }

    /// Appends the recorded headers, sliced out of `header_bytes`, to `headers`.
    pub(crate) fn fill(indices: &[HeaderIndex], header_bytes: &Bytes, headers: &mut HeaderMap) -> Result<(), ParseError> {
        headers.reserve(indices.len());
        for index in indices {
            let name = HeaderName::from_bytes(&header_bytes[index.name.0..index.name.1]).map_err(ParseError::invalid_header)?;
            let value = HeaderValue::from_maybe_shared(header_bytes.slice(index.value.0..index.value.1)).map_err(ParseError::invalid_header)?;
            headers.append(name, value);
        }
        Ok(())
    }
}

/// Returns true if chunked is the final coding of a `Transfer-Encoding` value.
pub(crate) fn is_chunked(header_value: Option<&HeaderValue>) -> bool {
    const CHUNKED: &[u8] = b"chunked";
    if let Some(value) = header_value {
        if let Some(bytes) = value.as_bytes().rsplit(|b| *b == b',').next() {
            return bytes.trim_ascii().eq_ignore_ascii_case(CHUNKED);
        }
    }
    false
}

pub(crate) fn parse_content_length(value: &HeaderValue) -> Result<PayloadSize, ParseError> {
    let cl_str = value.to_str().map_err(|_e| ParseError::invalid_content_length("value can't to_str"))?;
    let length = cl_str.trim().parse::<u64>().map_err(|_e| ParseError::invalid_content_length(format!("value {cl_str} is not u64")))?;
    Ok(PayloadSize::Length(length))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn check_is_chunked() {
        {
            let headers = HeaderMap::new();
            assert!(!is_chunked(headers.get(http::header::TRANSFER_ENCODING)));
        }

        {
            let mut headers = HeaderMap::new();
            headers.insert("Transfer-Encoding", "gzip, Chunked".parse().unwrap());
            assert!(is_chunked(headers.get(http::header::TRANSFER_ENCODING)));
        }

        {
            let mut headers = HeaderMap::new();
            headers.insert("Transfer-Encoding", "chunked, gzip".parse().unwrap());
            assert!(!is_chunked(headers.get(http::header::TRANSFER_ENCODING)));
        }
    }

    #[test]
    fn content_length_values() {
        assert_eq!(parse_content_length(&HeaderValue::from_static(" 42 ")).unwrap(), PayloadSize::Length(42));
        assert!(matches!(
            parse_content_length(&HeaderValue::from_static("-1")),
            Err(ParseError::InvalidContentLength { .. })
        ));
    }
}
