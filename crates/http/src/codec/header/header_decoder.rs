//! Request head decoder.
//!
//! Parses method, target, version and header fields with `httparse`, then
//! converts them into a typed [`RequestHeader`] and selects the body framing.
//!
//! # Limits
//!
//! - Maximum number of headers: 64
//! - Maximum header size: 8KB
//! - Only HTTP/1.0 and HTTP/1.1

use bytes::BytesMut;
use http::Request;
use httparse::{Error, Status};
use tokio_util::codec::Decoder;
use tracing::trace;

use super::{EMPTY_HEADER_INDEX_ARRAY, HeaderIndex, MAX_HEADER_BYTES, MAX_HEADER_NUM, is_chunked, parse_content_length};
use crate::protocol::{ParseError, PayloadSize, RequestHeader};
use crate::utils::ensure;

/// Decodes a request head into a [`RequestHeader`] and its [`PayloadSize`].
#[derive(Debug, Clone, Copy, Default)]
pub struct RequestHeaderDecoder;

impl Decoder for RequestHeaderDecoder {
    type Item = (RequestHeader, PayloadSize);
    type Error = ParseError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        // shortest complete head: "GET / HTTP/1.1\r\n\r\n"
        if src.len() < 14 {
            return Ok(None);
        }

        let mut headers = [httparse::EMPTY_HEADER; MAX_HEADER_NUM];
        let mut req = httparse::Request::new(&mut headers);

        let parsed_result = req.parse(src).map_err(|e| match e {
            Error::TooManyHeaders => ParseError::too_many_headers(MAX_HEADER_NUM),
            e => ParseError::invalid_header(e.to_string()),
        });

        match parsed_result? {
            Status::Complete(body_offset) => {
                trace!(header_size = body_offset, "parsed request header");
                ensure!(body_offset <= MAX_HEADER_BYTES, ParseError::too_large_header(body_offset, MAX_HEADER_BYTES));

                let header_count = req.headers.len();
                let mut header_index = EMPTY_HEADER_INDEX_ARRAY;
                HeaderIndex::record(src, req.headers, &mut header_index);

                let version = match req.version {
                    Some(0) => http::Version::HTTP_10,
                    Some(1) => http::Version::HTTP_11,
                    _ => return Err(ParseError::InvalidVersion(req.version)),
                };

                let mut header_builder = Request::builder()
                    .method(req.method.ok_or(ParseError::InvalidMethod)?)
                    .uri(req.path.ok_or(ParseError::InvalidUri)?)
                    .version(version);

                let header_bytes = src.split_to(body_offset).freeze();
                if let Some(headers) = header_builder.headers_mut() {
                    HeaderIndex::fill(&header_index[..header_count], &header_bytes, headers)?;
                }

                let request = header_builder.body(()).map_err(|e| match e {
                    e if e.is::<http::method::InvalidMethod>() => ParseError::InvalidMethod,
                    e if e.is::<http::uri::InvalidUri>() => ParseError::InvalidUri,
                    e => ParseError::invalid_header(e),
                })?;

                let header = RequestHeader::from(request);
                let payload_size = parse_payload(&header)?;

                Ok(Some((header, payload_size)))
            }
            Status::Partial => {
                ensure!(src.len() <= MAX_HEADER_BYTES, ParseError::too_large_header(src.len(), MAX_HEADER_BYTES));
                Ok(None)
            }
        }
    }
}

/// Picks the request body framing from `Transfer-Encoding` and `Content-Length`.
///
/// A request carrying both is rejected, it is the classic smuggling vector.
fn parse_payload(header: &RequestHeader) -> Result<PayloadSize, ParseError> {
    // refer: https://www.rfc-editor.org/rfc/rfc9112.html#name-transfer-encoding
    let te_header = header.headers().get(http::header::TRANSFER_ENCODING);
    let cl_header = header.headers().get(http::header::CONTENT_LENGTH);

    match (te_header, cl_header) {
        (None, None) => Ok(PayloadSize::Empty),
        (te_value @ Some(_), None) => {
            if is_chunked(te_value) {
                Ok(PayloadSize::Chunked)
            } else {
                Err(ParseError::invalid_header("request transfer-encoding must end with chunked"))
            }
        }
        (None, Some(cl_value)) => parse_content_length(cl_value),
        (Some(_), Some(_)) => Err(ParseError::invalid_content_length("transfer_encoding and content_length both present in headers")),
    }
}
