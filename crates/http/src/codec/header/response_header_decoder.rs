//! Response head decoder.
//!
//! Mirrors the request side but keeps the reason phrase as received and
//! applies the response framing rules, where a body without any length
//! information runs until the server closes the connection.

use bytes::BytesMut;
use http::{Response, StatusCode};
use httparse::{Error, Status};
use tokio_util::codec::Decoder;
use tracing::trace;

use super::{EMPTY_HEADER_INDEX_ARRAY, HeaderIndex, MAX_HEADER_NUM, is_chunked, parse_content_length};
use crate::protocol::{ParseError, PayloadSize, ResponseHeader};
use crate::utils::ensure;

/// Default limit for an upstream response head.
///
/// Upstream heads routinely carry large `Set-Cookie` or policy headers, so
/// this is well above the request side limit.
pub const MAX_RESPONSE_HEADER_BYTES: usize = 64 * 1024;

/// Decodes a response head into a [`ResponseHeader`] and its [`PayloadSize`].
#[derive(Debug, Clone, Copy)]
pub struct ResponseHeaderDecoder {
    head_request: bool,
    max_header_bytes: usize,
}

impl Default for ResponseHeaderDecoder {
    fn default() -> Self {
        Self::new(false)
    }
}

impl ResponseHeaderDecoder {
    /// `head_request` must be set when answering a `HEAD`, such a response
    /// never has a body whatever its headers say.
    pub fn new(head_request: bool) -> Self {
        Self { head_request, max_header_bytes: MAX_RESPONSE_HEADER_BYTES }
    }

    /// Largest head accepted, status line and blank line included.
    pub fn with_max_header_bytes(mut self, max_header_bytes: usize) -> Self {
        self.max_header_bytes = max_header_bytes;
        self
    }

    pub fn max_header_bytes(&self) -> usize {
        self.max_header_bytes
    }
}

impl Decoder for ResponseHeaderDecoder {
    type Item = (ResponseHeader, PayloadSize);
    type Error = ParseError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let mut headers = [httparse::EMPTY_HEADER; MAX_HEADER_NUM];
        let mut resp = httparse::Response::new(&mut headers);

        let parsed_result = resp.parse(src).map_err(|e| match e {
            Error::TooManyHeaders => ParseError::too_many_headers(MAX_HEADER_NUM),
            Error::Status => ParseError::InvalidStatus(None),
            e => ParseError::invalid_header(e.to_string()),
        });

        match parsed_result? {
            Status::Complete(body_offset) => {
                trace!(header_size = body_offset, "parsed response header");
                ensure!(body_offset <= self.max_header_bytes, ParseError::too_large_header(body_offset, self.max_header_bytes));

                let header_count = resp.headers.len();
                let mut header_index = EMPTY_HEADER_INDEX_ARRAY;
                HeaderIndex::record(src, resp.headers, &mut header_index);

                let version = match resp.version {
                    Some(0) => http::Version::HTTP_10,
                    Some(1) => http::Version::HTTP_11,
                    _ => return Err(ParseError::InvalidVersion(resp.version)),
                };
                let status = resp
                    .code
                    .and_then(|code| StatusCode::from_u16(code).ok())
                    .ok_or(ParseError::InvalidStatus(resp.code))?;
                let reason = resp.reason.map(str::to_owned);

                let mut header_builder = Response::builder().status(status).version(version);

                let header_bytes = src.split_to(body_offset).freeze();
                if let Some(headers) = header_builder.headers_mut() {
                    HeaderIndex::fill(&header_index[..header_count], &header_bytes, headers)?;
                }

                let response = header_builder.body(()).map_err(ParseError::invalid_header)?;
                let header = ResponseHeader::new(response, reason);
                let payload_size = self.parse_payload(&header)?;

                Ok(Some((header, payload_size)))
            }
            Status::Partial => {
                ensure!(src.len() <= self.max_header_bytes, ParseError::too_large_header(src.len(), self.max_header_bytes));
                Ok(None)
            }
        }
    }
}

impl ResponseHeaderDecoder {
    /// Body framing per RFC 9112 section 6.3.
    fn parse_payload(&self, header: &ResponseHeader) -> Result<PayloadSize, ParseError> {
        let status = header.status();
        if self.head_request || status.is_informational() || status == StatusCode::NO_CONTENT || status == StatusCode::NOT_MODIFIED {
            return Ok(PayloadSize::Empty);
        }

        let te_header = header.headers().get(http::header::TRANSFER_ENCODING);
        if te_header.is_some() {
            // transfer-encoding overrides content-length
            return Ok(if is_chunked(te_header) { PayloadSize::Chunked } else { PayloadSize::Close });
        }

        match header.headers().get(http::header::CONTENT_LENGTH) {
            Some(cl_value) => parse_content_length(cl_value),
            None => Ok(PayloadSize::Close),
        }
    }
}
