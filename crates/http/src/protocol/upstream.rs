//! Requests and responses exchanged with an upstream server, each carrying
//! both its parsed form and the bytes it was made of.

use bytes::{Bytes, BytesMut};
use http::{HeaderMap, Method, Uri, Version};
use micro_tcp::client::{RawRequest, RawResponse};

use super::{DecodeError, ExchangeError, RequestHeader, ResponseHeader};
use crate::codec::RequestDecoder;
use crate::exchange::{self, Decoded};

/// Answer written when a request could not be served.
pub const DEFAULT_ERROR_RESPONSE: &[u8] =
    b"HTTP/1.1 500\r\nConnection: close\r\nContent-Type: text/html;\r\nContent-Length: 21\r\n\r\nInternal Server Error";

/// Answer written when no real upstream response is computed.
pub const DEFAULT_OK_RESPONSE: &[u8] = b"HTTP/1.1 200 OK\r\nConnection: close\r\nContent-Type: text/plain;\r\nContent-Length: 2\r\n\r\nOK";

/// Separates a message head from its body.
pub const HTTP_HEADER_BODY_SEP: &[u8] = b"\r\n\r\n";

/// A request as received from a client: parsed head, full body, and the
/// exact bytes it arrived as.
#[derive(Debug)]
pub struct UpstreamHttpRequest {
    header: RequestHeader,
    body: Bytes,
    raw: Bytes,
    ssl: bool,
}

impl UpstreamHttpRequest {
    pub(crate) fn new(header: RequestHeader, body: Bytes, raw: Bytes, ssl: bool) -> Self {
        Self { header, body, raw, ssl }
    }

    /// Parses one complete request out of `raw`.
    ///
    /// Bytes after the first request are not part of it and are dropped from
    /// [`raw`](Self::raw).
    pub fn from_bytes(raw: impl Into<Bytes>, ssl: bool) -> Result<Self, ExchangeError> {
        let raw = raw.into();
        let mut src = BytesMut::from(&raw[..]);
        let Decoded { header, body, .. } =
            exchange::decode_complete(&mut RequestDecoder::default(), &mut src)?.ok_or(ExchangeError::IncompleteRequest)?;
        let consumed = raw.len() - src.len();
        Ok(Self::new(header, body, raw.slice(..consumed), ssl))
    }

    pub fn header(&self) -> &RequestHeader {
        &self.header
    }

    pub fn method(&self) -> &Method {
        self.header.method()
    }

    pub fn uri(&self) -> &Uri {
        self.header.uri()
    }

    pub fn version(&self) -> Version {
        self.header.version()
    }

    pub fn headers(&self) -> &HeaderMap {
        self.header.headers()
    }

    /// The body with any chunked framing removed.
    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// The request exactly as it was read.
    pub fn raw(&self) -> &Bytes {
        &self.raw
    }

    /// Whether the request arrived over TLS.
    pub fn is_ssl(&self) -> bool {
        self.ssl
    }

    pub fn is_head(&self) -> bool {
        self.method() == Method::HEAD
    }
}

impl RawRequest for UpstreamHttpRequest {
    fn bytes(&self) -> Bytes {
        self.raw.clone()
    }
}

/// A response read back from an upstream server.
///
/// [`bytes`](RawResponse::bytes) is always a well formed HTTP message: the
/// bytes as received, or for a chunked response a rewritten head with a
/// `Content-Length` followed by the dechunked body. [`body`](Self::body) is
/// additionally content-decoded when possible.
#[derive(Debug)]
pub struct UpstreamHttpResponse {
    header: ResponseHeader,
    raw_header: Bytes,
    wire_body: Bytes,
    body: Bytes,
    decode_error: Option<DecodeError>,
    rewritten: bool,
}

impl UpstreamHttpResponse {
    pub(crate) fn new(header: ResponseHeader, raw_header: Bytes, wire_body: Bytes, rewritten: bool) -> Self {
        let body = wire_body.clone();
        Self { header, raw_header, wire_body, body, decode_error: None, rewritten }
    }

    pub(crate) fn set_decoded(&mut self, decoded: Result<Option<Bytes>, DecodeError>) {
        match decoded {
            Ok(Some(body)) => self.body = body,
            Ok(None) => {}
            Err(e) => self.decode_error = Some(e),
        }
    }

    pub fn header(&self) -> &ResponseHeader {
        &self.header
    }

    pub fn headers(&self) -> &HeaderMap {
        self.header.headers()
    }

    /// The head without the blank line ending it.
    pub fn raw_header(&self) -> &Bytes {
        &self.raw_header
    }

    /// The body as it follows the head in [`bytes`](RawResponse::bytes).
    pub fn wire_body(&self) -> &Bytes {
        &self.wire_body
    }

    /// The body after content decoding, or [`wire_body`](Self::wire_body)
    /// when there was nothing to decode or decoding failed.
    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// Why the body could not be content-decoded.
    pub fn decode_error(&self) -> Option<&DecodeError> {
        self.decode_error.as_ref()
    }

    /// True when the head was rewritten because the body was chunked.
    pub fn is_rewritten(&self) -> bool {
        self.rewritten
    }
}

impl RawResponse for UpstreamHttpResponse {
    fn bytes(&self) -> Bytes {
        let mut bytes = BytesMut::with_capacity(self.raw_header.len() + HTTP_HEADER_BODY_SEP.len() + self.wire_body.len());
        bytes.extend_from_slice(&self.raw_header);
        bytes.extend_from_slice(HTTP_HEADER_BODY_SEP);
        bytes.extend_from_slice(&self.wire_body);
        bytes.freeze()
    }
}
