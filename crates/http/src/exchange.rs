//! Reading complete HTTP messages off a recording [`Connection`] and
//! pairing the parsed form with the raw bytes the connection captured.
//!
//! The structured decoders decide where a message ends. The capture only
//! supplies the bytes, truncated to exactly what the decoders consumed, so a
//! reconstruction never contains bytes of a following pipelined message.

use bytes::{Bytes, BytesMut};
use http::Method;
use micro_tcp::connection::{Connection, RawData};
use tokio::io::AsyncReadExt;
use tokio_util::codec::{Decoder, Encoder};
use tracing::{debug, trace};

use crate::codec::header::HeaderEncoder;
use crate::codec::{RequestDecoder, ResponseDecoder};
use crate::content::decode_content_with_limit;
use crate::protocol::{
    ExchangeError, HTTP_HEADER_BODY_SEP, Message, ParseError, PayloadItem, PayloadSize, UpstreamHttpRequest, UpstreamHttpResponse,
};

const READ_BUF_SIZE: usize = 8 * 1024;

/// A fully decoded message.
#[derive(Debug)]
pub(crate) struct Decoded<H> {
    pub header: H,
    pub payload_size: PayloadSize,
    pub body: Bytes,
}

/// Accumulates decoder output until the body ends.
struct Assembly<H> {
    header: Option<(H, PayloadSize)>,
    body: BytesMut,
}

impl<H> Assembly<H> {
    fn new() -> Self {
        Self { header: None, body: BytesMut::new() }
    }

    /// Feeds everything `src` holds through `decoder`. True once the message is complete.
    fn feed<D>(&mut self, decoder: &mut D, src: &mut BytesMut, eof: bool) -> Result<bool, ParseError>
    where
        D: Decoder<Item = Message<(H, PayloadSize)>, Error = ParseError>,
    {
        loop {
            let item = if eof { decoder.decode_eof(src)? } else { decoder.decode(src)? };
            match item {
                Some(Message::Header(header)) => self.header = Some(header),
                Some(Message::Payload(PayloadItem::Chunk(bytes))) => self.body.extend_from_slice(&bytes),
                Some(Message::Payload(PayloadItem::Eof)) => return Ok(true),
                None => return Ok(false),
            }
        }
    }

    fn finish(self) -> Result<Decoded<H>, ParseError> {
        let (header, payload_size) = self.header.ok_or_else(|| ParseError::invalid_body("body ended before any header"))?;
        Ok(Decoded { header, payload_size, body: self.body.freeze() })
    }
}

/// Decodes one message held entirely in `src`. `None` if `src` ends before the message does.
pub(crate) fn decode_complete<D, H>(decoder: &mut D, src: &mut BytesMut) -> Result<Option<Decoded<H>>, ParseError>
where
    D: Decoder<Item = Message<(H, PayloadSize)>, Error = ParseError>,
{
    let mut assembly = Assembly::new();
    if assembly.feed(decoder, src, false)? {
        return assembly.finish().map(Some);
    }
    Ok(None)
}

/// Reads from `conn` until `decoder` completes one message.
///
/// Returns the message and how many of the bytes read belong to it, or
/// `None` if the peer closed before sending anything.
async fn read_message<D, H>(conn: &mut Connection, decoder: &mut D) -> Result<Option<(Decoded<H>, usize)>, ParseError>
where
    D: Decoder<Item = Message<(H, PayloadSize)>, Error = ParseError>,
{
    let mut src = BytesMut::with_capacity(READ_BUF_SIZE);
    let mut assembly = Assembly::new();
    let mut read = 0;

    loop {
        if assembly.feed(decoder, &mut src, false)? {
            break;
        }

        src.reserve(READ_BUF_SIZE);
        let n = conn.read_buf(&mut src).await?;
        trace!(read = n, "read message bytes");
        if n == 0 {
            if read == 0 {
                return Ok(None);
            }
            if assembly.feed(decoder, &mut src, true)? {
                break;
            }
            return Err(ParseError::UnexpectedEof);
        }
        read += n;
    }

    let consumed = read - src.len();
    if !src.is_empty() {
        debug!(leftover = src.len(), "bytes after the message are dropped");
    }
    Ok(Some((assembly.finish()?, consumed)))
}

/// The first `len` captured bytes of `conn`.
fn captured(conn: &Connection, len: usize) -> Result<Bytes, ExchangeError> {
    match conn.raw_data() {
        RawData::NotRecording => Err(ExchangeError::NotRecording),
        RawData::Discarded => Err(ExchangeError::RecordingDiscarded),
        RawData::Captured(raw) => Ok(Bytes::copy_from_slice(&raw[..len.min(raw.len())])),
    }
}

/// Splits `raw` at the first blank line into a head, without the blank
/// line, and everything after it.
pub fn separate_header_body(raw: &Bytes) -> Result<(Bytes, Bytes), ExchangeError> {
    let sep_len = HTTP_HEADER_BODY_SEP.len();
    let position = raw.windows(sep_len).position(|window| window == HTTP_HEADER_BODY_SEP).ok_or(ExchangeError::IncompleteResponse)?;
    Ok((raw.slice(..position), raw.slice(position + sep_len..)))
}

/// Reads one request from a recording connection.
///
/// `Ok(None)` means the client closed the connection between requests.
pub async fn receive_request(conn: &mut Connection) -> Result<Option<UpstreamHttpRequest>, ExchangeError> {
    if !conn.raw_data().is_recording() {
        return Err(ExchangeError::NotRecording);
    }

    let Some((decoded, consumed)) = read_message(conn, &mut RequestDecoder::default()).await? else {
        return Ok(None);
    };
    let raw = captured(conn, consumed)?;
    if raw.len() < consumed {
        return Err(ExchangeError::IncompleteRequest);
    }

    trace!(method = %decoded.header.method(), uri = %decoded.header.uri(), size = raw.len(), "received request");
    Ok(Some(UpstreamHttpRequest::new(decoded.header, decoded.body, raw, conn.tls().is_some())))
}

/// Reads the response to a request with `method` from a recording
/// connection and rebuilds it from the captured bytes.
///
/// Non-chunked responses come back byte for byte. Chunked ones get a
/// rewritten head carrying a `Content-Length` and the dechunked body.
/// Content decoding is bounded by the connection's max record size.
pub async fn receive_response(conn: &mut Connection, method: &Method) -> Result<UpstreamHttpResponse, ExchangeError> {
    if !conn.raw_data().is_recording() {
        return Err(ExchangeError::NotRecording);
    }

    let mut decoder = ResponseDecoder::for_head(method == Method::HEAD);
    let (decoded, consumed) = read_message(conn, &mut decoder).await?.ok_or(ExchangeError::IncompleteResponse)?;
    let raw = captured(conn, consumed)?;
    let (raw_header, raw_body) = separate_header_body(&raw)?;

    let mut response = if decoded.payload_size.is_chunked() {
        let mut header = BytesMut::new();
        HeaderEncoder.encode((&decoded.header, PayloadSize::Length(decoded.body.len() as u64)), &mut header)?;
        header.truncate(header.len() - HTTP_HEADER_BODY_SEP.len());
        debug!(chunked = raw_body.len(), dechunked = decoded.body.len(), "rewrote chunked response");
        UpstreamHttpResponse::new(decoded.header, header.freeze(), decoded.body, true)
    } else {
        UpstreamHttpResponse::new(decoded.header, raw_header, raw_body, false)
    };

    let content_encoding = response.headers().get(http::header::CONTENT_ENCODING).cloned();
    let decoded_body = decode_content_with_limit(content_encoding.as_ref(), response.wire_body(), conn.max_record_size());
    if let Err(e) = &decoded_body {
        debug!(cause = %e, "response body left encoded");
    }
    response.set_decoded(decoded_body);

    trace!(status = %response.header().status(), size = consumed, "received response");
    Ok(response)
}
