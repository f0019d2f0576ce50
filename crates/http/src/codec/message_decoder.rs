//! Streaming decoder for a whole message: the head first, then its body.
//!
//! ```
//! use bytes::BytesMut;
//! use micro_tcp_http::codec::RequestDecoder;
//! use micro_tcp_http::protocol::{Message, PayloadItem};
//! use tokio_util::codec::Decoder;
//!
//! let mut buf = BytesMut::from("POST / HTTP/1.1\r\nContent-Length: 2\r\n\r\nhi");
//! let mut decoder = RequestDecoder::default();
//!
//! assert!(matches!(decoder.decode(&mut buf), Ok(Some(Message::Header(_)))));
//! assert!(matches!(decoder.decode(&mut buf), Ok(Some(Message::Payload(PayloadItem::Chunk(_))))));
//! assert!(matches!(decoder.decode(&mut buf), Ok(Some(Message::Payload(PayloadItem::Eof)))));
//! ```

use bytes::BytesMut;
use tokio_util::codec::Decoder;

use super::body::PayloadDecoder;
use super::header::{RequestHeaderDecoder, ResponseHeaderDecoder};
use crate::protocol::{Message, ParseError, PayloadItem, PayloadSize};

/// Decodes requests.
pub type RequestDecoder = MessageDecoder<RequestHeaderDecoder>;

/// Decodes responses. Build it with [`ResponseDecoder::for_head`] when the
/// request was a `HEAD`.
pub type ResponseDecoder = MessageDecoder<ResponseHeaderDecoder>;

/// Yields [`Message::Header`] once, then [`Message::Payload`] items until
/// [`PayloadItem::Eof`], after which it is ready for the next message.
///
/// `payload_decoder` is `None` while a head is being parsed.
#[derive(Debug, Default)]
pub struct MessageDecoder<H> {
    header_decoder: H,
    payload_decoder: Option<PayloadDecoder>,
}

impl<H> MessageDecoder<H> {
    pub fn new(header_decoder: H) -> Self {
        Self { header_decoder, payload_decoder: None }
    }

    /// True between a decoded head and the end of its body.
    pub fn in_payload(&self) -> bool {
        self.payload_decoder.is_some()
    }

    fn decode_payload(&mut self, src: &mut BytesMut, eof: bool) -> Result<Option<PayloadItem>, ParseError> {
        let Some(payload_decoder) = &mut self.payload_decoder else {
            return Ok(None);
        };
        let item = if eof { payload_decoder.decode_eof(src)? } else { payload_decoder.decode(src)? };
        if matches!(item, Some(PayloadItem::Eof)) {
            self.payload_decoder.take();
        }
        Ok(item)
    }
}

impl ResponseDecoder {
    pub fn for_head(head_request: bool) -> Self {
        Self::new(ResponseHeaderDecoder::new(head_request))
    }
}

impl<H, T> Decoder for MessageDecoder<H>
where
    H: Decoder<Item = (T, PayloadSize), Error = ParseError>,
{
    type Item = Message<(T, PayloadSize)>;
    type Error = ParseError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if self.in_payload() {
            return Ok(self.decode_payload(src, false)?.map(Message::Payload));
        }

        let message = match self.header_decoder.decode(src)? {
            Some((header, payload_size)) => {
                self.payload_decoder = Some(payload_size.into());
                Some(Message::Header((header, payload_size)))
            }
            None => None,
        };

        Ok(message)
    }

    /// The peer closed: a close delimited body ends, anything else
    /// half-received is an [`ParseError::UnexpectedEof`].
    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if self.in_payload() {
            return Ok(self.decode_payload(src, true)?.map(Message::Payload));
        }

        match self.decode(src)? {
            Some(message) => Ok(Some(message)),
            None if src.is_empty() => Ok(None),
            None => Err(ParseError::UnexpectedEof),
        }
    }
}
