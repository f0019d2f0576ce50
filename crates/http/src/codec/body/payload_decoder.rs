//! Body decoder dispatching on the framing chosen by the header decoder.

use bytes::BytesMut;
use tokio_util::codec::Decoder;

use super::chunked_decoder::ChunkedDecoder;
use super::length_decoder::LengthDecoder;
use crate::protocol::{ParseError, PayloadItem, PayloadSize};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PayloadDecoder {
    kind: Kind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Kind {
    Length(LengthDecoder),
    Chunked(ChunkedDecoder),
    NoBody,
    /// Read until the peer closes, `finished` once EOF was reported
    UntilClose { finished: bool },
}

impl PayloadDecoder {
    pub fn empty() -> Self {
        Self { kind: Kind::NoBody }
    }

    pub fn chunked() -> Self {
        Self { kind: Kind::Chunked(ChunkedDecoder::new()) }
    }

    pub fn fix_length(size: u64) -> Self {
        Self { kind: Kind::Length(LengthDecoder::new(size)) }
    }

    pub fn until_close() -> Self {
        Self { kind: Kind::UntilClose { finished: false } }
    }

    pub fn is_chunked(&self) -> bool {
        matches!(self.kind, Kind::Chunked(_))
    }
}

impl From<PayloadSize> for PayloadDecoder {
    fn from(payload_size: PayloadSize) -> Self {
        match payload_size {
            PayloadSize::Length(size) => PayloadDecoder::fix_length(size),
            PayloadSize::Chunked => PayloadDecoder::chunked(),
            PayloadSize::Empty => PayloadDecoder::empty(),
            PayloadSize::Close => PayloadDecoder::until_close(),
        }
    }
}

impl Decoder for PayloadDecoder {
    type Item = PayloadItem;
    type Error = ParseError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match &mut self.kind {
            Kind::Length(length_decoder) => length_decoder.decode(src),
            Kind::Chunked(chunked_decoder) => chunked_decoder.decode(src),
            Kind::NoBody => Ok(Some(PayloadItem::Eof)),
            Kind::UntilClose { finished: true } => Ok(Some(PayloadItem::Eof)),
            Kind::UntilClose { finished: false } => {
                if src.is_empty() {
                    Ok(None)
                } else {
                    Ok(Some(PayloadItem::Chunk(src.split().freeze())))
                }
            }
        }
    }

    /// Called once the peer closed. Close delimited bodies end here, every
    /// other framing must already be complete.
    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if let Kind::UntilClose { finished } = &mut self.kind {
            if !src.is_empty() {
                return Ok(Some(PayloadItem::Chunk(src.split().freeze())));
            }
            *finished = true;
            return Ok(Some(PayloadItem::Eof));
        }

        match self.decode(src)? {
            Some(item) => Ok(Some(item)),
            None => Err(ParseError::UnexpectedEof),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn close_delimited_ends_at_eof() {
        let mut decoder = PayloadDecoder::from(PayloadSize::Close);
        let mut buffer = BytesMut::from(&b"part one"[..]);

        assert_eq!(decoder.decode(&mut buffer).unwrap(), Some(PayloadItem::Chunk("part one".into())));
        assert_eq!(decoder.decode(&mut buffer).unwrap(), None);

        buffer.extend_from_slice(b", two");
        assert_eq!(decoder.decode_eof(&mut buffer).unwrap(), Some(PayloadItem::Chunk(", two".into())));
        assert_eq!(decoder.decode_eof(&mut buffer).unwrap(), Some(PayloadItem::Eof));
        assert_eq!(decoder.decode(&mut buffer).unwrap(), Some(PayloadItem::Eof));
    }

    #[test]
    fn short_length_body_fails_at_eof() {
        let mut decoder = PayloadDecoder::from(PayloadSize::Length(10));
        let mut buffer = BytesMut::from(&b"abc"[..]);

        assert!(decoder.decode_eof(&mut buffer).unwrap().unwrap().is_chunk());
        assert!(matches!(decoder.decode_eof(&mut buffer), Err(ParseError::UnexpectedEof)));
    }

    #[test]
    fn unfinished_chunked_body_fails_at_eof() {
        let mut decoder = PayloadDecoder::from(PayloadSize::Chunked);
        assert!(decoder.is_chunked());

        let mut buffer = BytesMut::from(&b"5\r\nhello\r\n"[..]);
        assert!(decoder.decode_eof(&mut buffer).unwrap().unwrap().is_chunk());
        assert!(matches!(decoder.decode_eof(&mut buffer), Err(ParseError::UnexpectedEof)));
    }

    #[test]
    fn empty_body_is_immediately_done() {
        let mut decoder = PayloadDecoder::from(PayloadSize::Empty);
        assert!(decoder.decode(&mut BytesMut::new()).unwrap().unwrap().is_eof());
    }
}
