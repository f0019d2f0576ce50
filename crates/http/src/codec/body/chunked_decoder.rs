//! `Transfer-Encoding: chunked` body decoder.
//!
//! Strips chunk sizes, extensions and trailers, yielding only the chunk data.
//! See [RFC 9112 section 7.1](https://www.rfc-editor.org/rfc/rfc9112.html#section-7.1).

use bytes::{Buf, BytesMut};
use tokio_util::codec::Decoder;
use tracing::trace;

use crate::protocol::{ParseError, PayloadItem};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkedDecoder {
    state: State,
    remaining: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Size,
    SizeLws,
    Extension,
    SizeLf,
    Data,
    DataCr,
    DataLf,
    Trailer,
    TrailerLf,
    EndCr,
    EndLf,
    End,
}

impl ChunkedDecoder {
    pub fn new() -> Self {
        Self { state: State::Size, remaining: 0 }
    }

    /// True once the terminating zero chunk and its trailers were consumed.
    pub fn is_done(&self) -> bool {
        self.state == State::End
    }

    fn push_size_digit(&mut self, digit: u8) -> Result<(), ParseError> {
        self.remaining = self
            .remaining
            .checked_mul(16)
            .and_then(|size| size.checked_add(u64::from(digit)))
            .ok_or_else(|| ParseError::invalid_body("chunk size overflows u64"))?;
        Ok(())
    }

    /// Advances over one framing byte. Returns the next state.
    fn step(&mut self, byte: u8) -> Result<State, ParseError> {
        use State::*;

        let next = match (self.state, byte) {
            (Size, b @ b'0'..=b'9') => {
                self.push_size_digit(b - b'0')?;
                Size
            }
            (Size, b @ b'a'..=b'f') => {
                self.push_size_digit(b - b'a' + 10)?;
                Size
            }
            (Size, b @ b'A'..=b'F') => {
                self.push_size_digit(b - b'A' + 10)?;
                Size
            }
            (Size | SizeLws, b'\t' | b' ') => SizeLws,
            (Size | SizeLws, b';') => Extension,
            (Size | SizeLws | Extension, b'\r') => SizeLf,
            (Size, _) => return Err(ParseError::invalid_body("invalid chunk size")),
            (SizeLws, _) => return Err(ParseError::invalid_body("invalid whitespace after chunk size")),
            // bare LF inside an extension is rejected, extensions end at CRLF
            (Extension, b'\n') => return Err(ParseError::invalid_body("chunk extension contains newline")),
            (Extension, _) => Extension,
            (SizeLf, b'\n') if self.remaining == 0 => EndCr,
            (SizeLf, b'\n') => Data,
            (SizeLf, _) => return Err(ParseError::invalid_body("missing LF after chunk size")),
            (DataCr, b'\r') => DataLf,
            (DataCr, _) => return Err(ParseError::invalid_body("missing CR after chunk data")),
            (DataLf, b'\n') => Size,
            (DataLf, _) => return Err(ParseError::invalid_body("missing LF after chunk data")),
            (Trailer, b'\r') => TrailerLf,
            (Trailer, _) => Trailer,
            (TrailerLf, b'\n') => EndCr,
            (TrailerLf, _) => return Err(ParseError::invalid_body("missing LF after trailer field")),
            (EndCr, b'\r') => EndLf,
            (EndCr, _) => Trailer,
            (EndLf, b'\n') => End,
            (EndLf, _) => return Err(ParseError::invalid_body("missing final LF")),
            (Data | End, _) => self.state,
        };
        Ok(next)
    }
}

impl Default for ChunkedDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for ChunkedDecoder {
    type Item = PayloadItem;
    type Error = ParseError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        loop {
            match self.state {
                State::End => {
                    trace!("finished reading chunked data");
                    return Ok(Some(PayloadItem::Eof));
                }
                State::Data => {
                    if src.is_empty() {
                        return Ok(None);
                    }
                    let len = usize::try_from(self.remaining).unwrap_or(usize::MAX).min(src.len());
                    let bytes = src.split_to(len).freeze();
                    self.remaining -= len as u64;
                    if self.remaining == 0 {
                        self.state = State::DataCr;
                    }
                    trace!(len = bytes.len(), "read chunk data");
                    return Ok(Some(PayloadItem::Chunk(bytes)));
                }
                _ => {
                    if src.is_empty() {
                        return Ok(None);
                    }
                    let byte = src.get_u8();
                    self.state = self.step(byte)?;
                }
            }
        }
    }
}
