//! Response head encoder.
//!
//! Writes a [`ResponseHeader`] back to wire form with the framing header
//! replaced to match the body that will follow it. Used when a chunked
//! response is flattened into a `Content-Length` one.

use std::io;
use std::io::Write;

use bytes::{BufMut, BytesMut};
use http::{Version, header};
use tokio_util::codec::Encoder;
use tracing::error;

use crate::protocol::{PayloadSize, ResponseHeader, SendError};

const INIT_HEADER_SIZE: usize = 4 * 1024;

/// Encodes a response head. Existing `Transfer-Encoding` and `Content-Length`
/// fields are dropped and one matching the given [`PayloadSize`] is written.
#[derive(Debug, Clone, Copy, Default)]
pub struct HeaderEncoder;

impl<'a> Encoder<(&'a ResponseHeader, PayloadSize)> for HeaderEncoder {
    type Error = SendError;

    fn encode(&mut self, item: (&'a ResponseHeader, PayloadSize), dst: &mut BytesMut) -> Result<(), Self::Error> {
        let (header, payload_size) = item;

        dst.reserve(INIT_HEADER_SIZE);
        let version = match header.version() {
            Version::HTTP_10 => "HTTP/1.0",
            Version::HTTP_11 => "HTTP/1.1",
            v => {
                error!(http_version = ?v, "unsupported http version");
                return Err(SendError::unsupported_version(format!("{v:?}")));
            }
        };
        write!(FastWrite(dst), "{version} {} {}\r\n", header.status().as_str(), header.status_text())?;

        for (header_name, header_value) in header.headers() {
            if header_name == header::TRANSFER_ENCODING || header_name == header::CONTENT_LENGTH {
                continue;
            }
            dst.put_slice(header_name.as_ref());
            dst.put_slice(b": ");
            dst.put_slice(header_value.as_ref());
            dst.put_slice(b"\r\n");
        }

        match payload_size {
            PayloadSize::Length(n) => write!(FastWrite(dst), "content-length: {n}\r\n")?,
            PayloadSize::Chunked => dst.put_slice(b"transfer-encoding: chunked\r\n"),
            PayloadSize::Empty => dst.put_slice(b"content-length: 0\r\n"),
            PayloadSize::Close => {}
        }

        dst.put_slice(b"\r\n");
        Ok(())
    }
}

struct FastWrite<'a>(&'a mut BytesMut);

impl Write for FastWrite<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.put_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
