//! `Content-Encoding` decoding of complete bodies.

use std::io::Read;

use bytes::Bytes;
use flate2::read::{DeflateDecoder, MultiGzDecoder, ZlibDecoder};
use http::HeaderValue;
use tracing::debug;

use crate::protocol::DecodeError;

const BROTLI_BUFFER_SIZE: usize = 4096;

/// Default bound on a decoded body, matching the default capture limit.
pub const DEFAULT_MAX_DECODED_SIZE: usize = 64 * 1024 * 1024;

/// Undoes the codings listed in a `Content-Encoding` value.
///
/// Codings are removed last-applied first. Returns `Ok(None)` when there is
/// nothing to undo (no header, only `identity`, or an empty body). Output
/// is bounded by [`DEFAULT_MAX_DECODED_SIZE`].
pub fn decode_content(content_encoding: Option<&HeaderValue>, body: &[u8]) -> Result<Option<Bytes>, DecodeError> {
    decode_content_with_limit(content_encoding, body, DEFAULT_MAX_DECODED_SIZE)
}

/// Like [`decode_content`], failing with [`DecodeError::TooLarge`] once any
/// decoding step produces more than `limit` bytes.
pub fn decode_content_with_limit(content_encoding: Option<&HeaderValue>, body: &[u8], limit: usize) -> Result<Option<Bytes>, DecodeError> {
    let Some(value) = content_encoding else {
        return Ok(None);
    };
    if body.is_empty() {
        return Ok(None);
    }
    let value = value.to_str().map_err(|_e| DecodeError::unsupported(String::from_utf8_lossy(value.as_bytes())))?;

    let mut decoded: Option<Vec<u8>> = None;
    for coding in value.rsplit(',').map(str::trim).filter(|coding| !coding.is_empty()) {
        let input = decoded.as_deref().unwrap_or(body);
        let output = match coding.to_ascii_lowercase().as_str() {
            "identity" => continue,
            "gzip" | "x-gzip" => read_limited(MultiGzDecoder::new(input), "gzip", limit)?,
            "deflate" => inflate(input, limit)?,
            "br" => read_limited(brotli::Decompressor::new(input, BROTLI_BUFFER_SIZE), "br", limit)?,
            "zstd" => {
                let decoder = zstd::stream::read::Decoder::new(input).map_err(|e| DecodeError::corrupt("zstd", e))?;
                read_limited(decoder, "zstd", limit)?
            }
            other => return Err(DecodeError::unsupported(other)),
        };
        debug!(coding, encoded = input.len(), decoded = output.len(), "decoded body");
        decoded = Some(output);
    }

    Ok(decoded.map(Bytes::from))
}

/// `deflate` is meant to be zlib wrapped, but raw deflate streams are common.
fn inflate(input: &[u8], limit: usize) -> Result<Vec<u8>, DecodeError> {
    match read_limited(ZlibDecoder::new(input), "deflate", limit) {
        Err(DecodeError::Corrupt { .. }) => read_limited(DeflateDecoder::new(input), "deflate", limit),
        result => result,
    }
}

fn read_limited<R: Read>(reader: R, encoding: &'static str, limit: usize) -> Result<Vec<u8>, DecodeError> {
    let mut out = Vec::new();
    let bound = u64::try_from(limit).map_or(u64::MAX, |limit| limit.saturating_add(1));
    reader.take(bound).read_to_end(&mut out).map_err(|e| DecodeError::corrupt(encoding, e))?;
    if out.len() > limit {
        return Err(DecodeError::too_large(encoding, limit));
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use flate2::Compression;
    use flate2::write::{DeflateEncoder, GzEncoder, ZlibEncoder};

    use super::*;

    const PLAIN: &[u8] = b"the quick brown fox jumps over the lazy dog, again and again and again";

    fn gzip(data: &[u8]) -> Vec<u8> {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(data).unwrap();
        encoder.finish().unwrap()
    }

    fn decode(encoding: &'static str, body: &[u8]) -> Result<Option<Bytes>, DecodeError> {
        decode_content(Some(&HeaderValue::from_static(encoding)), body)
    }

    #[test]
    fn gzip_body() {
        assert_eq!(decode("gzip", &gzip(PLAIN)).unwrap().unwrap(), PLAIN);
        assert_eq!(decode("X-GZIP", &gzip(PLAIN)).unwrap().unwrap(), PLAIN);
    }

    #[test]
    fn deflate_zlib_and_raw() {
        let mut zlib = ZlibEncoder::new(Vec::new(), Compression::default());
        zlib.write_all(PLAIN).unwrap();
        assert_eq!(decode("deflate", &zlib.finish().unwrap()).unwrap().unwrap(), PLAIN);

        let mut raw = DeflateEncoder::new(Vec::new(), Compression::default());
        raw.write_all(PLAIN).unwrap();
        assert_eq!(decode("deflate", &raw.finish().unwrap()).unwrap().unwrap(), PLAIN);
    }

    #[test]
    fn brotli_and_zstd() {
        let mut br = Vec::new();
        {
            let mut writer = brotli::CompressorWriter::new(&mut br, 4096, 5, 22);
            writer.write_all(PLAIN).unwrap();
        }
        assert_eq!(decode("br", &br).unwrap().unwrap(), PLAIN);

        let zstd = zstd::stream::encode_all(PLAIN, 3).unwrap();
        assert_eq!(decode("zstd", &zstd).unwrap().unwrap(), PLAIN);
    }

    #[test]
    fn stacked_codings_are_undone_in_reverse() {
        let twice = gzip(&gzip(PLAIN));
        assert_eq!(decode("gzip, identity, gzip", &twice).unwrap().unwrap(), PLAIN);
    }

    #[test]
    fn nothing_to_decode() {
        assert!(decode_content(None, PLAIN).unwrap().is_none());
        assert!(decode("identity", PLAIN).unwrap().is_none());
        assert!(decode("gzip", b"").unwrap().is_none());
    }

    #[test]
    fn expansion_is_bounded() {
        let zeros = vec![0u8; 1024 * 1024];
        let limit = 64 * 1024;
        let bomb = gzip(&zeros);
        assert!(bomb.len() < limit);

        let gzip_header = HeaderValue::from_static("gzip");
        assert!(matches!(
            decode_content_with_limit(Some(&gzip_header), &bomb, limit),
            Err(DecodeError::TooLarge { encoding: "gzip", limit: 65536 })
        ));

        let zstd = zstd::stream::encode_all(&zeros[..], 3).unwrap();
        let zstd_header = HeaderValue::from_static("zstd");
        assert!(matches!(decode_content_with_limit(Some(&zstd_header), &zstd, limit), Err(DecodeError::TooLarge { .. })));

        let exact = decode_content_with_limit(Some(&gzip_header), &bomb, zeros.len()).unwrap().unwrap();
        assert_eq!(exact.len(), zeros.len());
    }

    #[test]
    fn garbled_and_unknown() {
        assert!(matches!(decode("gzip", b"definitely not gzip"), Err(DecodeError::Corrupt { encoding: "gzip", .. })));
        assert!(matches!(decode("deflate", b"\xff\xff\xff\xff"), Err(DecodeError::Corrupt { encoding: "deflate", .. })));
        assert!(matches!(decode("compress", PLAIN), Err(DecodeError::Unsupported { .. })));
    }
}
