use std::io;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ParseError {
    #[error("header size too large, current: {current_size} exceed the limit {max_size}")]
    TooLargeHeader { current_size: usize, max_size: usize },

    #[error("header number exceed the limit {max_num}")]
    TooManyHeaders { max_num: usize },

    #[error("invalid header: {reason}")]
    InvalidHeader { reason: String },

    #[error("invalid http version: {0:?}")]
    InvalidVersion(Option<u8>),

    #[error("invalid http method")]
    InvalidMethod,

    #[error("invalid http uri")]
    InvalidUri,

    #[error("invalid http status: {0:?}")]
    InvalidStatus(Option<u16>),

    #[error("invalid content-length header: {reason}")]
    InvalidContentLength { reason: String },

    #[error("invalid body: {reason}")]
    InvalidBody { reason: String },

    #[error("connection closed before the message was complete")]
    UnexpectedEof,

    #[error("io error: {source}")]
    Io {
        #[from]
        source: io::Error,
    },
}

impl ParseError {
    pub fn too_large_header(current_size: usize, max_size: usize) -> Self {
        Self::TooLargeHeader { current_size, max_size }
    }

    pub fn too_many_headers(max_num: usize) -> Self {
        Self::TooManyHeaders { max_num }
    }

    pub fn invalid_header<S: ToString>(str: S) -> Self {
        Self::InvalidHeader { reason: str.to_string() }
    }

    pub fn invalid_body<S: ToString>(str: S) -> Self {
        Self::InvalidBody { reason: str.to_string() }
    }

    pub fn invalid_content_length<S: ToString>(str: S) -> Self {
        Self::InvalidContentLength { reason: str.to_string() }
    }

    pub fn io<E: Into<io::Error>>(e: E) -> Self {
        Self::Io { source: e.into() }
    }
}

/// Errors raised while serializing a header.
#[derive(Error, Debug)]
pub enum SendError {
    #[error("unsupported http version: {version}")]
    UnsupportedVersion { version: String },

    #[error("io error: {source}")]
    Io {
        #[from]
        source: io::Error,
    },
}

impl SendError {
    pub fn unsupported_version<S: ToString>(version: S) -> Self {
        Self::UnsupportedVersion { version: version.to_string() }
    }

    pub fn io<E: Into<io::Error>>(e: E) -> Self {
        Self::Io { source: e.into() }
    }
}

/// Errors that fail a request/response exchange.
#[derive(Error, Debug)]
pub enum ExchangeError {
    /// Raw capture was never enabled on the connection.
    #[error("connection is not recording read data, enable it before the exchange")]
    NotRecording,

    /// Raw capture was enabled but the message outgrew the capture limit.
    #[error("raw capture was discarded, message exceeds the record limit")]
    RecordingDiscarded,

    #[error("incomplete http request")]
    IncompleteRequest,

    #[error("incomplete http response")]
    IncompleteResponse,

    #[error("parse error: {source}")]
    Parse {
        #[from]
        source: ParseError,
    },

    #[error("send error: {source}")]
    Send {
        #[from]
        source: SendError,
    },

    #[error("io error: {source}")]
    Io {
        #[from]
        source: io::Error,
    },
}

/// A body that could not be content-decoded. Never fails an exchange.
#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("unsupported content encoding: {encoding}")]
    Unsupported { encoding: String },

    #[error("corrupt {encoding} body: {source}")]
    Corrupt { encoding: &'static str, source: io::Error },

    #[error("{encoding} body expands past the limit {limit}")]
    TooLarge { encoding: &'static str, limit: usize },
}

impl DecodeError {
    pub fn unsupported<S: ToString>(encoding: S) -> Self {
        Self::Unsupported { encoding: encoding.to_string() }
    }

    pub fn corrupt(encoding: &'static str, source: io::Error) -> Self {
        Self::Corrupt { encoding, source }
    }

    pub fn too_large(encoding: &'static str, limit: usize) -> Self {
        Self::TooLarge { encoding, limit }
    }
}
