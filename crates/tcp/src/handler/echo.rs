//! Fixed-reply handlers used to exercise the server and client plumbing.

use std::io;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::trace;

use super::{Handler, SpawnCounter};
use crate::client::{ClientHandler, RawRequest, RawResponse};
use crate::connection::Connection;
use crate::error::{HandleError, HandlerLimitReached};

pub const DEFAULT_ECHO_REPLY: &[u8] = b"World";

const ECHO_BUFFER_SIZE: usize = 100;
const DEFAULT_QUEUE_CAPACITY: usize = 4;

/// Answers every read with the same shared payload.
#[derive(Debug)]
pub struct EchoHandler {
    counter: SpawnCounter,
    name: String,
    queue_capacity: usize,
    reply: Bytes,
    buf: Box<[u8; ECHO_BUFFER_SIZE]>,
}

impl EchoHandler {
    pub fn new(name: impl Into<String>, limit: usize) -> Self {
        Self {
            counter: SpawnCounter::new(limit),
            name: name.into(),
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            reply: Bytes::from_static(DEFAULT_ECHO_REPLY),
            buf: Box::new([0; ECHO_BUFFER_SIZE]),
        }
    }

    #[must_use]
    pub fn with_reply(mut self, reply: impl Into<Bytes>) -> Self {
        self.reply = reply.into();
        self
    }

    #[must_use]
    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    pub fn id(&self) -> usize {
        self.counter.id()
    }
}

#[async_trait]
impl Handler for EchoHandler {
    async fn handle(&mut self, conn: &mut Connection) -> Result<(), HandleError> {
        let n = conn.read(&mut self.buf[..]).await?;
        if n == 0 {
            return Err(HandleError::ClientClosed);
        }
        trace!(read = n, tag = %self.tag(), "echo request");

        conn.write_all(&self.reply).await?;
        conn.flush().await?;
        Ok(())
    }

    fn spawn(&mut self) -> Result<Self, HandlerLimitReached> {
        let id = self.counter.next_id()?;
        Ok(Self {
            counter: self.counter.child(id),
            name: self.name.clone(),
            queue_capacity: self.queue_capacity,
            reply: self.reply.clone(),
            buf: Box::new([0; ECHO_BUFFER_SIZE]),
        })
    }

    fn tag(&self) -> String {
        self.counter.tag(&self.name)
    }

    fn connection_queue_capacity(&self) -> usize {
        self.queue_capacity
    }

    fn record_read_data(&self) -> bool {
        false
    }
}

/// An opaque byte payload, used as both request and response of the echo exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataStream(pub Bytes);

impl RawRequest for DataStream {
    fn bytes(&self) -> Bytes {
        self.0.clone()
    }
}

impl RawResponse for DataStream {
    fn bytes(&self) -> Bytes {
        self.0.clone()
    }
}

/// Writes a payload and returns whatever a single read brings back.
#[derive(Debug)]
pub struct EchoClientHandler {
    buf: Box<[u8; ECHO_BUFFER_SIZE]>,
}

impl EchoClientHandler {
    pub fn new() -> Self {
        Self { buf: Box::new([0; ECHO_BUFFER_SIZE]) }
    }
}

impl Default for EchoClientHandler {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ClientHandler for EchoClientHandler {
    type Request = DataStream;
    type Response = DataStream;
    type Error = io::Error;

    async fn handle(&mut self, conn: &mut Connection, request: &DataStream) -> Result<DataStream, io::Error> {
        conn.write_all(&request.0).await?;
        conn.flush().await?;

        let n = conn.read(&mut self.buf[..]).await?;
        if n == 0 {
            return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "connection closed before echo reply"));
        }
        Ok(DataStream(Bytes::copy_from_slice(&self.buf[..n])))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spawn_until_exhausted() {
        let mut prototype = EchoHandler::new("echo", 2).with_reply("pong");

        let first = prototype.spawn().unwrap();
        let second = prototype.spawn().unwrap();
        assert_eq!(first.tag(), "echo (1)");
        assert_eq!(second.id(), 2);
        assert_eq!(second.reply, Bytes::from_static(b"pong"));
        assert_eq!(prototype.spawn().unwrap_err(), HandlerLimitReached { limit: 2 });
        assert_eq!(prototype.tag(), "echo");
    }

    #[test]
    fn defaults() {
        let handler = EchoHandler::new("echo", 1);
        assert_eq!(handler.connection_queue_capacity(), 4);
        assert_eq!(&handler.reply[..], b"World");
        assert!(!handler.record_read_data());
    }
}
