use std::error::Error;

use async_trait::async_trait;
use bytes::Bytes;
use http::{Version, header};
use micro_tcp::connection::Connection;
use micro_tcp::error::{HandleError, HandlerLimitReached};
use micro_tcp::handler::{Handler, SpawnCounter};
use tokio::io::AsyncWriteExt;
use tracing::{debug, error, trace};

use crate::exchange::receive_request;
use crate::protocol::{DEFAULT_ERROR_RESPONSE, DEFAULT_OK_RESPONSE, ExchangeError, ParseError, RequestHeader, UpstreamHttpRequest};

pub type BoxError = Box<dyn Error + Send + Sync>;

pub const DEFAULT_CONNECTION_QUEUE_CAPACITY: usize = 128;

/// Computes the raw reply for a request.
///
/// Shared by every spawned handler instance, so it is cloned once per instance.
#[async_trait]
pub trait Responder: Clone + Send + Sync + 'static {
    async fn respond(&self, request: &UpstreamHttpRequest) -> Result<Bytes, BoxError>;
}

/// Answers every request with [`DEFAULT_OK_RESPONSE`].
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultResponder;

#[async_trait]
impl Responder for DefaultResponder {
    async fn respond(&self, _request: &UpstreamHttpRequest) -> Result<Bytes, BoxError> {
        Ok(Bytes::from_static(DEFAULT_OK_RESPONSE))
    }
}

/// Serves one request per cycle on recording connections.
///
/// Each cycle starts a fresh capture, reads a complete request, writes the
/// responder's reply and then keeps or closes the connection according to
/// [`wants_connection_alive`]. A failing responder is answered with
/// [`DEFAULT_ERROR_RESPONSE`] and the connection is closed.
#[derive(Debug)]
pub struct HttpServerHandler<R = DefaultResponder> {
    counter: SpawnCounter,
    name: String,
    queue_capacity: usize,
    responder: R,
}

impl HttpServerHandler {
    pub fn new(name: impl Into<String>, limit: usize) -> Self {
        Self {
            counter: SpawnCounter::new(limit),
            name: name.into(),
            queue_capacity: DEFAULT_CONNECTION_QUEUE_CAPACITY,
            responder: DefaultResponder,
        }
    }
}

impl<R: Responder> HttpServerHandler<R> {
    pub fn with_responder<T: Responder>(self, responder: T) -> HttpServerHandler<T> {
        HttpServerHandler { counter: self.counter, name: self.name, queue_capacity: self.queue_capacity, responder }
    }

    #[must_use]
    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    pub fn id(&self) -> usize {
        self.counter.id()
    }

    pub fn responder(&self) -> &R {
        &self.responder
    }

    async fn write_reply(conn: &mut Connection, reply: &[u8]) -> Result<(), HandleError> {
        conn.write_all(reply).await?;
        conn.flush().await?;
        Ok(())
    }
}

#[async_trait]
impl<R: Responder> Handler for HttpServerHandler<R> {
    async fn handle(&mut self, conn: &mut Connection) -> Result<(), HandleError> {
        conn.reset_read_data();

        let request = match receive_request(conn).await {
            Ok(Some(request)) => request,
            Ok(None) => return Err(HandleError::ClientClosed),
            Err(ExchangeError::Parse { source: ParseError::UnexpectedEof }) => {
                debug!(tag = %self.tag(), "client closed in the middle of a request");
                return Err(HandleError::ClientClosed);
            }
            Err(e) => {
                error!(cause = %e, tag = %self.tag(), "receive downstream request error");
                return Err(HandleError::other(e));
            }
        };
        debug!(method = %request.method(), uri = %request.uri(), size = request.raw().len(), "received downstream request");

        let keep_alive = wants_connection_alive(request.header());
        match self.responder.respond(&request).await {
            Ok(reply) => {
                Self::write_reply(conn, &reply).await?;
                trace!(size = reply.len(), keep_alive, "wrote downstream response");
            }
            Err(e) => {
                error!(cause = %e, tag = %self.tag(), "responder failed, answering with an error");
                Self::write_reply(conn, DEFAULT_ERROR_RESPONSE).await?;
                return Err(HandleError::ServerClose);
            }
        }

        if keep_alive { Ok(()) } else { Err(HandleError::ServerClose) }
    }

    fn spawn(&mut self) -> Result<Self, HandlerLimitReached> {
        let id = self.counter.next_id()?;
        Ok(Self {
            counter: self.counter.child(id),
            name: self.name.clone(),
            queue_capacity: self.queue_capacity,
            responder: self.responder.clone(),
        })
    }

    fn tag(&self) -> String {
        self.counter.tag(&self.name)
    }

    fn connection_queue_capacity(&self) -> usize {
        self.queue_capacity
    }
}

/// Keep-alive decision for a request.
///
/// HTTP/1.1 keeps the connection unless the `Connection` header lists
/// `close`. HTTP/1.0 closes it unless the header lists `keep-alive`.
pub fn wants_connection_alive(request: &RequestHeader) -> bool {
    let mut tokens = request
        .headers()
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .map(str::trim);

    match request.version() {
        Version::HTTP_09 | Version::HTTP_10 => tokens.any(|token| token.eq_ignore_ascii_case("keep-alive")),
        _ => !tokens.any(|token| token.eq_ignore_ascii_case("close")),
    }
}
