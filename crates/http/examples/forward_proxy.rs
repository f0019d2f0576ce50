//! A plain HTTP forward proxy: every request is relayed to the host it
//! names and the reconstructed upstream response is written back.
//!
//! curl -v -x http://127.0.0.1:8080 http://example.com/

use bytes::Bytes;
use micro_tcp::client::{RawResponse, connect, send_and_receive};
use micro_tcp::server::Server;
use micro_tcp_http::handler::{BoxError, HttpClientHandler, HttpServerHandler, Responder};
use micro_tcp_http::protocol::UpstreamHttpRequest;
use tracing::{Level, error, info};
use tracing_subscriber::FmtSubscriber;

#[derive(Debug, Clone, Copy)]
struct ForwardResponder;

impl ForwardResponder {
    fn upstream_address(request: &UpstreamHttpRequest) -> Option<String> {
        let authority = match request.uri().authority() {
            Some(authority) => authority.as_str().to_owned(),
            None => request.headers().get(http::header::HOST)?.to_str().ok()?.to_owned(),
        };
        if authority.contains(':') { Some(authority) } else { Some(format!("{authority}:80")) }
    }
}

#[async_trait::async_trait]
impl Responder for ForwardResponder {
    async fn respond(&self, request: &UpstreamHttpRequest) -> Result<Bytes, BoxError> {
        let address = Self::upstream_address(request).ok_or("request names no upstream host")?;

        let mut conn = connect(&address).await?;
        conn.enable_save_read_data();
        let response = send_and_receive(&mut conn, &mut HttpClientHandler, request).await?;
        conn.close().await?;

        if let Some(e) = response.decode_error() {
            info!(cause = %e, "upstream body could not be decoded");
        }
        info!(address = %address, status = %response.header().status(), size = response.body().len(), "relayed");
        Ok(response.bytes())
    }
}

#[tokio::main]
async fn main() {
    let subscriber = FmtSubscriber::builder().with_max_level(Level::INFO).finish();
    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    let server = match Server::bind("127.0.0.1:8080").await {
        Ok(server) => server,
        Err(e) => {
            error!(cause = %e, "bind server error");
            return;
        }
    };
    info!(port = 8080, "start listening");

    let handler = HttpServerHandler::new("forward-proxy", 16).with_responder(ForwardResponder);
    if let Err(e) = server.serve(handler).await {
        error!(cause = %e, "proxy stopped");
    }
}
