use async_trait::async_trait;
use micro_tcp::client::ClientHandler;
use micro_tcp::connection::Connection;
use tokio::io::AsyncWriteExt;
use tracing::trace;

use crate::exchange::receive_response;
use crate::protocol::{ExchangeError, UpstreamHttpRequest, UpstreamHttpResponse};

/// Sends a captured request upstream and rebuilds the response from the
/// bytes the connection records.
///
/// The connection must already be recording, see
/// [`Connection::enable_save_read_data`]. The capture is reset before the
/// request is written.
#[derive(Debug, Clone, Copy, Default)]
pub struct HttpClientHandler;

#[async_trait]
impl ClientHandler for HttpClientHandler {
    type Request = UpstreamHttpRequest;
    type Response = UpstreamHttpResponse;
    type Error = ExchangeError;

    async fn handle(&mut self, conn: &mut Connection, request: &UpstreamHttpRequest) -> Result<UpstreamHttpResponse, ExchangeError> {
        if !conn.raw_data().is_recording() {
            return Err(ExchangeError::NotRecording);
        }
        conn.reset_read_data();

        conn.write_all(request.raw()).await?;
        conn.flush().await?;
        trace!(method = %request.method(), size = request.raw().len(), "wrote upstream request");

        receive_response(conn, request.method()).await
    }
}
