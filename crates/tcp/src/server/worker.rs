use std::any::Any;
use std::panic::AssertUnwindSafe;

use futures::FutureExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, trace, warn};

use super::FaultPolicy;
use super::queue::{ConnectionQueue, QueuedConnection};
use crate::handler::Handler;

/// Drives one handler instance over the shared queue until shutdown.
///
/// A panic escaping `handle` is caught here. With [`FaultPolicy::RetireWorker`]
/// the barrier sits around the whole loop, so the worker stops for good;
/// with [`FaultPolicy::ResumeWorker`] only the faulting connection is lost.
pub(crate) async fn run<H: Handler>(mut handler: H, queue: ConnectionQueue, token: CancellationToken, policy: FaultPolicy) {
    let served = AssertUnwindSafe(serve_queue(&mut handler, &queue, &token, policy)).catch_unwind().await;
    if let Err(panic) = served {
        error!(cause = panic_message(&*panic), "handler panicked, worker retired");
    }

    handler.cleanup();
    debug!("worker stopped");
}

async fn serve_queue<H: Handler>(handler: &mut H, queue: &ConnectionQueue, token: &CancellationToken, policy: FaultPolicy) {
    loop {
        let conn = tokio::select! {
            biased;
            () = token.cancelled() => break,
            conn = queue.pop() => match conn {
                Some(conn) => conn,
                None => break,
            },
        };

        let kept = match policy {
            FaultPolicy::RetireWorker => serve_connection(handler, conn, token).await,
            FaultPolicy::ResumeWorker => match AssertUnwindSafe(serve_connection(handler, conn, token)).catch_unwind().await {
                Ok(kept) => kept,
                Err(panic) => {
                    error!(cause = panic_message(&*panic), "handler panicked, connection dropped");
                    continue;
                }
            },
        };

        if let Some(conn) = kept {
            if queue.push(conn).await.is_err() {
                break;
            }
        }
    }
}

/// Runs one `handle` cycle, returns the connection when it should be served again.
///
/// Shutdown abandons the cycle and closes the connection.
async fn serve_connection<H: Handler>(handler: &mut H, mut conn: QueuedConnection, token: &CancellationToken) -> Option<QueuedConnection> {
    let outcome = tokio::select! {
        outcome = handler.handle(&mut conn) => Some(outcome),
        () = token.cancelled() => None,
    };

    let err = match outcome {
        Some(Ok(())) => return Some(conn),
        Some(Err(err)) => err,
        None => {
            debug!("shutting down, closing connection");
            if let Err(e) = conn.close().await {
                debug!(cause = %e, "failed to close connection");
            }
            return None;
        }
    };

    let peer = conn.peer_addr().ok();
    if err.is_graceful() {
        trace!(?peer, reason = %err, "closing connection");
    } else {
        warn!(?peer, cause = %err, "closing connection on handler error");
    }

    if let Err(e) = conn.close().await {
        debug!(?peer, cause = %e, "failed to close connection");
    }
    None
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    panic
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| panic.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown panic")
}
