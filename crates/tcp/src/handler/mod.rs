//! The protocol handler contract served by [`Server`](crate::server::Server).
//!
//! A caller builds one *prototype* handler. At startup the server calls
//! [`Handler::spawn`] on it until it reports [`HandlerLimitReached`]; every
//! spawned instance is then bound to one worker for the worker's whole life.

mod echo;

pub use echo::{DEFAULT_ECHO_REPLY, DataStream, EchoClientHandler, EchoHandler};

use async_trait::async_trait;

use crate::connection::Connection;
use crate::error::{HandleError, HandlerLimitReached};

#[async_trait]
pub trait Handler: Send + 'static {
    /// Serves one read cycle of `conn`.
    ///
    /// `Ok(())` asks the server to keep the connection and queue it again;
    /// any error closes it. [`HandleError::ClientClosed`] and
    /// [`HandleError::ServerClose`] close it without a warning.
    async fn handle(&mut self, conn: &mut Connection) -> Result<(), HandleError>;

    /// Creates a new instance sharing this handler's configuration.
    fn spawn(&mut self) -> Result<Self, HandlerLimitReached>
    where
        Self: Sized;

    /// Runs once when the worker owning this instance stops.
    fn cleanup(&mut self) {}

    fn tag(&self) -> String;

    fn connection_queue_capacity(&self) -> usize;

    /// Whether accepted connections should start with raw capture enabled.
    fn record_read_data(&self) -> bool {
        true
    }
}

/// Hands out handler sequence ids.
///
/// Id 0 is the prototype, spawned instances get `1..=limit` and an id is never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpawnCounter {
    id: usize,
    spawned: usize,
    limit: usize,
}

impl SpawnCounter {
    pub const fn new(limit: usize) -> Self {
        Self { id: 0, spawned: 0, limit }
    }

    /// Reserves the next id, or reports exhaustion.
    pub fn next_id(&mut self) -> Result<usize, HandlerLimitReached> {
        if self.spawned >= self.limit {
            return Err(HandlerLimitReached { limit: self.limit });
        }
        self.spawned += 1;
        Ok(self.spawned)
    }

    /// The id of the instance owning this counter.
    #[inline]
    pub fn id(&self) -> usize {
        self.id
    }

    /// Counter for a freshly spawned instance: same limit, its own id.
    pub fn child(&self, id: usize) -> Self {
        Self { id, spawned: self.limit, limit: self.limit }
    }

    #[inline]
    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Formats a handler tag, spawned instances carry their id.
    pub fn tag(&self, name: &str) -> String {
        if self.id == 0 { name.to_owned() } else { format!("{name} ({})", self.id) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_sequential_until_limit() {
        let mut counter = SpawnCounter::new(2);
        assert_eq!(counter.next_id(), Ok(1));
        assert_eq!(counter.next_id(), Ok(2));
        assert_eq!(counter.next_id(), Err(HandlerLimitReached { limit: 2 }));
        assert_eq!(counter.next_id(), Err(HandlerLimitReached { limit: 2 }));
    }

    #[test]
    fn children_never_spawn() {
        let mut prototype = SpawnCounter::new(3);
        let id = prototype.next_id().unwrap();
        let mut child = prototype.child(id);

        assert_eq!(child.id(), 1);
        assert!(child.next_id().is_err());
        assert_eq!(prototype.next_id(), Ok(2));
    }

    #[test]
    fn tags() {
        let prototype = SpawnCounter::new(1);
        assert_eq!(prototype.tag("echo"), "echo");
        assert_eq!(prototype.child(4).tag("echo"), "echo (4)");
    }
}
