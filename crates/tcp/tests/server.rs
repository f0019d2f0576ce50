use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;

use micro_tcp::client::{connect, send_and_receive};
use micro_tcp::connection::{Connection, RawData};
use micro_tcp::error::{HandleError, HandlerLimitReached, ServeError};
use micro_tcp::handler::{DataStream, EchoClientHandler, EchoHandler, Handler, SpawnCounter};
use micro_tcp::server::{FaultPolicy, Server, ServerConfig, ServerHandle};

const SILENCE: Duration = Duration::from_millis(200);

async fn start<H: Handler>(handler: H, config: ServerConfig) -> ServerHandle {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    Server::bind("127.0.0.1:0").await.unwrap().with_config(config).spawn(handler).unwrap()
}

async fn exchange(stream: &mut TcpStream, payload: &[u8]) -> Vec<u8> {
    stream.write_all(payload).await.unwrap();
    let mut buf = [0u8; 256];
    let n = stream.read(&mut buf).await.unwrap();
    buf[..n].to_vec()
}

#[tokio::test]
async fn echo_round_trip() {
    let server = start(EchoHandler::new("echo", 2), ServerConfig::default()).await;

    let mut conn = connect(&server.local_addr().to_string()).await.unwrap();
    let mut client = EchoClientHandler::new();
    let request = DataStream(Bytes::from_static(b"Hello"));

    let reply = send_and_receive(&mut conn, &mut client, &request).await.unwrap();
    assert_eq!(reply, DataStream(Bytes::from_static(b"World")));

    // kept alive: the same connection is served again
    let reply = send_and_receive(&mut conn, &mut client, &request).await.unwrap();
    assert_eq!(&reply.0[..], b"World");

    conn.close().await.unwrap();
    server.shutdown();
    server.join().await.unwrap();
}

#[tokio::test]
async fn custom_reply_is_shared_by_all_instances() {
    let server = start(EchoHandler::new("echo", 3).with_reply("pong"), ServerConfig::default()).await;
    let addr = server.local_addr();

    let mut clients = Vec::new();
    for _ in 0..3 {
        clients.push(TcpStream::connect(addr).await.unwrap());
    }
    for client in &mut clients {
        assert_eq!(exchange(client, b"ping").await, b"pong");
    }

    drop(clients);
    server.shutdown();
    server.join().await.unwrap();
}

#[tokio::test]
async fn single_worker_serves_queued_connection_after_first_closes() {
    let handler = EchoHandler::new("echo", 1).with_queue_capacity(1);
    let server = start(handler, ServerConfig::default()).await;
    let addr = server.local_addr();

    // the only worker blocks reading the first connection
    let mut first = TcpStream::connect(addr).await.unwrap();
    assert_eq!(exchange(&mut first, b"Hello").await, b"World");

    let mut second = TcpStream::connect(addr).await.unwrap();
    second.write_all(&[b'x'; 2048]).await.unwrap();
    let mut buf = [0u8; 16];
    assert!(timeout(SILENCE, second.read(&mut buf)).await.is_err());

    drop(first);
    let n = timeout(Duration::from_secs(5), second.read(&mut buf)).await.unwrap().unwrap();
    assert!(buf[..n].starts_with(b"World"));

    drop(second);
    server.shutdown();
    server.join().await.unwrap();
}

#[tokio::test]
async fn zero_queue_capacity_refuses_to_start() {
    let server = start(EchoHandler::new("echo", 1).with_queue_capacity(0), ServerConfig::default()).await;
    let result = server.join().await;
    assert!(matches!(result, Err(ServeError::InvalidQueueCapacity { capacity: 0, .. })));
}

#[tokio::test]
async fn no_handlers_refuses_to_start() {
    let server = start(EchoHandler::new("echo", 0), ServerConfig::default()).await;
    assert!(matches!(server.join().await, Err(ServeError::NoHandlers { .. })));
}

#[tokio::test]
async fn empty_address_binds_default_port_or_fails_with_bind_error() {
    match Server::bind("").await {
        Ok(server) => assert_eq!(server.local_addr().unwrap().port(), 80),
        Err(e) => assert!(matches!(e, ServeError::Bind { ref address, .. } if address == "0.0.0.0:80")),
    }
}

/// Panics on "boom", answers "ok" otherwise.
#[derive(Debug)]
struct FaultyHandler {
    counter: SpawnCounter,
    cleanups: Arc<AtomicUsize>,
}

impl FaultyHandler {
    fn new(limit: usize, cleanups: Arc<AtomicUsize>) -> Self {
        Self { counter: SpawnCounter::new(limit), cleanups }
    }
}

#[async_trait]
impl Handler for FaultyHandler {
    async fn handle(&mut self, conn: &mut Connection) -> Result<(), HandleError> {
        let mut buf = [0u8; 16];
        let n = conn.read(&mut buf).await?;
        if n == 0 {
            return Err(HandleError::ClientClosed);
        }
        assert!(&buf[..n] != b"boom", "handler exploded");
        conn.write_all(b"ok").await?;
        Ok(())
    }

    fn spawn(&mut self) -> Result<Self, HandlerLimitReached> {
        let id = self.counter.next_id()?;
        Ok(Self { counter: self.counter.child(id), cleanups: Arc::clone(&self.cleanups) })
    }

    fn cleanup(&mut self) {
        self.cleanups.fetch_add(1, Ordering::SeqCst);
    }

    fn tag(&self) -> String {
        self.counter.tag("faulty")
    }

    fn connection_queue_capacity(&self) -> usize {
        4
    }
}

#[tokio::test]
async fn panic_retires_worker() {
    let cleanups = Arc::new(AtomicUsize::new(0));
    let server = start(FaultyHandler::new(1, Arc::clone(&cleanups)), ServerConfig::default()).await;
    let addr = server.local_addr();

    let mut first = TcpStream::connect(addr).await.unwrap();
    first.write_all(b"boom").await.unwrap();
    let mut buf = [0u8; 16];
    let n = timeout(Duration::from_secs(5), first.read(&mut buf)).await.unwrap().unwrap();
    assert_eq!(n, 0, "faulting connection is closed");

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(cleanups.load(Ordering::SeqCst), 1);

    // the pool had a single worker and it is gone
    let mut second = TcpStream::connect(addr).await.unwrap();
    second.write_all(b"hi").await.unwrap();
    assert!(timeout(SILENCE, second.read(&mut buf)).await.is_err());

    server.shutdown();
    server.join().await.unwrap();
    assert_eq!(cleanups.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn resume_policy_keeps_worker_serving() {
    let cleanups = Arc::new(AtomicUsize::new(0));
    let config = ServerConfig::default().with_fault_policy(FaultPolicy::ResumeWorker);
    let server = start(FaultyHandler::new(1, Arc::clone(&cleanups)), config).await;
    let addr = server.local_addr();

    let mut first = TcpStream::connect(addr).await.unwrap();
    first.write_all(b"boom").await.unwrap();
    let mut buf = [0u8; 16];
    let n = timeout(Duration::from_secs(5), first.read(&mut buf)).await.unwrap().unwrap();
    assert_eq!(n, 0);

    let mut second = TcpStream::connect(addr).await.unwrap();
    assert_eq!(exchange(&mut second, b"hi").await, b"ok");
    assert_eq!(cleanups.load(Ordering::SeqCst), 0);

    drop(second);
    server.shutdown();
    server.join().await.unwrap();
    assert_eq!(cleanups.load(Ordering::SeqCst), 1);
}

/// Replies with the bytes captured during the cycle, then starts a new cycle.
#[derive(Debug)]
struct MirrorHandler {
    counter: SpawnCounter,
}

#[async_trait]
impl Handler for MirrorHandler {
    async fn handle(&mut self, conn: &mut Connection) -> Result<(), HandleError> {
        let mut buf = [0u8; 4];
        let n = conn.read(&mut buf).await?;
        if n == 0 {
            return Err(HandleError::ClientClosed);
        }

        let reply = match conn.raw_data() {
            RawData::Captured(bytes) => bytes.to_vec(),
            RawData::NotRecording => b"not recording".to_vec(),
            RawData::Discarded => b"discarded".to_vec(),
        };
        conn.reset_read_data();
        conn.write_all(&reply).await?;
        Ok(())
    }

    fn spawn(&mut self) -> Result<Self, HandlerLimitReached> {
        let id = self.counter.next_id()?;
        Ok(Self { counter: self.counter.child(id) })
    }

    fn tag(&self) -> String {
        self.counter.tag("mirror")
    }

    fn connection_queue_capacity(&self) -> usize {
        1
    }
}

#[tokio::test]
async fn shutdown_abandons_in_flight_cycle() {
    let server = start(EchoHandler::new("echo", 1), ServerConfig::default()).await;
    let mut client = TcpStream::connect(server.local_addr()).await.unwrap();

    // the only worker is now blocked reading from the silent client
    tokio::time::sleep(SILENCE).await;
    server.shutdown();
    timeout(Duration::from_secs(5), server.join()).await.unwrap().unwrap();

    let mut buf = [0u8; 8];
    let read = timeout(Duration::from_secs(5), client.read(&mut buf)).await.unwrap();
    assert!(matches!(read, Ok(0) | Err(_)));
}

#[tokio::test]
async fn accepted_connections_record_by_default() {
    let server = start(MirrorHandler { counter: SpawnCounter::new(1) }, ServerConfig::default()).await;
    let mut client = TcpStream::connect(server.local_addr()).await.unwrap();

    assert_eq!(exchange(&mut client, b"abc").await, b"abc");
    assert_eq!(exchange(&mut client, b"de").await, b"de");

    drop(client);
    server.shutdown();
    server.join().await.unwrap();
}

#[tokio::test]
async fn recording_can_be_switched_off() {
    let config = ServerConfig::default().with_record_read_data(false);
    let server = start(MirrorHandler { counter: SpawnCounter::new(1) }, config).await;
    let mut client = TcpStream::connect(server.local_addr()).await.unwrap();

    assert_eq!(exchange(&mut client, b"abc").await, b"not recording");

    drop(client);
    server.shutdown();
    server.join().await.unwrap();
}

#[tokio::test]
async fn oversized_capture_is_discarded() {
    let config = ServerConfig::default().with_max_record_size(2);
    let server = start(MirrorHandler { counter: SpawnCounter::new(1) }, config).await;
    let mut client = TcpStream::connect(server.local_addr()).await.unwrap();

    assert_eq!(exchange(&mut client, b"abc").await, b"discarded");
    assert_eq!(exchange(&mut client, b"ab").await, b"ab");

    drop(client);
    server.shutdown();
    server.join().await.unwrap();
}
