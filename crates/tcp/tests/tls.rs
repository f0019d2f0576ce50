use std::time::Duration;

use bytes::Bytes;
use rustls::RootCertStore;
use rustls::pki_types::CertificateDer;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;

use micro_tcp::client::{connect_tls, send_and_receive};
use micro_tcp::error::ConnectionError;
use micro_tcp::handler::{DataStream, EchoClientHandler, EchoHandler};
use micro_tcp::server::{Server, ServerConfig};
use micro_tcp::tls::{ClientTlsConfig, TlsConfig};

fn self_signed() -> (TlsConfig, CertificateDer<'static>) {
    let cert = rcgen::generate_simple_self_signed(vec!["localhost".to_string()]).unwrap();
    let cert_der = CertificateDer::from(cert.serialize_der().unwrap());
    let config = TlsConfig::from_pem(cert.serialize_pem().unwrap().as_bytes(), cert.serialize_private_key_pem().as_bytes()).unwrap();
    (config, cert_der)
}

#[tokio::test]
async fn tls_echo_with_verified_certificate() {
    let (server_tls, cert) = self_signed();
    let server = Server::bind_tls("127.0.0.1:0", server_tls).await.unwrap().spawn(EchoHandler::new("tls echo", 1)).unwrap();

    let mut roots = RootCertStore::empty();
    roots.add(cert).unwrap();
    let client_tls = ClientTlsConfig::with_roots(roots).unwrap();

    let mut conn = connect_tls(&server.local_addr().to_string(), "localhost", &client_tls).await.unwrap();
    let info = conn.tls().unwrap();
    assert_eq!(info.alpn_protocol.as_deref(), Some(&b"http/1.1"[..]));
    assert_eq!(info.server_name.as_deref(), Some("localhost"));
    assert!(info.protocol_version.is_some());

    let reply = send_and_receive(&mut conn, &mut EchoClientHandler::new(), &DataStream(Bytes::from_static(b"Hello"))).await.unwrap();
    assert_eq!(&reply.0[..], b"World");

    conn.close().await.unwrap();
    server.shutdown();
    server.join().await.unwrap();
}

#[tokio::test]
async fn insecure_client_skips_verification() {
    let (server_tls, _cert) = self_signed();
    let server = Server::bind_tls("127.0.0.1:0", server_tls).await.unwrap().spawn(EchoHandler::new("tls echo", 1)).unwrap();

    let client_tls = ClientTlsConfig::insecure().unwrap();
    let mut conn = connect_tls(&server.local_addr().to_string(), "localhost", &client_tls).await.unwrap();
    let reply = send_and_receive(&mut conn, &mut EchoClientHandler::new(), &DataStream(Bytes::from_static(b"Hello"))).await.unwrap();
    assert_eq!(&reply.0[..], b"World");

    conn.close().await.unwrap();
    server.shutdown();
    server.join().await.unwrap();
}

#[tokio::test]
async fn untrusted_certificate_fails_handshake() {
    let (server_tls, _cert) = self_signed();
    let server = Server::bind_tls("127.0.0.1:0", server_tls).await.unwrap().spawn(EchoHandler::new("tls echo", 1)).unwrap();

    let client_tls = ClientTlsConfig::with_roots(RootCertStore::empty()).unwrap();
    let result = connect_tls(&server.local_addr().to_string(), "localhost", &client_tls).await;
    assert!(matches!(result, Err(ConnectionError::TlsHandshake { .. })));

    server.shutdown();
    server.join().await.unwrap();
}

#[tokio::test]
async fn server_survives_plain_text_client() {
    let (server_tls, _cert) = self_signed();
    let config = ServerConfig::default().with_tls_handshake_timeout(Duration::from_millis(200));
    let server = Server::bind_tls("127.0.0.1:0", server_tls)
        .await
        .unwrap()
        .with_config(config)
        .spawn(EchoHandler::new("tls echo", 1))
        .unwrap();
    let addr = server.local_addr().to_string();

    let mut plain = TcpStream::connect(&addr).await.unwrap();
    plain.write_all(b"GET / HTTP/1.1\r\n\r\n").await.unwrap();

    let client_tls = ClientTlsConfig::insecure().unwrap();
    let mut conn = connect_tls(&addr, "localhost", &client_tls).await.unwrap();
    let reply = send_and_receive(&mut conn, &mut EchoClientHandler::new(), &DataStream(Bytes::from_static(b"Hello"))).await.unwrap();
    assert_eq!(&reply.0[..], b"World");

    conn.close().await.unwrap();
    server.shutdown();
    server.join().await.unwrap();
}
