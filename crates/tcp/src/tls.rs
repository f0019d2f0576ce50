//! TLS configuration for listeners and dialers.
//!
//! Both sides use rustls with the ring crypto provider. Listeners advertise
//! `http/1.1` through ALPN; dialers verify the peer against webpki roots,
//! a caller supplied root store, or (for interception setups) not at all.

use std::fmt;
use std::fs::File;
use std::io::{BufReader, Cursor};
use std::path::Path;
use std::sync::Arc;

use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::{CryptoProvider, verify_tls12_signature, verify_tls13_signature};
use rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName, UnixTime};
use rustls::{CipherSuite, CommonState, DigitallySignedStruct, ProtocolVersion, RootCertStore, SignatureScheme};
use tokio::net::TcpStream;
use tokio_rustls::{TlsAcceptor, TlsConnector};

use crate::error::ConnectionError;

const ALPN_HTTP_11: &[u8] = b"http/1.1";

fn provider() -> Arc<CryptoProvider> {
    Arc::new(rustls::crypto::ring::default_provider())
}

/// Description of a completed TLS handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsInfo {
    pub protocol_version: Option<ProtocolVersion>,
    pub cipher_suite: Option<CipherSuite>,
    pub alpn_protocol: Option<Vec<u8>>,
    pub server_name: Option<String>,
}

impl TlsInfo {
    fn from_common(common: &CommonState, server_name: Option<String>) -> Result<Self, ConnectionError> {
        if common.is_handshaking() {
            return Err(ConnectionError::tls_handshake(std::io::Error::other("handshake incomplete")));
        }

        Ok(Self {
            protocol_version: common.protocol_version(),
            cipher_suite: common.negotiated_cipher_suite().map(|suite| suite.suite()),
            alpn_protocol: common.alpn_protocol().map(<[u8]>::to_vec),
            server_name,
        })
    }
}

/// Server side TLS settings: the certificate chain and private key a listener presents.
#[derive(Clone)]
pub struct TlsConfig {
    inner: Arc<rustls::ServerConfig>,
}

impl fmt::Debug for TlsConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TlsConfig").field("alpn_protocols", &self.inner.alpn_protocols).finish_non_exhaustive()
    }
}

impl TlsConfig {
    pub fn new(cert_chain: Vec<CertificateDer<'static>>, key: PrivateKeyDer<'static>) -> Result<Self, ConnectionError> {
        let mut config = rustls::ServerConfig::builder_with_provider(provider())
            .with_safe_default_protocol_versions()?
            .with_no_client_auth()
            .with_single_cert(cert_chain, key)?;
        config.alpn_protocols = vec![ALPN_HTTP_11.to_vec()];

        Ok(Self { inner: Arc::new(config) })
    }

    /// Builds the configuration from PEM encoded certificate chain and private key.
    pub fn from_pem(cert_pem: &[u8], key_pem: &[u8]) -> Result<Self, ConnectionError> {
        let certs = rustls_pemfile::certs(&mut Cursor::new(cert_pem)).collect::<Result<Vec<_>, _>>()?;
        if certs.is_empty() {
            return Err(ConnectionError::tls_config("no certificate found in pem input"));
        }

        let key = rustls_pemfile::private_key(&mut Cursor::new(key_pem))?
            .ok_or_else(|| ConnectionError::tls_config("no private key found in pem input"))?;

        Self::new(certs, key)
    }

    pub fn from_pem_files<P: AsRef<Path>>(cert_file: P, key_file: P) -> Result<Self, ConnectionError> {
        let certs = rustls_pemfile::certs(&mut BufReader::new(File::open(cert_file)?)).collect::<Result<Vec<_>, _>>()?;
        if certs.is_empty() {
            return Err(ConnectionError::tls_config("no certificate found in certificate file"));
        }

        let key = rustls_pemfile::private_key(&mut BufReader::new(File::open(key_file)?))?
            .ok_or_else(|| ConnectionError::tls_config("no private key found in key file"))?;

        Self::new(certs, key)
    }

    pub(crate) fn acceptor(&self) -> TlsAcceptor {
        TlsAcceptor::from(Arc::clone(&self.inner))
    }
}

/// Client side TLS settings used by [`connect_tls`](crate::client::connect_tls).
#[derive(Clone)]
pub struct ClientTlsConfig {
    inner: Arc<rustls::ClientConfig>,
    verify_host: bool,
}

impl fmt::Debug for ClientTlsConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientTlsConfig").field("verify_host", &self.verify_host).finish_non_exhaustive()
    }
}

impl ClientTlsConfig {
    /// Verifies peers against the bundled webpki root certificates.
    pub fn webpki() -> Result<Self, ConnectionError> {
        Self::with_roots(RootCertStore { roots: webpki_roots::TLS_SERVER_ROOTS.to_vec() })
    }

    /// Verifies peers against the given root store.
    pub fn with_roots(roots: RootCertStore) -> Result<Self, ConnectionError> {
        let mut config = rustls::ClientConfig::builder_with_provider(provider())
            .with_safe_default_protocol_versions()?
            .with_root_certificates(roots)
            .with_no_client_auth();
        config.alpn_protocols = vec![ALPN_HTTP_11.to_vec()];

        Ok(Self { inner: Arc::new(config), verify_host: true })
    }

    /// Accepts any certificate the peer presents.
    pub fn insecure() -> Result<Self, ConnectionError> {
        let provider = provider();
        let mut config = rustls::ClientConfig::builder_with_provider(Arc::clone(&provider))
            .with_safe_default_protocol_versions()?
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(NoVerifier { provider }))
            .with_no_client_auth();
        config.alpn_protocols = vec![ALPN_HTTP_11.to_vec()];

        Ok(Self { inner: Arc::new(config), verify_host: false })
    }

    #[inline]
    pub fn verify_host(&self) -> bool {
        self.verify_host
    }

    pub(crate) fn connector(&self) -> TlsConnector {
        TlsConnector::from(Arc::clone(&self.inner))
    }
}

/// Runs the server side handshake on an accepted socket.
///
/// The socket is consumed: when the handshake fails it is dropped, which closes it.
pub(crate) async fn accept(acceptor: &TlsAcceptor, stream: TcpStream) -> Result<(tokio_rustls::TlsStream<TcpStream>, TlsInfo), ConnectionError> {
    let stream = acceptor.accept(stream).await.map_err(ConnectionError::tls_handshake)?;
    let (_, session) = stream.get_ref();
    let server_name = session.server_name().map(str::to_owned);
    let info = TlsInfo::from_common(session, server_name)?;
    Ok((tokio_rustls::TlsStream::Server(stream), info))
}

/// Runs the client side handshake on a dialed socket.
pub(crate) async fn connect(
    config: &ClientTlsConfig,
    server_name: &str,
    stream: TcpStream,
) -> Result<(tokio_rustls::TlsStream<TcpStream>, TlsInfo), ConnectionError> {
    let name = ServerName::try_from(server_name.to_owned()).map_err(|_e| ConnectionError::invalid_server_name(server_name))?;
    let stream = config.connector().connect(name, stream).await.map_err(ConnectionError::tls_handshake)?;
    let (_, session) = stream.get_ref();
    let info = TlsInfo::from_common(session, Some(server_name.to_owned()))?;
    Ok((tokio_rustls::TlsStream::Client(stream), info))
}

/// Certificate verifier that trusts every peer, signatures are still checked.
#[derive(Debug)]
struct NoVerifier {
    provider: Arc<CryptoProvider>,
}

impl ServerCertVerifier for NoVerifier {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls12_signature(message, cert, dss, &self.provider.signature_verification_algorithms)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls13_signature(message, cert, dss, &self.provider.signature_verification_algorithms)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.provider.signature_verification_algorithms.supported_schemes()
    }
}
