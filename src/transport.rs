use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite, DuplexStream};
use tokio::net::TcpStream;

use crate::result::{Error, Result};

/// Anything an HTTP/2 connection can be driven over. Blanket-implemented for any
/// duplex byte stream, so the mock server and tests can swap in an in-memory pipe
/// with no TLS at all (§6, OUT OF SCOPE: TLS stack selection).
pub trait Transport: AsyncRead + AsyncWrite + Unpin + Send + 'static {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send + 'static> Transport for T {}

/// Builds the byte-stream a [`crate::protocol::ProtocolHandler`] drives (§6).
///
/// The factory is the only component that owns transport construction; connections
/// and the pool treat the resulting stream opaquely.
#[async_trait]
pub trait TransportFactory: Send + Sync {
    type Stream: Transport;

    async fn connect(&self) -> Result<Self::Stream>;
}

/// Where to connect for real APNs traffic (§6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endpoint {
    Production,
    Development,
}

impl Endpoint {
    pub fn host(self) -> &'static str {
        match self {
            Endpoint::Production => "api.push.apple.com",
            Endpoint::Development => "api.development.push.apple.com",
        }
    }

    pub fn port(self) -> u16 {
        443
    }
}

/// Dials `host:port` over TCP and layers `rustls` with ALPN `h2` (§6).
#[cfg(feature = "rustls")]
pub struct RustlsTransportFactory {
    endpoint: Endpoint,
    port: u16,
    connector: tokio_rustls::TlsConnector,
    server_name: rustls::ServerName,
}

#[cfg(feature = "rustls")]
impl RustlsTransportFactory {
    pub fn new(endpoint: Endpoint) -> Result<Self> {
        Self::with_port(endpoint, endpoint.port())
    }

    pub fn with_port(endpoint: Endpoint, port: u16) -> Result<Self> {
        let mut root_store = rustls::RootCertStore::empty();
        root_store.add_trust_anchors(webpki_roots::TLS_SERVER_ROOTS.iter().map(|ta| {
            rustls::OwnedTrustAnchor::from_subject_spki_name_constraints(
                ta.subject,
                ta.spki,
                ta.name_constraints,
            )
        }));

        let mut config = rustls::ClientConfig::builder()
            .with_safe_defaults()
            .with_root_certificates(root_store)
            .with_no_client_auth();
        config.alpn_protocols = vec![b"h2".to_vec()];

        let server_name = rustls::ServerName::try_from(endpoint.host())
            .map_err(|e| Error::invalid_argument(format!("invalid DNS name {}: {e}", endpoint.host())))?;

        Ok(Self {
            endpoint,
            port,
            connector: tokio_rustls::TlsConnector::from(Arc::new(config)),
            server_name,
        })
    }

    /// Like [`Self::with_client_certificate`], parsing the certificate chain and
    /// private key from PEM bytes (the APNs provisioning portal hands out a `.p12`;
    /// this expects it already converted to PEM, which is out of scope here — see
    /// `KeyStore` in §6).
    pub fn with_client_certificate_pem(
        endpoint: Endpoint,
        port: u16,
        cert_chain_pem: &[u8],
        private_key_pem: &[u8],
    ) -> Result<Self> {
        let cert_chain = rustls_pemfile::certs(&mut &cert_chain_pem[..])
            .map_err(Error::transport)?
            .into_iter()
            .map(rustls::Certificate)
            .collect();
        let private_key = rustls_pemfile::pkcs8_private_keys(&mut &private_key_pem[..])
            .map_err(Error::transport)?
            .into_iter()
            .next()
            .map(rustls::PrivateKey)
            .ok_or_else(|| Error::invalid_argument("no PKCS#8 private key found in PEM"))?;
        Self::with_client_certificate(endpoint, port, cert_chain, private_key)
    }

    /// Attaches a client certificate for certificate-based authentication (§4.6a).
    pub fn with_client_certificate(
        endpoint: Endpoint,
        port: u16,
        cert_chain: Vec<rustls::Certificate>,
        private_key: rustls::PrivateKey,
    ) -> Result<Self> {
        let mut root_store = rustls::RootCertStore::empty();
        root_store.add_trust_anchors(webpki_roots::TLS_SERVER_ROOTS.iter().map(|ta| {
            rustls::OwnedTrustAnchor::from_subject_spki_name_constraints(
                ta.subject,
                ta.spki,
                ta.name_constraints,
            )
        }));

        let mut config = rustls::ClientConfig::builder()
            .with_safe_defaults()
            .with_root_certificates(root_store)
            .with_client_auth_cert(cert_chain, private_key)
            .map_err(Error::transport)?;
        config.alpn_protocols = vec![b"h2".to_vec()];

        let server_name = rustls::ServerName::try_from(endpoint.host())
            .map_err(|e| Error::invalid_argument(format!("invalid DNS name {}: {e}", endpoint.host())))?;

        Ok(Self {
            endpoint,
            port,
            connector: tokio_rustls::TlsConnector::from(Arc::new(config)),
            server_name,
        })
    }
}

#[cfg(feature = "rustls")]
#[async_trait]
impl TransportFactory for RustlsTransportFactory {
    type Stream = tokio_rustls::client::TlsStream<TcpStream>;

    async fn connect(&self) -> Result<Self::Stream> {
        let tcp = TcpStream::connect((self.endpoint.host(), self.port))
            .await
            .map_err(Error::transport)?;
        tcp.set_nodelay(true).map_err(Error::transport)?;
        let tls = self
            .connector
            .connect(self.server_name.clone(), tcp)
            .await
            .map_err(Error::transport)?;
        Ok(tls)
    }
}

/// A [`TransportFactory`] over `tokio::io::duplex` pipes: every `connect()` call
/// creates a fresh pair, hands the client half to the caller, and pushes the server
/// half onto an internal queue for a mock-server driver to pick up (§6, test tooling).
pub struct InMemoryTransportFactory {
    buffer_size: usize,
    server_halves: tokio::sync::mpsc::UnboundedSender<DuplexStream>,
}

impl InMemoryTransportFactory {
    /// Returns the factory plus a receiver yielding the server half of each pair the
    /// factory creates, in creation order.
    pub fn new(buffer_size: usize) -> (Self, tokio::sync::mpsc::UnboundedReceiver<DuplexStream>) {
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        (Self { buffer_size, server_halves: tx }, rx)
    }
}

#[async_trait]
impl TransportFactory for InMemoryTransportFactory {
    type Stream = DuplexStream;

    async fn connect(&self) -> Result<Self::Stream> {
        let (client, server) = tokio::io::duplex(self.buffer_size);
        let _ = self.server_halves.send(server);
        Ok(client)
    }
}
