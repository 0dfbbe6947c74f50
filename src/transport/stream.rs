//! Socket establishment for Electrum servers.
//!
//! Electrum servers listen on plain TCP (conventionally port 50001) and on
//! TLS (conventionally port 50002). Many public servers use self-signed
//! certificates, so certificate verification can be switched off per
//! server via [`ServerConfig::accept_invalid_certs`].
//!
//! The [`Connector`] trait is the seam the lifecycle manager dials
//! through; [`TcpConnector`] is the production implementation.

// ============================================================================
// Imports
// ============================================================================

use std::result::Result as StdResult;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::{CryptoProvider, ring, verify_tls12_signature, verify_tls13_signature};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{ClientConfig, DigitallySignedStruct, RootCertStore, SignatureScheme};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_rustls::TlsConnector;
use tracing::debug;

use crate::config::{Protocol, ServerConfig};
use crate::error::{Error, Result};

// ============================================================================
// Constants
// ============================================================================

/// Default time allowed for TCP connect plus TLS handshake.
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

// ============================================================================
// Socket
// ============================================================================

/// Byte stream a transport can run over.
pub trait Socket: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T> Socket for T where T: AsyncRead + AsyncWrite + Send + Unpin {}

/// Type-erased socket (plain TCP, TLS, or an in-memory pipe in tests).
pub type BoxedSocket = Box<dyn Socket>;

// ============================================================================
// Connector
// ============================================================================

/// Opens sockets to Electrum servers.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Opens one socket to `server`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Connection`] when the endpoint is refused,
    /// unreachable, or the TLS handshake fails.
    async fn connect(&self, server: &ServerConfig) -> Result<BoxedSocket>;
}

// ============================================================================
// TcpConnector
// ============================================================================

/// Connector for real network endpoints.
#[derive(Debug, Clone)]
pub struct TcpConnector {
    /// Upper bound for connect + handshake.
    connect_timeout: Duration,
}

impl Default for TcpConnector {
    fn default() -> Self {
        Self {
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }
}

impl TcpConnector {
    /// Creates a connector with the default timeout.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the connect + handshake timeout.
    #[inline]
    #[must_use]
    pub fn with_connect_timeout(mut self, connect_timeout: Duration) -> Self {
        self.connect_timeout = connect_timeout;
        self
    }

    async fn dial(&self, server: &ServerConfig) -> Result<BoxedSocket> {
        let stream = TcpStream::connect((server.host.as_str(), server.port))
            .await
            .map_err(|e| Error::connection(format!("{server}: {e}")))?;
        stream.set_nodelay(true)?;

        match server.protocol {
            Protocol::Tcp => Ok(Box::new(stream)),
            Protocol::Tls => {
                let config = tls_config(server.accept_invalid_certs)?;
                let name = ServerName::try_from(server.host.clone())
                    .map_err(|e| Error::config(format!("Invalid TLS server name: {e}")))?;

                let tls = TlsConnector::from(config)
                    .connect(name, stream)
                    .await
                    .map_err(|e| Error::connection(format!("{server}: TLS handshake: {e}")))?;

                Ok(Box::new(tls))
            }
        }
    }
}

#[async_trait]
impl Connector for TcpConnector {
    async fn connect(&self, server: &ServerConfig) -> Result<BoxedSocket> {
        debug!(%server, "Dialing Electrum server");

        timeout(self.connect_timeout, self.dial(server))
            .await
            .map_err(|_| {
                Error::connection(format!(
                    "{server}: connect timed out after {}ms",
                    self.connect_timeout.as_millis()
                ))
            })?
    }
}

// ============================================================================
// TLS
// ============================================================================

/// Builds the rustls client configuration.
fn tls_config(accept_invalid_certs: bool) -> Result<Arc<ClientConfig>> {
    let provider = Arc::new(ring::default_provider());
    let builder =
        ClientConfig::builder_with_provider(Arc::clone(&provider)).with_safe_default_protocol_versions()?;

    let config = if accept_invalid_certs {
        builder
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(AcceptAnyCertificate(provider)))
            .with_no_client_auth()
    } else {
        let roots = RootCertStore {
            roots: webpki_roots::TLS_SERVER_ROOTS.to_vec(),
        };
        builder.with_root_certificates(roots).with_no_client_auth()
    };

    Ok(Arc::new(config))
}

/// Verifier that accepts any server certificate but still checks handshake signatures.
#[derive(Debug)]
struct AcceptAnyCertificate(Arc<CryptoProvider>);

impl ServerCertVerifier for AcceptAnyCertificate {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> StdResult<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> StdResult<HandshakeSignatureValid, rustls::Error> {
        verify_tls12_signature(message, cert, dss, &self.0.signature_verification_algorithms)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> StdResult<HandshakeSignatureValid, rustls::Error> {
        verify_tls13_signature(message, cert, dss, &self.0.signature_verification_algorithms)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.0.signature_verification_algorithms.supported_schemes()
    }
}

// ============================================================================
// Tests
// ============================================================================
