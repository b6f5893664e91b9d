//! Socket dialing for the concentrator connection.
//!
//! [`Dialer`] is the seam between the connection state machine and the
//! network: production code uses [`TlsDialer`], tests hand in in-memory
//! duplex streams.

use std::fs::File;
use std::future::Future;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::{CryptoProvider, verify_tls12_signature, verify_tls13_signature};
use rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName, UnixTime};
use rustls::{ClientConfig, DigitallySignedStruct, RootCertStore, SignatureScheme};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use tokio_rustls::client::TlsStream;

use crate::error::Error;

// ── Dialer capability ────────────────────────────────────────────────

/// Opens byte streams to the concentrator.
pub trait Dialer: Send + Sync + 'static {
    type Stream: AsyncRead + AsyncWrite + Unpin + Send + 'static;

    /// Open a new stream. Each call yields an independent session.
    fn dial(&self) -> impl Future<Output = Result<Self::Stream, Error>> + Send;

    /// `host:port` of the remote end, for logs and status.
    fn endpoint(&self) -> &str;
}

// ── TLS dialer ───────────────────────────────────────────────────────

/// How the concentrator's server certificate is checked.
#[derive(Debug, Clone, Default)]
pub enum ServerVerification {
    /// Accept any certificate. The concentrator presents a self-signed one.
    #[default]
    AcceptAny,
    /// Verify against a CA certificate from the given PEM file.
    CustomCa(PathBuf),
}

#[derive(Debug, Clone)]
pub struct TlsDialerConfig {
    pub host: String,
    pub port: u16,
    pub client_cert: PathBuf,
    pub client_key: PathBuf,
    pub verification: ServerVerification,
    pub connect_timeout: Duration,
}

/// TLS-over-TCP dialer authenticating with a client certificate.
pub struct TlsDialer {
    host: String,
    port: u16,
    endpoint: String,
    server_name: ServerName<'static>,
    connector: TlsConnector,
    connect_timeout: Duration,
}

impl TlsDialer {
    /// Load the certificate material and build the TLS client.
    ///
    /// Unreadable or invalid PEM files fail here, before any dialing.
    pub fn new(config: &TlsDialerConfig) -> Result<Self, Error> {
        let certs = load_certs(&config.client_cert, "client certificate")?;
        let key = load_key(&config.client_key)?;

        let provider = Arc::new(rustls::crypto::ring::default_provider());
        let builder = ClientConfig::builder_with_provider(Arc::clone(&provider))
            .with_safe_default_protocol_versions()
            .map_err(|e| Error::Tls(e.to_string()))?;

        let builder = match &config.verification {
            ServerVerification::AcceptAny => {
                tracing::warn!(
                    host = %config.host,
                    "server certificate verification is disabled for the concentrator"
                );
                builder
                    .dangerous()
                    .with_custom_certificate_verifier(Arc::new(AcceptAnyServerCert { provider }))
            }
            ServerVerification::CustomCa(path) => {
                let mut roots = RootCertStore::empty();
                for cert in load_certs(path, "CA certificate")? {
                    roots.add(cert).map_err(|e| Error::Tls(e.to_string()))?;
                }
                builder.with_root_certificates(roots)
            }
        };

        let tls = builder
            .with_client_auth_cert(certs, key)
            .map_err(|e| Error::Tls(format!("invalid client certificate or key: {e}")))?;

        let server_name = ServerName::try_from(config.host.clone())
            .map_err(|e| Error::Tls(format!("invalid server name {}: {e}", config.host)))?;

        Ok(Self {
            host: config.host.clone(),
            port: config.port,
            endpoint: format!("{}:{}", config.host, config.port),
            server_name,
            connector: TlsConnector::from(Arc::new(tls)),
            connect_timeout: config.connect_timeout,
        })
    }

    fn connect_error(&self, source: std::io::Error) -> Error {
        Error::Connect {
            endpoint: self.endpoint.clone(),
            source,
        }
    }
}

impl Dialer for TlsDialer {
    type Stream = TlsStream<TcpStream>;

    async fn dial(&self) -> Result<Self::Stream, Error> {
        let connect = async {
            let tcp = TcpStream::connect((self.host.as_str(), self.port)).await?;
            tcp.set_nodelay(true)?;
            self.connector.connect(self.server_name.clone(), tcp).await
        };

        match tokio::time::timeout(self.connect_timeout, connect).await {
            Ok(Ok(stream)) => Ok(stream),
            Ok(Err(e)) => Err(self.connect_error(e)),
            Err(_) => Err(self.connect_error(std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                format!("timed out after {}s", self.connect_timeout.as_secs()),
            ))),
        }
    }

    fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

// ── PEM loading ──────────────────────────────────────────────────────

fn open_pem(path: &Path, what: &str) -> Result<BufReader<File>, Error> {
    File::open(path)
        .map(BufReader::new)
        .map_err(|e| Error::Tls(format!("could not read {what} {}: {e}", path.display())))
}

fn load_certs(path: &Path, what: &str) -> Result<Vec<CertificateDer<'static>>, Error> {
    let mut reader = open_pem(path, what)?;
    let certs = rustls_pemfile::certs(&mut reader)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| Error::Tls(format!("invalid {what} {}: {e}", path.display())))?;

    if certs.is_empty() {
        return Err(Error::Tls(format!(
            "no certificates found in {what} {}",
            path.display()
        )));
    }
    Ok(certs)
}

fn load_key(path: &Path) -> Result<PrivateKeyDer<'static>, Error> {
    let mut reader = open_pem(path, "client key")?;
    rustls_pemfile::private_key(&mut reader)
        .map_err(|e| Error::Tls(format!("invalid client key {}: {e}", path.display())))?
        .ok_or_else(|| Error::Tls(format!("no private key found in {}", path.display())))
}

// ── Certificate verifier ─────────────────────────────────────────────

/// Skips chain and name checks but still verifies handshake signatures.
#[derive(Debug)]
struct AcceptAnyServerCert {
    provider: Arc<CryptoProvider>,
}

impl ServerCertVerifier for AcceptAnyServerCert {
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
        verify_tls12_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls13_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.provider
            .signature_verification_algorithms
            .supported_schemes()
    }
}

// ── Tests ────────────────────────────────────────────────────────────
