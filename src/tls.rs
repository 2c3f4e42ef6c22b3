use std::path::{Path, PathBuf};
use std::sync::Arc;

use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::{verify_tls12_signature, verify_tls13_signature, CryptoProvider};
use rustls::pki_types::pem::PemObject;
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{ClientConfig, DigitallySignedStruct, RootCertStore, SignatureScheme};
use tokio_rustls::client::TlsStream;
use tokio_rustls::TlsConnector;

use crate::error::{ConnectFailure, Error, Result};
use crate::options::ClientOptions;
use crate::transport::BoxedIo;

const ALPN_HTTP_1_1: &[u8] = b"http/1.1";

/// TLS configuration for HTTPS requests
///
/// Derived from [`ClientOptions`]: peer verification is on when the client
/// asks for it explicitly or when any trust-anchor file is configured.
#[derive(Debug, Clone)]
pub struct TlsConfig {
    /// Whether to verify the server certificate
    pub verify: bool,
    /// Trust-anchor PEM files
    pub ca_cert_paths: Vec<PathBuf>,
    /// Directories whose PEM files are added as trust anchors
    pub ca_dirs: Vec<PathBuf>,
    /// Seed the trust store with the platform roots
    pub native_roots: bool,
    /// TLS version configuration
    pub tls_version: TlsVersion,
}

/// TLS version configuration
#[derive(Debug, Clone)]
pub struct TlsVersion {
    /// Enable TLS 1.2
    pub tls_1_2: bool,
    /// Enable TLS 1.3
    pub tls_1_3: bool,
}

impl TlsVersion {
    /// Create a new TLS version configuration
    pub fn new() -> Self {
        Self {
            tls_1_2: true,
            tls_1_3: true,
        }
    }

    /// Enable only TLS 1.2
    pub fn tls_1_2_only() -> Self {
        Self {
            tls_1_2: true,
            tls_1_3: false,
        }
    }

    /// Enable only TLS 1.3
    pub fn tls_1_3_only() -> Self {
        Self {
            tls_1_2: false,
            tls_1_3: true,
        }
    }

    fn protocol_versions(&self) -> Vec<&'static rustls::SupportedProtocolVersion> {
        let mut versions = Vec::new();
        if self.tls_1_3 {
            versions.push(&rustls::version::TLS13);
        }
        if self.tls_1_2 {
            versions.push(&rustls::version::TLS12);
        }
        versions
    }
}

impl Default for TlsVersion {
    fn default() -> Self {
        Self::new()
    }
}

impl TlsConfig {
    /// Create a new TLS configuration that verifies peers against the platform roots
    pub fn new() -> Self {
        Self {
            verify: true,
            ca_cert_paths: Vec::new(),
            ca_dirs: Vec::new(),
            native_roots: true,
            tls_version: TlsVersion::default(),
        }
    }

    /// Apply the client's verification policy
    pub fn from_options(options: &ClientOptions) -> Self {
        Self {
            verify: verify_peer(options),
            ca_cert_paths: options.certificate_paths.clone(),
            ca_dirs: options.verify_paths.clone(),
            ..Self::new()
        }
    }

    /// Set certificate verification
    pub fn verify(mut self, verify: bool) -> Self {
        self.verify = verify;
        self
    }

    /// Add a CA certificate file
    pub fn ca_cert_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.ca_cert_paths.push(path.into());
        self
    }

    /// Add a directory of CA certificates
    pub fn ca_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.ca_dirs.push(path.into());
        self
    }

    /// Toggle the platform trust store
    pub fn native_roots(mut self, enabled: bool) -> Self {
        self.native_roots = enabled;
        self
    }

    /// Set TLS version configuration
    pub fn tls_version(mut self, version: TlsVersion) -> Self {
        self.tls_version = version;
        self
    }

    /// Check if certificate verification is enabled
    pub fn is_verify_enabled(&self) -> bool {
        self.verify
    }

    /// Build the trust store from native roots, CA files and CA directories
    pub fn root_store(&self) -> Result<RootCertStore> {
        let mut roots = RootCertStore::empty();

        if self.native_roots {
            match rustls_native_certs::load_native_certs() {
                Ok(certs) => {
                    let (added, ignored) = roots.add_parsable_certificates(certs);
                    tracing::debug!(added, ignored, "loaded platform trust anchors");
                }
                Err(e) => tracing::warn!(error = %e, "could not load platform trust anchors"),
            }
        }

        for path in &self.ca_cert_paths {
            for cert in read_pem_certificates(path)? {
                roots
                    .add(cert)
                    .map_err(|e| Error::tls(format!("Invalid CA certificate in {}: {}", path.display(), e)))?;
            }
        }

        for dir in &self.ca_dirs {
            let entries = std::fs::read_dir(dir)
                .map_err(|e| Error::tls(format!("Failed to read CA directory {}: {}", dir.display(), e)))?;
            for entry in entries.flatten() {
                let path = entry.path();
                if !path.is_file() {
                    continue;
                }
                // Directories commonly mix certificates with other files.
                match read_pem_certificates(&path) {
                    Ok(certs) => {
                        roots.add_parsable_certificates(certs);
                    }
                    Err(e) => tracing::debug!(path = %path.display(), error = %e, "skipping file"),
                }
            }
        }

        Ok(roots)
    }

    /// Create a rustls client config from this configuration
    pub fn to_rustls_config(&self) -> Result<ClientConfig> {
        let versions = self.tls_version.protocol_versions();
        if versions.is_empty() {
            return Err(Error::tls("No TLS versions enabled"));
        }

        let provider = Arc::new(rustls::crypto::ring::default_provider());
        let builder = ClientConfig::builder_with_provider(provider.clone())
            .with_protocol_versions(&versions)
            .map_err(|e| Error::tls(e.to_string()))?;

        let mut config = if self.verify {
            builder
                .with_root_certificates(self.root_store()?)
                .with_no_client_auth()
        } else {
            builder
                .dangerous()
                .with_custom_certificate_verifier(Arc::new(NoVerification { provider }))
                .with_no_client_auth()
        };
        config.alpn_protocols = vec![ALPN_HTTP_1_1.to_vec()];

        Ok(config)
    }

    /// Build a connector for `tls_wrap`
    pub fn connector(&self) -> Result<TlsConnector> {
        Ok(TlsConnector::from(Arc::new(self.to_rustls_config()?)))
    }
}

impl Default for TlsConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Peer verification is required when asked for or when trust anchors are configured
pub fn verify_peer(options: &ClientOptions) -> bool {
    options.always_verify_peer || !options.certificate_paths.is_empty()
}

/// Run the client handshake for `host` over an established stream
pub async fn tls_wrap(
    connector: &TlsConnector,
    host: &str,
    stream: BoxedIo,
) -> std::result::Result<TlsStream<BoxedIo>, ConnectFailure> {
    let server_name = ServerName::try_from(host.to_string())
        .map_err(|e| ConnectFailure::Handshake(format!("invalid server name '{}': {}", host, e)))?;
    connector
        .connect(server_name, stream)
        .await
        .map_err(classify_handshake_error)
}

/// Map a handshake error to the connect failure it represents
pub fn classify_handshake_error(err: std::io::Error) -> ConnectFailure {
    let tls_failure = err
        .get_ref()
        .and_then(|inner| inner.downcast_ref::<rustls::Error>())
        .map(|tls_err| match tls_err {
            rustls::Error::InvalidCertificate(reason) => {
                ConnectFailure::CertificateInvalid(format!("{:?}", reason))
            }
            other => ConnectFailure::Handshake(other.to_string()),
        });
    match tls_failure {
        Some(failure) => failure,
        None => match ConnectFailure::from_io(err) {
            ConnectFailure::Io(err) => ConnectFailure::Handshake(err.to_string()),
            other => other,
        },
    }
}

fn read_pem_certificates(path: &Path) -> Result<Vec<CertificateDer<'static>>> {
    let data = std::fs::read(path)
        .map_err(|e| Error::tls(format!("Failed to read certificate {}: {}", path.display(), e)))?;
    let certs = CertificateDer::pem_slice_iter(&data)
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| Error::tls(format!("Failed to parse certificate {}: {:?}", path.display(), e)))?;
    if certs.is_empty() {
        return Err(Error::tls(format!("No certificates found in {}", path.display())));
    }
    Ok(certs)
}

/// Accepts any server certificate; handshake signatures are still checked
#[derive(Debug)]
struct NoVerification {
    provider: Arc<CryptoProvider>,
}

impl ServerCertVerifier for NoVerification {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> std::result::Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls12_signature(message, cert, dss, &self.provider.signature_verification_algorithms)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls13_signature(message, cert, dss, &self.provider.signature_verification_algorithms)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.provider
            .signature_verification_algorithms
            .supported_schemes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verification_policy() {
        let options = ClientOptions::default();
        assert!(!verify_peer(&options));
        assert!(!TlsConfig::from_options(&options).is_verify_enabled());

        let options = ClientOptions::default().with_always_verify_peer(true);
        assert!(verify_peer(&options));

        let options = ClientOptions::default().with_certificate_path("/etc/ssl/ca.pem");
        assert!(verify_peer(&options));
        let config = TlsConfig::from_options(&options);
        assert!(config.is_verify_enabled());
        assert_eq!(config.ca_cert_paths.len(), 1);
    }

    #[test]
    fn test_tls_version() {
        assert_eq!(TlsVersion::new().protocol_versions().len(), 2);
        assert_eq!(TlsVersion::tls_1_3_only().protocol_versions().len(), 1);

        let none = TlsVersion {
            tls_1_2: false,
            tls_1_3: false,
        };
        let err = TlsConfig::new()
            .native_roots(false)
            .tls_version(none)
            .to_rustls_config()
            .unwrap_err();
        assert!(matches!(err, Error::Tls(_)));
    }

    #[test]
    fn test_unverified_config_builds() {
        let config = TlsConfig::new()
            .verify(false)
            .native_roots(false)
            .to_rustls_config()
            .unwrap();
        assert_eq!(config.alpn_protocols, vec![b"http/1.1".to_vec()]);
    }

    #[test]
    fn test_missing_ca_file_is_tls_error() {
        let path = std::env::temp_dir().join("fetchx-missing-ca.pem");
        let err = TlsConfig::new()
            .native_roots(false)
            .ca_cert_path(path)
            .root_store()
            .unwrap_err();
        assert!(matches!(err, Error::Tls(_)));
    }

    #[test]
    fn test_certificate_errors_are_classified() {
        let err = std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            rustls::Error::InvalidCertificate(rustls::CertificateError::UnknownIssuer),
        );
        assert!(matches!(
            classify_handshake_error(err),
            ConnectFailure::CertificateInvalid(_)
        ));

        let err = std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            rustls::Error::HandshakeNotComplete,
        );
        assert!(matches!(classify_handshake_error(err), ConnectFailure::Handshake(_)));

        let err = std::io::Error::from(std::io::ErrorKind::ConnectionReset);
        assert!(matches!(classify_handshake_error(err), ConnectFailure::Reset));
    }
}
