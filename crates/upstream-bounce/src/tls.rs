//! TLS credential loading for HTTPS instances.

use rustls::pki_types::CertificateDer;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_rustls::TlsAcceptor;

/// File name of the PEM private key inside the TLS directory.
pub const KEY_FILE: &str = "internal.key";
/// File name of the PEM certificate chain inside the TLS directory.
pub const CERT_FILE: &str = "internal.cert";

/// Location of the certificate and key an HTTPS instance serves with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsCredentials {
    pub cert_path: PathBuf,
    pub key_path: PathBuf,
}

impl TlsCredentials {
    /// Credentials at the fixed file names inside `dir`.
    pub fn in_dir(dir: impl AsRef<Path>) -> Self {
        let dir = dir.as_ref();
        Self {
            cert_path: dir.join(CERT_FILE),
            key_path: dir.join(KEY_FILE),
        }
    }

    /// Read both files and build an acceptor.
    pub fn acceptor(&self) -> Result<TlsAcceptor, anyhow::Error> {
        create_tls_acceptor(&self.cert_path, &self.key_path)
    }
}

/// Create TLS acceptor from certificate and key files.
pub fn create_tls_acceptor(cert_path: &Path, key_path: &Path) -> Result<TlsAcceptor, anyhow::Error> {
    let cert_display = cert_path.display();
    let cert_file = std::fs::File::open(cert_path)
        .map_err(|e| anyhow::anyhow!("Failed to open certificate file '{cert_display}': {e}"))?;
    let mut cert_reader = std::io::BufReader::new(cert_file);
    let certs: Vec<CertificateDer> = rustls_pemfile::certs(&mut cert_reader)
        .collect::<Result<_, _>>()
        .map_err(|e| anyhow::anyhow!("Failed to parse certificate file: {e}"))?;

    if certs.is_empty() {
        anyhow::bail!("No certificates found in certificate file: {cert_display}");
    }

    let key_display = key_path.display();
    let key_file = std::fs::File::open(key_path)
        .map_err(|e| anyhow::anyhow!("Failed to open private key file '{key_display}': {e}"))?;
    let mut key_reader = std::io::BufReader::new(key_file);

    // PKCS8, RSA or EC
    let key = rustls_pemfile::private_key(&mut key_reader)
        .map_err(|e| anyhow::anyhow!("Failed to parse private key file: {e}"))?
        .ok_or_else(|| anyhow::anyhow!("No private key found in key file: {key_display}"))?;

    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let config = rustls::ServerConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .map_err(|e| anyhow::anyhow!("Failed to select TLS protocol versions: {e}"))?
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(|e| anyhow::anyhow!("Failed to build TLS configuration: {e}"))?;

    Ok(TlsAcceptor::from(Arc::new(config)))
}
