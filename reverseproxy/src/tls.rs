//! TLS for both sides of the proxy
//!
//! Inbound TLS is terminated with a certificate/key pair read from PEM files;
//! there is no automatic provisioning. Outbound TLS to `https` backends
//! trusts the platform's root certificates.

use rustls::crypto::{ring, CryptoProvider};
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::{ClientConfig, RootCertStore, ServerConfig};
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_rustls::TlsAcceptor;
use tracing::{info, warn};

use crate::error::{ProxyError, Result};

fn provider() -> Arc<CryptoProvider> {
    Arc::new(ring::default_provider())
}

/// TLS manager for a static certificate/key pair
pub struct TlsManager {
    cert_path: PathBuf,
    key_path: PathBuf,
}

impl TlsManager {
    /// Create a new TLS manager
    pub fn new(cert_path: impl Into<PathBuf>, key_path: impl Into<PathBuf>) -> Self {
        Self {
            cert_path: cert_path.into(),
            key_path: key_path.into(),
        }
    }

    /// Build a TLS acceptor from the certificate files
    pub fn build_acceptor(&self) -> Result<TlsAcceptor> {
        let server_config = self.build_server_config()?;
        Ok(TlsAcceptor::from(Arc::new(server_config)))
    }

    /// Build rustls server config
    fn build_server_config(&self) -> Result<ServerConfig> {
        info!(
            "Loading TLS certificate from {} and {}",
            self.cert_path.display(),
            self.key_path.display()
        );

        let certs = load_certs(&self.cert_path)?;
        let key = load_key(&self.key_path)?;

        let mut config = ServerConfig::builder_with_provider(provider())
            .with_safe_default_protocol_versions()
            .map_err(|e| ProxyError::Tls(format!("TLS config error: {}", e)))?
            .with_no_client_auth()
            .with_single_cert(certs, key)
            .map_err(|e| ProxyError::Tls(format!("TLS config error: {}", e)))?;

        config.alpn_protocols = vec![b"h2".to_vec(), b"http/1.1".to_vec()];

        Ok(config)
    }
}

/// Client configuration for `https` backends, trusting `roots`
pub fn client_config(roots: RootCertStore) -> Result<ClientConfig> {
    Ok(ClientConfig::builder_with_provider(provider())
        .with_safe_default_protocol_versions()
        .map_err(|e| ProxyError::Tls(format!("TLS client config error: {}", e)))?
        .with_root_certificates(roots)
        .with_no_client_auth())
}

/// Root certificates of the platform trust store. Certificates that fail to
/// load are logged and skipped.
pub fn native_roots() -> RootCertStore {
    let loaded = rustls_native_certs::load_native_certs();
    for e in &loaded.errors {
        warn!("Failed to load a native root certificate: {}", e);
    }

    let mut roots = RootCertStore::empty();
    let (added, ignored) = roots.add_parsable_certificates(loaded.certs);
    if ignored > 0 {
        warn!("Ignored {} unparsable root certificates", ignored);
    }
    info!("Loaded {} native root certificates", added);
    roots
}

fn open(path: &Path, what: &str) -> Result<BufReader<File>> {
    let file = File::open(path).map_err(|e| {
        ProxyError::Tls(format!("Failed to open {} file {}: {}", what, path.display(), e))
    })?;
    Ok(BufReader::new(file))
}

fn load_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>> {
    let mut reader = open(path, "certificate")?;
    let certs = rustls_pemfile::certs(&mut reader)
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| {
            ProxyError::Tls(format!("Failed to read certificates from {}: {}", path.display(), e))
        })?;

    if certs.is_empty() {
        return Err(ProxyError::Tls(format!(
            "No certificates found in {}",
            path.display()
        )));
    }

    Ok(certs)
}

/// First PKCS#8, PKCS#1 (RSA) or SEC1 key in the file
fn load_key(path: &Path) -> Result<PrivateKeyDer<'static>> {
    let mut reader = open(path, "key")?;
    rustls_pemfile::private_key(&mut reader)
        .map_err(|e| {
            ProxyError::Tls(format!("Failed to read private key from {}: {}", path.display(), e))
        })?
        .ok_or_else(|| ProxyError::Tls(format!("No private key found in {}", path.display())))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_pair(dir: &Path) -> (PathBuf, PathBuf) {
        let certified = rcgen::generate_simple_self_signed(vec!["localhost".to_string()]).unwrap();
        let cert_path = dir.join("server.crt");
        let key_path = dir.join("server.key");
        std::fs::write(&cert_path, certified.cert.pem()).unwrap();
        std::fs::write(&key_path, certified.key_pair.serialize_pem()).unwrap();
        (cert_path, key_path)
    }

    #[test]
    fn test_build_acceptor_from_pem_files() {
        let dir = tempfile::tempdir().unwrap();
        let (cert, key) = write_pair(dir.path());

        let acceptor = TlsManager::new(cert, key).build_acceptor();
        assert!(acceptor.is_ok());
    }

    #[test]
    fn test_missing_certificate_file() {
        let dir = tempfile::tempdir().unwrap();
        let (_, key) = write_pair(dir.path());

        let err = TlsManager::new(dir.path().join("absent.crt"), key)
            .build_acceptor()
            .err()
            .unwrap();
        assert!(matches!(err, ProxyError::Tls(_)));
        assert!(err.to_string().contains("absent.crt"));
    }

    #[test]
    fn test_key_file_without_key() {
        let dir = tempfile::tempdir().unwrap();
        let (cert, _) = write_pair(dir.path());

        // A certificate is not a private key
        let err = TlsManager::new(&cert, &cert).build_acceptor().err().unwrap();
        assert!(err.to_string().contains("No private key"));
    }

    #[test]
    fn test_empty_certificate_file() {
        let dir = tempfile::tempdir().unwrap();
        let (_, key) = write_pair(dir.path());
        let empty = dir.path().join("empty.crt");
        std::fs::write(&empty, "").unwrap();

        let err = TlsManager::new(empty, key).build_acceptor().err().unwrap();
        assert!(err.to_string().contains("No certificates"));
    }

    #[test]
    fn test_client_config_trusts_given_roots() {
        let certified = rcgen::generate_simple_self_signed(vec!["localhost".to_string()]).unwrap();
        let mut roots = RootCertStore::empty();
        roots.add(certified.cert.der().clone()).unwrap();

        assert!(client_config(roots).is_ok());
    }
}
