//! TLS termination for the gateway listener.
//!
//! Certificates and keys are read from PEM files once at startup. Any
//! failure here is fatal for the server: the listener never comes up with
//! half-loaded material.

use std::fs;
use std::path::Path;
use std::sync::Arc;

use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use tokio_rustls::TlsAcceptor;
use tracing::info;

use crate::config::TlsSettings;
use crate::error::ServerError;

/// Builds a TLS acceptor from the configured certificate chain and key.
pub fn load_tls_acceptor(settings: &TlsSettings) -> Result<TlsAcceptor, ServerError> {
    let certs = load_certs(&settings.cert_file)?;
    let key = load_private_key(&settings.key_file)?;

    let config = rustls::ServerConfig::builder_with_provider(Arc::new(
        rustls::crypto::ring::default_provider(),
    ))
    .with_safe_default_protocol_versions()
    .map_err(|e| ServerError::Tls(format!("protocol versions: {e}")))?
    .with_no_client_auth()
    .with_single_cert(certs, key)
    .map_err(|e| ServerError::Tls(format!("build server config: {e}")))?;

    info!(
        "🔒 TLS configured: cert='{}' key='{}'",
        settings.cert_file.display(),
        settings.key_file.display()
    );
    Ok(TlsAcceptor::from(Arc::new(config)))
}

fn read_pem(path: &Path, what: &str) -> Result<Vec<u8>, ServerError> {
    fs::read(path).map_err(|e| ServerError::Tls(format!("read {what} '{}': {e}", path.display())))
}

fn load_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>, ServerError> {
    let pem = read_pem(path, "cert")?;
    let mut reader = &pem[..];
    let certs = rustls_pemfile::certs(&mut reader)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| ServerError::Tls(format!("parse certs '{}': {e}", path.display())))?;
    if certs.is_empty() {
        return Err(ServerError::Tls(format!(
            "certificate chain empty in '{}'",
            path.display()
        )));
    }
    Ok(certs)
}

/// Accepts PKCS#8, PKCS#1 or SEC1 keys; the first key in the file wins.
fn load_private_key(path: &Path) -> Result<PrivateKeyDer<'static>, ServerError> {
    let pem = read_pem(path, "key")?;
    let mut reader = &pem[..];
    rustls_pemfile::private_key(&mut reader)
        .map_err(|e| ServerError::Tls(format!("parse key '{}': {e}", path.display())))?
        .ok_or_else(|| ServerError::Tls(format!("no private key found in '{}'", path.display())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn pem_file(contents: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn self_signed_material_builds_an_acceptor() {
        let generated = rcgen::generate_simple_self_signed(vec!["localhost".into()]).unwrap();
        let cert = pem_file(&generated.cert.pem());
        let key = pem_file(&generated.key_pair.serialize_pem());

        let certs = load_certs(cert.path()).unwrap();
        assert_eq!(certs.len(), 1);
        assert_eq!(certs[0], *generated.cert.der());

        let settings = TlsSettings {
            cert_file: cert.path().to_path_buf(),
            key_file: key.path().to_path_buf(),
        };
        assert!(load_tls_acceptor(&settings).is_ok());
    }

    #[test]
    fn missing_files_are_reported() {
        let settings = TlsSettings {
            cert_file: "/nonexistent/gateway-cert.pem".into(),
            key_file: "/nonexistent/gateway-key.pem".into(),
        };
        match load_tls_acceptor(&settings) {
            Err(ServerError::Tls(message)) => assert!(message.contains("gateway-cert.pem")),
            Err(other) => panic!("unexpected error: {other}"),
            Ok(_) => panic!("acceptor built from missing files"),
        }
    }

    #[test]
    fn empty_certificate_chain_is_rejected() {
        let cert = pem_file("not a certificate\n");
        assert!(matches!(
            load_certs(cert.path()),
            Err(ServerError::Tls(message)) if message.contains("empty")
        ));
    }

    #[test]
    fn file_without_key_is_rejected() {
        let key = pem_file("# nothing to see here\n");
        assert!(matches!(
            load_private_key(key.path()),
            Err(ServerError::Tls(message)) if message.contains("no private key")
        ));
    }
}
