//! Rustls material for the mutually-authenticated planes. A listener
//! presents its certificate and requires peer certificates chained to the
//! CA root; a client pins the root and presents its own identity.

use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;

use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::server::WebPkiClientVerifier;
use rustls::{RootCertStore, ServerConfig};

use mfasrv_domain::config::TlsConfig;
use mfasrv_domain::{Error, Result};

pub fn load_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>> {
    let file = std::fs::File::open(path)
        .map_err(|e| Error::Config(format!("cannot open {}: {e}", path.display())))?;
    let certs = rustls_pemfile::certs(&mut BufReader::new(file))
        .collect::<std::io::Result<Vec<_>>>()
        .map_err(|e| Error::Config(format!("bad certificate PEM {}: {e}", path.display())))?;
    if certs.is_empty() {
        return Err(Error::Config(format!(
            "no certificates in {}",
            path.display()
        )));
    }
    Ok(certs)
}

pub fn load_key(path: &Path) -> Result<PrivateKeyDer<'static>> {
    let file = std::fs::File::open(path)
        .map_err(|e| Error::Config(format!("cannot open {}: {e}", path.display())))?;
    rustls_pemfile::private_key(&mut BufReader::new(file))
        .map_err(|e| Error::Config(format!("bad key PEM {}: {e}", path.display())))?
        .ok_or_else(|| Error::Config(format!("no private key in {}", path.display())))
}

pub fn root_store(path: &Path) -> Result<RootCertStore> {
    let mut roots = RootCertStore::empty();
    for cert in load_certs(path)? {
        roots
            .add(cert)
            .map_err(|e| Error::Config(format!("bad CA certificate: {e}")))?;
    }
    Ok(roots)
}

/// Server config for the mutually-authenticated plane: ALPN prefers h2,
/// and a presented client certificate must chain to the CA root.
///
/// Anonymous clients are accepted at the TLS layer so a factory-fresh
/// agent can reach the registration and certificate-enrollment calls; a
/// certificate that *is* presented still has to verify.
pub fn server_config(tls: &TlsConfig) -> Result<ServerConfig> {
    let certs = load_certs(&tls.cert_path)?;
    let key = load_key(&tls.key_path)?;
    let roots = root_store(&tls.ca_path)?;
    let verifier = WebPkiClientVerifier::builder(Arc::new(roots))
        .allow_unauthenticated()
        .build()
        .map_err(|e| Error::Config(format!("client verifier: {e}")))?;

    let mut config = ServerConfig::builder()
        .with_client_cert_verifier(verifier)
        .with_single_cert(certs, key)
        .map_err(|e| Error::Config(format!("TLS configuration: {e}")))?;
    config.alpn_protocols = vec![b"h2".to_vec(), b"http/1.1".to_vec()];
    Ok(config)
}

/// Concatenated key + certificate PEM, the shape `reqwest::Identity`
/// expects for a client identity.
pub fn identity_pem(tls: &TlsConfig) -> Result<Vec<u8>> {
    let cert = std::fs::read(&tls.cert_path)
        .map_err(|e| Error::Config(format!("cannot read {}: {e}", tls.cert_path.display())))?;
    let key = std::fs::read(&tls.key_path)
        .map_err(|e| Error::Config(format!("cannot read {}: {e}", tls.key_path.display())))?;
    let mut pem = key;
    pem.push(b'\n');
    pem.extend_from_slice(&cert);
    Ok(pem)
}
