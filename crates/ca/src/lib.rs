//! Certificate authority for the agent plane.
//!
//! A self-signed root (10-year validity) is generated on first use and
//! persisted as a PEM pair under the CA directory. Agent enrollment signs a
//! PEM CSR with the root; revocation is an append-only flat file of
//! `serial,revoked_at` lines reloaded at startup.

pub mod tls;

use std::collections::HashSet;
use std::io::Write;
use std::path::{Path, PathBuf};

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use rand::RngCore;
use rcgen::{
    BasicConstraints, Certificate, CertificateParams, CertificateSigningRequestParams,
    DistinguishedName, DnType, ExtendedKeyUsagePurpose, IsCa, KeyPair, KeyUsagePurpose,
    SerialNumber,
};
use time::{Duration as TimeDuration, OffsetDateTime};

use mfasrv_crypto::sha256_hex;
use mfasrv_domain::{Error, Result};

const ROOT_CERT_FILE: &str = "ca_cert.pem";
const ROOT_KEY_FILE: &str = "ca_key.pem";
const REVOCATION_FILE: &str = "revoked.txt";

const ROOT_VALIDITY_DAYS: i64 = 3650;
/// Issued certificates are backdated this much to absorb clock skew.
const BACKDATE_MINUTES: i64 = 5;

/// A certificate produced by [`CertificateAuthority::sign_csr`].
#[derive(Debug, Clone)]
pub struct IssuedCertificate {
    pub cert_pem: String,
    /// Hex serial, the key into the revocation list.
    pub serial: String,
    /// Hex SHA-256 over the DER encoding.
    pub thumbprint: String,
    pub not_after: DateTime<Utc>,
}

pub struct CertificateAuthority {
    root_cert: Certificate,
    root_key: KeyPair,
    /// The persisted root PEM, handed to agents for pinning.
    root_pem: String,
    dir: PathBuf,
    revoked: RwLock<HashSet<String>>,
}

impl CertificateAuthority {
    /// Load the persisted root, or generate and persist one on first use.
    pub fn open(dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(dir)?;
        let cert_path = dir.join(ROOT_CERT_FILE);
        let key_path = dir.join(ROOT_KEY_FILE);

        let (root_cert, root_key, root_pem) = if cert_path.is_file() && key_path.is_file() {
            let cert_pem = std::fs::read_to_string(&cert_path)?;
            let key_pem = std::fs::read_to_string(&key_path)?;
            let key = KeyPair::from_pem(&key_pem).map_err(ca_err)?;
            let params = CertificateParams::from_ca_cert_pem(&cert_pem).map_err(ca_err)?;
            let cert = params.self_signed(&key).map_err(ca_err)?;
            tracing::info!(path = %cert_path.display(), "CA root loaded");
            (cert, key, cert_pem)
        } else {
            let key = KeyPair::generate().map_err(ca_err)?;
            let cert = root_params()?.self_signed(&key).map_err(ca_err)?;
            let cert_pem = cert.pem();
            std::fs::write(&cert_path, &cert_pem)?;
            write_restricted(&key_path, key.serialize_pem().as_bytes())?;
            tracing::info!(path = %cert_path.display(), "CA root generated");
            (cert, key, cert_pem)
        };

        let revoked = load_revocations(&dir.join(REVOCATION_FILE))?;
        Ok(Self {
            root_cert,
            root_key,
            root_pem,
            dir: dir.to_owned(),
            revoked: RwLock::new(revoked),
        })
    }

    /// The root certificate agents pin for mutual TLS.
    pub fn root_cert_pem(&self) -> &str {
        &self.root_pem
    }

    /// Sign a PEM CSR. Validity is backdated five minutes and runs
    /// `validity_days` forward.
    pub fn sign_csr(&self, csr_pem: &str, validity_days: i64) -> Result<IssuedCertificate> {
        let mut csr = CertificateSigningRequestParams::from_pem(csr_pem).map_err(ca_err)?;

        let mut serial_bytes = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut serial_bytes);
        // Clear the top bit: DER serials are positive integers.
        serial_bytes[0] &= 0x7f;
        let serial = hex::encode(serial_bytes);

        let now = OffsetDateTime::now_utc();
        csr.params.not_before = now - TimeDuration::minutes(BACKDATE_MINUTES);
        csr.params.not_after = now + TimeDuration::days(validity_days);
        csr.params.serial_number = Some(SerialNumber::from_slice(&serial_bytes));
        csr.params.is_ca = IsCa::NoCa;
        csr.params.key_usages = vec![KeyUsagePurpose::DigitalSignature];
        csr.params.extended_key_usages = vec![
            ExtendedKeyUsagePurpose::ClientAuth,
            ExtendedKeyUsagePurpose::ServerAuth,
        ];

        let cert = csr
            .signed_by(&self.root_cert, &self.root_key)
            .map_err(ca_err)?;
        let thumbprint = sha256_hex(cert.der());
        let not_after = Utc::now() + chrono::Duration::days(validity_days);
        tracing::info!(serial = %serial, "certificate issued");

        Ok(IssuedCertificate {
            cert_pem: cert.pem(),
            serial,
            thumbprint,
            not_after,
        })
    }

    /// Append to the revocation list and the in-memory set.
    pub fn revoke(&self, serial: &str, now: DateTime<Utc>) -> Result<()> {
        let serial = serial.to_ascii_lowercase();
        {
            let mut revoked = self.revoked.write();
            if !revoked.insert(serial.clone()) {
                return Ok(());
            }
        }
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.dir.join(REVOCATION_FILE))?;
        writeln!(file, "{serial},{}", now.to_rfc3339())?;
        tracing::warn!(serial = %serial, "certificate revoked");
        Ok(())
    }

    /// O(1) membership test against the revocation set.
    pub fn is_revoked(&self, serial: &str) -> bool {
        self.revoked.read().contains(&serial.to_ascii_lowercase())
    }

    pub fn revoked_count(&self) -> usize {
        self.revoked.read().len()
    }
}

/// Generate a CSR and private key for an enrolling endpoint. Used by the
/// agent before its first `EnrollCertificate` call.
pub fn generate_csr(common_name: &str, san_hosts: &[String]) -> Result<(String, String)> {
    let key = KeyPair::generate().map_err(ca_err)?;
    let mut params = CertificateParams::new(san_hosts.to_vec()).map_err(ca_err)?;
    let mut dn = DistinguishedName::new();
    dn.push(DnType::CommonName, common_name);
    params.distinguished_name = dn;
    let csr = params.serialize_request(&key).map_err(ca_err)?;
    let csr_pem = csr.pem().map_err(ca_err)?;
    Ok((csr_pem, key.serialize_pem()))
}

fn root_params() -> Result<CertificateParams> {
    let mut params = CertificateParams::default();
    let mut dn = DistinguishedName::new();
    dn.push(DnType::CommonName, "mfasrv root");
    params.distinguished_name = dn;
    params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
    params.key_usages = vec![KeyUsagePurpose::KeyCertSign, KeyUsagePurpose::CrlSign];
    let now = OffsetDateTime::now_utc();
    params.not_before = now - TimeDuration::minutes(BACKDATE_MINUTES);
    params.not_after = now + TimeDuration::days(ROOT_VALIDITY_DAYS);
    Ok(params)
}

fn load_revocations(path: &Path) -> Result<HashSet<String>> {
    let mut set = HashSet::new();
    match std::fs::read_to_string(path) {
        Ok(contents) => {
            for line in contents.lines() {
                if let Some((serial, _)) = line.split_once(',') {
                    set.insert(serial.trim().to_ascii_lowercase());
                }
            }
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(e.into()),
    }
    Ok(set)
}

/// Extract the DER bytes from the first block of a PEM document.
pub fn pem_to_der(pem: &str) -> Result<Vec<u8>> {
    let body: String = pem
        .lines()
        .filter(|line| !line.starts_with("-----"))
        .collect();
    STANDARD
        .decode(body)
        .map_err(|e| Error::Certificate(format!("bad PEM body: {e}")))
}

fn write_restricted(path: &Path, contents: &[u8]) -> Result<()> {
    std::fs::write(path, contents)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
    }
    Ok(())
}

fn ca_err(e: rcgen::Error) -> Error {
    Error::Certificate(e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn root_is_generated_once_and_reloaded() {
        let dir = tempfile::tempdir().unwrap();
        let first = CertificateAuthority::open(dir.path()).unwrap();
        let first_pem = first.root_cert_pem().to_owned();
        drop(first);

        let second = CertificateAuthority::open(dir.path()).unwrap();
        assert_eq!(second.root_cert_pem(), first_pem);
    }

    #[test]
    fn csr_signing_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let ca = CertificateAuthority::open(dir.path()).unwrap();

        let (csr_pem, key_pem) =
            generate_csr("dc1.corp.example", &["dc1.corp.example".into()]).unwrap();
        assert!(csr_pem.contains("CERTIFICATE REQUEST"));
        assert!(key_pem.contains("PRIVATE KEY"));

        let issued = ca.sign_csr(&csr_pem, 365).unwrap();
        assert!(issued.cert_pem.contains("BEGIN CERTIFICATE"));
        assert_eq!(issued.serial.len(), 32);
        assert_eq!(issued.thumbprint.len(), 64);
        assert!(issued.not_after > Utc::now());
        // The thumbprint matches the DER inside the returned PEM.
        assert_eq!(
            issued.thumbprint,
            mfasrv_crypto::sha256_hex(&pem_to_der(&issued.cert_pem).unwrap())
        );
    }

    #[test]
    fn malformed_csr_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let ca = CertificateAuthority::open(dir.path()).unwrap();
        assert!(matches!(
            ca.sign_csr("not a csr", 365),
            Err(Error::Certificate(_))
        ));
    }

    #[test]
    fn revocations_survive_reload() {
        let dir = tempfile::tempdir().unwrap();
        {
            let ca = CertificateAuthority::open(dir.path()).unwrap();
            ca.revoke("ABCDEF01", Utc::now()).unwrap();
            ca.revoke("abcdef01", Utc::now()).unwrap();
            assert!(ca.is_revoked("abcdef01"));
            assert_eq!(ca.revoked_count(), 1);
        }
        let reloaded = CertificateAuthority::open(dir.path()).unwrap();
        assert!(reloaded.is_revoked("ABCDEF01"));
        assert!(!reloaded.is_revoked("00000000"));
    }
}
