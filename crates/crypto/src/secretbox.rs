//! AEAD wrapper for enrollment secrets at rest.
//!
//! AES-256-GCM with a random 96-bit nonce per sealing. The store keeps
//! `{ciphertext, nonce}`; the plaintext secret exists only in memory during
//! a single enrollment or verification operation. Decryption failure is one
//! uniform error regardless of cause.

use aes_gcm::aead::{Aead, KeyInit, OsRng};
use aes_gcm::{AeadCore, Aes256Gcm, Key, Nonce};

use mfasrv_domain::{Error, Result};

pub const NONCE_LEN: usize = 12;

/// Process-level AEAD for small secrets.
#[derive(Clone)]
pub struct SecretBox {
    cipher: Aes256Gcm,
}

impl SecretBox {
    pub fn new(key: [u8; 32]) -> Self {
        Self {
            cipher: Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key)),
        }
    }

    /// Encrypt `plaintext`, returning `(ciphertext, nonce)`.
    pub fn seal(&self, plaintext: &[u8]) -> Result<(Vec<u8>, Vec<u8>)> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = self
            .cipher
            .encrypt(&nonce, plaintext)
            .map_err(|_| Error::Integrity)?;
        Ok((ciphertext, nonce.to_vec()))
    }

    /// Decrypt a previously sealed secret.
    pub fn open(&self, ciphertext: &[u8], nonce: &[u8]) -> Result<Vec<u8>> {
        if nonce.len() != NONCE_LEN {
            return Err(Error::Integrity);
        }
        self.cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| Error::Integrity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sbox() -> SecretBox {
        SecretBox::new([0x11; 32])
    }

    #[test]
    fn seal_open_round_trip() {
        let (ct, nonce) = sbox().seal(b"Hello!\xde\xad\xbe\xef").unwrap();
        assert_eq!(nonce.len(), NONCE_LEN);
        assert_eq!(sbox().open(&ct, &nonce).unwrap(), b"Hello!\xde\xad\xbe\xef");
    }

    #[test]
    fn tampered_ciphertext_fails() {
        let (mut ct, nonce) = sbox().seal(b"secret").unwrap();
        ct[0] ^= 0x01;
        assert!(matches!(sbox().open(&ct, &nonce), Err(Error::Integrity)));
    }

    #[test]
    fn tampered_nonce_fails() {
        let (ct, mut nonce) = sbox().seal(b"secret").unwrap();
        nonce[3] ^= 0x01;
        assert!(matches!(sbox().open(&ct, &nonce), Err(Error::Integrity)));
    }

    #[test]
    fn wrong_key_fails() {
        let (ct, nonce) = sbox().seal(b"secret").unwrap();
        let other = SecretBox::new([0x22; 32]);
        assert!(matches!(other.open(&ct, &nonce), Err(Error::Integrity)));
    }

    #[test]
    fn nonces_are_unique_per_seal() {
        let (_, n1) = sbox().seal(b"x").unwrap();
        let (_, n2) = sbox().seal(b"x").unwrap();
        assert_ne!(n1, n2);
    }
}
