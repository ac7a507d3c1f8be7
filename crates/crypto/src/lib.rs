//! Cryptographic leaves: the session token codec and the enrollment secret
//! box. Both take process-level 32-byte keys supplied through configuration;
//! neither persists key material.

mod secretbox;
mod token;

pub use secretbox::SecretBox;
pub use token::{TokenClaims, TokenCodec};

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use sha2::{Digest, Sha256};

use mfasrv_domain::{Error, Result};

/// Decode a 32-byte key from its base64 configuration form.
pub fn decode_key(b64: &str) -> Result<[u8; 32]> {
    let bytes = STANDARD
        .decode(b64.trim())
        .map_err(|_| Error::Config("key is not valid base64".into()))?;
    <[u8; 32]>::try_from(bytes.as_slice())
        .map_err(|_| Error::Config("key must decode to exactly 32 bytes".into()))
}

/// Read a 32-byte base64 key from the named environment variable.
pub fn key_from_env(var: &str) -> Result<[u8; 32]> {
    let raw = std::env::var(var)
        .map_err(|_| Error::Config(format!("environment variable {var} is not set")))?;
    decode_key(&raw)
}

/// Hex SHA-256 digest, used for token hashes and certificate thumbprints.
pub fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_key_accepts_32_bytes_only() {
        let good = STANDARD.encode([7u8; 32]);
        assert_eq!(decode_key(&good).unwrap(), [7u8; 32]);

        let short = STANDARD.encode([7u8; 16]);
        assert!(decode_key(&short).is_err());
        assert!(decode_key("not base64!!").is_err());
    }

    #[test]
    fn sha256_hex_is_stable() {
        assert_eq!(
            sha256_hex(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }
}
