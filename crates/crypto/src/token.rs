//! Compact signed session tokens.
//!
//! Layout (big-endian, ~120 bytes for typical user ids):
//!
//! ```text
//! version:u8 | session_id:u128 | user_id_len:u16 | user_id | expires:i64 ms | mac:[u8;32]
//! ```
//!
//! The MAC is HMAC-SHA256 over all preceding bytes with a process-level
//! 256-bit key. Verification rejects with one uniform error on any
//! mismatch — version, truncation, MAC, or expiry are indistinguishable to
//! the caller.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, TimeZone, Utc};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

use mfasrv_domain::{Error, Result};

type HmacSha256 = Hmac<Sha256>;

const TOKEN_VERSION: u8 = 1;
const MAC_LEN: usize = 32;
/// version + session_id + user_id_len + expires
const FIXED_LEN: usize = 1 + 16 + 2 + 8;

/// The verified contents of a token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenClaims {
    pub session_id: u128,
    pub user_id: String,
    pub expires: DateTime<Utc>,
}

/// Encodes and verifies session tokens with a fixed process key.
#[derive(Clone)]
pub struct TokenCodec {
    key: [u8; 32],
}

impl TokenCodec {
    pub fn new(key: [u8; 32]) -> Self {
        Self { key }
    }

    /// Produce the signed binary token.
    pub fn encode(&self, session_id: u128, user_id: &str, expires: DateTime<Utc>) -> Vec<u8> {
        let user_bytes = user_id.as_bytes();
        let mut buf = Vec::with_capacity(FIXED_LEN + user_bytes.len() + MAC_LEN);
        buf.push(TOKEN_VERSION);
        buf.extend_from_slice(&session_id.to_be_bytes());
        buf.extend_from_slice(&(user_bytes.len() as u16).to_be_bytes());
        buf.extend_from_slice(user_bytes);
        buf.extend_from_slice(&expires.timestamp_millis().to_be_bytes());

        let mut mac = HmacSha256::new_from_slice(&self.key).expect("HMAC accepts any key length");
        mac.update(&buf);
        buf.extend_from_slice(&mac.finalize().into_bytes());
        buf
    }

    /// Verify integrity and decode. Expiry is **not** checked here — the
    /// session row is authoritative for liveness; the codec only vouches
    /// that the bytes are ours and untampered.
    pub fn verify(&self, token: &[u8]) -> Result<TokenClaims> {
        if token.len() < FIXED_LEN + MAC_LEN {
            return Err(Error::Integrity);
        }
        let (body, tag) = token.split_at(token.len() - MAC_LEN);

        let mut mac = HmacSha256::new_from_slice(&self.key).expect("HMAC accepts any key length");
        mac.update(body);
        let expected = mac.finalize().into_bytes();
        if expected.ct_eq(tag).unwrap_u8() != 1 {
            return Err(Error::Integrity);
        }

        if body[0] != TOKEN_VERSION {
            return Err(Error::Integrity);
        }
        let session_id = u128::from_be_bytes(body[1..17].try_into().expect("fixed slice"));
        let user_len = u16::from_be_bytes(body[17..19].try_into().expect("fixed slice")) as usize;
        if body.len() != FIXED_LEN + user_len {
            return Err(Error::Integrity);
        }
        let user_id = std::str::from_utf8(&body[19..19 + user_len])
            .map_err(|_| Error::Integrity)?
            .to_owned();
        let expires_ms = i64::from_be_bytes(
            body[19 + user_len..19 + user_len + 8]
                .try_into()
                .expect("fixed slice"),
        );
        let expires = Utc
            .timestamp_millis_opt(expires_ms)
            .single()
            .ok_or(Error::Integrity)?;

        Ok(TokenClaims {
            session_id,
            user_id,
            expires,
        })
    }

    /// Parse the claim fields **without** verifying the MAC. Agents use
    /// this to learn the session id and expiry of a token the center just
    /// minted for them; it proves nothing and must never gate an allow.
    pub fn peek(token: &[u8]) -> Result<TokenClaims> {
        if token.len() < FIXED_LEN + MAC_LEN || token[0] != TOKEN_VERSION {
            return Err(Error::Integrity);
        }
        let body = &token[..token.len() - MAC_LEN];
        let session_id = u128::from_be_bytes(body[1..17].try_into().expect("fixed slice"));
        let user_len = u16::from_be_bytes(body[17..19].try_into().expect("fixed slice")) as usize;
        if body.len() != FIXED_LEN + user_len {
            return Err(Error::Integrity);
        }
        let user_id = std::str::from_utf8(&body[19..19 + user_len])
            .map_err(|_| Error::Integrity)?
            .to_owned();
        let expires_ms = i64::from_be_bytes(
            body[19 + user_len..19 + user_len + 8]
                .try_into()
                .expect("fixed slice"),
        );
        let expires = Utc
            .timestamp_millis_opt(expires_ms)
            .single()
            .ok_or(Error::Integrity)?;
        Ok(TokenClaims {
            session_id,
            user_id,
            expires,
        })
    }

    /// Boundary form of a token (base64-url, no padding).
    pub fn to_wire(token: &[u8]) -> String {
        URL_SAFE_NO_PAD.encode(token)
    }

    /// Parse the boundary form back into raw bytes.
    pub fn from_wire(wire: &str) -> Result<Vec<u8>> {
        URL_SAFE_NO_PAD.decode(wire.trim()).map_err(|_| Error::Integrity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn codec() -> TokenCodec {
        TokenCodec::new([0x42; 32])
    }

    #[test]
    fn round_trip() {
        let expires = Utc::now() + Duration::hours(8);
        let token = codec().encode(0xDEADBEEF_u128, "u-123", expires);
        let claims = codec().verify(&token).unwrap();
        assert_eq!(claims.session_id, 0xDEADBEEF_u128);
        assert_eq!(claims.user_id, "u-123");
        assert_eq!(claims.expires.timestamp_millis(), expires.timestamp_millis());
    }

    #[test]
    fn token_length_near_spec() {
        let token = codec().encode(1, "a-typical-user-id-0123456789012345678901234567890123456789012345", Utc::now());
        // version(1) + id(16) + len(2) + user(64) + expires(8) + mac(32)
        assert_eq!(token.len(), 123);
    }

    #[test]
    fn every_flipped_byte_fails_uniformly() {
        let token = codec().encode(7, "alice", Utc::now());
        for i in 0..token.len() {
            let mut bad = token.clone();
            bad[i] ^= 0x01;
            match codec().verify(&bad) {
                Err(Error::Integrity) => {}
                other => panic!("byte {i}: expected integrity failure, got {other:?}"),
            }
        }
    }

    #[test]
    fn truncated_token_fails() {
        let token = codec().encode(7, "alice", Utc::now());
        assert!(matches!(codec().verify(&token[..10]), Err(Error::Integrity)));
        assert!(matches!(codec().verify(&[]), Err(Error::Integrity)));
    }

    #[test]
    fn wrong_key_fails() {
        let token = codec().encode(7, "alice", Utc::now());
        let other = TokenCodec::new([0x43; 32]);
        assert!(matches!(other.verify(&token), Err(Error::Integrity)));
    }

    #[test]
    fn peek_reads_claims_without_the_key() {
        let expires = Utc::now() + Duration::hours(8);
        let token = codec().encode(0xABCD, "carol", expires);
        let claims = TokenCodec::peek(&token).unwrap();
        assert_eq!(claims.session_id, 0xABCD);
        assert_eq!(claims.user_id, "carol");
        // peek does not authenticate: a flipped MAC byte still parses.
        let mut bad = token.clone();
        let last = bad.len() - 1;
        bad[last] ^= 0xff;
        assert!(TokenCodec::peek(&bad).is_ok());
        assert!(codec().verify(&bad).is_err());
    }

    #[test]
    fn wire_round_trip() {
        let token = codec().encode(9, "bob", Utc::now());
        let wire = TokenCodec::to_wire(&token);
        assert!(!wire.contains('='));
        assert_eq!(TokenCodec::from_wire(&wire).unwrap(), token);
        assert!(TokenCodec::from_wire("!!!").is_err());
    }
}
