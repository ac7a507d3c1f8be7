//! Bearer session lifecycle: create, validate, revoke, expiry sweep.
//!
//! A session is represented to callers by a signed token (see
//! `mfasrv-crypto`); the store keeps only the token's SHA-256. Validation
//! collapses every failure — bad MAC, unknown id, revoked, expired, hash
//! mismatch — into `None`, so callers cannot branch on which check failed.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use rand::RngCore;
use subtle::ConstantTimeEq;

use mfasrv_crypto::{sha256_hex, TokenCodec};
use mfasrv_domain::model::{Session, SessionStatus};
use mfasrv_domain::Result;
use mfasrv_store::Store;

/// A freshly created session and its wire token.
pub struct IssuedSession {
    pub session: Session,
    /// Base64-url token to hand to the agent/shim.
    pub token: String,
}

pub struct SessionManager {
    store: Arc<Store>,
    codec: TokenCodec,
    default_ttl: Duration,
}

impl SessionManager {
    pub fn new(store: Arc<Store>, codec: TokenCodec, default_ttl: Duration) -> Self {
        Self {
            store,
            codec,
            default_ttl,
        }
    }

    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    /// Create a session for a completed second factor.
    pub fn create(
        &self,
        user_id: &str,
        source_ip: &str,
        target_resource: Option<&str>,
        verified_method: &str,
        dc_hint: Option<&str>,
        ttl: Option<Duration>,
    ) -> Result<IssuedSession> {
        let now = Utc::now();
        let expires = now + ttl.unwrap_or(self.default_ttl);

        let mut id_bytes = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut id_bytes);
        let session_id = u128::from_be_bytes(id_bytes);

        let token_bytes = self.codec.encode(session_id, user_id, expires);
        let session = Session {
            id: format!("{session_id:032x}"),
            user_id: user_id.to_owned(),
            token_hash: sha256_hex(&token_bytes),
            source_ip: source_ip.to_owned(),
            target_resource: target_resource.map(str::to_owned),
            verified_method: verified_method.to_owned(),
            status: SessionStatus::Active,
            created: now,
            expires,
            dc_hint: dc_hint.map(str::to_owned),
        };
        self.store.insert_session(&session)?;
        tracing::debug!(session_id = %session.id, user_id, "session created");
        Ok(IssuedSession {
            session,
            token: TokenCodec::to_wire(&token_bytes),
        })
    }

    /// Validate a wire token. Returns the live session or `None` — one
    /// uniform outcome for every kind of rejection.
    pub fn validate(&self, wire_token: &str) -> Result<Option<Session>> {
        let Ok(token_bytes) = TokenCodec::from_wire(wire_token) else {
            return Ok(None);
        };
        let Ok(claims) = self.codec.verify(&token_bytes) else {
            return Ok(None);
        };
        let Some(session) = self.store.get_session(&format!("{:032x}", claims.session_id))?
        else {
            return Ok(None);
        };
        if session.status != SessionStatus::Active || session.expires <= Utc::now() {
            return Ok(None);
        }
        let provided = sha256_hex(&token_bytes);
        if provided
            .as_bytes()
            .ct_eq(session.token_hash.as_bytes())
            .unwrap_u8()
            != 1
        {
            return Ok(None);
        }
        Ok(Some(session))
    }

    /// Most recently created live session for `(user, source ip)`.
    pub fn find_active(&self, user_id: &str, source_ip: &str) -> Result<Option<Session>> {
        self.store.find_active_session(user_id, source_ip, Utc::now())
    }

    /// Re-derive the wire token for a live session row. Encoding is
    /// deterministic, so the rebuilt bytes must hash back to the stored
    /// `token_hash`; a mismatch (a row minted under a rotated signing key)
    /// yields `None` and the caller treats the session as token-less.
    pub fn reissue_token(&self, session: &Session) -> Option<String> {
        let session_id = u128::from_str_radix(&session.id, 16).ok()?;
        let token_bytes = self
            .codec
            .encode(session_id, &session.user_id, session.expires);
        if sha256_hex(&token_bytes) != session.token_hash {
            tracing::warn!(session_id = %session.id, "stored hash does not match re-derived token");
            return None;
        }
        Some(TokenCodec::to_wire(&token_bytes))
    }

    /// Revoke. Returns false when the session was already terminal.
    pub fn revoke(&self, session_id: &str) -> Result<bool> {
        let revoked = self.store.revoke_session(session_id)?;
        if revoked {
            tracing::info!(session_id, "session revoked");
        }
        Ok(revoked)
    }

    /// Sweep overdue sessions into `expired`.
    pub fn cleanup_expired(&self, now: DateTime<Utc>) -> Result<usize> {
        self.store.expire_due_sessions(now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager() -> SessionManager {
        SessionManager::new(
            Arc::new(Store::open_in_memory().unwrap()),
            TokenCodec::new([9u8; 32]),
            Duration::hours(8),
        )
    }

    #[test]
    fn issued_token_validates_until_revoked() {
        let mgr = manager();
        let issued = mgr
            .create("u1", "10.0.0.7", None, "totp", Some("dc1"), None)
            .unwrap();

        let session = mgr.validate(&issued.token).unwrap().unwrap();
        assert_eq!(session.user_id, "u1");
        assert_eq!(session.id, issued.session.id);

        assert!(mgr.revoke(&issued.session.id).unwrap());
        assert!(mgr.validate(&issued.token).unwrap().is_none());
    }

    #[test]
    fn garbage_and_tampered_tokens_validate_to_none() {
        let mgr = manager();
        let issued = mgr
            .create("u1", "10.0.0.7", None, "totp", None, None)
            .unwrap();

        assert!(mgr.validate("not-a-token").unwrap().is_none());
        assert!(mgr.validate("").unwrap().is_none());

        // Flip one character of the wire form.
        let mut wire = issued.token.clone().into_bytes();
        wire[10] = if wire[10] == b'A' { b'B' } else { b'A' };
        let tampered = String::from_utf8(wire).unwrap();
        assert!(mgr.validate(&tampered).unwrap().is_none());

        // A token signed with another key is rejected even with a valid row.
        let foreign = TokenCodec::new([1u8; 32]).encode(
            u128::from_str_radix(&issued.session.id, 16).unwrap(),
            "u1",
            issued.session.expires,
        );
        assert!(mgr
            .validate(&TokenCodec::to_wire(&foreign))
            .unwrap()
            .is_none());
    }

    #[test]
    fn expired_session_validates_to_none() {
        let mgr = manager();
        let issued = mgr
            .create("u1", "10.0.0.7", None, "totp", None, Some(Duration::milliseconds(-1)))
            .unwrap();
        assert!(mgr.validate(&issued.token).unwrap().is_none());
    }

    #[test]
    fn reissued_token_matches_the_original() {
        let mgr = manager();
        let issued = mgr
            .create("u1", "10.0.0.7", None, "totp", None, None)
            .unwrap();

        let row = mgr.find_active("u1", "10.0.0.7").unwrap().unwrap();
        let reissued = mgr.reissue_token(&row).unwrap();
        assert_eq!(reissued, issued.token);
        assert!(mgr.validate(&reissued).unwrap().is_some());

        // A row whose hash no longer matches (key rotation) yields nothing.
        let mut stale = row;
        stale.token_hash = "0".repeat(64);
        assert!(mgr.reissue_token(&stale).is_none());
    }

    #[test]
    fn find_active_matches_pair() {
        let mgr = manager();
        mgr.create("u1", "10.0.0.7", None, "totp", None, None).unwrap();
        assert!(mgr.find_active("u1", "10.0.0.7").unwrap().is_some());
        assert!(mgr.find_active("u1", "10.9.9.9").unwrap().is_none());
        assert!(mgr.find_active("u2", "10.0.0.7").unwrap().is_none());
    }

    #[test]
    fn cleanup_marks_overdue() {
        let mgr = manager();
        mgr.create("u1", "10.0.0.7", None, "totp", None, Some(Duration::seconds(1)))
            .unwrap();
        assert_eq!(
            mgr.cleanup_expired(Utc::now() + Duration::minutes(1)).unwrap(),
            1
        );
    }
}
