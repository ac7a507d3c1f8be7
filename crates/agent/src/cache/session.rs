//! Local session cache: warmed from disk, updated by central decisions and
//! by gossip. Conflict resolution is last-writer-wins by event timestamp
//! with `session_id` breaking ties, and revocation dominates — once a peer
//! observes `revoked`, no later-looking "create" resurrects the session.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;

use mfasrv_domain::model::CachedSession;
use mfasrv_domain::Result;
use mfasrv_protocol::SessionEvent;

use crate::local_store::LocalStore;

struct Entry {
    session: CachedSession,
    /// The event that produced this state; LWW compares against it.
    event: SessionEvent,
}

/// Stand-in event for a row warmed from disk. Disk rows carry no event
/// timestamp, so any gossip observation supersedes the warm copy.
fn warm_event(session: &CachedSession) -> SessionEvent {
    SessionEvent {
        session_id: session.session_id.clone(),
        user_id: session.user_id.clone(),
        user_name: session.user_name.clone(),
        source_ip: session.source_ip.clone(),
        verified_method: session.verified_method.clone(),
        expires: session.expires_at,
        revoked: session.revoked,
        origin_id: String::new(),
        timestamp: DateTime::<Utc>::MIN_UTC,
    }
}

pub struct SessionCache {
    entries: RwLock<HashMap<String, Entry>>,
    store: Arc<LocalStore>,
}

impl SessionCache {
    pub fn warm(store: Arc<LocalStore>) -> Result<Self> {
        let now = Utc::now();
        let mut entries = HashMap::new();
        for session in store.load_sessions(now)? {
            let event = warm_event(&session);
            entries.insert(session.session_id.clone(), Entry { session, event });
        }
        tracing::info!(count = entries.len(), "session cache warmed");
        Ok(Self {
            entries: RwLock::new(entries),
            store,
        })
    }

    /// Record a session this DC itself observed (central decision). Returns
    /// the event to gossip to peers.
    pub fn insert_local(&self, session: CachedSession, origin_id: &str) -> SessionEvent {
        let event = SessionEvent {
            session_id: session.session_id.clone(),
            user_id: session.user_id.clone(),
            user_name: session.user_name.clone(),
            source_ip: session.source_ip.clone(),
            verified_method: session.verified_method.clone(),
            expires: session.expires_at,
            revoked: session.revoked,
            origin_id: origin_id.to_owned(),
            timestamp: Utc::now(),
        };
        self.apply_event(&event);
        event
    }

    /// Apply a session event (local or gossiped). Returns false when the
    /// event was stale or a duplicate and was ignored.
    pub fn apply_event(&self, event: &SessionEvent) -> bool {
        let mut entries = self.entries.write();
        if let Some(existing) = entries.get(&event.session_id) {
            // Revocation is monotonic.
            if existing.session.revoked && !event.revoked {
                return false;
            }
            // LWW with the protocol's tie-break — but a revocation is
            // applied regardless of ordering.
            if !event.revoked && !event.supersedes(&existing.event) {
                return false;
            }
        }
        let session = CachedSession {
            session_id: event.session_id.clone(),
            user_id: event.user_id.clone(),
            user_name: event.user_name.clone(),
            source_ip: event.source_ip.clone(),
            expires_at: event.expires,
            verified_method: event.verified_method.clone(),
            revoked: event.revoked,
        };
        if let Err(e) = self.store.upsert_session(&session) {
            tracing::warn!(error = %e, "session cache persistence failed; continuing in memory");
        }
        entries.insert(
            event.session_id.clone(),
            Entry {
                session,
                event: event.clone(),
            },
        );
        true
    }

    /// Case-insensitive lookup by user name, optionally constrained to the
    /// source IP, returning a live entry only.
    pub fn find(
        &self,
        user_name: &str,
        source_ip: Option<&str>,
        now: DateTime<Utc>,
    ) -> Option<CachedSession> {
        let entries = self.entries.read();
        entries
            .values()
            .filter(|e| e.session.is_live(now))
            .filter(|e| e.session.user_name.eq_ignore_ascii_case(user_name))
            .filter(|e| match source_ip {
                Some(ip) => e.session.source_ip == ip,
                None => true,
            })
            .max_by_key(|e| e.session.expires_at)
            .map(|e| e.session.clone())
    }

    pub fn live_count(&self, now: DateTime<Utc>) -> u64 {
        self.entries
            .read()
            .values()
            .filter(|e| e.session.is_live(now))
            .count() as u64
    }

    /// Drop dead entries from memory and disk.
    pub fn cleanup(&self, now: DateTime<Utc>) {
        self.entries
            .write()
            .retain(|_, e| e.session.is_live(now));
        if let Err(e) = self.store.cleanup_sessions(now) {
            tracing::warn!(error = %e, "session cache cleanup failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn event(id: &str, offset_ms: i64, revoked: bool) -> SessionEvent {
        let base = Utc::now();
        SessionEvent {
            session_id: id.into(),
            user_id: "u1".into(),
            user_name: "Alice".into(),
            source_ip: "10.0.0.7".into(),
            verified_method: "totp".into(),
            expires: base + Duration::hours(8),
            revoked,
            origin_id: "dc1".into(),
            timestamp: base + Duration::milliseconds(offset_ms),
        }
    }

    fn cache() -> SessionCache {
        SessionCache::warm(Arc::new(LocalStore::open_in_memory().unwrap())).unwrap()
    }

    #[test]
    fn find_is_case_insensitive_and_ip_aware() {
        let cache = cache();
        cache.apply_event(&event("s1", 0, false));
        let now = Utc::now();

        assert!(cache.find("alice", Some("10.0.0.7"), now).is_some());
        assert!(cache.find("ALICE", None, now).is_some());
        assert!(cache.find("alice", Some("10.9.9.9"), now).is_none());
        assert!(cache.find("bob", None, now).is_none());
    }

    #[test]
    fn stale_create_does_not_resurrect_revocation() {
        let cache = cache();
        assert!(cache.apply_event(&event("s1", 0, false)));
        assert!(cache.apply_event(&event("s1", 100, true)));
        // A replayed create with an *earlier* timestamp is ignored.
        assert!(!cache.apply_event(&event("s1", 50, false)));
        // Even a *later* create cannot undo revocation.
        assert!(!cache.apply_event(&event("s1", 200, false)));
        assert!(cache.find("alice", None, Utc::now()).is_none());
    }

    #[test]
    fn lww_applies_fresher_events_only() {
        let cache = cache();
        assert!(cache.apply_event(&event("s1", 100, false)));
        assert!(!cache.apply_event(&event("s1", 50, false)));

        let mut fresher = event("s1", 200, false);
        fresher.source_ip = "10.0.0.8".into();
        assert!(cache.apply_event(&fresher));
        assert!(cache
            .find("alice", Some("10.0.0.8"), Utc::now())
            .is_some());
    }

    #[test]
    fn equal_timestamp_replay_is_a_duplicate() {
        let cache = cache();
        let e = event("s1", 100, false);
        assert!(cache.apply_event(&e));
        // Same (session_id, timestamp): the tie-break compares equal ids,
        // so the replay does not supersede and is dropped.
        assert!(!cache.apply_event(&e));
        assert!(cache.find("alice", None, Utc::now()).is_some());
    }

    #[test]
    fn revocation_applies_even_with_stale_timestamp() {
        let cache = cache();
        assert!(cache.apply_event(&event("s1", 100, false)));
        // The revocation carries an older timestamp but still lands.
        assert!(cache.apply_event(&event("s1", 10, true)));
        assert!(cache.find("alice", None, Utc::now()).is_none());
    }

    #[test]
    fn cleanup_drops_dead_entries() {
        let cache = cache();
        cache.apply_event(&event("live", 0, false));
        let mut dead = event("dead", 0, false);
        dead.expires = Utc::now() - Duration::minutes(1);
        cache.apply_event(&dead);

        cache.cleanup(Utc::now());
        assert_eq!(cache.live_count(Utc::now()), 1);
    }
}
