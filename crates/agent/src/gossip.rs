//! DC↔DC session replication.
//!
//! Sender side: every local session creation or revocation is queued for
//! each static peer and pushed over mTLS; a failed peer retries with
//! exponential backoff (5s → 2min). The peer's `GossipAck.sequence` is
//! confirmed back on the `Ack` route so the receiver can prune its dedupe
//! window.
//!
//! Receiver side: events are applied to the session cache under LWW with
//! revocation dominance; duplicate `(session_id, timestamp)` observations
//! from the same origin are ignored.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::Router;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use mfasrv_domain::Result;
use mfasrv_protocol::{
    decode_message, encode_message, AckRequest, AckResponse, GossipAck, SessionEvent,
    RPC_CONTENT_TYPE,
};

use crate::cache::SessionCache;
use crate::central::ReconnectBackoff;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Sender
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

struct Peer {
    endpoint: String,
    queue: Mutex<VecDeque<SessionEvent>>,
    notify: Notify,
}

pub struct GossipSender {
    peers: Vec<Arc<Peer>>,
    http: reqwest::Client,
}

impl GossipSender {
    pub fn new(peer_endpoints: &[String], http: reqwest::Client) -> Self {
        let peers = peer_endpoints
            .iter()
            .map(|endpoint| {
                Arc::new(Peer {
                    endpoint: endpoint.trim_end_matches('/').to_owned(),
                    queue: Mutex::new(VecDeque::new()),
                    notify: Notify::new(),
                })
            })
            .collect();
        Self { peers, http }
    }

    /// Queue an event for every peer. Never blocks the originating
    /// operation; delivery is the pump tasks' problem.
    pub fn broadcast(&self, event: SessionEvent) {
        for peer in &self.peers {
            peer.queue.lock().push_back(event.clone());
            peer.notify.notify_one();
        }
        if !self.peers.is_empty() {
            tracing::debug!(
                session_id = %event.session_id,
                revoked = event.revoked,
                peers = self.peers.len(),
                "session event queued for gossip"
            );
        }
    }

    pub fn queued(&self) -> usize {
        self.peers.iter().map(|p| p.queue.lock().len()).sum()
    }

    /// Spawn one pump task per peer. Tasks run until cancellation.
    pub fn spawn_pumps(self: &Arc<Self>, shutdown: CancellationToken) {
        for peer in &self.peers {
            let peer = peer.clone();
            let http = self.http.clone();
            let shutdown = shutdown.clone();
            tokio::spawn(async move {
                pump_peer(peer, http, shutdown).await;
            });
        }
    }
}

async fn pump_peer(peer: Arc<Peer>, http: reqwest::Client, shutdown: CancellationToken) {
    let backoff = ReconnectBackoff::default();
    let mut attempt: u32 = 0;

    loop {
        let event = loop {
            if let Some(event) = peer.queue.lock().front().cloned() {
                break event;
            }
            tokio::select! {
                _ = peer.notify.notified() => {}
                _ = shutdown.cancelled() => return,
            }
        };

        match send_event(&http, &peer.endpoint, &event).await {
            Ok(ack) => {
                peer.queue.lock().pop_front();
                attempt = 0;
                // Confirm the sequence so the receiver can prune.
                if let Err(e) = send_ack(&http, &peer.endpoint, &event, ack.sequence).await {
                    tracing::debug!(peer = %peer.endpoint, error = %e, "gossip ack confirmation failed");
                }
            }
            Err(e) => {
                let delay = backoff.delay_for_attempt(attempt);
                attempt = attempt.saturating_add(1);
                tracing::warn!(
                    peer = %peer.endpoint,
                    error = %e,
                    retry_in_ms = delay.as_millis() as u64,
                    "gossip send failed"
                );
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = shutdown.cancelled() => return,
                }
            }
        }
    }
}

async fn send_event(
    http: &reqwest::Client,
    endpoint: &str,
    event: &SessionEvent,
) -> Result<GossipAck> {
    let body = encode_message(event)?;
    let response = http
        .post(format!("{endpoint}/gossip/v1/session"))
        .header(reqwest::header::CONTENT_TYPE, RPC_CONTENT_TYPE)
        .body(body)
        .send()
        .await
        .map_err(|e| mfasrv_domain::Error::Http(e.to_string()))?;
    if response.status() != reqwest::StatusCode::OK {
        return Err(mfasrv_domain::Error::Http(format!(
            "peer answered {}",
            response.status()
        )));
    }
    let bytes = response
        .bytes()
        .await
        .map_err(|e| mfasrv_domain::Error::Http(e.to_string()))?;
    decode_message(&bytes)
}

async fn send_ack(
    http: &reqwest::Client,
    endpoint: &str,
    event: &SessionEvent,
    sequence: u64,
) -> Result<()> {
    let body = encode_message(&AckRequest {
        session_id: event.session_id.clone(),
        sequence,
    })?;
    http.post(format!("{endpoint}/gossip/v1/ack"))
        .header(reqwest::header::CONTENT_TYPE, RPC_CONTENT_TYPE)
        .body(body)
        .send()
        .await
        .map_err(|e| mfasrv_domain::Error::Http(e.to_string()))?;
    Ok(())
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Receiver
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Clone)]
pub struct GossipReceiver {
    session_cache: Arc<SessionCache>,
    /// Monotonic ack sequence handed to senders.
    sequence: Arc<AtomicU64>,
    /// Last `(session_id, timestamp)` seen per origin, for duplicate drop.
    seen: Arc<Mutex<HashMap<String, (String, DateTime<Utc>)>>>,
}

impl GossipReceiver {
    pub fn new(session_cache: Arc<SessionCache>) -> Self {
        Self {
            session_cache,
            sequence: Arc::new(AtomicU64::new(1)),
            seen: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn router(self) -> Router {
        Router::new()
            .route("/gossip/v1/session", post(receive_session))
            .route("/gossip/v1/ack", post(receive_ack))
            .with_state(self)
    }

    fn is_duplicate(&self, event: &SessionEvent) -> bool {
        let mut seen = self.seen.lock();
        match seen.get(&event.origin_id) {
            Some((session_id, timestamp))
                if *session_id == event.session_id && *timestamp == event.timestamp =>
            {
                true
            }
            _ => {
                seen.insert(
                    event.origin_id.clone(),
                    (event.session_id.clone(), event.timestamp),
                );
                false
            }
        }
    }
}

async fn receive_session(State(receiver): State<GossipReceiver>, body: Bytes) -> Response {
    let event: SessionEvent = match decode_message(&body) {
        Ok(event) => event,
        Err(e) => {
            tracing::debug!(error = %e, "rejecting malformed gossip body");
            return StatusCode::BAD_REQUEST.into_response();
        }
    };

    if receiver.is_duplicate(&event) {
        tracing::debug!(session_id = %event.session_id, "duplicate gossip event ignored");
    } else {
        let applied = receiver.session_cache.apply_event(&event);
        tracing::debug!(
            session_id = %event.session_id,
            origin = %event.origin_id,
            revoked = event.revoked,
            applied,
            "gossip event received"
        );
    }

    let ack = GossipAck {
        sequence: receiver.sequence.fetch_add(1, Ordering::Relaxed),
    };
    match encode_message(&ack) {
        Ok(body) => ([(header::CONTENT_TYPE, RPC_CONTENT_TYPE)], body).into_response(),
        Err(_) => StatusCode::INTERNAL_SERVER_ERROR.into_response(),
    }
}

async fn receive_ack(State(_receiver): State<GossipReceiver>, body: Bytes) -> Response {
    let ack: AckRequest = match decode_message(&body) {
        Ok(ack) => ack,
        Err(_) => return StatusCode::BAD_REQUEST.into_response(),
    };
    tracing::trace!(session_id = %ack.session_id, sequence = ack.sequence, "ack confirmed");
    match encode_message(&AckResponse {}) {
        Ok(body) => ([(header::CONTENT_TYPE, RPC_CONTENT_TYPE)], body).into_response(),
        Err(_) => StatusCode::INTERNAL_SERVER_ERROR.into_response(),
    }
}
