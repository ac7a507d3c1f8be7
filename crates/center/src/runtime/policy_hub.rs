//! Server-side fan-out of policy mutations.
//!
//! Each subscribed agent owns a bounded queue (capacity 100). Overflow
//! drops the oldest entry — a later delivery always carries a fresher
//! `updated_at` for any policy it mentions, so convergence survives the
//! drop. Subscribing again under the same agent id replaces the previous
//! queue; a replaced or closed subscriber is detached from the hub.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::Notify;

use mfasrv_protocol::PolicyUpdate;

use crate::metrics;

const QUEUE_CAPACITY: usize = 100;

/// One agent's subscription.
pub struct Subscriber {
    queue: Mutex<VecDeque<PolicyUpdate>>,
    notify: Notify,
    closed: AtomicBool,
}

impl Subscriber {
    fn new() -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
            closed: AtomicBool::new(false),
        }
    }

    fn push(&self, update: PolicyUpdate) {
        let mut queue = self.queue.lock();
        if queue.len() >= QUEUE_CAPACITY {
            queue.pop_front();
        }
        queue.push_back(update);
        drop(queue);
        self.notify.notify_one();
    }

    /// Drain everything currently queued.
    pub fn drain(&self) -> Vec<PolicyUpdate> {
        self.queue.lock().drain(..).collect()
    }

    /// Wait until at least one update is queued or the subscriber closes.
    /// Returns false once closed.
    pub async fn wait(&self) -> bool {
        loop {
            if self.closed.load(Ordering::Acquire) {
                return false;
            }
            if !self.queue.lock().is_empty() {
                return true;
            }
            self.notify.notified().await;
        }
    }

    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.notify.notify_one();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

/// The hub the REST mutation handlers publish into.
#[derive(Default)]
pub struct PolicyStreamHub {
    subscribers: Mutex<HashMap<String, Arc<Subscriber>>>,
}

impl PolicyStreamHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe `agent_id`, replacing (and closing) any prior subscription.
    pub fn subscribe(&self, agent_id: &str) -> Arc<Subscriber> {
        let subscriber = Arc::new(Subscriber::new());
        let previous = self
            .subscribers
            .lock()
            .insert(agent_id.to_owned(), subscriber.clone());
        if let Some(previous) = previous {
            previous.close();
        } else {
            metrics::STREAM_SUBSCRIBERS.inc();
        }
        tracing::debug!(agent_id, "policy stream subscribed");
        subscriber
    }

    /// Detach `subscriber` if it is still the one registered for the agent.
    pub fn unsubscribe(&self, agent_id: &str, subscriber: &Arc<Subscriber>) {
        let mut subscribers = self.subscribers.lock();
        if let Some(current) = subscribers.get(agent_id) {
            if Arc::ptr_eq(current, subscriber) {
                subscribers.remove(agent_id);
                metrics::STREAM_SUBSCRIBERS.dec();
            }
        }
        subscriber.close();
    }

    /// Enqueue a mutation to every live subscriber.
    pub fn publish(&self, update: PolicyUpdate) {
        let mut subscribers = self.subscribers.lock();
        let before = subscribers.len();
        subscribers.retain(|_, s| !s.is_closed());
        let dropped = before - subscribers.len();
        if dropped > 0 {
            metrics::STREAM_SUBSCRIBERS.sub(dropped as i64);
        }
        for subscriber in subscribers.values() {
            subscriber.push(update.clone());
        }
        tracing::debug!(
            policy_id = %update.policy_id,
            deleted = update.deleted,
            subscribers = subscribers.len(),
            "policy update published"
        );
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn update(id: &str, seq: i64) -> PolicyUpdate {
        PolicyUpdate {
            policy_id: id.into(),
            policy_json: format!("{{\"seq\":{seq}}}"),
            deleted: false,
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn overflow_drops_oldest() {
        let hub = PolicyStreamHub::new();
        let sub = hub.subscribe("dc1");
        for i in 0..(QUEUE_CAPACITY as i64 + 10) {
            hub.publish(update("p", i));
        }
        let drained = sub.drain();
        assert_eq!(drained.len(), QUEUE_CAPACITY);
        // The oldest ten were dropped; the newest survives.
        assert_eq!(drained.first().unwrap().policy_json, "{\"seq\":10}");
        assert_eq!(
            drained.last().unwrap().policy_json,
            format!("{{\"seq\":{}}}", QUEUE_CAPACITY as i64 + 9)
        );
    }

    #[test]
    fn resubscribe_replaces_and_closes_prior() {
        let hub = PolicyStreamHub::new();
        let first = hub.subscribe("dc1");
        let second = hub.subscribe("dc1");
        assert!(first.is_closed());
        assert_eq!(hub.subscriber_count(), 1);

        hub.publish(update("p", 1));
        assert!(first.drain().is_empty());
        assert_eq!(second.drain().len(), 1);
    }

    #[test]
    fn unsubscribe_ignores_stale_handles() {
        let hub = PolicyStreamHub::new();
        let stale = hub.subscribe("dc1");
        let fresh = hub.subscribe("dc1");
        // Unsubscribing the stale handle must not evict the fresh one.
        hub.unsubscribe("dc1", &stale);
        assert_eq!(hub.subscriber_count(), 1);
        hub.unsubscribe("dc1", &fresh);
        assert_eq!(hub.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn wait_wakes_on_publish_and_close() {
        let hub = Arc::new(PolicyStreamHub::new());
        let sub = hub.subscribe("dc1");

        let waiter = {
            let sub = sub.clone();
            tokio::spawn(async move { sub.wait().await })
        };
        hub.publish(update("p", 1));
        assert!(waiter.await.unwrap());

        sub.drain();
        let waiter = {
            let sub = sub.clone();
            tokio::spawn(async move { sub.wait().await })
        };
        sub.close();
        assert!(!waiter.await.unwrap());
    }
}
