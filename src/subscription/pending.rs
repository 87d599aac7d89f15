//! Subscriptions waiting for their connection
//!
//! A subscription created through the side channel may exist before its
//! target connection does. It is parked here, keyed by connection id, until
//! the connection claims it or the timeout destroys it. Claim and expiry
//! both remove the entry under the registry lock, so exactly one of them
//! wins.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;

use super::{Subscription, SubscriptionEvents};

struct Parked {
    subscription: Subscription,
    events: SubscriptionEvents,
    timer: JoinHandle<()>,
}

pub struct PendingRegistry {
    timeout: Duration,
    entries: Mutex<HashMap<String, Vec<Parked>>>,
}

impl PendingRegistry {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Park a subscription until `connection_id` claims it.
    ///
    /// The entry is dropped early if the subscription tears itself down
    /// while waiting.
    pub fn buffer(
        self: &Arc<Self>,
        connection_id: &str,
        subscription: Subscription,
        events: SubscriptionEvents,
    ) {
        let registry = Arc::downgrade(self);
        let owner = connection_id.to_string();
        let watched = subscription.clone();
        let timeout = self.timeout;

        tracing::debug!(
            connection_id = %connection_id,
            subscription_id = %subscription.id(),
            "Subscription pending"
        );

        // Spawned under the lock so eviction always finds the entry
        let mut entries = self.entries.lock();
        let timer = tokio::spawn(async move {
            let expired = tokio::select! {
                _ = tokio::time::sleep(timeout) => true,
                _ = watched.closed() => false,
            };
            Self::evict(registry, &owner, &watched, expired);
        });

        entries
            .entry(connection_id.to_string())
            .or_default()
            .push(Parked {
                subscription,
                events,
                timer,
            });
    }

    /// Take every subscription parked for `connection_id`, cancelling
    /// their timeouts
    pub fn claim(&self, connection_id: &str) -> Vec<(Subscription, SubscriptionEvents)> {
        let parked = self.entries.lock().remove(connection_id).unwrap_or_default();

        if !parked.is_empty() {
            tracing::debug!(
                connection_id = %connection_id,
                count = parked.len(),
                "Claimed pending subscriptions"
            );
        }

        parked
            .into_iter()
            .map(|p| {
                p.timer.abort();
                (p.subscription, p.events)
            })
            .collect()
    }

    /// Number of parked subscriptions across all connections
    pub fn len(&self) -> usize {
        self.entries.lock().values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn evict(registry: Weak<Self>, connection_id: &str, subscription: &Subscription, expired: bool) {
        let Some(registry) = registry.upgrade() else {
            return;
        };

        let removed = {
            let mut entries = registry.entries.lock();
            let Some(parked) = entries.get_mut(connection_id) else {
                return;
            };
            let Some(index) = parked.iter().position(|p| p.subscription.ptr_eq(subscription)) else {
                return;
            };
            let removed = parked.remove(index);
            if parked.is_empty() {
                entries.remove(connection_id);
            }
            removed
        };

        if expired {
            tracing::info!(
                connection_id = %connection_id,
                subscription_id = %subscription.id(),
                "Pending subscription timed out"
            );
            removed.subscription.destroy();
        }
    }
}
