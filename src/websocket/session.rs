//! Client Session
//!
//! One session per connection. It owns the subscriptions attached to the
//! connection and turns their events into outbound packets.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Notify};

use super::messages::ServerPacket;
use crate::subscription::{Subscription, SubscriptionEvent, SubscriptionEvents, SubscriptionId};

/// Unique identifier for a connection
pub type ConnectionId = String;

pub struct ClientSession {
    id: ConnectionId,
    outbound: mpsc::UnboundedSender<ServerPacket>,
    subscriptions: Mutex<HashMap<SubscriptionId, Subscription>>,
    closed: AtomicBool,
    close_requested: Notify,
}

impl ClientSession {
    pub fn new(id: impl Into<ConnectionId>, outbound: mpsc::UnboundedSender<ServerPacket>) -> Arc<Self> {
        Arc::new(Self {
            id: id.into(),
            outbound,
            subscriptions: Mutex::new(HashMap::new()),
            closed: AtomicBool::new(false),
            close_requested: Notify::new(),
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Attach a subscription and forward its events to the connection.
    ///
    /// A subscription whose id is already attached is redundant: it is
    /// destroyed without any of its events reaching the client. Returns
    /// whether the subscription was attached.
    pub fn add(self: &Arc<Self>, subscription: Subscription, mut events: SubscriptionEvents) -> bool {
        {
            let mut subscriptions = self.subscriptions.lock();
            if self.is_closed() || subscriptions.contains_key(subscription.id()) {
                drop(subscriptions);
                tracing::debug!(
                    connection_id = %self.id,
                    subscription_id = %subscription.id(),
                    "Destroying redundant subscription"
                );
                subscription.destroy();
                return false;
            }
            subscriptions.insert(subscription.id().to_string(), subscription.clone());
        }

        let session = Arc::clone(self);
        tokio::spawn(async move {
            let id = subscription.id().to_string();
            while let Some(event) = events.recv().await {
                match event {
                    SubscriptionEvent::Payload(d) => {
                        session.send(ServerPacket::Payload { i: id.clone(), d });
                    }
                    SubscriptionEvent::Op(d) => {
                        session.send(ServerPacket::Op { i: id.clone(), d });
                    }
                    SubscriptionEvent::Error(e) => {
                        tracing::warn!(
                            connection_id = %session.id,
                            subscription_id = %id,
                            error = %e,
                            "Subscription error"
                        );
                        subscription.destroy();
                    }
                    SubscriptionEvent::Destroyed => {
                        session.detach(&subscription);
                        session.send(ServerPacket::Unsubscribed { i: id.clone() });
                        break;
                    }
                }
            }
        });

        true
    }

    /// Destroy an attached subscription; the `u` packet follows once
    /// teardown completes
    pub fn remove(&self, id: &str) -> bool {
        let subscription = self.subscriptions.lock().get(id).cloned();
        match subscription {
            Some(subscription) => {
                subscription.destroy();
                true
            }
            None => {
                tracing::debug!(connection_id = %self.id, subscription_id = %id, "Unsubscribe for unknown subscription");
                false
            }
        }
    }

    /// Destroy every attached subscription and refuse new ones
    pub fn close_all(&self) {
        self.closed.store(true, Ordering::SeqCst);
        let subscriptions: Vec<_> = self.subscriptions.lock().drain().map(|(_, s)| s).collect();

        tracing::debug!(
            connection_id = %self.id,
            count = subscriptions.len(),
            "Closing session"
        );
        for subscription in subscriptions {
            subscription.destroy();
        }
    }

    /// Ask the connection to close; used for transport failures
    pub fn request_close(&self) {
        self.close_requested.notify_one();
    }

    /// Resolves once [`ClientSession::request_close`] has been called
    pub async fn close_requested(&self) {
        self.close_requested.notified().await;
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.subscriptions.lock().contains_key(id)
    }

    pub fn subscription_count(&self) -> usize {
        self.subscriptions.lock().len()
    }

    /// Queue a packet for the connection
    pub fn send(&self, packet: ServerPacket) -> bool {
        if self.outbound.send(packet).is_err() {
            tracing::debug!(connection_id = %self.id, "Outbound queue closed");
            self.request_close();
            return false;
        }
        true
    }

    fn detach(&self, subscription: &Subscription) {
        let mut subscriptions = self.subscriptions.lock();
        if subscriptions
            .get(subscription.id())
            .is_some_and(|s| s.ptr_eq(subscription))
        {
            subscriptions.remove(subscription.id());
        }
    }
}

impl fmt::Debug for ClientSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientSession")
            .field("id", &self.id)
            .field("subscriptions", &self.subscription_count())
            .field("closed", &self.is_closed())
            .finish()
    }
}
