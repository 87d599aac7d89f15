//! In-process broker
//!
//! Delivers published payloads to the single delivery queue for every
//! channel that is currently subscribed, in publish order. Keeps per-channel
//! call counts so callers can observe subscribe/unsubscribe traffic.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use tokio::sync::mpsc;

use super::{Broker, BrokerError, BrokerMessage, BrokerResult, Deliveries};

/// Per-channel call statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChannelStats {
    pub subscribed: bool,
    pub subscribes: usize,
    pub unsubscribes: usize,
    pub published: usize,
    pub delivered: usize,
}

pub struct MemoryBroker {
    channels: Mutex<HashMap<String, ChannelStats>>,
    deliveries: mpsc::UnboundedSender<BrokerMessage>,
}

impl MemoryBroker {
    /// Create a broker together with its delivery queue
    pub fn new() -> (Self, Deliveries) {
        let (tx, rx) = mpsc::unbounded_channel();
        let broker = Self {
            channels: Mutex::new(HashMap::new()),
            deliveries: tx,
        };
        (broker, rx)
    }

    pub fn stats(&self, channel: &str) -> ChannelStats {
        self.channels.lock().get(channel).copied().unwrap_or_default()
    }

    pub fn is_subscribed(&self, channel: &str) -> bool {
        self.stats(channel).subscribed
    }

    /// Number of channels currently subscribed
    pub fn subscribed_count(&self) -> usize {
        self.channels.lock().values().filter(|s| s.subscribed).count()
    }
}

#[async_trait]
impl Broker for MemoryBroker {
    async fn subscribe(&self, channel: &str) -> BrokerResult<()> {
        if self.deliveries.is_closed() {
            return Err(BrokerError::Closed);
        }
        let mut channels = self.channels.lock();
        let stats = channels.entry(channel.to_string()).or_default();
        stats.subscribes += 1;
        stats.subscribed = true;
        tracing::debug!(channel = %channel, "Broker channel subscribed");
        Ok(())
    }

    async fn unsubscribe(&self, channel: &str) -> BrokerResult<()> {
        let mut channels = self.channels.lock();
        let stats = channels.entry(channel.to_string()).or_default();
        stats.unsubscribes += 1;
        stats.subscribed = false;
        tracing::debug!(channel = %channel, "Broker channel unsubscribed");
        Ok(())
    }

    async fn publish(&self, channel: &str, payload: String) -> BrokerResult<()> {
        let mut channels = self.channels.lock();
        let stats = channels.entry(channel.to_string()).or_default();
        stats.published += 1;

        if !stats.subscribed {
            tracing::trace!(channel = %channel, "Ignoring publish - no subscription");
            return Ok(());
        }

        // Sent under the lock so delivery order matches publish order
        self.deliveries
            .send(BrokerMessage {
                channel: channel.to_string(),
                payload,
            })
            .map_err(|_| BrokerError::Closed)?;
        stats.delivered += 1;
        Ok(())
    }
}
