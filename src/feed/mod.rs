//! Channel Multiplexer
//!
//! Maps each document id to one shared broker channel subscription, no
//! matter how many subscriptions depend on it:
//!
//! ```text
//!   join(doc) ──► refs 0→1 ──► broker.subscribe(op:<doc>)
//!   join(doc) ──► refs 1→2     (no broker traffic)
//!   leave     ──► refs 2→1
//!   leave     ──► refs 1→0 ──► broker.unsubscribe(op:<doc>)
//! ```
//!
//! Broker deliveries are parsed once per message and fanned out to every
//! handle joined on the document.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, Mutex};

use crate::broker::{channel_name, Broker, BrokerError, BrokerMessage, Deliveries};
use crate::document::{DocumentId, Mutation};

/// Mutation records fanned out to one joined handle
pub type FeedReceiver = mpsc::UnboundedReceiver<Arc<Mutation>>;

/// Proof of one successful `join`; must be given back through `leave`
#[derive(Debug)]
pub struct FeedHandle {
    document_id: DocumentId,
    token: u64,
}

impl FeedHandle {
    pub fn document_id(&self) -> &DocumentId {
        &self.document_id
    }
}

/// Shared broker subscription of one document
struct Feed {
    channel: String,
    subscribers: HashMap<u64, mpsc::UnboundedSender<Arc<Mutation>>>,
}

impl Feed {
    fn refs(&self) -> usize {
        self.subscribers.len()
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FeedError {
    #[error("Broker error: {0}")]
    Broker(#[from] BrokerError),
}

pub struct ChannelMux {
    broker: Arc<dyn Broker>,
    channel_prefix: String,
    /// Single writer of ref-count state; held across broker calls so joins
    /// and leaves on a document never interleave
    feeds: Mutex<HashMap<DocumentId, Feed>>,
    next_token: AtomicU64,
}

impl ChannelMux {
    pub fn new(broker: Arc<dyn Broker>, channel_prefix: impl Into<String>) -> Self {
        Self {
            broker,
            channel_prefix: channel_prefix.into(),
            feeds: Mutex::new(HashMap::new()),
            next_token: AtomicU64::new(1),
        }
    }

    /// Join the feed of a document, subscribing on the broker when this is
    /// the first reference.
    pub async fn join(&self, document_id: &DocumentId) -> Result<(FeedHandle, FeedReceiver), FeedError> {
        let mut feeds = self.feeds.lock().await;

        let feed = match feeds.entry(document_id.clone()) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => {
                let channel = channel_name(&self.channel_prefix, document_id);
                self.broker.subscribe(&channel).await?;
                tracing::debug!(document_id = %document_id, channel = %channel, "Feed created");
                entry.insert(Feed {
                    channel,
                    subscribers: HashMap::new(),
                })
            }
        };

        let token = self.next_token.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::unbounded_channel();
        feed.subscribers.insert(token, tx);

        tracing::trace!(document_id = %document_id, refs = feed.refs(), "Feed joined");

        Ok((
            FeedHandle {
                document_id: document_id.clone(),
                token,
            },
            rx,
        ))
    }

    /// Release a handle, unsubscribing on the broker when it was the last.
    ///
    /// The reference is released even when the broker unsubscribe fails; the
    /// error is returned for reporting only.
    pub async fn leave(&self, handle: FeedHandle) -> Result<(), FeedError> {
        let mut feeds = self.feeds.lock().await;

        let Some(feed) = feeds.get_mut(&handle.document_id) else {
            tracing::warn!(document_id = %handle.document_id, "Leave on unknown feed ignored");
            return Ok(());
        };
        if feed.subscribers.remove(&handle.token).is_none() {
            tracing::warn!(document_id = %handle.document_id, "Leave with stale handle ignored");
            return Ok(());
        }
        tracing::trace!(document_id = %handle.document_id, refs = feed.refs(), "Feed left");

        if feed.refs() > 0 {
            return Ok(());
        }

        let channel = feed.channel.clone();
        feeds.remove(&handle.document_id);
        tracing::debug!(document_id = %handle.document_id, channel = %channel, "Feed destroyed");
        self.broker.unsubscribe(&channel).await?;
        Ok(())
    }

    /// Fan a broker delivery out to every handle joined on its document
    pub async fn dispatch(&self, message: BrokerMessage) {
        let Some(id) = message.channel.strip_prefix(&self.channel_prefix) else {
            tracing::debug!(channel = %message.channel, "Ignoring message on foreign channel");
            return;
        };
        let document_id = DocumentId::new(id);

        let feeds = self.feeds.lock().await;
        let Some(feed) = feeds.get(&document_id) else {
            tracing::debug!(document_id = %document_id, "Ignoring message - no feed");
            return;
        };

        let mutation = match Mutation::parse(&message.payload) {
            Ok(mutation) => Arc::new(mutation),
            Err(e) => {
                tracing::warn!(document_id = %document_id, error = %e, "Dropping malformed mutation");
                return;
            }
        };

        for tx in feed.subscribers.values() {
            let _ = tx.send(Arc::clone(&mutation));
        }
    }

    /// Drain the broker delivery queue until it closes
    pub async fn run(self: Arc<Self>, mut deliveries: Deliveries) {
        while let Some(message) = deliveries.recv().await {
            self.dispatch(message).await;
        }
        tracing::info!("Broker delivery queue closed");
    }

    /// Number of documents with a live feed
    pub async fn feed_count(&self) -> usize {
        self.feeds.lock().await.len()
    }

    /// Current reference count of a document's feed
    pub async fn refs(&self, document_id: &DocumentId) -> usize {
        self.feeds
            .lock()
            .await
            .get(document_id)
            .map(Feed::refs)
            .unwrap_or(0)
    }
}
