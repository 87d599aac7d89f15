//! Subscription lifecycle driver

use parking_lot::Mutex;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};

use super::state::{OpBuffer, ReadyState};
use super::{
    Exposure, Source, SubscriptionContext, SubscriptionError, SubscriptionEvent,
    SubscriptionEvents, SubscriptionId,
};
use crate::document::{filter, Mutation};
use crate::feed::{ChannelMux, FeedError, FeedHandle, FeedReceiver};
use crate::store::DocumentStore;

/// Handle to a running subscription.
///
/// Cloning is cheap; all clones control the same subscription. The
/// lifecycle runs on its own task from [`Subscription::spawn`] until the
/// subscription is destroyed or fails.
#[derive(Clone)]
pub struct Subscription {
    inner: Arc<Inner>,
}

struct Inner {
    id: SubscriptionId,
    mux: Arc<ChannelMux>,
    core: Mutex<Core>,
    state: watch::Sender<ReadyState>,
    events: mpsc::UnboundedSender<SubscriptionEvent>,
}

struct Core {
    state: ReadyState,
    exposure: Option<Exposure>,
    buffer: OpBuffer,
    snapshot: Option<Value>,
    feed: Option<FeedHandle>,
    /// A feed join is in flight; the driver finishes any teardown
    joining: bool,
    error: Option<SubscriptionError>,
}

impl Subscription {
    /// Create a subscription and start its lifecycle
    pub fn spawn(
        id: impl Into<SubscriptionId>,
        source: Source,
        context: &SubscriptionContext,
    ) -> (Self, SubscriptionEvents) {
        let (events, receiver) = mpsc::unbounded_channel();
        let (state, _) = watch::channel(ReadyState::Discovering);

        let subscription = Self {
            inner: Arc::new(Inner {
                id: id.into(),
                mux: Arc::clone(&context.mux),
                core: Mutex::new(Core {
                    state: ReadyState::Discovering,
                    exposure: None,
                    buffer: OpBuffer::new(),
                    snapshot: None,
                    feed: None,
                    joining: false,
                    error: None,
                }),
                state,
                events,
            }),
        };

        let driver = subscription.clone();
        let store = Arc::clone(&context.store);
        tokio::spawn(async move { driver.run(source, store).await });

        (subscription, receiver)
    }

    pub fn id(&self) -> &str {
        &self.inner.id
    }

    pub fn state(&self) -> ReadyState {
        self.inner.core.lock().state
    }

    pub fn exposure(&self) -> Option<Exposure> {
        self.inner.core.lock().exposure.clone()
    }

    /// Snapshot sent as the payload, while subscribed
    pub fn snapshot(&self) -> Option<Value> {
        self.inner.core.lock().snapshot.clone()
    }

    pub fn error(&self) -> Option<SubscriptionError> {
        self.inner.core.lock().error.clone()
    }

    /// Operations held back until the payload goes out
    pub fn buffered(&self) -> usize {
        self.inner.core.lock().buffer.len()
    }

    pub fn ptr_eq(&self, other: &Subscription) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Wait until the subscription is live.
    ///
    /// Fails with the recorded error, or [`SubscriptionError::Destroyed`],
    /// when teardown starts first.
    pub async fn ready(&self) -> Result<(), SubscriptionError> {
        let mut state = self.inner.state.subscribe();
        let reached = state
            .wait_for(|s| *s >= ReadyState::Subscribed)
            .await
            .map(|s| *s);

        match reached {
            Ok(ReadyState::Subscribed) => Ok(()),
            _ => Err(self.error().unwrap_or(SubscriptionError::Destroyed)),
        }
    }

    /// Wait until teardown has completed
    pub async fn closed(&self) {
        let mut state = self.inner.state.subscribe();
        let _ = state.wait_for(|s| *s == ReadyState::Unsubscribed).await;
    }

    /// Tear the subscription down. Idempotent.
    ///
    /// Returns immediately; the feed is released in the background and
    /// `Destroyed` is emitted once teardown completes.
    pub fn destroy(&self) {
        let mut guard = self.inner.core.lock();
        let core = &mut *guard;

        match core.state {
            ReadyState::Unsubscribing | ReadyState::Unsubscribed => {
                tracing::debug!(
                    subscription_id = %self.inner.id,
                    state = %core.state,
                    "Ignoring destroy"
                );
            }
            ReadyState::Discovering => self.finish(core),
            ReadyState::Subscribing | ReadyState::Subscribed => {
                core.buffer.clear();
                core.snapshot = None;
                self.set_state(core, ReadyState::Unsubscribing);

                if let Some(handle) = core.feed.take() {
                    let subscription = self.clone();
                    tokio::spawn(async move { subscription.release(handle).await });
                } else if !core.joining {
                    self.finish(core);
                }
            }
        }
    }

    async fn run(self, source: Source, store: Arc<dyn DocumentStore>) {
        let mut state = self.inner.state.subscribe();
        let closing = async move {
            let _ = state.wait_for(ReadyState::is_closing).await;
        };
        tokio::pin!(closing);

        let exposure = match source {
            Source::Exposed(exposure) => exposure,
            Source::Discover(discovery) => {
                let discovered = tokio::select! {
                    result = discovery.discover(&self.inner.id) => result,
                    _ = &mut closing => return,
                };
                match discovered {
                    Ok(exposure) => exposure,
                    Err(e) => {
                        self.fail(e);
                        return;
                    }
                }
            }
        };

        if !self.begin_subscribing(&exposure) {
            return;
        }

        let joined = self.inner.mux.join(&exposure.document.id).await;
        let Some(mut feed) = self.attach_feed(joined).await else {
            return;
        };

        let document = &exposure.document;
        let fetch = store.find_by_id(&document.collection, &document.id, &exposure.projection);
        tokio::pin!(fetch);

        let fetched = loop {
            tokio::select! {
                biased;
                result = &mut fetch => break result,
                Some(mutation) = feed.recv() => self.on_mutation(&mutation),
                _ = &mut closing => return,
            }
        };

        let snapshot = match fetched {
            Ok(Some(snapshot)) => snapshot,
            Ok(None) => {
                self.fail(SubscriptionError::NotFound(document.clone()));
                return;
            }
            Err(e) => {
                self.fail(SubscriptionError::Store(e.to_string()));
                return;
            }
        };

        if !self.go_live(snapshot) {
            return;
        }

        loop {
            tokio::select! {
                received = feed.recv() => match received {
                    Some(mutation) => self.on_mutation(&mutation),
                    None => break,
                },
                _ = &mut closing => break,
            }
        }
    }

    fn begin_subscribing(&self, exposure: &Exposure) -> bool {
        let mut guard = self.inner.core.lock();
        let core = &mut *guard;
        if core.state != ReadyState::Discovering {
            return false;
        }
        core.exposure = Some(exposure.clone());
        core.joining = true;
        self.set_state(core, ReadyState::Subscribing);
        true
    }

    async fn attach_feed(
        &self,
        joined: Result<(FeedHandle, FeedReceiver), FeedError>,
    ) -> Option<FeedReceiver> {
        let (handle, receiver) = match joined {
            Ok(pair) => pair,
            Err(e) => {
                let live = {
                    let mut guard = self.inner.core.lock();
                    let core = &mut *guard;
                    core.joining = false;
                    let live = core.state == ReadyState::Subscribing;
                    if !live {
                        self.finish(core);
                    }
                    live
                };
                if live {
                    self.fail(e.into());
                }
                return None;
            }
        };

        {
            let mut core = self.inner.core.lock();
            core.joining = false;
            if core.state == ReadyState::Subscribing {
                core.feed = Some(handle);
                return Some(receiver);
            }
        }

        // destroyed while the join was in flight
        self.release(handle).await;
        None
    }

    fn go_live(&self, snapshot: Value) -> bool {
        let mut guard = self.inner.core.lock();
        let core = &mut *guard;
        if core.state != ReadyState::Subscribing {
            return false;
        }

        core.snapshot = Some(snapshot.clone());
        self.set_state(core, ReadyState::Subscribed);
        self.emit(SubscriptionEvent::Payload(snapshot));
        for op in core.buffer.drain() {
            self.emit(SubscriptionEvent::Op(op));
        }
        true
    }

    fn on_mutation(&self, mutation: &Mutation) {
        let mut guard = self.inner.core.lock();
        let core = &mut *guard;
        if !matches!(core.state, ReadyState::Subscribing | ReadyState::Subscribed) {
            return;
        }
        let Some(exposure) = core.exposure.as_ref() else {
            return;
        };

        for record in filter(mutation, &exposure.projection) {
            if let Err(op) = core.buffer.push(record.to_value()) {
                self.emit(SubscriptionEvent::Op(op));
            }
        }
    }

    async fn release(&self, handle: FeedHandle) {
        let released = self.inner.mux.leave(handle).await;

        let mut guard = self.inner.core.lock();
        let core = &mut *guard;
        if let Err(e) = released {
            tracing::warn!(subscription_id = %self.inner.id, error = %e, "Feed release failed");
            let error = SubscriptionError::from(e);
            core.error = Some(error.clone());
            self.emit(SubscriptionEvent::Error(error));
        }
        self.finish(core);
    }

    fn fail(&self, error: SubscriptionError) {
        {
            let mut core = self.inner.core.lock();
            if core.state.is_closing() {
                return;
            }
            tracing::warn!(subscription_id = %self.inner.id, error = %error, "Subscription failed");
            core.error = Some(error.clone());
            self.emit(SubscriptionEvent::Error(error));
        }
        self.destroy();
    }

    fn finish(&self, core: &mut Core) {
        if core.state == ReadyState::Unsubscribed {
            return;
        }
        core.buffer.clear();
        core.snapshot = None;
        core.feed = None;
        self.set_state(core, ReadyState::Unsubscribed);
        self.emit(SubscriptionEvent::Destroyed);
    }

    fn set_state(&self, core: &mut Core, state: ReadyState) {
        tracing::trace!(
            subscription_id = %self.inner.id,
            from = %core.state,
            to = %state,
            "State change"
        );
        core.state = state;
        self.inner.state.send_replace(state);
    }

    fn emit(&self, event: SubscriptionEvent) {
        let _ = self.inner.events.send(event);
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.inner.id)
            .field("state", &self.state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::MemoryBroker;
    use crate::document::{DocumentId, DocumentRef, Projection};
    use crate::store::{MemoryStore, StoreResult};
    use crate::subscription::Discovery;
    use async_trait::async_trait;
    use serde_json::json;
    use tokio::sync::Notify;

    struct Harness {
        store: Arc<MemoryStore>,
        broker: Arc<MemoryBroker>,
        mux: Arc<ChannelMux>,
    }

    impl Harness {
        async fn new() -> Self {
            let (broker, deliveries) = MemoryBroker::new();
            let broker = Arc::new(broker);
            let mux = Arc::new(ChannelMux::new(broker.clone(), "op:"));
            tokio::spawn(Arc::clone(&mux).run(deliveries));

            let store = Arc::new(MemoryStore::new(broker.clone(), "op:"));
            store
                .insert(
                    "posts",
                    json!({"_id": "1", "title": "Tobi", "body": "hi", "likes": 0}),
                )
                .await
                .unwrap();

            Self { store, broker, mux }
        }

        fn context(&self) -> SubscriptionContext {
            SubscriptionContext::new(Arc::clone(&self.mux), self.store.clone())
        }

        async fn set(&self, fields: serde_json::Value) {
            self.store
                .update_by_id("posts", &DocumentId::new("1"), json!({ "$set": fields }))
                .await
                .unwrap();
        }
    }

    fn post(projection: Projection) -> Source {
        Source::Exposed(Exposure::new(DocumentRef::new("posts", "1"), projection))
    }

    /// Holds snapshot reads until released
    struct GatedStore {
        inner: Arc<MemoryStore>,
        gate: Arc<Notify>,
    }

    #[async_trait]
    impl DocumentStore for GatedStore {
        async fn find_by_id(
            &self,
            collection: &str,
            id: &DocumentId,
            projection: &Projection,
        ) -> StoreResult<Option<Value>> {
            self.gate.notified().await;
            self.inner.find_by_id(collection, id, projection).await
        }
    }

    struct NeverDiscovers;

    #[async_trait]
    impl Discovery for NeverDiscovers {
        async fn discover(&self, _id: &str) -> Result<Exposure, SubscriptionError> {
            std::future::pending().await
        }
    }

    struct UnknownDiscovery;

    #[async_trait]
    impl Discovery for UnknownDiscovery {
        async fn discover(&self, id: &str) -> Result<Exposure, SubscriptionError> {
            Err(SubscriptionError::Unknown(id.to_string()))
        }
    }

    #[tokio::test]
    async fn test_payload_then_filtered_ops() {
        let h = Harness::new().await;
        let (sub, mut events) =
            Subscription::spawn("s1", post(Projection::include(["title"])), &h.context());

        assert_eq!(
            events.recv().await.unwrap(),
            SubscriptionEvent::Payload(json!({"_id": "1", "title": "Tobi"}))
        );
        assert_eq!(sub.state(), ReadyState::Subscribed);
        assert_eq!(
            sub.exposure().map(|e| e.projection),
            Some(Projection::include(["title"]))
        );

        h.set(json!({"body": "hidden"})).await;
        h.set(json!({"title": "Woot"})).await;

        assert_eq!(
            events.recv().await.unwrap(),
            SubscriptionEvent::Op(json!([{"_id": "1"}, {"$set": {"title": "Woot"}}]))
        );
    }

    #[tokio::test]
    async fn test_ops_during_snapshot_fetch_are_buffered() {
        let h = Harness::new().await;
        let gate = Arc::new(Notify::new());
        let store = Arc::new(GatedStore {
            inner: h.store.clone(),
            gate: gate.clone(),
        });
        let context = SubscriptionContext::new(Arc::clone(&h.mux), store);

        let (sub, mut events) = Subscription::spawn("s1", post(Projection::All), &context);
        while !h.broker.is_subscribed("op:1") {
            tokio::task::yield_now().await;
        }

        h.set(json!({"likes": 1})).await;
        h.set(json!({"likes": 2})).await;
        while sub.buffered() < 2 {
            tokio::task::yield_now().await;
        }
        assert!(events.try_recv().is_err());

        gate.notify_one();
        assert!(matches!(events.recv().await.unwrap(), SubscriptionEvent::Payload(_)));
        assert_eq!(
            events.recv().await.unwrap(),
            SubscriptionEvent::Op(json!([{"_id": "1"}, {"$set": {"likes": 1}}]))
        );
        assert_eq!(
            events.recv().await.unwrap(),
            SubscriptionEvent::Op(json!([{"_id": "1"}, {"$set": {"likes": 2}}]))
        );
        assert_eq!(sub.buffered(), 0);
    }

    #[tokio::test]
    async fn test_missing_document_fails_and_destroys() {
        let h = Harness::new().await;
        let source = Source::Exposed(Exposure::new(DocumentRef::new("posts", "404"), Projection::All));
        let (sub, mut events) = Subscription::spawn("s1", source, &h.context());

        let expected = SubscriptionError::NotFound(DocumentRef::new("posts", "404"));
        assert_eq!(sub.ready().await, Err(expected.clone()));
        assert_eq!(events.recv().await.unwrap(), SubscriptionEvent::Error(expected));
        assert_eq!(events.recv().await.unwrap(), SubscriptionEvent::Destroyed);

        sub.closed().await;
        assert_eq!(h.broker.stats("op:404").subscribes, 1);
        assert_eq!(h.broker.stats("op:404").unsubscribes, 1);
    }

    #[tokio::test]
    async fn test_destroy_is_idempotent() {
        let h = Harness::new().await;
        let (sub, mut events) = Subscription::spawn("s1", post(Projection::All), &h.context());
        sub.ready().await.unwrap();
        assert!(matches!(events.recv().await.unwrap(), SubscriptionEvent::Payload(_)));

        sub.destroy();
        sub.destroy();
        assert_eq!(sub.state(), ReadyState::Unsubscribing);

        sub.closed().await;
        sub.destroy();
        assert_eq!(events.recv().await.unwrap(), SubscriptionEvent::Destroyed);
        assert!(events.try_recv().is_err());
        assert_eq!(h.broker.stats("op:1").unsubscribes, 1);
        assert!(sub.snapshot().is_none());
    }

    #[tokio::test]
    async fn test_no_ops_after_destroy() {
        let h = Harness::new().await;
        let (sub, mut events) = Subscription::spawn("s1", post(Projection::All), &h.context());
        sub.ready().await.unwrap();
        events.recv().await.unwrap();

        sub.destroy();
        h.set(json!({"likes": 5})).await;
        sub.closed().await;

        assert_eq!(events.recv().await.unwrap(), SubscriptionEvent::Destroyed);
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_destroy_while_discovering() {
        let h = Harness::new().await;
        let (sub, mut events) =
            Subscription::spawn("s1", Source::Discover(Arc::new(NeverDiscovers)), &h.context());

        assert_eq!(sub.state(), ReadyState::Discovering);
        sub.destroy();
        assert_eq!(sub.state(), ReadyState::Unsubscribed);
        assert_eq!(events.recv().await.unwrap(), SubscriptionEvent::Destroyed);
        assert_eq!(sub.ready().await, Err(SubscriptionError::Destroyed));
        assert_eq!(h.broker.subscribed_count(), 0);
    }

    #[tokio::test]
    async fn test_discovery_failure() {
        let h = Harness::new().await;
        let (sub, mut events) =
            Subscription::spawn("s9", Source::Discover(Arc::new(UnknownDiscovery)), &h.context());

        assert_eq!(
            events.recv().await.unwrap(),
            SubscriptionEvent::Error(SubscriptionError::Unknown("s9".into()))
        );
        assert_eq!(events.recv().await.unwrap(), SubscriptionEvent::Destroyed);
        assert_eq!(sub.state(), ReadyState::Unsubscribed);
    }

    #[tokio::test]
    async fn test_shared_feed_outlives_one_subscription() {
        let h = Harness::new().await;
        let (a, mut a_events) = Subscription::spawn("a", post(Projection::All), &h.context());
        let (b, mut b_events) =
            Subscription::spawn("b", post(Projection::include(["likes"])), &h.context());
        a.ready().await.unwrap();
        b.ready().await.unwrap();
        a_events.recv().await.unwrap();
        b_events.recv().await.unwrap();

        a.destroy();
        a.closed().await;
        assert!(h.broker.is_subscribed("op:1"));

        h.set(json!({"likes": 3})).await;
        assert_eq!(
            b_events.recv().await.unwrap(),
            SubscriptionEvent::Op(json!([{"_id": "1"}, {"$set": {"likes": 3}}]))
        );
        assert_eq!(h.broker.stats("op:1").subscribes, 1);
    }
}
