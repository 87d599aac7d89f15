//! End-to-end behavior of the live feed: manager, sessions, subscriptions
//! and the channel multiplexer wired to the in-memory store and broker.

use async_trait::async_trait;
use docfeed::broker::{Broker, BrokerError, BrokerResult, MemoryBroker};
use docfeed::document::{DocumentId, DocumentRef, Projection};
use docfeed::feed::{ChannelMux, FeedError};
use docfeed::manager::{Manager, ManagerConfig};
use docfeed::store::{DocumentStore, MemoryStore, StoreResult};
use docfeed::subscription::{
    Exposure, ReadyState, Source, Subscription, SubscriptionContext, SubscriptionError,
    SubscriptionEvent,
};
use docfeed::websocket::ServerPacket;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Semaphore};

struct Fixture {
    manager: Arc<Manager>,
    store: Arc<MemoryStore>,
    broker: Arc<MemoryBroker>,
}

async fn fixture(document: Value) -> Fixture {
    let (broker, deliveries) = MemoryBroker::new();
    let broker = Arc::new(broker);
    let store = Arc::new(MemoryStore::new(broker.clone(), "op:"));
    store.insert("posts", document).await.unwrap();

    let manager = Manager::new(store.clone(), broker.clone(), ManagerConfig::default());
    manager.start(deliveries);
    Fixture {
        manager,
        store,
        broker,
    }
}

fn post(projection: Projection) -> Exposure {
    Exposure::new(DocumentRef::new("posts", "1"), projection)
}

async fn update(store: &MemoryStore, operators: Value) {
    store
        .update_by_id("posts", &DocumentId::new("1"), operators)
        .await
        .unwrap();
}

/// Snapshot reads wait for a permit
struct GatedStore {
    inner: Arc<MemoryStore>,
    gate: Arc<Semaphore>,
}

#[async_trait]
impl DocumentStore for GatedStore {
    async fn find_by_id(
        &self,
        collection: &str,
        id: &DocumentId,
        projection: &Projection,
    ) -> StoreResult<Option<Value>> {
        self.gate.acquire().await.expect("gate open").forget();
        self.inner.find_by_id(collection, id, projection).await
    }
}

/// Memory broker whose subscribe and unsubscribe calls can be made to fail
struct FlakyBroker {
    inner: MemoryBroker,
    fail_subscribe: AtomicBool,
    fail_unsubscribe: AtomicBool,
}

#[async_trait]
impl Broker for FlakyBroker {
    async fn subscribe(&self, channel: &str) -> BrokerResult<()> {
        if self.fail_subscribe.load(Ordering::SeqCst) {
            return Err(BrokerError::Subscribe {
                channel: channel.to_string(),
                reason: "refused".to_string(),
            });
        }
        self.inner.subscribe(channel).await
    }

    async fn unsubscribe(&self, channel: &str) -> BrokerResult<()> {
        self.inner.unsubscribe(channel).await?;
        if self.fail_unsubscribe.load(Ordering::SeqCst) {
            return Err(BrokerError::Unsubscribe {
                channel: channel.to_string(),
                reason: "refused".to_string(),
            });
        }
        Ok(())
    }

    async fn publish(&self, channel: &str, payload: String) -> BrokerResult<()> {
        self.inner.publish(channel, payload).await
    }
}

#[tokio::test]
async fn test_tobi_becomes_woot() {
    let f = fixture(json!({"_id": "1", "title": "Tobi"})).await;
    let (tx, mut rx) = mpsc::unbounded_channel();
    f.manager.connect(Some("c1".into()), None, tx).await.unwrap();

    let (id, _) = f.manager.expose(post(Projection::All), Some("c1"));
    assert_eq!(
        rx.recv().await.unwrap(),
        ServerPacket::Payload {
            i: id.clone(),
            d: json!({"_id": "1", "title": "Tobi"})
        }
    );

    update(&f.store, json!({"$set": {"title": "Woot"}})).await;
    assert_eq!(
        rx.recv().await.unwrap(),
        ServerPacket::Op {
            i: id,
            d: json!([{"_id": "1"}, {"$set": {"title": "Woot"}}])
        }
    );
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn test_excluded_push_is_not_delivered() {
    let f = fixture(json!({"_id": "1", "likes": ["a"], "dislikes": ["a"]})).await;
    let (tx, mut rx) = mpsc::unbounded_channel();
    f.manager.connect(Some("c1".into()), None, tx).await.unwrap();

    let (id, _) = f
        .manager
        .expose(post(Projection::exclude(["dislikes"])), Some("c1"));
    assert_eq!(
        rx.recv().await.unwrap(),
        ServerPacket::Payload {
            i: id.clone(),
            d: json!({"_id": "1", "likes": ["a"]})
        }
    );

    update(&f.store, json!({"$push": {"likes": "b", "dislikes": "b"}})).await;
    // a later visible write marks the end of the push's deliveries
    update(&f.store, json!({"$set": {"likes": ["z"]}})).await;

    assert_eq!(
        rx.recv().await.unwrap(),
        ServerPacket::Op {
            i: id.clone(),
            d: json!([{"_id": "1"}, {"$push": {"likes": "b"}}])
        }
    );
    assert_eq!(
        rx.recv().await.unwrap(),
        ServerPacket::Op {
            i: id,
            d: json!([{"_id": "1"}, {"$set": {"likes": ["z"]}}])
        }
    );
}

#[tokio::test]
async fn test_projection_drops_invisible_fields() {
    let f = fixture(json!({"_id": "1", "a": 0, "b": 0, "c": 0})).await;
    let (tx, mut rx) = mpsc::unbounded_channel();
    f.manager.connect(Some("c1".into()), None, tx).await.unwrap();

    let (id, _) = f
        .manager
        .expose(post(Projection::include(["a", "b"])), Some("c1"));
    rx.recv().await.unwrap();

    update(&f.store, json!({"$set": {"a": 1, "c": 1}})).await;
    update(&f.store, json!({"$set": {"c": 2}})).await;
    update(&f.store, json!({"$inc": {"b": 1}})).await;

    assert_eq!(
        rx.recv().await.unwrap(),
        ServerPacket::Op {
            i: id.clone(),
            d: json!([{"_id": "1"}, {"$set": {"a": 1}}])
        }
    );
    // the c-only write produced nothing
    assert_eq!(
        rx.recv().await.unwrap(),
        ServerPacket::Op {
            i: id,
            d: json!([{"_id": "1"}, {"$inc": {"b": 1}}])
        }
    );
}

#[tokio::test]
async fn test_one_broker_subscription_per_document() {
    let f = fixture(json!({"_id": "1", "title": "Tobi"})).await;

    let mut receivers = Vec::new();
    for n in 0..3 {
        let (tx, rx) = mpsc::unbounded_channel();
        let sid = format!("c{}", n);
        f.manager.connect(Some(sid.clone()), None, tx).await.unwrap();
        f.manager.expose(post(Projection::All), Some(&sid));
        receivers.push(rx);
    }
    for rx in receivers.iter_mut() {
        assert!(matches!(rx.recv().await.unwrap(), ServerPacket::Payload { .. }));
    }

    assert_eq!(f.broker.stats("op:1").subscribes, 1);
    assert_eq!(f.manager.stats().await.feeds, 1);

    for n in 0..3 {
        f.manager.disconnect(&format!("c{}", n));
    }
    while f.broker.is_subscribed("op:1") {
        tokio::task::yield_now().await;
    }

    let stats = f.broker.stats("op:1");
    assert_eq!(stats.subscribes, 1);
    assert_eq!(stats.unsubscribes, 1);
    assert_eq!(f.manager.stats().await.feeds, 0);
}

#[tokio::test]
async fn test_concurrent_subscriptions_share_feed_and_own_snapshots() {
    let (broker, deliveries) = MemoryBroker::new();
    let broker = Arc::new(broker);
    let mux = Arc::new(ChannelMux::new(broker.clone(), "op:"));
    tokio::spawn(Arc::clone(&mux).run(deliveries));

    let inner = Arc::new(MemoryStore::new(broker.clone(), "op:"));
    inner
        .insert("posts", json!({"_id": "1", "title": "Tobi", "tags": ["x"]}))
        .await
        .unwrap();
    let gate = Arc::new(Semaphore::new(0));
    let store = Arc::new(GatedStore {
        inner: inner.clone(),
        gate: gate.clone(),
    });
    let context = SubscriptionContext::new(Arc::clone(&mux), store);

    let subs: Vec<_> = ["a", "b", "c"]
        .into_iter()
        .map(|id| Subscription::spawn(id, Source::Exposed(post(Projection::All)), &context))
        .collect();

    while mux.refs(&DocumentId::new("1")).await < 3 {
        tokio::task::yield_now().await;
    }
    for (sub, _) in &subs {
        assert_eq!(sub.state(), ReadyState::Subscribing);
    }
    assert_eq!(broker.stats("op:1").subscribes, 1);

    gate.add_permits(3);
    for (sub, _) in &subs {
        sub.ready().await.unwrap();
    }

    let mut first = subs[0].0.snapshot().unwrap();
    first["title"] = json!("Changed");
    first["tags"].as_array_mut().unwrap().push(json!("y"));

    for (sub, _) in &subs[1..] {
        assert_eq!(
            sub.snapshot().unwrap(),
            json!({"_id": "1", "title": "Tobi", "tags": ["x"]})
        );
    }
    assert_eq!(
        subs[0].0.snapshot().unwrap(),
        json!({"_id": "1", "title": "Tobi", "tags": ["x"]})
    );
}

#[tokio::test]
async fn test_updates_during_snapshot_arrive_in_order() {
    let (broker, deliveries) = MemoryBroker::new();
    let broker = Arc::new(broker);
    let mux = Arc::new(ChannelMux::new(broker.clone(), "op:"));
    tokio::spawn(Arc::clone(&mux).run(deliveries));

    let inner = Arc::new(MemoryStore::new(broker.clone(), "op:"));
    inner
        .insert("posts", json!({"_id": "1", "likes": 0}))
        .await
        .unwrap();
    let gate = Arc::new(Semaphore::new(0));

    // the snapshot reflects the document before the updates land
    let snapshot_store = SnapshotBefore {
        snapshot: json!({"_id": "1", "likes": 0}),
        gate: gate.clone(),
    };
    let context = SubscriptionContext::new(Arc::clone(&mux), Arc::new(snapshot_store));

    let (sub, mut events) =
        Subscription::spawn("s1", Source::Exposed(post(Projection::All)), &context);
    while !broker.is_subscribed("op:1") {
        tokio::task::yield_now().await;
    }

    update(&inner, json!({"$inc": {"likes": 1}})).await;
    update(&inner, json!({"$inc": {"likes": 1}})).await;
    while sub.buffered() < 2 {
        tokio::task::yield_now().await;
    }

    gate.add_permits(1);
    assert_eq!(
        events.recv().await.unwrap(),
        SubscriptionEvent::Payload(json!({"_id": "1", "likes": 0}))
    );
    for _ in 0..2 {
        assert_eq!(
            events.recv().await.unwrap(),
            SubscriptionEvent::Op(json!([{"_id": "1"}, {"$inc": {"likes": 1}}]))
        );
    }

    update(&inner, json!({"$inc": {"likes": 1}})).await;
    assert_eq!(
        events.recv().await.unwrap(),
        SubscriptionEvent::Op(json!([{"_id": "1"}, {"$inc": {"likes": 1}}]))
    );
    assert!(events.try_recv().is_err());
}

/// Answers with a fixed snapshot once a permit is granted
struct SnapshotBefore {
    snapshot: Value,
    gate: Arc<Semaphore>,
}

#[async_trait]
impl DocumentStore for SnapshotBefore {
    async fn find_by_id(
        &self,
        _collection: &str,
        _id: &DocumentId,
        _projection: &Projection,
    ) -> StoreResult<Option<Value>> {
        self.gate.acquire().await.expect("gate open").forget();
        Ok(Some(self.snapshot.clone()))
    }
}

#[tokio::test]
async fn test_double_unsubscribe_acks_once() {
    let f = fixture(json!({"_id": "1", "title": "Tobi"})).await;
    let (tx, mut rx) = mpsc::unbounded_channel();
    let session = f.manager.connect(Some("c1".into()), None, tx).await.unwrap();

    let (id, sub) = f.manager.expose(post(Projection::All), Some("c1"));
    let sub = sub.unwrap();
    rx.recv().await.unwrap();

    let packet = json!({"e": "unsubscribe", "i": id}).to_string();
    f.manager.handle_message(&session, &packet).unwrap();
    f.manager.handle_message(&session, &packet).unwrap();
    sub.destroy();
    sub.closed().await;

    assert_eq!(rx.recv().await.unwrap(), ServerPacket::Unsubscribed { i: id });
    while f.broker.is_subscribed("op:1") {
        tokio::task::yield_now().await;
    }
    assert!(rx.try_recv().is_err());
    assert_eq!(f.broker.stats("op:1").unsubscribes, 1);
}

#[tokio::test(start_paused = true)]
async fn test_claim_just_before_timeout_survives() {
    let f = fixture(json!({"_id": "1", "title": "Tobi"})).await;
    let timeout = f.manager.subscription_timeout();

    let (id, sub) = f.manager.expose(post(Projection::All), Some("late"));
    let sub = sub.unwrap();
    sub.ready().await.unwrap();
    assert_eq!(f.manager.stats().await.pending, 1);

    tokio::time::sleep(timeout - Duration::from_millis(1)).await;
    let (tx, mut rx) = mpsc::unbounded_channel();
    f.manager.connect(Some("late".into()), None, tx).await.unwrap();
    assert_eq!(
        rx.recv().await.unwrap(),
        ServerPacket::Payload {
            i: id,
            d: json!({"_id": "1", "title": "Tobi"})
        }
    );

    tokio::time::sleep(timeout * 2).await;
    assert_eq!(sub.state(), ReadyState::Subscribed);
    assert_eq!(f.manager.stats().await.pending, 0);
    assert_eq!(f.broker.stats("op:1").unsubscribes, 0);
}

#[tokio::test(start_paused = true)]
async fn test_unclaimed_subscription_destroyed_once() {
    let f = fixture(json!({"_id": "1", "title": "Tobi"})).await;
    let timeout = f.manager.subscription_timeout();

    let (_, sub) = f.manager.expose(post(Projection::All), Some("never"));
    let sub = sub.unwrap();
    sub.ready().await.unwrap();

    tokio::time::sleep(timeout + Duration::from_millis(1)).await;
    sub.closed().await;
    assert_eq!(sub.state(), ReadyState::Unsubscribed);
    assert_eq!(f.manager.stats().await.pending, 0);

    tokio::time::sleep(timeout * 2).await;
    let stats = f.broker.stats("op:1");
    assert_eq!(stats.subscribes, 1);
    assert_eq!(stats.unsubscribes, 1);

    // a connection arriving later finds nothing to claim
    let (tx, mut rx) = mpsc::unbounded_channel();
    f.manager.connect(Some("never".into()), None, tx).await.unwrap();
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn test_broker_subscribe_failure_destroys_subscription() {
    let (inner, deliveries) = MemoryBroker::new();
    let broker = Arc::new(FlakyBroker {
        inner,
        fail_subscribe: AtomicBool::new(true),
        fail_unsubscribe: AtomicBool::new(false),
    });
    let store = Arc::new(MemoryStore::new(broker.clone(), "op:"));
    store
        .insert("posts", json!({"_id": "1", "title": "Tobi"}))
        .await
        .unwrap();
    let manager = Manager::new(store, broker.clone(), ManagerConfig::default());
    manager.start(deliveries);

    let (tx, mut rx) = mpsc::unbounded_channel();
    let session = manager.connect(Some("c1".into()), None, tx).await.unwrap();
    let (id, sub) = manager.expose(post(Projection::All), Some("c1"));
    let sub = sub.unwrap();

    let expected = SubscriptionError::Feed(FeedError::Broker(BrokerError::Subscribe {
        channel: "op:1".to_string(),
        reason: "refused".to_string(),
    }));
    assert_eq!(sub.ready().await, Err(expected));
    assert_eq!(rx.recv().await.unwrap(), ServerPacket::Unsubscribed { i: id });

    // the connection itself survives
    assert!(!session.is_closed());
    assert_eq!(manager.stats().await.feeds, 0);
}

#[tokio::test]
async fn test_broker_unsubscribe_failure_still_completes_teardown() {
    let (inner, deliveries) = MemoryBroker::new();
    let broker = Arc::new(FlakyBroker {
        inner,
        fail_subscribe: AtomicBool::new(false),
        fail_unsubscribe: AtomicBool::new(true),
    });
    let mux = Arc::new(ChannelMux::new(broker.clone(), "op:"));
    tokio::spawn(Arc::clone(&mux).run(deliveries));
    let store = Arc::new(MemoryStore::new(broker.clone(), "op:"));
    store
        .insert("posts", json!({"_id": "1", "title": "Tobi"}))
        .await
        .unwrap();
    let context = SubscriptionContext::new(Arc::clone(&mux), store);

    let (sub, mut events) =
        Subscription::spawn("s1", Source::Exposed(post(Projection::All)), &context);
    sub.ready().await.unwrap();
    assert!(matches!(events.recv().await.unwrap(), SubscriptionEvent::Payload(_)));

    sub.destroy();
    sub.closed().await;

    assert!(matches!(
        events.recv().await.unwrap(),
        SubscriptionEvent::Error(SubscriptionError::Feed(FeedError::Broker(
            BrokerError::Unsubscribe { .. }
        )))
    ));
    assert_eq!(events.recv().await.unwrap(), SubscriptionEvent::Destroyed);
    assert_eq!(sub.state(), ReadyState::Unsubscribed);
    assert_eq!(mux.feed_count().await, 0);
}
