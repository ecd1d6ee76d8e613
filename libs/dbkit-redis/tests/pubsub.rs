//! Pub/sub channel manager tests
//!
//! Run all tests (including Redis): `cargo test --package dbkit-redis --test pubsub -- --ignored`

// Allow unwrap() in tests for cleaner test code
#![allow(clippy::disallowed_methods)]

use async_trait::async_trait;
use bytes::Bytes;
use common::InstanceLogger;
use dbkit_redis::{
    Backend, ConnectionConfig, DbkitError, DbkitResult, MemoryBackend, MessageStream,
    RedisDatabase,
};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::{self, Receiver};
use std::sync::Arc;
use std::time::Duration;

const DELIVERY_TIMEOUT: Duration = Duration::from_secs(2);
const SILENCE: Duration = Duration::from_millis(300);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Event {
    kind: String,
    seq: u32,
}

fn event(seq: u32) -> Event {
    Event {
        kind: "created".to_string(),
        seq,
    }
}

fn memory_db() -> RedisDatabase {
    RedisDatabase::in_memory(ConnectionConfig::default()).unwrap()
}

fn redis_db() -> RedisDatabase {
    RedisDatabase::connect(ConnectionConfig::from_env()).unwrap()
}

/// Subscribe a listener that forwards `(tag, event)` to the returned receiver
fn forward(
    db: &RedisDatabase,
    channel: &str,
    tag: &'static str,
) -> Receiver<(&'static str, Event)> {
    let (tx, rx) = mpsc::channel();
    let tx = std::sync::Mutex::new(tx);
    db.subscribe(channel, move |_channel, event: Event| {
        tx.lock().unwrap().send((tag, event)).ok();
    })
    .unwrap();
    rx
}

// ============================================================================
// Scenario
// ============================================================================

fn check_events_scenario(db: &RedisDatabase, channel: &str) {
    let rx = forward(db, channel, "cb");
    assert_eq!(db.listener_count(channel), 1);

    db.publish(channel, &event(1)).unwrap();
    assert_eq!(rx.recv_timeout(DELIVERY_TIMEOUT).unwrap(), ("cb", event(1)));
    // Exactly once
    assert!(rx.recv_timeout(SILENCE).is_err());

    assert_eq!(db.unsubscribe(&[channel]), 1);
    assert_eq!(db.listener_count(channel), 0);

    db.publish(channel, &event(2)).unwrap();
    assert!(rx.recv_timeout(SILENCE).is_err());
}

#[test]
fn test_memory_events_scenario() {
    check_events_scenario(&memory_db(), "events");
}

#[test]
#[ignore = "requires Redis"]
fn test_redis_events_scenario() {
    let channel = format!("test:dbkit:{}:events", uuid::Uuid::new_v4());
    check_events_scenario(&redis_db(), &channel);
}

// ============================================================================
// Multiplicity
// ============================================================================

fn check_two_listeners(db: &RedisDatabase, channel: &str) {
    let first = forward(db, channel, "first");
    let second = forward(db, channel, "second");
    assert_eq!(db.listener_count(channel), 2);

    db.publish(channel, &event(1)).unwrap();
    assert_eq!(first.recv_timeout(DELIVERY_TIMEOUT).unwrap(), ("first", event(1)));
    assert_eq!(second.recv_timeout(DELIVERY_TIMEOUT).unwrap(), ("second", event(1)));
    assert!(first.recv_timeout(SILENCE).is_err());
    assert!(second.try_recv().is_err());

    // One call removes both
    assert_eq!(db.unsubscribe(&[channel]), 2);
    db.publish(channel, &event(2)).unwrap();
    assert!(first.recv_timeout(SILENCE).is_err());
    assert!(second.try_recv().is_err());
}

#[test]
fn test_memory_two_listeners() {
    check_two_listeners(&memory_db(), "events");
}

#[test]
#[ignore = "requires Redis"]
fn test_redis_two_listeners() {
    let channel = format!("test:dbkit:{}:multi", uuid::Uuid::new_v4());
    check_two_listeners(&redis_db(), &channel);
}

#[test]
fn test_unsubscribe_only_named_channels() {
    let db = memory_db();
    let orders = forward(&db, "orders", "orders");
    let _audit = forward(&db, "audit", "audit");

    assert_eq!(db.channels(), vec!["audit".to_string(), "orders".to_string()]);
    assert_eq!(db.unsubscribe(&["audit", "unknown"]), 1);
    assert_eq!(db.channels(), vec!["orders".to_string()]);

    db.publish("orders", &event(5)).unwrap();
    assert_eq!(orders.recv_timeout(DELIVERY_TIMEOUT).unwrap().1, event(5));
}

#[test]
fn test_unsubscribe_single_listener() {
    let db = memory_db();
    let (tx, rx) = mpsc::channel();
    let tx = std::sync::Mutex::new(tx);
    let removed_id = db
        .subscribe("events", move |_channel, event: Event| {
            tx.lock().unwrap().send(event).ok();
        })
        .unwrap();
    let kept = forward(&db, "events", "kept");

    assert!(db.unsubscribe_listener(removed_id));
    assert!(!db.unsubscribe_listener(removed_id));
    assert_eq!(db.listener_count("events"), 1);

    db.publish("events", &event(3)).unwrap();
    assert_eq!(kept.recv_timeout(DELIVERY_TIMEOUT).unwrap().1, event(3));
    assert!(rx.recv_timeout(SILENCE).is_err());
}

/// Memory backend whose subscriptions take a while to be confirmed
struct SlowSubscribe {
    inner: MemoryBackend,
    delay: Duration,
}

#[async_trait]
impl Backend for SlowSubscribe {
    async fn get(&self, key: &str) -> DbkitResult<Option<Bytes>> {
        self.inner.get(key).await
    }

    async fn set(&self, key: &str, value: Bytes) -> DbkitResult<()> {
        self.inner.set(key, value).await
    }

    async fn set_ex(&self, key: &str, value: Bytes, ttl: Duration) -> DbkitResult<()> {
        self.inner.set_ex(key, value, ttl).await
    }

    async fn del(&self, keys: &[String]) -> DbkitResult<u64> {
        self.inner.del(keys).await
    }

    async fn exists(&self, key: &str) -> DbkitResult<bool> {
        self.inner.exists(key).await
    }

    async fn publish(&self, channel: &str, payload: Bytes) -> DbkitResult<u64> {
        self.inner.publish(channel, payload).await
    }

    async fn subscribe(&self, channel: &str) -> DbkitResult<MessageStream> {
        tokio::time::sleep(self.delay).await;
        self.inner.subscribe(channel).await
    }

    async fn ping(&self) -> DbkitResult<()> {
        Ok(())
    }

    fn kind(&self) -> &'static str {
        "slow-memory"
    }
}

fn slow_db(delay: Duration) -> RedisDatabase {
    let backend = SlowSubscribe {
        inner: MemoryBackend::new(),
        delay,
    };
    RedisDatabase::with_backend(
        ConnectionConfig::default(),
        Arc::new(backend),
        InstanceLogger::verbose("slow"),
    )
    .unwrap()
}

#[test]
fn test_unsubscribe_removes_pending_subscription() {
    let db = slow_db(Duration::from_millis(200));

    let (tx, rx) = mpsc::channel();
    let tx = std::sync::Mutex::new(tx);
    let pending = db.subscribe_async("events", move |_channel, event: Event| {
        tx.lock().unwrap().send(event).ok();
    });

    // Visible, and removable, before the backend confirms
    assert_eq!(db.listener_count("events"), 1);
    assert_eq!(db.unsubscribe(&["events"]), 1);

    let err = pending.wait().unwrap_err();
    assert!(matches!(err, DbkitError::TaskCancelled(_)));
    assert_eq!(db.listener_count("events"), 0);
    assert!(db.channels().is_empty());

    db.publish("events", &event(1)).unwrap();
    assert!(rx.recv_timeout(SILENCE).is_err());
}

#[test]
fn test_pending_subscription_completes() {
    let db = slow_db(Duration::from_millis(50));

    let (tx, rx) = mpsc::channel();
    let tx = std::sync::Mutex::new(tx);
    let pending = db.subscribe_async("events", move |_channel, event: Event| {
        tx.lock().unwrap().send(event).ok();
    });
    assert_eq!(db.listener_count("events"), 1);

    let id = pending.wait().unwrap();
    db.publish("events", &event(2)).unwrap();
    assert_eq!(rx.recv_timeout(DELIVERY_TIMEOUT).unwrap(), event(2));
    assert!(db.unsubscribe_listener(id));
    assert!(db.channels().is_empty());
}

// ============================================================================
// Ordering
// ============================================================================

fn check_publish_order(db: &RedisDatabase, channel: &str) {
    let (tx, rx) = mpsc::channel();
    let tx = std::sync::Mutex::new(tx);
    db.subscribe(channel, move |_channel, seq: u32| {
        tx.lock().unwrap().send(seq).ok();
    })
    .unwrap();

    for round in 0..5u32 {
        for i in 0..200u32 {
            db.publish(channel, &(round * 1000 + i)).unwrap();
        }
        let received: Vec<u32> = (0..200)
            .map(|_| rx.recv_timeout(DELIVERY_TIMEOUT).unwrap())
            .collect();
        let expected: Vec<u32> = (0..200).map(|i| round * 1000 + i).collect();
        assert_eq!(received, expected, "round {} delivered out of order", round);
    }
}

#[test]
fn test_memory_publish_order() {
    check_publish_order(&memory_db(), "ordered");
}

#[test]
#[ignore = "requires Redis"]
fn test_redis_publish_order() {
    let channel = format!("test:dbkit:{}:ordered", uuid::Uuid::new_v4());
    check_publish_order(&redis_db(), &channel);
}

// ============================================================================
// Decoding and Publishing
// ============================================================================

#[test]
fn test_undecodable_message_is_skipped() {
    let db = memory_db();
    let rx = forward(&db, "events", "cb");

    db.publish("events", "not an event").unwrap();
    db.publish("events", &event(9)).unwrap();

    // Listener survives the bad payload
    assert_eq!(rx.recv_timeout(DELIVERY_TIMEOUT).unwrap().1, event(9));
    assert_eq!(db.listener_count("events"), 1);
}

#[test]
fn test_publish_encode_error_is_returned() {
    use std::collections::HashMap;

    let db = memory_db();
    let mut bad = HashMap::new();
    bad.insert(vec![1u8], 1u8);

    let err = db.publish("events", &bad).unwrap_err();
    assert!(matches!(err, DbkitError::Encode { .. }));
}

#[test]
fn test_publish_async_reports_receivers() {
    let db = memory_db();
    assert_eq!(db.publish_async("events", &event(1)).wait().unwrap(), 0);

    let _a = forward(&db, "events", "a");
    let _b = forward(&db, "events", "b");
    assert_eq!(db.publish_async("events", &event(2)).wait().unwrap(), 2);
}

#[tokio::test]
async fn test_async_subscribe_and_publish() {
    let db = memory_db();
    let count = Arc::new(AtomicUsize::new(0));
    let seen = count.clone();

    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    db.subscribe_async("ticks", move |_channel, tick: u32| {
        seen.fetch_add(1, Ordering::SeqCst);
        tx.send(tick).ok();
    })
    .await
    .unwrap();

    assert_eq!(db.publish_async("ticks", &1u32).await.unwrap(), 1);
    assert_eq!(db.publish_async("ticks", &2u32).await.unwrap(), 1);

    let first = tokio::time::timeout(DELIVERY_TIMEOUT, rx.recv()).await.unwrap();
    let second = tokio::time::timeout(DELIVERY_TIMEOUT, rx.recv()).await.unwrap();
    assert_eq!((first, second), (Some(1), Some(2)));
    assert_eq!(count.load(Ordering::SeqCst), 2);
}

#[test]
fn test_callback_may_use_sync_api() {
    let db = Arc::new(memory_db());
    let (tx, rx) = mpsc::channel();
    let tx = std::sync::Mutex::new(tx);

    let inner = Arc::downgrade(&db);
    db.subscribe("events", move |_channel, event: Event| {
        if let Some(db) = inner.upgrade() {
            db.set(&format!("event:{}", event.seq), &event).unwrap();
            drop(db);
            tx.lock().unwrap().send(event.seq).ok();
        }
    })
    .unwrap();

    db.publish("events", &event(4)).unwrap();
    assert_eq!(rx.recv_timeout(DELIVERY_TIMEOUT).unwrap(), 4);
    assert_eq!(db.get::<Event>("event:4").unwrap(), Some(event(4)));
}

#[test]
fn test_drop_database_stops_listeners() {
    let db = memory_db();
    let rx = forward(&db, "events", "cb");
    drop(db);

    // Sender lived in the listener; dropping the database releases it
    assert!(matches!(
        rx.recv_timeout(DELIVERY_TIMEOUT),
        Err(mpsc::RecvTimeoutError::Disconnected)
    ));
}
