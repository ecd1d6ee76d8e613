//! Backend abstraction
//!
//! [`RedisDatabase`](crate::RedisDatabase) talks to storage only through
//! [`Backend`]. Implementations:
//! - `RedisBackend`: production Redis server
//! - `MemoryBackend`: in-process store for tests and embedded use

use async_trait::async_trait;
use bytes::Bytes;
use errors::{DbkitError, DbkitResult};
use futures::stream::BoxStream;
use std::time::Duration;

/// Stream of raw payloads delivered on one channel subscription
///
/// An `Err` item reports a delivery problem (such as dropped messages)
/// without ending the subscription.
pub type MessageStream = BoxStream<'static, DbkitResult<Bytes>>;

/// TTL in whole milliseconds, at least 1, as accepted by `SET ... PX`
pub fn ttl_millis(ttl: Duration) -> DbkitResult<u64> {
    u64::try_from(ttl.as_millis())
        .ok()
        .filter(|millis| i64::try_from(*millis).is_ok())
        .map(|millis| millis.max(1))
        .ok_or_else(|| DbkitError::invalid_config("ttl", format!("{:?} is out of range", ttl)))
}

/// Raw byte-level storage and messaging operations
#[async_trait]
pub trait Backend: Send + Sync + 'static {
    // ========== Key-Value Operations ==========

    /// Get raw value by key
    async fn get(&self, key: &str) -> DbkitResult<Option<Bytes>>;

    /// Set value, replacing any existing value and TTL
    async fn set(&self, key: &str, value: Bytes) -> DbkitResult<()>;

    /// Set value that expires after `ttl`
    ///
    /// TTLs beyond [`ttl_millis`] range are rejected with `InvalidConfig`.
    async fn set_ex(&self, key: &str, value: Bytes, ttl: Duration) -> DbkitResult<()>;

    /// Delete keys, returning how many existed
    async fn del(&self, keys: &[String]) -> DbkitResult<u64>;

    /// Check if key exists
    async fn exists(&self, key: &str) -> DbkitResult<bool>;

    // ========== Pub/Sub Operations ==========

    /// Publish payload to a channel
    ///
    /// Returns the number of subscribers that received the message.
    async fn publish(&self, channel: &str, payload: Bytes) -> DbkitResult<u64>;

    /// Open a subscription to one channel
    ///
    /// The subscription is active when this returns; messages published
    /// afterwards appear on the stream.
    async fn subscribe(&self, channel: &str) -> DbkitResult<MessageStream>;

    // ========== Introspection ==========

    async fn ping(&self) -> DbkitResult<()>;

    /// Short backend name for logs
    fn kind(&self) -> &'static str;
}
