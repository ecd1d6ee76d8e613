//! In-memory backend implementation
//!
//! Uses DashMap for concurrent key-value access and a tokio broadcast
//! channel per pub/sub channel. Suited to tests and embedded scenarios.

use crate::traits::{ttl_millis, Backend, MessageStream};
use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use errors::{DbkitError, DbkitResult};
use futures::StreamExt;
use std::time::{Duration, Instant};
use tokio::sync::broadcast::{self, error::RecvError};

/// Messages buffered per channel before slow subscribers start lagging
const CHANNEL_CAPACITY: usize = 1024;

#[derive(Debug, Clone)]
struct Entry {
    value: Bytes,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_expired(&self) -> bool {
        self.expires_at.is_some_and(|at| Instant::now() >= at)
    }
}

/// In-memory backend with concurrent access support
#[derive(Debug, Default)]
pub struct MemoryBackend {
    kv_store: DashMap<String, Entry>,
    channels: DashMap<String, broadcast::Sender<Bytes>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get statistics about stored data
    pub fn stats(&self) -> MemoryStats {
        MemoryStats {
            kv_count: self.kv_store.iter().filter(|e| !e.is_expired()).count(),
            channel_count: self.channels.len(),
            subscriber_count: self.channels.iter().map(|s| s.receiver_count()).sum(),
        }
    }

    fn live_value(&self, key: &str) -> Option<Bytes> {
        let expired = match self.kv_store.get(key) {
            Some(entry) if !entry.is_expired() => return Some(entry.value.clone()),
            Some(_) => true,
            None => false,
        };
        if expired {
            self.kv_store.remove_if(key, |_, entry| entry.is_expired());
        }
        None
    }
}

/// Statistics about memory backend usage
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryStats {
    pub kv_count: usize,
    pub channel_count: usize,
    pub subscriber_count: usize,
}

#[async_trait]
impl Backend for MemoryBackend {
    async fn get(&self, key: &str) -> DbkitResult<Option<Bytes>> {
        Ok(self.live_value(key))
    }

    async fn set(&self, key: &str, value: Bytes) -> DbkitResult<()> {
        self.kv_store.insert(
            key.to_string(),
            Entry {
                value,
                expires_at: None,
            },
        );
        Ok(())
    }

    async fn set_ex(&self, key: &str, value: Bytes, ttl: Duration) -> DbkitResult<()> {
        let ttl = Duration::from_millis(ttl_millis(ttl)?);
        self.kv_store.insert(
            key.to_string(),
            Entry {
                value,
                // Past the clock's range the key simply never expires
                expires_at: Instant::now().checked_add(ttl),
            },
        );
        Ok(())
    }

    async fn del(&self, keys: &[String]) -> DbkitResult<u64> {
        let mut removed = 0;
        for key in keys {
            if let Some((_, entry)) = self.kv_store.remove(key) {
                if !entry.is_expired() {
                    removed += 1;
                }
            }
        }
        Ok(removed)
    }

    async fn exists(&self, key: &str) -> DbkitResult<bool> {
        Ok(self.live_value(key).is_some())
    }

    async fn publish(&self, channel: &str, payload: Bytes) -> DbkitResult<u64> {
        let receivers = match self.channels.get(channel) {
            // Err only means nobody is listening
            Some(sender) => sender.send(payload).unwrap_or(0),
            None => 0,
        };
        Ok(receivers as u64)
    }

    async fn subscribe(&self, channel: &str) -> DbkitResult<MessageStream> {
        let receiver = self
            .channels
            .entry(channel.to_string())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .subscribe();

        let channel = channel.to_string();
        let stream = futures::stream::unfold(receiver, move |mut receiver| {
            let channel = channel.clone();
            async move {
                match receiver.recv().await {
                    Ok(payload) => Some((Ok(payload), receiver)),
                    // Reported to the listener, which logs it on its instance
                    Err(RecvError::Lagged(skipped)) => {
                        let err = DbkitError::MessagesDropped { channel, skipped };
                        Some((Err(err), receiver))
                    },
                    Err(RecvError::Closed) => None,
                }
            }
        });
        Ok(stream.boxed())
    }

    async fn ping(&self) -> DbkitResult<()> {
        Ok(())
    }

    fn kind(&self) -> &'static str {
        "memory"
    }
}
