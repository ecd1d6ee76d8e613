//! Publish/subscribe channel manager
//!
//! Each `subscribe` call opens its own backend subscription and spawns one
//! listener task that decodes payloads and hands them to the callback.
//! Listeners on a channel are independent: subscribing twice means two
//! callbacks per message. `unsubscribe(channel)` removes every listener on
//! that channel, whoever registered it, including subscriptions that are
//! still being confirmed.
//!
//! Publishes share the executor's ordered queue with key-value commands, so
//! messages from one instance reach the broker in the order they were sent.

use crate::codec::{to_json, Codec, JsonCodec};
use crate::task::{Executor, PendingOp};
use crate::traits::{Backend, MessageStream};
use common::InstanceLogger;
use dashmap::DashMap;
use errors::{DbkitError, DbkitResult};
use futures::StreamExt;
use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;

/// Identifies one registered listener
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(u64);

impl ListenerId {
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ListenerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

struct Listener {
    id: ListenerId,
    active: Arc<AtomicBool>,
    // None until the backend confirms the subscription
    task: Option<JoinHandle<()>>,
}

impl Listener {
    fn stop(self) {
        // Checked before every callback, so no delivery starts after this
        self.active.store(false, Ordering::SeqCst);
        if let Some(task) = self.task {
            task.abort();
        }
    }
}

type ListenerMap = DashMap<String, Vec<Listener>>;

/// Channel registrations for one database instance
pub struct ChannelManager {
    backend: Arc<dyn Backend>,
    executor: Arc<Executor>,
    logger: InstanceLogger,
    listeners: Arc<ListenerMap>,
    next_id: AtomicU64,
}

impl ChannelManager {
    pub(crate) fn new(
        backend: Arc<dyn Backend>,
        executor: Arc<Executor>,
        logger: InstanceLogger,
    ) -> Self {
        Self {
            backend,
            executor,
            logger,
            listeners: Arc::new(DashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Register a listener that decodes messages with `codec`
    ///
    /// The listener is registered immediately and resolves once the backend
    /// has confirmed the subscription. If `unsubscribe` removes it before
    /// then, the operation fails with `TaskCancelled`.
    pub fn subscribe_with<M, C, F>(
        &self,
        channel: &str,
        codec: C,
        callback: F,
    ) -> PendingOp<ListenerId>
    where
        M: Send + 'static,
        C: Codec<M> + 'static,
        F: Fn(&str, M) + Send + Sync + 'static,
    {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let active = Arc::new(AtomicBool::new(true));
        self.listeners
            .entry(channel.to_string())
            .or_default()
            .push(Listener {
                id,
                active: active.clone(),
                task: None,
            });

        let op = format!("SUBSCRIBE {}", channel);
        let label = op.clone();
        let channel = channel.to_string();
        let backend = self.backend.clone();
        let listeners = self.listeners.clone();
        let logger = self.logger.clone();
        let handle = self.executor.handle().clone();

        self.executor.spawn(op, async move {
            let stream = match backend.subscribe(&channel).await {
                Ok(stream) => stream,
                Err(e) => {
                    take_listener(&listeners, &channel, id);
                    logger.log(
                        e.log_level(),
                        format_args!("Subscribe to {} failed: {}", channel, e),
                    );
                    return Err(e);
                },
            };

            let mut task = Some(handle.spawn(listen(
                channel.clone(),
                id,
                stream,
                codec,
                callback,
                active.clone(),
                logger.clone(),
            )));
            if let Some(mut registered) = listeners.get_mut(&channel) {
                if let Some(listener) = registered.iter_mut().find(|l| l.id == id) {
                    listener.task = task.take();
                }
            }

            // Reservation gone: unsubscribed while the backend was confirming
            if let Some(orphan) = task {
                active.store(false, Ordering::SeqCst);
                orphan.abort();
                logger.debug(format_args!(
                    "Listener {} on {} removed before confirmation",
                    id, channel
                ));
                return Err(DbkitError::TaskCancelled(label));
            }

            logger.debug(format_args!("Listener {} subscribed to {}", id, channel));
            Ok(id)
        })
    }

    /// Register a JSON-decoding listener
    pub fn subscribe_async<M, F>(&self, channel: &str, callback: F) -> PendingOp<ListenerId>
    where
        M: serde::de::DeserializeOwned + Serialize + Send + 'static,
        F: Fn(&str, M) + Send + Sync + 'static,
    {
        self.subscribe_with(channel, JsonCodec::<M>::new(), callback)
    }

    /// Blocking form of [`subscribe_async`](Self::subscribe_async)
    pub fn subscribe<M, F>(&self, channel: &str, callback: F) -> DbkitResult<ListenerId>
    where
        M: serde::de::DeserializeOwned + Serialize + Send + 'static,
        F: Fn(&str, M) + Send + Sync + 'static,
    {
        self.subscribe_async(channel, callback).wait()
    }

    /// Remove every listener on each named channel
    ///
    /// Returns the number of listeners removed. Unknown channels are skipped.
    pub fn unsubscribe(&self, channels: &[&str]) -> usize {
        let mut removed = 0;
        for channel in channels {
            if let Some((_, listeners)) = self.listeners.remove(*channel) {
                removed += listeners.len();
                listeners.into_iter().for_each(Listener::stop);
                self.logger
                    .debug(format_args!("Unsubscribed all listeners from {}", channel));
            }
        }
        removed
    }

    /// Remove a single listener, leaving others on its channel in place
    pub fn unsubscribe_listener(&self, id: ListenerId) -> bool {
        let channel = self
            .listeners
            .iter()
            .find(|entry| entry.iter().any(|l| l.id == id))
            .map(|entry| entry.key().clone());

        match channel.and_then(|channel| {
            take_listener(&self.listeners, &channel, id).map(|listener| (channel, listener))
        }) {
            Some((channel, listener)) => {
                listener.stop();
                self.logger
                    .debug(format_args!("Listener {} removed from {}", id, channel));
                true
            },
            None => false,
        }
    }

    /// Encode and send without waiting for the broker
    ///
    /// Encoding errors are returned; the send outcome is only logged.
    pub fn publish<M: Serialize + ?Sized>(&self, channel: &str, message: &M) -> DbkitResult<()> {
        let payload = to_json(message)?;
        let backend = self.backend.clone();
        let logger = self.logger.clone();
        let channel = channel.to_string();

        self.executor
            .submit(format!("PUBLISH {}", channel), async move {
                match backend.publish(&channel, payload).await {
                    Ok(receivers) => logger.debug(format_args!(
                        "Published to {} ({} receivers)",
                        channel, receivers
                    )),
                    Err(e) => logger.log(
                        e.log_level(),
                        format_args!("Publish to {} failed: {}", channel, e),
                    ),
                }
                Ok(())
            })
            .detach();
        Ok(())
    }

    /// Publish and resolve to the number of receivers
    pub fn publish_async<M: Serialize + ?Sized>(
        &self,
        channel: &str,
        message: &M,
    ) -> PendingOp<u64> {
        let op = format!("PUBLISH {}", channel);
        match to_json(message) {
            Ok(payload) => self.publish_bytes(op, channel, payload),
            Err(e) => PendingOp::ready(op, Err(e)),
        }
    }

    /// Publish with a caller-supplied codec
    pub fn publish_with<M, C: Codec<M>>(
        &self,
        channel: &str,
        codec: &C,
        message: &M,
    ) -> PendingOp<u64> {
        let op = format!("PUBLISH {}", channel);
        match codec.encode(message) {
            Ok(payload) => self.publish_bytes(op, channel, payload),
            Err(e) => PendingOp::ready(op, Err(e)),
        }
    }

    fn publish_bytes(&self, op: String, channel: &str, payload: bytes::Bytes) -> PendingOp<u64> {
        let backend = self.backend.clone();
        let channel = channel.to_string();
        self.executor
            .submit(op, async move { backend.publish(&channel, payload).await })
    }

    /// Number of listeners registered on `channel`
    pub fn listener_count(&self, channel: &str) -> usize {
        self.listeners.get(channel).map(|l| l.len()).unwrap_or(0)
    }

    /// Channels with at least one listener, sorted
    pub fn channels(&self) -> Vec<String> {
        let mut names: Vec<String> = self.listeners.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }
}

impl Drop for ChannelManager {
    fn drop(&mut self) {
        let channels: Vec<String> = self.listeners.iter().map(|e| e.key().clone()).collect();
        for channel in channels {
            if let Some((_, listeners)) = self.listeners.remove(&channel) {
                listeners.into_iter().for_each(Listener::stop);
            }
        }
    }
}

impl fmt::Debug for ChannelManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelManager")
            .field("channels", &self.channels())
            .finish()
    }
}

/// Remove listener `id` from `channel`, dropping the entry once it is empty
fn take_listener(listeners: &ListenerMap, channel: &str, id: ListenerId) -> Option<Listener> {
    let listener = {
        let mut registered = listeners.get_mut(channel)?;
        let pos = registered.iter().position(|l| l.id == id)?;
        registered.remove(pos)
    };
    listeners.remove_if(channel, |_, rest| rest.is_empty());
    Some(listener)
}

async fn listen<M, C, F>(
    channel: String,
    id: ListenerId,
    mut stream: MessageStream,
    codec: C,
    callback: F,
    active: Arc<AtomicBool>,
    logger: InstanceLogger,
) where
    C: Codec<M>,
    F: Fn(&str, M),
{
    while let Some(item) = stream.next().await {
        if !active.load(Ordering::SeqCst) {
            break;
        }
        let payload = match item {
            Ok(payload) => payload,
            Err(e) => {
                logger.log(
                    e.log_level(),
                    format_args!("Listener {} on {}: {}", id, channel, e),
                );
                continue;
            },
        };
        match codec.decode(&payload) {
            // Callbacks may block or call the sync API
            Ok(message) => tokio::task::block_in_place(|| callback(&channel, message)),
            Err(e) => logger.warn(format_args!(
                "Listener {} on {} skipped message: {}",
                id, channel, e
            )),
        }
    }
    logger.trace(format_args!("Listener {} on {} stopped", id, channel));
}
