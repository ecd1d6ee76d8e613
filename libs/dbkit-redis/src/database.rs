//! Redis database facade
//!
//! [`RedisDatabase`] owns one client handle, the runtime that drives it and
//! the channel manager built on top. Every accessor comes in two forms:
//! a blocking one that returns the result, and an `_async` one that starts
//! the operation at once and returns a [`PendingOp`].
//!
//! Commands from one instance execute in the order they were issued, so a
//! detached `set_async` followed by a `get` always observes that write.

use crate::codec::{from_json_opt, to_json, Codec};
use crate::config::ConnectionConfig;
use crate::memory_impl::MemoryBackend;
use crate::pubsub::{ChannelManager, ListenerId};
use crate::redis_impl::RedisBackend;
use crate::task::{Executor, PendingOp};
use crate::traits::{ttl_millis, Backend};
use common::InstanceLogger;
use errors::DbkitResult;
use serde::{de::DeserializeOwned, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// Typed key-value and pub/sub access to one logical Redis database
pub struct RedisDatabase {
    config: ConnectionConfig,
    backend: Arc<dyn Backend>,
    channels: ChannelManager,
    logger: InstanceLogger,
    // Dropped last: shutting the runtime down closes connections and listeners
    executor: Arc<Executor>,
}

impl RedisDatabase {
    // ========== Construction ==========

    /// Connect, blocking until the connection is ready
    pub fn connect(config: ConnectionConfig) -> DbkitResult<Self> {
        let logger = default_logger(&config.endpoint(), &config);
        Self::connect_with_logger(config, logger)
    }

    /// Connect with an explicit logger for this instance
    pub fn connect_with_logger(
        config: ConnectionConfig,
        logger: InstanceLogger,
    ) -> DbkitResult<Self> {
        config.validate()?;
        let executor = Arc::new(Executor::new()?);
        let target = config.clone();
        let backend = executor.block_on("CONNECT", async move {
            RedisBackend::connect(&target).await
        });
        Self::finish_connect(config, backend, executor, logger)
    }

    /// Connect without blocking the caller's runtime
    pub async fn connect_async(config: ConnectionConfig) -> DbkitResult<Self> {
        let logger = default_logger(&config.endpoint(), &config);
        Self::connect_async_with_logger(config, logger).await
    }

    pub async fn connect_async_with_logger(
        config: ConnectionConfig,
        logger: InstanceLogger,
    ) -> DbkitResult<Self> {
        config.validate()?;
        let executor = Arc::new(Executor::new()?);
        let target = config.clone();
        let backend = executor
            .spawn("CONNECT", async move { RedisBackend::connect(&target).await })
            .await;
        Self::finish_connect(config, backend, executor, logger)
    }

    /// Resolve the named database from configuration and connect
    pub fn from_config(name: &str) -> DbkitResult<Self> {
        let config = ConnectionConfig::resolve(name)?;
        let logger = default_logger(name, &config);
        Self::connect_with_logger(config, logger)
    }

    /// Build on an existing backend
    ///
    /// A `RedisBackend` passed here must have been created on a runtime that
    /// outlives this database.
    pub fn with_backend(
        config: ConnectionConfig,
        backend: Arc<dyn Backend>,
        logger: InstanceLogger,
    ) -> DbkitResult<Self> {
        config.validate()?;
        let executor = Arc::new(Executor::new()?);
        Ok(Self::assemble(config, backend, executor, logger))
    }

    /// Database backed by a fresh in-process store
    pub fn in_memory(config: ConnectionConfig) -> DbkitResult<Self> {
        let logger = default_logger("memory", &config);
        Self::with_backend(config, Arc::new(MemoryBackend::new()), logger)
    }

    fn finish_connect(
        config: ConnectionConfig,
        backend: DbkitResult<RedisBackend>,
        executor: Arc<Executor>,
        logger: InstanceLogger,
    ) -> DbkitResult<Self> {
        match backend {
            Ok(backend) => {
                logger.info(format_args!("Connected to {}", backend.endpoint()));
                Ok(Self::assemble(config, Arc::new(backend), executor, logger))
            },
            Err(e) => {
                logger.error(format_args!("Connection failed: {}", e));
                Err(e)
            },
        }
    }

    fn assemble(
        config: ConnectionConfig,
        backend: Arc<dyn Backend>,
        executor: Arc<Executor>,
        logger: InstanceLogger,
    ) -> Self {
        let channels = ChannelManager::new(backend.clone(), executor.clone(), logger.clone());
        Self {
            config,
            backend,
            channels,
            logger,
            executor,
        }
    }

    // ========== Introspection ==========

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    pub fn logger(&self) -> &InstanceLogger {
        &self.logger
    }

    /// Backend name, `redis` or `memory`
    pub fn backend_kind(&self) -> &'static str {
        self.backend.kind()
    }

    pub fn channel_manager(&self) -> &ChannelManager {
        &self.channels
    }

    /// Queue a backend operation, logging its failure at the error's level
    fn run<T, F, Fut>(&self, op: String, f: F) -> PendingOp<T>
    where
        T: Send + 'static,
        F: FnOnce(Arc<dyn Backend>) -> Fut,
        Fut: Future<Output = DbkitResult<T>> + Send + 'static,
    {
        let fut = f(self.backend.clone());
        let logger = self.logger.clone();
        let label = op.clone();
        self.executor.submit(op, async move {
            let result = fut.await;
            match &result {
                Ok(_) => logger.trace(format_args!("{} ok", label)),
                Err(e) => logger.log(e.log_level(), format_args!("{} failed: {}", label, e)),
            }
            result
        })
    }

    // ========== Key-Value Operations ==========

    /// Store `value` at `key`, replacing any existing value
    pub fn set<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> DbkitResult<()> {
        self.set_async(key, value).wait()
    }

    pub fn set_async<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> PendingOp<()> {
        let op = format!("SET {}", key);
        let payload = match to_json(value) {
            Ok(payload) => payload,
            Err(e) => return PendingOp::ready(op, Err(e)),
        };
        let key = key.to_string();
        self.run(op, move |backend| async move { backend.set(&key, payload).await })
    }

    /// Store `value` at `key` with an expiry
    pub fn set_with_ttl<T: Serialize + ?Sized>(
        &self,
        key: &str,
        value: &T,
        ttl: Duration,
    ) -> DbkitResult<()> {
        self.set_with_ttl_async(key, value, ttl).wait()
    }

    pub fn set_with_ttl_async<T: Serialize + ?Sized>(
        &self,
        key: &str,
        value: &T,
        ttl: Duration,
    ) -> PendingOp<()> {
        let op = format!("SET {} PX {}", key, ttl.as_millis());
        let payload = match ttl_millis(ttl).and_then(|_| to_json(value)) {
            Ok(payload) => payload,
            Err(e) => return PendingOp::ready(op, Err(e)),
        };
        let key = key.to_string();
        self.run(op, move |backend| async move {
            backend.set_ex(&key, payload, ttl).await
        })
    }

    /// Read the value at `key` as `T`
    ///
    /// A missing key and a stored JSON `null` both give `None`.
    pub fn get<T: DeserializeOwned + Send + 'static>(&self, key: &str) -> DbkitResult<Option<T>> {
        self.get_async(key).wait()
    }

    pub fn get_async<T: DeserializeOwned + Send + 'static>(
        &self,
        key: &str,
    ) -> PendingOp<Option<T>> {
        let key = key.to_string();
        self.run(format!("GET {}", key), move |backend| async move {
            match backend.get(&key).await? {
                Some(bytes) => from_json_opt(&bytes),
                None => Ok(None),
            }
        })
    }

    /// Read with a caller-supplied codec
    pub fn get_with<T, C: Codec<T>>(&self, key: &str, codec: &C) -> DbkitResult<Option<T>> {
        let raw = {
            let key = key.to_string();
            self.run(format!("GET {}", key), move |backend| async move {
                backend.get(&key).await
            })
        };
        raw.wait()?.map(|bytes| codec.decode(&bytes)).transpose()
    }

    /// Write with a caller-supplied codec
    pub fn set_with<T, C: Codec<T>>(&self, key: &str, value: &T, codec: &C) -> DbkitResult<()> {
        let payload = codec.encode(value)?;
        let key = key.to_string();
        self.run(format!("SET {}", key), move |backend| async move {
            backend.set(&key, payload).await
        })
        .wait()
    }

    /// Delete keys, returning how many existed
    ///
    /// Missing keys are ignored.
    pub fn delete(&self, keys: &[&str]) -> DbkitResult<u64> {
        self.delete_async(keys).wait()
    }

    pub fn delete_async(&self, keys: &[&str]) -> PendingOp<u64> {
        let keys: Vec<String> = keys.iter().map(|k| k.to_string()).collect();
        if keys.is_empty() {
            return PendingOp::ready("DEL", Ok(0));
        }
        self.run(format!("DEL {}", keys.join(" ")), move |backend| async move {
            backend.del(&keys).await
        })
    }

    pub fn exists(&self, key: &str) -> DbkitResult<bool> {
        self.exists_async(key).wait()
    }

    pub fn exists_async(&self, key: &str) -> PendingOp<bool> {
        let key = key.to_string();
        self.run(format!("EXISTS {}", key), move |backend| async move {
            backend.exists(&key).await
        })
    }

    /// Round-trip to the server
    pub fn ping(&self) -> DbkitResult<()> {
        self.ping_async().wait()
    }

    pub fn ping_async(&self) -> PendingOp<()> {
        self.run("PING".to_string(), |backend| async move { backend.ping().await })
    }

    // ========== Pub/Sub Operations ==========

    /// Register `callback` for every message on `channel`
    ///
    /// Subscribing twice registers two independent listeners.
    pub fn subscribe<M, F>(&self, channel: &str, callback: F) -> DbkitResult<ListenerId>
    where
        M: DeserializeOwned + Serialize + Send + 'static,
        F: Fn(&str, M) + Send + Sync + 'static,
    {
        self.channels.subscribe(channel, callback)
    }

    pub fn subscribe_async<M, F>(&self, channel: &str, callback: F) -> PendingOp<ListenerId>
    where
        M: DeserializeOwned + Serialize + Send + 'static,
        F: Fn(&str, M) + Send + Sync + 'static,
    {
        self.channels.subscribe_async(channel, callback)
    }

    /// Remove all listeners on each named channel
    pub fn unsubscribe(&self, channels: &[&str]) -> usize {
        self.channels.unsubscribe(channels)
    }

    pub fn unsubscribe_listener(&self, id: ListenerId) -> bool {
        self.channels.unsubscribe_listener(id)
    }

    /// Fire-and-forget publish; only encoding errors are returned
    pub fn publish<M: Serialize + ?Sized>(&self, channel: &str, message: &M) -> DbkitResult<()> {
        self.channels.publish(channel, message)
    }

    pub fn publish_async<M: Serialize + ?Sized>(
        &self,
        channel: &str,
        message: &M,
    ) -> PendingOp<u64> {
        self.channels.publish_async(channel, message)
    }

    pub fn listener_count(&self, channel: &str) -> usize {
        self.channels.listener_count(channel)
    }

    pub fn channels(&self) -> Vec<String> {
        self.channels.channels()
    }
}

impl std::fmt::Debug for RedisDatabase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisDatabase")
            .field("endpoint", &self.config.endpoint())
            .field("backend", &self.backend.kind())
            .field("logger", &self.logger.name())
            .finish()
    }
}

impl Drop for RedisDatabase {
    fn drop(&mut self) {
        self.logger
            .debug(format_args!("Closing {} database", self.backend.kind()));
    }
}

fn default_logger(name: &str, config: &ConnectionConfig) -> InstanceLogger {
    InstanceLogger::from_flag(name, config.logging)
}
