//! Redis implementation of the backend trait

use crate::config::ConnectionConfig;
use crate::traits::{ttl_millis, Backend, MessageStream};
use async_trait::async_trait;
use bytes::Bytes;
use errors::{DbkitError, DbkitResult};
use futures::StreamExt;
use redis::aio::{ConnectionManager, ConnectionManagerConfig};
use redis::{AsyncCommands, Client};
use std::time::Duration;

// A failed initial connect is reported, not retried
const CONNECT_RETRIES: usize = 0;
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
// Bounds how long one stalled reply can hold up the ordered command queue
const RESPONSE_TIMEOUT: Duration = Duration::from_secs(30);

/// Redis-backed storage over one multiplexed connection
///
/// Must be created on the runtime that will drive it: the connection
/// manager keeps a background task there.
#[derive(Clone)]
pub struct RedisBackend {
    client: Client,
    conn: ConnectionManager,
    endpoint: String,
}

impl RedisBackend {
    /// Open a connection for the given configuration
    pub async fn connect(config: &ConnectionConfig) -> DbkitResult<Self> {
        let endpoint = config.endpoint();
        let client = Client::open(config.to_url())
            .map_err(|e| DbkitError::connection_failed(&endpoint, e))?;
        let manager_config = ConnectionManagerConfig::new()
            .set_number_of_retries(CONNECT_RETRIES)
            .set_connection_timeout(CONNECT_TIMEOUT)
            .set_response_timeout(RESPONSE_TIMEOUT);
        let conn = ConnectionManager::new_with_config(client.clone(), manager_config)
            .await
            .map_err(|e| DbkitError::connection_failed(&endpoint, e))?;

        Ok(Self {
            client,
            conn,
            endpoint,
        })
    }

    /// Endpoint without credentials
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

}

impl std::fmt::Debug for RedisBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisBackend")
            .field("endpoint", &self.endpoint)
            .finish()
    }
}

#[async_trait]
impl Backend for RedisBackend {
    async fn get(&self, key: &str) -> DbkitResult<Option<Bytes>> {
        let mut conn = self.conn.clone();
        let value: Option<Vec<u8>> = conn.get(key).await?;
        Ok(value.map(Bytes::from))
    }

    async fn set(&self, key: &str, value: Bytes) -> DbkitResult<()> {
        let mut conn = self.conn.clone();
        conn.set::<_, _, ()>(key, value.as_ref()).await?;
        Ok(())
    }

    async fn set_ex(&self, key: &str, value: Bytes, ttl: Duration) -> DbkitResult<()> {
        let millis = ttl_millis(ttl)?;
        let mut conn = self.conn.clone();
        redis::cmd("SET")
            .arg(key)
            .arg(value.as_ref())
            .arg("PX")
            .arg(millis)
            .query_async::<()>(&mut conn)
            .await?;
        Ok(())
    }

    async fn del(&self, keys: &[String]) -> DbkitResult<u64> {
        if keys.is_empty() {
            return Ok(0);
        }
        let mut conn = self.conn.clone();
        Ok(conn.del(keys).await?)
    }

    async fn exists(&self, key: &str) -> DbkitResult<bool> {
        let mut conn = self.conn.clone();
        Ok(conn.exists(key).await?)
    }

    async fn publish(&self, channel: &str, payload: Bytes) -> DbkitResult<u64> {
        let mut conn = self.conn.clone();
        Ok(conn.publish(channel, payload.as_ref()).await?)
    }

    async fn subscribe(&self, channel: &str) -> DbkitResult<MessageStream> {
        // Subscribed connections cannot issue other commands, so each
        // subscription gets its own
        let mut pubsub = self
            .client
            .get_async_pubsub()
            .await
            .map_err(|e| DbkitError::connection_failed(&self.endpoint, e))?;
        pubsub.subscribe(channel).await?;

        let stream = pubsub
            .into_on_message()
            .map(|msg| Ok(Bytes::copy_from_slice(msg.get_payload_bytes())));
        Ok(stream.boxed())
    }

    async fn ping(&self) -> DbkitResult<()> {
        let mut conn = self.conn.clone();
        redis::cmd("PING").query_async::<String>(&mut conn).await?;
        Ok(())
    }

    fn kind(&self) -> &'static str {
        "redis"
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_connection_refused_hides_password() {
        // Port 1 is reserved and nothing listens on it
        let config = ConnectionConfig::new("127.0.0.1", 1).with_password("hunter2");
        let err = RedisBackend::connect(&config).await.unwrap_err();
        match err {
            DbkitError::ConnectionFailed { endpoint, .. } => {
                assert_eq!(endpoint, "redis://127.0.0.1:1/0");
            },
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    #[ignore = "requires Redis"]
    async fn test_redis_round_trip() {
        let backend = RedisBackend::connect(&ConnectionConfig::from_env())
            .await
            .unwrap();
        let key = format!("dbkit:test:{}", uuid::Uuid::new_v4());

        backend.set(&key, Bytes::from("value")).await.unwrap();
        assert_eq!(backend.get(&key).await.unwrap(), Some(Bytes::from("value")));
        assert!(backend.exists(&key).await.unwrap());
        assert_eq!(backend.del(&[key.clone()]).await.unwrap(), 1);
        assert_eq!(backend.get(&key).await.unwrap(), None);
        backend.ping().await.unwrap();
    }
}
