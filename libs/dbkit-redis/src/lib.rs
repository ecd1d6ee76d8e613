//! Typed Redis accessors and pub/sub channel manager
//!
//! ```no_run
//! use dbkit_redis::{ConnectionConfig, RedisDatabase};
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Serialize, Deserialize)]
//! struct User {
//!     name: String,
//! }
//!
//! # fn main() -> dbkit_redis::DbkitResult<()> {
//! let db = RedisDatabase::connect(ConnectionConfig::new("127.0.0.1", 6379))?;
//! db.set("user:1", &User { name: "Ann".into() })?;
//! let _user: Option<User> = db.get("user:1")?;
//!
//! db.subscribe("events", |_channel, event: User| println!("{}", event.name))?;
//! db.publish("events", &User { name: "Bob".into() })?;
//! db.unsubscribe(&["events"]);
//! # Ok(())
//! # }
//! ```

pub mod codec;
pub mod config;
pub mod database;
pub mod memory_impl;
pub mod pubsub;
pub mod redis_impl;
pub mod task;
pub mod traits;

pub use codec::{Codec, JsonCodec, Utf8Codec};
pub use config::ConnectionConfig;
pub use database::RedisDatabase;
pub use memory_impl::{MemoryBackend, MemoryStats};
pub use pubsub::{ChannelManager, ListenerId};
pub use redis_impl::RedisBackend;
pub use task::{Executor, PendingOp};
pub use traits::{Backend, MessageStream};

pub use errors::{DbkitError, DbkitResult};
