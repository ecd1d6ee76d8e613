//! Database commands

use anyhow::Result;
use clap::Subcommand;
use colored::*;
use dbkit_redis::{RedisDatabase, Utf8Codec};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, info};

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Check that the server answers
    Ping,

    /// Read a key and print it as JSON
    Get {
        /// Key to read
        key: String,
        /// Print the stored text as-is instead of decoding JSON
        #[arg(long)]
        raw: bool,
    },

    /// Write a value; input that is not valid JSON is stored as a JSON string
    Set {
        /// Key to write
        key: String,
        /// Value (JSON)
        value: String,
        /// Expire after this many seconds
        #[arg(long, value_name = "SECONDS")]
        ttl: Option<u64>,
        /// Store the text as-is instead of encoding JSON
        #[arg(long, conflicts_with = "ttl")]
        raw: bool,
    },

    /// Delete one or more keys
    Del {
        /// Keys to delete
        #[arg(required = true)]
        keys: Vec<String>,
    },

    /// Check whether a key exists
    Exists {
        /// Key to check
        key: String,
    },

    /// Publish a JSON message to a channel
    Publish {
        /// Channel name
        channel: String,
        /// Message (JSON)
        message: String,
    },

    /// Print messages from channels until interrupted
    Subscribe {
        /// Channel names
        #[arg(required = true)]
        channels: Vec<String>,
        /// Exit after this many messages
        #[arg(short = 'n', long)]
        count: Option<usize>,
    },
}

/// Interpret command-line input as JSON, falling back to a plain string
pub fn parse_value(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

fn render(value: &Value) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
}

pub async fn handle_command(cmd: Command, db: &RedisDatabase) -> Result<()> {
    match cmd {
        Command::Ping => {
            db.ping_async().await?;
            println!("{}", "PONG".green());
        },
        Command::Get { key, raw } => handle_get(db, &key, raw).await?,
        Command::Set {
            key,
            value,
            ttl,
            raw,
        } => handle_set(db, &key, &value, ttl, raw).await?,
        Command::Del { keys } => {
            let refs: Vec<&str> = keys.iter().map(String::as_str).collect();
            let removed = db.delete_async(&refs).await?;
            println!("{} {} of {} key(s) deleted", "✓".green(), removed, keys.len());
        },
        Command::Exists { key } => {
            if db.exists_async(&key).await? {
                println!("{} {}", "✓".green(), key);
            } else {
                println!("{} {}", "✗".red(), key);
            }
        },
        Command::Publish { channel, message } => {
            let receivers = db.publish_async(&channel, &parse_value(&message)).await?;
            println!(
                "{} Published to {} ({} receiver(s))",
                "✓".green(),
                channel.cyan(),
                receivers
            );
        },
        Command::Subscribe { channels, count } => handle_subscribe(db, &channels, count).await?,
    }
    Ok(())
}

async fn handle_get(db: &RedisDatabase, key: &str, raw: bool) -> Result<()> {
    if raw {
        match db.get_with(key, &Utf8Codec)? {
            Some(text) => println!("{}", text),
            None => println!("{} Key '{}' not found", "✗".yellow(), key),
        }
        return Ok(());
    }

    match db.get_async::<Value>(key).await? {
        Some(value) => println!("{}", render(&value)),
        None => println!("{} Key '{}' not found", "✗".yellow(), key),
    }
    Ok(())
}

async fn handle_set(
    db: &RedisDatabase,
    key: &str,
    value: &str,
    ttl: Option<u64>,
    raw: bool,
) -> Result<()> {
    if raw {
        db.set_with(key, &value.to_string(), &Utf8Codec)?;
    } else {
        let value = parse_value(value);
        match ttl {
            Some(secs) => {
                db.set_with_ttl_async(key, &value, Duration::from_secs(secs))
                    .await?
            },
            None => db.set_async(key, &value).await?,
        }
    }

    match ttl {
        Some(secs) => println!("{} {} (expires in {}s)", "✓".green(), key, secs),
        None => println!("{} {}", "✓".green(), key),
    }
    Ok(())
}

async fn handle_subscribe(
    db: &RedisDatabase,
    channels: &[String],
    count: Option<usize>,
) -> Result<()> {
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<(String, Value)>();

    for channel in channels {
        let tx = tx.clone();
        db.subscribe_async(channel, move |channel: &str, message: Value| {
            tx.send((channel.to_string(), message)).ok();
        })
        .await?;
        debug!("Subscribed to {}", channel);
    }
    drop(tx);

    info!("Listening on {} channel(s), Ctrl-C to stop", channels.len());

    let mut received = 0usize;
    loop {
        tokio::select! {
            next = rx.recv() => match next {
                Some((channel, message)) => {
                    println!("{} {}", format!("[{}]", channel).cyan(), render(&message));
                    received += 1;
                    if count.is_some_and(|limit| received >= limit) {
                        break;
                    }
                },
                None => break,
            },
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    let refs: Vec<&str> = channels.iter().map(String::as_str).collect();
    db.unsubscribe(&refs);
    println!("{} {} message(s) received", "✓".green(), received);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_value() {
        assert_eq!(parse_value(r#"{"name":"Ann"}"#), serde_json::json!({"name": "Ann"}));
        assert_eq!(parse_value("42"), serde_json::json!(42));
        assert_eq!(parse_value("hello world"), Value::String("hello world".into()));
    }
}
