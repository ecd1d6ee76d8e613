//! dbkit - command-line access to Redis databases
//!
//! Resolves a logical database from configuration, connects, and runs one
//! key-value or pub/sub command against it.

mod commands;
mod context;

use anyhow::Result;
use clap::Parser;
use colored::*;
use commands::Command;
use common::{InstanceLogger, LogConfigBuilder};
use context::ConnectionArgs;
use dbkit_redis::RedisDatabase;

#[derive(Debug, Parser)]
#[command(name = "dbkit")]
#[command(about = "Typed Redis access from the command line")]
#[command(long_about = "Typed Redis access from the command line

Examples:
  dbkit set user:1 '{\"name\":\"Ann\"}'     # Store a JSON value
  dbkit get user:1                          # Read it back
  dbkit -d cache del user:1 user:2          # Use the 'cache' database from config
  dbkit subscribe events -n 10              # Print ten messages from 'events'
  dbkit publish events '{\"kind\":\"created\"}'")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    #[command(flatten)]
    connection: ConnectionArgs,

    /// Enable verbose logging
    #[arg(short, long, global = true, conflicts_with = "quiet")]
    verbose: bool,

    /// Silence connection logging
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Disable colored output
    #[arg(long, global = true)]
    no_color: bool,
}

impl Cli {
    fn log_level(&self) -> &'static str {
        if self.verbose {
            "debug"
        } else if self.quiet {
            "error"
        } else {
            "warn"
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Configure colored output
    if cli.no_color {
        colored::control::set_override(false);
    }

    let log_config = LogConfigBuilder::new()
        .level(cli.log_level())
        .ansi(!cli.no_color)
        .build();
    let _guard = common::init_logging(&log_config)?;

    let mut config = cli.connection.resolve()?;
    if cli.quiet {
        config.logging = false;
    }
    let logger = InstanceLogger::from_flag(cli.connection.database.as_str(), config.logging);

    let db = match RedisDatabase::connect_async_with_logger(config, logger).await {
        Ok(db) => db,
        Err(e) => {
            eprintln!("{} [{}] {}", "Error:".red().bold(), e.error_code(), e);
            std::process::exit(1);
        },
    };

    if let Err(e) = commands::handle_command(cli.command, &db).await {
        eprintln!("{} {}", "Error:".red().bold(), e);
        std::process::exit(1);
    }
    Ok(())
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;

    #[test]
    fn test_parse_get_with_globals() {
        let args = ["dbkit", "get", "user:1", "-d", "cache", "--port", "6380"];
        let cli = Cli::try_parse_from(args).unwrap();
        assert!(matches!(cli.command, Command::Get { ref key, raw: false } if key == "user:1"));
        assert_eq!(cli.connection.database, "cache");
        assert_eq!(cli.connection.port, Some(6380));
    }

    #[test]
    fn test_parse_subscribe() {
        let args = ["dbkit", "subscribe", "events", "audit", "-n", "3"];
        let cli = Cli::try_parse_from(args).unwrap();
        match cli.command {
            Command::Subscribe { channels, count } => {
                assert_eq!(channels, vec!["events", "audit"]);
                assert_eq!(count, Some(3));
            },
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_del_requires_keys() {
        assert!(Cli::try_parse_from(["dbkit", "del"]).is_err());
    }

    #[test]
    fn test_verbose_conflicts_with_quiet() {
        assert!(Cli::try_parse_from(["dbkit", "-v", "-q", "ping"]).is_err());
    }

    #[test]
    fn test_log_level() {
        let cli = Cli::try_parse_from(["dbkit", "ping"]).unwrap();
        assert_eq!(cli.log_level(), "warn");
        assert_eq!(cli.connection.database, "redis");

        let cli = Cli::try_parse_from(["dbkit", "--verbose", "ping"]).unwrap();
        assert_eq!(cli.log_level(), "debug");
    }

    #[test]
    fn test_raw_set_rejects_ttl() {
        assert!(Cli::try_parse_from(["dbkit", "set", "k", "v", "--raw", "--ttl", "5"]).is_err());
    }
}
