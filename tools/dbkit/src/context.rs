//! Connection settings taken from the command line

use clap::Args;
use dbkit_redis::{ConnectionConfig, DbkitResult};
use std::path::PathBuf;

/// Global connection options
///
/// The named database is resolved from configuration first; explicit flags
/// then override individual fields.
#[derive(Debug, Clone, Args)]
pub struct ConnectionArgs {
    /// Logical database name to resolve from configuration
    #[arg(short = 'd', long, global = true, default_value = "redis")]
    pub database: String,

    /// Configuration directory (default: ./config)
    #[arg(short = 'c', long = "config", global = true)]
    pub config_dir: Option<PathBuf>,

    /// Redis host
    #[arg(long, global = true)]
    pub host: Option<String>,

    /// Redis port
    #[arg(short = 'p', long, global = true)]
    pub port: Option<u16>,

    /// Redis password
    #[arg(long, global = true)]
    pub password: Option<String>,

    /// Logical database index
    #[arg(long = "db", global = true)]
    pub db_index: Option<u32>,

    /// Connect over TLS
    #[arg(long, global = true)]
    pub tls: bool,
}

impl ConnectionArgs {
    pub fn resolve(&self) -> DbkitResult<ConnectionConfig> {
        let mut config: ConnectionConfig = match &self.config_dir {
            Some(dir) => common::load_section_from_dir(dir, &self.database)?,
            None => ConnectionConfig::resolve(&self.database)?,
        };

        if let Some(host) = &self.host {
            config.host = host.clone();
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(password) = &self.password {
            config.password = password.clone();
        }
        if let Some(index) = self.db_index {
            config.database = index;
        }
        if self.tls {
            config.use_tls = true;
        }
        Ok(config)
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;

    fn args(config_dir: PathBuf) -> ConnectionArgs {
        ConnectionArgs {
            database: "cache".to_string(),
            config_dir: Some(config_dir),
            host: None,
            port: None,
            password: None,
            db_index: None,
            tls: false,
        }
    }

    #[test]
    fn test_resolve_from_directory() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("databases.yaml"),
            "cache:\n  host: cache.internal\n  port: 6390\n  database: 2\n",
        )
        .unwrap();

        let config = args(dir.path().to_path_buf()).resolve().unwrap();
        assert_eq!(config.host, "cache.internal");
        assert_eq!(config.port, 6390);
        assert_eq!(config.database, 2);
    }

    #[test]
    fn test_flags_override_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("databases.toml"),
            "[cache]\nhost = \"from-file\"\nport = 6390\n",
        )
        .unwrap();

        let mut args = args(dir.path().to_path_buf());
        args.host = Some("from-flag".to_string());
        args.db_index = Some(5);
        args.tls = true;

        let config = args.resolve().unwrap();
        assert_eq!(config.host, "from-flag");
        assert_eq!(config.port, 6390);
        assert_eq!(config.database, 5);
        assert!(config.use_tls);
    }

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = args(dir.path().to_path_buf()).resolve().unwrap();
        assert_eq!(config, ConnectionConfig::default());
    }
}
