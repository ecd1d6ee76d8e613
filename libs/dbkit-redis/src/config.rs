//! Redis connection configuration

use errors::{DbkitError, DbkitResult};
use serde::{Deserialize, Serialize};

/// Connection settings for one logical Redis database
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Redis server hostname
    #[serde(default = "default_host")]
    pub host: String,

    /// Redis server port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Password for AUTH; empty means no authentication
    #[serde(default)]
    pub password: String,

    /// Logical database index
    #[serde(default, alias = "database_index")]
    pub database: u32,

    /// Connect over TLS (`rediss://`)
    #[serde(default, alias = "ssl")]
    pub use_tls: bool,

    /// Emit log output for this connection
    #[serde(default = "default_logging")]
    pub logging: bool,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            password: String::new(),
            database: 0,
            use_tls: false,
            logging: default_logging(),
        }
    }
}

impl ConnectionConfig {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            ..Default::default()
        }
    }

    #[must_use]
    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = password.into();
        self
    }

    #[must_use]
    pub fn with_database(mut self, database: u32) -> Self {
        self.database = database;
        self
    }

    #[must_use]
    pub fn with_tls(mut self, use_tls: bool) -> Self {
        self.use_tls = use_tls;
        self
    }

    #[must_use]
    pub fn with_logging(mut self, logging: bool) -> Self {
        self.logging = logging;
        self
    }

    /// Reject configurations that can never connect.
    ///
    /// Runs before any network I/O.
    pub fn validate(&self) -> DbkitResult<()> {
        if self.host.trim().is_empty() {
            return Err(DbkitError::invalid_config("host", "must not be empty"));
        }
        if self.port == 0 {
            return Err(DbkitError::invalid_config("port", "must be non-zero"));
        }
        Ok(())
    }

    fn scheme(&self) -> &'static str {
        if self.use_tls {
            "rediss"
        } else {
            "redis"
        }
    }

    /// Convert configuration to Redis URL
    pub fn to_url(&self) -> String {
        if self.password.is_empty() {
            format!(
                "{}://{}:{}/{}",
                self.scheme(),
                self.host.trim(),
                self.port,
                self.database
            )
        } else {
            format!(
                "{}://:{}@{}:{}/{}",
                self.scheme(),
                urlencoding::encode(&self.password),
                self.host.trim(),
                self.port,
                self.database
            )
        }
    }

    /// URL without credentials, safe for logs and error messages
    pub fn endpoint(&self) -> String {
        format!(
            "{}://{}:{}/{}",
            self.scheme(),
            self.host.trim(),
            self.port,
            self.database
        )
    }

    /// Create configuration from environment variables
    ///
    /// Reads `REDIS_HOST`, `REDIS_PORT`, `REDIS_PASSWORD`, `REDIS_DATABASE`,
    /// `REDIS_TLS` and `REDIS_LOGGING`; unset or unparsable values keep defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            host: std::env::var("REDIS_HOST").unwrap_or(defaults.host),
            port: std::env::var("REDIS_PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(defaults.port),
            password: std::env::var("REDIS_PASSWORD").unwrap_or_default(),
            database: std::env::var("REDIS_DATABASE")
                .ok()
                .and_then(|d| d.parse().ok())
                .unwrap_or(defaults.database),
            use_tls: std::env::var("REDIS_TLS")
                .ok()
                .and_then(|v| parse_flag(&v))
                .unwrap_or(defaults.use_tls),
            logging: std::env::var("REDIS_LOGGING")
                .ok()
                .and_then(|v| parse_flag(&v))
                .unwrap_or(defaults.logging),
        }
    }

    /// Resolve the named logical database through the layered config loader
    pub fn resolve(name: &str) -> DbkitResult<Self> {
        common::load_section(name)
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    6379
}

fn default_logging() -> bool {
    true
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
