//! Unified error handling for dbkit
//!
//! Every accessor in the workspace returns [`DbkitError`]. Errors raised by the
//! underlying client are carried through unmodified so callers can still match
//! on the original `redis::RedisError` kind.

use thiserror::Error;

// ============================================================================
// DbkitError - Main error type
// ============================================================================

/// Main error type for all dbkit crates
#[derive(Debug, Error)]
pub enum DbkitError {
    // ======================================
    // Configuration Errors
    // ======================================
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Invalid configuration: {field}: {reason}")]
    InvalidConfig { field: String, reason: String },

    #[error("Missing required configuration: {0}")]
    MissingConfig(String),

    // ======================================
    // Client & Connection Errors
    // ======================================
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Connection failed: {endpoint}: {reason}")]
    ConnectionFailed { endpoint: String, reason: String },

    #[error("Subscriber on {channel} fell behind, {skipped} messages dropped")]
    MessagesDropped { channel: String, skipped: u64 },

    // ======================================
    // Codec Errors
    // ======================================
    #[error("Failed to encode {type_name}: {source}")]
    Encode {
        type_name: &'static str,
        #[source]
        source: serde_json::Error,
    },

    #[error("Failed to decode {type_name}: {source}")]
    Decode {
        type_name: &'static str,
        #[source]
        source: serde_json::Error,
    },

    // ======================================
    // Task Errors
    // ======================================
    #[error("Operation cancelled: {0}")]
    TaskCancelled(String),

    #[error("Operation failed: {0}")]
    TaskFailed(String),

    // ======================================
    // I/O & Internal Errors
    // ======================================
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Result type alias using DbkitError
pub type DbkitResult<T> = Result<T, DbkitError>;

/// Error category enum - used for classification and log routing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Configuration,
    Connection,
    Codec,
    Cancelled,
    Internal,
    Unknown,
}

impl DbkitError {
    /// Create an invalid configuration error
    pub fn invalid_config(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Create a connection failure for an endpoint
    pub fn connection_failed(endpoint: impl Into<String>, reason: impl ToString) -> Self {
        Self::ConnectionFailed {
            endpoint: endpoint.into(),
            reason: reason.to_string(),
        }
    }

    /// Create an internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Stable error code for logs and CLI output
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Configuration(_) => "CONFIGURATION_ERROR",
            Self::InvalidConfig { .. } => "INVALID_CONFIG",
            Self::MissingConfig(_) => "MISSING_CONFIG",
            Self::Redis(_) => "REDIS_ERROR",
            Self::ConnectionFailed { .. } => "CONNECTION_FAILED",
            Self::MessagesDropped { .. } => "MESSAGES_DROPPED",
            Self::Encode { .. } => "ENCODE_ERROR",
            Self::Decode { .. } => "DECODE_ERROR",
            Self::TaskCancelled(_) => "CANCELLED",
            Self::TaskFailed(_) => "TASK_FAILED",
            Self::Io(_) => "IO_ERROR",
            Self::Internal(_) => "INTERNAL_ERROR",
            Self::Other(_) => "OTHER_ERROR",
        }
    }

    /// Get error category
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Configuration(_) | Self::InvalidConfig { .. } | Self::MissingConfig(_) => {
                ErrorCategory::Configuration
            },
            Self::Redis(_)
            | Self::ConnectionFailed { .. }
            | Self::MessagesDropped { .. }
            | Self::Io(_) => ErrorCategory::Connection,
            Self::Encode { .. } | Self::Decode { .. } => ErrorCategory::Codec,
            Self::TaskCancelled(_) => ErrorCategory::Cancelled,
            Self::TaskFailed(_) | Self::Internal(_) => ErrorCategory::Internal,
            Self::Other(_) => ErrorCategory::Unknown,
        }
    }

    /// Whether retrying the same call could succeed.
    ///
    /// Purely informational: no accessor in this workspace retries on its own.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Redis(e) => e.is_io_error() || e.is_timeout() || e.is_connection_dropped(),
            Self::ConnectionFailed { .. } | Self::Io(_) => true,
            _ => false,
        }
    }

    /// Get log level
    pub fn log_level(&self) -> tracing::Level {
        use tracing::Level;
        match self.category() {
            ErrorCategory::Internal | ErrorCategory::Unknown => Level::ERROR,
            ErrorCategory::Connection | ErrorCategory::Codec => Level::WARN,
            ErrorCategory::Configuration => Level::WARN,
            ErrorCategory::Cancelled => Level::DEBUG,
        }
    }
}

// Helper macros for creating errors
#[macro_export]
macro_rules! config_error {
    ($msg:expr) => {
        $crate::DbkitError::Configuration($msg.to_string())
    };
    ($fmt:expr, $($arg:tt)*) => {
        $crate::DbkitError::Configuration(format!($fmt, $($arg)*))
    };
}

// Tests
#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;

    fn decode_error() -> DbkitError {
        let source = serde_json::from_str::<u32>("\"not a number\"").unwrap_err();
        DbkitError::Decode {
            type_name: "u32",
            source,
        }
    }

    #[test]
    fn test_invalid_config_message() {
        let err = DbkitError::invalid_config("host", "must not be empty");
        assert_eq!(
            err.to_string(),
            "Invalid configuration: host: must not be empty"
        );
        assert_eq!(err.error_code(), "INVALID_CONFIG");
        assert_eq!(err.category(), ErrorCategory::Configuration);
    }

    #[test]
    fn test_decode_error_names_type() {
        let err = decode_error();
        assert!(err.to_string().starts_with("Failed to decode u32"));
        assert_eq!(err.category(), ErrorCategory::Codec);
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn test_error_retryable() {
        assert!(
            DbkitError::connection_failed("redis://localhost:6379/0", "refused").is_retryable()
        );
        assert!(!DbkitError::invalid_config("port", "must be non-zero").is_retryable());
        assert!(!decode_error().is_retryable());
        assert!(!DbkitError::TaskCancelled("GET k".into()).is_retryable());
    }

    #[test]
    fn test_redis_error_conversion() {
        let redis_err = redis::RedisError::from((redis::ErrorKind::IoError, "broken pipe"));
        let err: DbkitError = redis_err.into();
        assert!(matches!(err, DbkitError::Redis(_)));
        assert_eq!(err.error_code(), "REDIS_ERROR");
        assert!(err.is_retryable());
    }

    #[test]
    fn test_config_error_macro() {
        let err = config_error!("section {} not found", "cache");
        assert_eq!(err.to_string(), "Configuration error: section cache not found");
    }

    #[test]
    fn test_log_levels() {
        assert_eq!(DbkitError::internal("boom").log_level(), tracing::Level::ERROR);
        assert_eq!(decode_error().log_level(), tracing::Level::WARN);
        assert_eq!(
            DbkitError::TaskCancelled("SET k".into()).log_level(),
            tracing::Level::DEBUG
        );

        let dropped = DbkitError::MessagesDropped {
            channel: "events".into(),
            skipped: 3,
        };
        assert_eq!(dropped.log_level(), tracing::Level::WARN);
        assert_eq!(dropped.error_code(), "MESSAGES_DROPPED");
        assert!(!dropped.is_retryable());
    }
}
