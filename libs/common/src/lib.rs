//! dbkit basic library
//!
//! Provides the ambient pieces shared by every dbkit crate:
//! - logging setup and per-instance loggers
//! - layered configuration loading

pub mod config_loader;
pub mod logging;

pub use config_loader::{load_section, load_section_from_dir, load_section_from_file};
pub use logging::{init_logging, InstanceLogger, LogConfig, LogConfigBuilder, LogFormat};

// Re-export common dependencies
pub use errors::{DbkitError, DbkitResult};

