//! viewscope configuration
//!
//! Loads [`AppConfig`] from an optional TOML file and `VIEWSCOPE_` prefixed
//! environment variables, validates it and installs the tracing subscriber.

pub mod error;
pub mod logging;
pub mod manager;
pub mod types;

pub use error::{ConfigError, Result};
pub use logging::{env_filter, init_logging};
pub use manager::{ConfigManager, DEFAULT_ENV_PREFIX};
pub use types::{AppConfig, ConfigManager as ConfigManagerTrait, LoggingConfig};
