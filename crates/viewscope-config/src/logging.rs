//! Logging setup

use tracing_subscriber::EnvFilter;

use crate::{
    error::{ConfigError, Result},
    types::LoggingConfig,
};

/// Parse filter directives such as `info` or `viewscope_views=trace,warn`
pub fn env_filter(directives: &str) -> Result<EnvFilter> {
    EnvFilter::try_new(directives)
        .map_err(|err| ConfigError::Validation(format!("Invalid log filter '{directives}': {err}")))
}

/// Install the global fmt subscriber
///
/// `RUST_LOG` takes precedence over the configured level when set.
///
/// # Errors
/// `Logging` if a global subscriber is already installed.
pub fn init_logging(config: &LoggingConfig) -> Result<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => env_filter(&config.level)?,
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(config.with_target)
        .try_init()
        .map_err(|err| ConfigError::Logging(err.to_string()))?;

    tracing::debug!(level = %config.level, "Logging initialized");
    Ok(())
}
