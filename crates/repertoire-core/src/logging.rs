//! Tracing subscriber setup.

use tracing_subscriber::EnvFilter;

use crate::config::LogProfile;
use crate::error::{ConfigError, ConfigResult};

/// Install the global tracing subscriber.
///
/// `RUST_LOG` takes precedence over `level`. Must be called at most once
/// per process.
pub fn init(level: &str, profile: LogProfile) -> ConfigResult<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(level).map_err(|_| ConfigError::LogFilter(level.to_string()))?,
    };

    match profile {
        LogProfile::Development => tracing_subscriber::fmt().with_env_filter(filter).init(),
        LogProfile::Production => tracing_subscriber::fmt()
            .json()
            .with_current_span(false)
            .with_env_filter(filter)
            .init(),
    }

    Ok(())
}
