//! Error types for configuration loading.

use std::path::PathBuf;

use thiserror::Error;

/// Result type alias for configuration operations.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Errors raised while loading or resolving configuration.
///
/// All of these surface before any database or network work starts.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read configuration file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),

    #[error("unknown TAP server: {0}")]
    UnknownServer(String),

    #[error("TAP schema management is disabled for server '{0}'")]
    Disabled(String),

    #[error(
        "no schema version configured for server '{0}'; set either \
         schema_version or tap_servers.{0}.schema_version"
    )]
    MissingVersion(String),

    #[error("schema_source_template must be set to update TAP_SCHEMA")]
    MissingSourceTemplate,

    #[error("failed to read secret {path}: {source}")]
    Secret {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("database password not found for TAP server '{0}'; set REPERTOIRE_DATABASE_PASSWORD")]
    MissingPassword(String),

    #[error("invalid log filter '{0}'")]
    LogFilter(String),
}
