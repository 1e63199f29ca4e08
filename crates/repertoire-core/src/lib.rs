//! repertoire-core: configuration and process setup shared by Repertoire
//! binaries.
//!
//! The configuration file selects which TAP servers have their TAP_SCHEMA
//! managed, which schema version each one runs, and where the versioned
//! schema archives live. Credentials never appear in the file itself; they
//! come from the environment or from the mounted secrets directory.

pub mod config;
pub mod credentials;
pub mod error;
pub mod logging;

pub use config::{Config, LogProfile, TapServerConfig, TapTarget};
pub use credentials::DatabaseCredentials;
pub use error::{ConfigError, ConfigResult};
