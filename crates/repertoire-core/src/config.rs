//! Repertoire configuration file parser.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{ConfigError, ConfigResult};

/// Default configuration path.
pub const CONFIG_PATH: &str = "/etc/repertoire/config.toml";

/// Default secrets directory, one file per secret key.
pub const SECRETS_PATH: &str = "/etc/repertoire/secrets";

/// Default TAP_SCHEMA table-name postfix (TAP_SCHEMA 1.1).
pub const DEFAULT_TABLE_POSTFIX: &str = "11";

/// Output format for log lines.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogProfile {
    /// Human-readable output.
    #[default]
    Development,
    /// One JSON object per line.
    Production,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Default tracing directive, overridden by `RUST_LOG`.
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub log_profile: LogProfile,
    /// Global schema version used by servers without an override.
    pub schema_version: Option<String>,
    /// Archive URL template with a `{version}` placeholder.
    pub schema_source_template: Option<String>,
    #[serde(default = "default_table_postfix")]
    pub table_postfix: String,
    #[serde(default = "default_secrets_path")]
    pub secrets_path: PathBuf,
    /// Schema document describing TAP_SCHEMA itself. The built-in
    /// description is used when unset.
    pub tap_schema_extensions_path: Option<PathBuf>,
    /// TAP servers whose TAP_SCHEMA is managed, keyed by application name.
    #[serde(default)]
    pub tap_servers: BTreeMap<String, TapServerConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TapServerConfig {
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Overrides the global `schema_version` for this server.
    pub schema_version: Option<String>,
    /// Schema document names, loaded in this order.
    pub schemas: Vec<String>,
    pub database: String,
    pub database_user: String,
    /// Secret key holding this server's database password.
    pub database_password_key: String,
}

/// Everything an update run needs to know about one TAP server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TapTarget {
    pub app: String,
    pub version: String,
    pub schemas: Vec<String>,
    pub source_template: String,
    pub table_postfix: String,
    pub tap_schema_extensions: Option<PathBuf>,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_table_postfix() -> String {
    DEFAULT_TABLE_POSTFIX.to_string()
}

fn default_secrets_path() -> PathBuf {
    PathBuf::from(SECRETS_PATH)
}

fn default_enabled() -> bool {
    true
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_profile: LogProfile::default(),
            schema_version: None,
            schema_source_template: None,
            table_postfix: default_table_postfix(),
            secrets_path: default_secrets_path(),
            tap_schema_extensions_path: None,
            tap_servers: BTreeMap::new(),
        }
    }
}

impl Config {
    /// Read, parse and validate a configuration file.
    pub fn from_file(path: &Path) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&content)
    }

    /// Parse and validate configuration from TOML text.
    pub fn parse(content: &str) -> ConfigResult<Self> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Check cross-field consistency.
    ///
    /// Every server needs a non-empty schema list. Once any server is
    /// enabled, a source template must exist and each enabled server must
    /// resolve a schema version.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.table_postfix.is_empty()
            || !self.table_postfix.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
        {
            return Err(ConfigError::Invalid(format!(
                "table_postfix must be a non-empty identifier suffix, got '{}'",
                self.table_postfix
            )));
        }

        for (name, server) in &self.tap_servers {
            if server.schemas.is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "tap_servers.{name}.schemas cannot be empty"
                )));
            }
        }

        let mut enabled = self.tap_servers.iter().filter(|(_, s)| s.enabled).peekable();
        if enabled.peek().is_none() {
            return Ok(());
        }

        if self.schema_source_template.is_none() {
            return Err(ConfigError::Invalid(
                "schema_source_template must be set when tap_servers has enabled servers"
                    .to_string(),
            ));
        }

        for (name, server) in enabled {
            if server.schema_version.is_none() && self.schema_version.is_none() {
                return Err(ConfigError::MissingVersion(name.clone()));
            }
        }

        Ok(())
    }

    /// Look up a TAP server by application name.
    pub fn tap_server(&self, app: &str) -> ConfigResult<&TapServerConfig> {
        self.tap_servers
            .get(app)
            .ok_or_else(|| ConfigError::UnknownServer(app.to_string()))
    }

    /// Schema version for a server: its own override, else the global default.
    pub fn schema_version_for(&self, app: &str) -> ConfigResult<String> {
        let server = self.tap_server(app)?;
        server
            .schema_version
            .as_ref()
            .or(self.schema_version.as_ref())
            .cloned()
            .ok_or_else(|| ConfigError::MissingVersion(app.to_string()))
    }

    /// Resolve everything needed to run a TAP_SCHEMA update for `app`.
    pub fn tap_target(&self, app: &str) -> ConfigResult<TapTarget> {
        let server = self.tap_server(app)?;
        if !server.enabled {
            return Err(ConfigError::Disabled(app.to_string()));
        }
        let version = self.schema_version_for(app)?;
        let source_template = self
            .schema_source_template
            .clone()
            .ok_or(ConfigError::MissingSourceTemplate)?;

        debug!(app, version = %version, schemas = server.schemas.len(), "resolved TAP server");
        Ok(TapTarget {
            app: app.to_string(),
            version,
            schemas: server.schemas.clone(),
            source_template,
            table_postfix: self.table_postfix.clone(),
            tap_schema_extensions: self.tap_schema_extensions_path.clone(),
        })
    }
}
