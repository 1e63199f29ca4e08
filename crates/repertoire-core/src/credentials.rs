//! Database credential lookup.
//!
//! Passwords come from `REPERTOIRE_DATABASE_PASSWORD` when set, otherwise
//! from the secrets directory (one file per key, as mounted by the
//! deployment). The database user may be overridden the same way.

use std::fmt;
use std::path::Path;

use tracing::debug;

use crate::config::TapServerConfig;
use crate::error::{ConfigError, ConfigResult};

pub const PASSWORD_ENV: &str = "REPERTOIRE_DATABASE_PASSWORD";
pub const USER_ENV: &str = "REPERTOIRE_DATABASE_USER";

/// The database sidecar proxy listens locally.
pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 5432;

/// Connection parameters for one TAP server database.
#[derive(Clone, PartialEq, Eq)]
pub struct DatabaseCredentials {
    pub host: String,
    pub port: u16,
    pub database: String,
    pub user: String,
    pub password: String,
}

impl fmt::Debug for DatabaseCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatabaseCredentials")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .finish()
    }
}

impl DatabaseCredentials {
    /// Resolve credentials for `app` from the environment and secrets.
    ///
    /// `env` is the environment lookup, injected so callers and tests
    /// control where values come from.
    pub fn resolve<F>(
        app: &str,
        server: &TapServerConfig,
        secrets_path: &Path,
        env: F,
    ) -> ConfigResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let user = env(USER_ENV).unwrap_or_else(|| server.database_user.clone());
        let password = match env(PASSWORD_ENV) {
            Some(password) => {
                debug!(app, source = PASSWORD_ENV, "database password from environment");
                password
            }
            None => {
                debug!(app, key = %server.database_password_key, "database password from secrets");
                read_secret(secrets_path, &server.database_password_key)?
                    .ok_or_else(|| ConfigError::MissingPassword(app.to_string()))?
            }
        };

        Ok(Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            database: server.database.clone(),
            user,
            password,
        })
    }
}

/// Read one secret from the secrets directory.
///
/// Returns `None` when the file does not exist. Trailing newlines are
/// stripped.
pub fn read_secret(dir: &Path, key: &str) -> ConfigResult<Option<String>> {
    let path = dir.join(key);
    match std::fs::read_to_string(&path) {
        Ok(content) => Ok(Some(content.trim_end_matches(['\r', '\n']).to_string())),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(source) => Err(ConfigError::Secret { path, source }),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn server() -> TapServerConfig {
        TapServerConfig {
            enabled: true,
            schema_version: None,
            schemas: vec!["dp02_dc2".to_string()],
            database: "tap".to_string(),
            database_user: "tap".to_string(),
            database_password_key: "tap-password".to_string(),
        }
    }

    fn env_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn environment_password_wins() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("tap-password"), "from-file\n").unwrap();

        let creds = DatabaseCredentials::resolve(
            "tap",
            &server(),
            dir.path(),
            env_from(&[(PASSWORD_ENV, "from-env")]),
        )
        .unwrap();

        assert_eq!(creds.password, "from-env");
        assert_eq!(creds.user, "tap");
        assert_eq!(creds.host, "127.0.0.1");
        assert_eq!(creds.port, 5432);
    }

    #[test]
    fn secret_file_is_used_without_environment() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("tap-password"), "s3cret\n").unwrap();

        let creds =
            DatabaseCredentials::resolve("tap", &server(), dir.path(), env_from(&[])).unwrap();
        assert_eq!(creds.password, "s3cret");
    }

    #[test]
    fn user_override_from_environment() {
        let creds = DatabaseCredentials::resolve(
            "tap",
            &server(),
            Path::new("/nonexistent"),
            env_from(&[(PASSWORD_ENV, "pw"), (USER_ENV, "admin")]),
        )
        .unwrap();
        assert_eq!(creds.user, "admin");
    }

    #[test]
    fn missing_password_is_a_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = DatabaseCredentials::resolve("tap", &server(), dir.path(), env_from(&[]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::MissingPassword(ref app) if app == "tap"));
    }

    #[test]
    fn debug_output_redacts_password() {
        let creds = DatabaseCredentials::resolve(
            "tap",
            &server(),
            Path::new("/nonexistent"),
            env_from(&[(PASSWORD_ENV, "hunter2")]),
        )
        .unwrap();
        assert!(!format!("{creds:?}").contains("hunter2"));
    }
}
