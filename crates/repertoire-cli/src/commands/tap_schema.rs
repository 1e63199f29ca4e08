//! TAP_SCHEMA commands.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Args;
use repertoire_core::config::CONFIG_PATH;
use repertoire_core::credentials::PASSWORD_ENV;
use repertoire_core::{Config, DatabaseCredentials, logging};
use repertoire_tap::{
    ArtifactStore, PRODUCTION_SCHEMA, PgTapStore, TapSchemaUpdater, UpdatePlan, VersionLedger,
};
use tracing::info;

/// Options shared by every TAP_SCHEMA command.
#[derive(Args, Debug)]
pub struct TargetArgs {
    /// Application whose TAP server is managed.
    #[arg(long, env = "REPERTOIRE_TAP_APP")]
    pub app: String,

    /// Configuration file.
    #[arg(long, env = "REPERTOIRE_CONFIG_PATH", default_value = CONFIG_PATH)]
    pub config_path: PathBuf,

    /// Connect to this database URL instead of the configured TAP server
    /// database.
    #[arg(long, env = "REPERTOIRE_DATABASE_URL")]
    pub database_url: Option<String>,
}

#[derive(Args, Debug)]
pub struct UpdateArgs {
    #[command(flatten)]
    pub target: TargetArgs,

    /// Keep downloaded archives here instead of a temporary directory.
    #[arg(long)]
    pub work_dir: Option<PathBuf>,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    #[command(flatten)]
    pub target: TargetArgs,

    /// Print the ledger row as JSON.
    #[arg(long)]
    pub json: bool,
}

fn load_config(path: &Path) -> Result<Config> {
    let config = Config::from_file(path)
        .with_context(|| format!("loading configuration from {}", path.display()))?;
    logging::init(&config.log_level, config.log_profile)?;
    Ok(config)
}

/// Connection settings for `app`.
///
/// A URL override is used as given, taking the password from the
/// environment when the URL has none. Otherwise the configured database is
/// reached through the local proxy with credentials from the environment
/// or the secrets directory.
fn database_config<F>(
    config: &Config,
    app: &str,
    url: Option<&str>,
    env: F,
) -> Result<tokio_postgres::Config>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(url) = url {
        let mut db: tokio_postgres::Config = url.parse().context("invalid database URL")?;
        if db.get_password().is_none() {
            if let Some(password) = env(PASSWORD_ENV) {
                db.password(password);
            }
        }
        return Ok(db);
    }

    let server = config.tap_server(app)?;
    let creds = DatabaseCredentials::resolve(app, server, &config.secrets_path, env)?;
    let mut db = tokio_postgres::Config::new();
    db.host(&creds.host)
        .port(creds.port)
        .dbname(&creds.database)
        .user(&creds.user)
        .password(creds.password);
    Ok(db)
}

async fn connect(config: &Config, target: &TargetArgs) -> Result<PgTapStore> {
    let db = database_config(config, &target.app, target.database_url.as_deref(), |key| {
        std::env::var(key).ok()
    })?;
    PgTapStore::connect(&db)
        .await
        .with_context(|| format!("connecting to the {} database", target.app))
}

/// `repertoire update-tap-schema`
pub async fn update(args: UpdateArgs) -> Result<()> {
    let config = load_config(&args.target.config_path)?;
    let target = config.tap_target(&args.target.app)?;
    info!(app = %target.app, version = %target.version, schemas = ?target.schemas, "updating TAP_SCHEMA");

    let store = connect(&config, &args.target).await?;
    let plan = UpdatePlan {
        version: target.version,
        schemas: target.schemas,
        source_template: target.source_template,
        table_postfix: target.table_postfix,
        tap_schema_extensions: target.tap_schema_extensions,
    };
    let mut updater = TapSchemaUpdater::new(store, ArtifactStore::new()?, plan);
    let report = updater
        .update(args.work_dir.as_deref())
        .await
        .with_context(|| format!("TAP_SCHEMA update for {} stopped at phase {}", args.target.app, updater.phase()))?;

    println!(
        "TAP_SCHEMA for {} is now at version {} ({} schemas, {:?})",
        args.target.app,
        report.version.version,
        report.schemas.len(),
        report.promotion
    );
    Ok(())
}

/// `repertoire tap-schema-version`
pub async fn version(args: VersionArgs) -> Result<()> {
    let config = load_config(&args.target.config_path)?;
    config.tap_server(&args.target.app)?;

    let mut store = connect(&config, &args.target).await?;
    let current = VersionLedger::new(PRODUCTION_SCHEMA).read(&mut store).await?;

    match (current, args.json) {
        (Some(row), true) => println!("{}", serde_json::to_string(&row)?),
        (Some(row), false) => println!("{} (loaded {})", row.version, row.loaded_at.to_rfc3339()),
        (None, true) => println!("null"),
        (None, false) => println!("No TAP_SCHEMA version recorded for {}", args.target.app),
    }
    Ok(())
}
