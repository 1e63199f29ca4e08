//! repertoire: administrative commands for Repertoire.
//!
//! # Usage
//!
//! ```text
//! repertoire update-tap-schema --app tap
//! repertoire tap-schema-version --app tap --json
//! ```

use clap::{Parser, Subcommand};

mod commands;

use commands::tap_schema::{UpdateArgs, VersionArgs};

#[derive(Parser)]
#[command(
    name = "repertoire",
    about = "Repertoire service discovery administration",
    version,
    propagate_version = true,
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Load a schema version into staging and promote it to TAP_SCHEMA.
    UpdateTapSchema(UpdateArgs),
    /// Show the schema version loaded in production TAP_SCHEMA.
    TapSchemaVersion(VersionArgs),
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::UpdateTapSchema(args) => commands::tap_schema::update(args).await,
        Commands::TapSchemaVersion(args) => commands::tap_schema::version(args).await,
    }
}
