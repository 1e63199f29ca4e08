//! repertoire-tap: TAP_SCHEMA staging and promotion.
//!
//! An update run rebuilds TAP_SCHEMA for one TAP server in a staging
//! namespace and then promotes it by renaming namespaces, so readers of the
//! production namespace never see a partially loaded generation.
//!
//! # Components
//!
//! - **`source`** / **`download`**: resolve a versioned archive URL, fetch it
//!   from GCS or HTTP(S) and extract it into the working directory.
//! - **`document`**: the schema document model (one YAML file per schema).
//! - **`manager`**: TAP_SCHEMA table definitions and the row loader.
//! - **`validate`**: schema-count gate before promotion.
//! - **`ledger`**: the per-namespace version table.
//! - **`updater`**: the update state machine driving all of the above.
//! - **`store`**: the database seam, with PostgreSQL and in-memory backends.

pub mod document;
pub mod download;
pub mod error;
pub mod ledger;
pub mod manager;
pub mod source;
pub mod store;
pub mod updater;
pub mod validate;

pub use download::{ArtifactStore, SchemaSource};
pub use error::{TapError, TapResult};
pub use ledger::{SchemaVersion, VersionLedger};
pub use manager::{DataLoader, TAP_SCHEMA_NAME, TableManager, TapTable, locate_document};
pub use source::ArtifactSource;
pub use store::memory::MemoryTapStore;
pub use store::postgres::PgTapStore;
pub use store::{StoreError, StoreResult, TapStore, Value};
pub use updater::{
    PRODUCTION_SCHEMA, Promotion, STAGING_SCHEMA, TEMP_SCHEMA, TapSchemaUpdater, UpdatePhase,
    UpdatePlan, UpdateReport,
};
pub use validate::StagingValidator;
