//! Version ledger: which schema version a namespace holds.
//!
//! The table lives inside the namespace it describes, so it moves with the
//! data when staging is renamed to production.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::info;

use crate::error::{TapResult, during};
use crate::store::TapStore;

/// Unpostfixed name of the version table.
pub const VERSION_TABLE: &str = "version";

/// One ledger row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SchemaVersion {
    pub version: String,
    pub loaded_at: DateTime<Utc>,
}

/// Ledger for a single namespace.
#[derive(Debug, Clone)]
pub struct VersionLedger {
    namespace: String,
}

impl VersionLedger {
    pub fn new(namespace: &str) -> Self {
        Self {
            namespace: namespace.to_string(),
        }
    }

    /// Upsert `version`. Recording the same version again only refreshes
    /// `loaded_at`.
    pub async fn record<S>(&self, store: &mut S, version: &str) -> TapResult<SchemaVersion>
    where
        S: TapStore + ?Sized,
    {
        let row = store
            .upsert_version(&self.namespace, version)
            .await
            .map_err(during("recording schema version"))?;
        info!(
            namespace = %self.namespace,
            version = %row.version,
            loaded_at = %row.loaded_at,
            "schema version recorded"
        );
        Ok(row)
    }

    /// The most recently loaded version, if any.
    pub async fn read<S>(&self, store: &mut S) -> TapResult<Option<SchemaVersion>>
    where
        S: TapStore + ?Sized,
    {
        store
            .current_version(&self.namespace)
            .await
            .map_err(during("reading schema version"))
    }
}
