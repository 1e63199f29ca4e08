//! TAP_SCHEMA update orchestrator.
//!
//! One run walks a fixed sequence of phases against a single store session:
//!
//! ```text
//! Init → SchemasReset → Downloaded → Loaded → ViewsCreated
//!      → VersionRecorded → Validated → Swapped
//! ```
//!
//! Any error stops the run where it is. Production is only touched by the
//! final promotion, and the next run's reset clears whatever a failed run
//! left in staging. The update lock is held for the whole run.

use std::fmt;
use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::document::SchemaDocument;
use crate::download::SchemaSource;
use crate::error::{TapError, TapResult, during};
use crate::ledger::{SchemaVersion, VersionLedger};
use crate::manager::{DataLoader, TableManager, locate_document};
use crate::store::TapStore;
use crate::validate::StagingValidator;

/// Namespace the new generation is loaded into.
pub const STAGING_SCHEMA: &str = "tap_schema_staging";
/// Live namespace queried by the TAP service.
pub const PRODUCTION_SCHEMA: &str = "tap_schema";
/// Holds the old production namespace during a swap.
pub const TEMP_SCHEMA: &str = "tap_schema_temp";

/// Phase reached by an update run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum UpdatePhase {
    Init,
    SchemasReset,
    Downloaded,
    Loaded,
    ViewsCreated,
    VersionRecorded,
    Validated,
    Swapped,
}

impl fmt::Display for UpdatePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            UpdatePhase::Init => "init",
            UpdatePhase::SchemasReset => "schemas_reset",
            UpdatePhase::Downloaded => "downloaded",
            UpdatePhase::Loaded => "loaded",
            UpdatePhase::ViewsCreated => "views_created",
            UpdatePhase::VersionRecorded => "version_recorded",
            UpdatePhase::Validated => "validated",
            UpdatePhase::Swapped => "swapped",
        };
        f.write_str(name)
    }
}

/// What one run loads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdatePlan {
    pub version: String,
    /// Schema names, loaded in this order.
    pub schemas: Vec<String>,
    /// Archive URL template with a `{version}` placeholder.
    pub source_template: String,
    pub table_postfix: String,
    /// Replacement for the built-in TAP_SCHEMA self-description.
    pub tap_schema_extensions: Option<PathBuf>,
}

/// How staging became production.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Promotion {
    /// No production namespace existed; staging was renamed into place.
    FirstDeployment,
    /// Production and staging traded places.
    Swapped,
}

/// Outcome of a successful run.
#[derive(Debug, Clone)]
pub struct UpdateReport {
    pub version: SchemaVersion,
    pub schemas: Vec<String>,
    pub promotion: Promotion,
}

/// Drives one TAP_SCHEMA update against a store.
pub struct TapSchemaUpdater<S, F> {
    store: S,
    source: F,
    plan: UpdatePlan,
    mgr: TableManager,
    phase: UpdatePhase,
}

impl<S, F> TapSchemaUpdater<S, F>
where
    S: TapStore,
    F: SchemaSource,
{
    pub fn new(store: S, source: F, plan: UpdatePlan) -> Self {
        let mut mgr = TableManager::new(STAGING_SCHEMA, &plan.table_postfix);
        if let Some(path) = &plan.tap_schema_extensions {
            mgr = mgr.with_self_description(path);
        }
        Self {
            store,
            source,
            plan,
            mgr,
            phase: UpdatePhase::Init,
        }
    }

    /// Last phase reached.
    pub fn phase(&self) -> UpdatePhase {
        self.phase
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut S {
        &mut self.store
    }

    pub fn into_store(self) -> S {
        self.store
    }

    fn advance(&mut self, phase: UpdatePhase) {
        info!(version = %self.plan.version, from = %self.phase, to = %phase, "update phase");
        self.phase = phase;
    }

    /// Run the whole workflow under the update lock.
    ///
    /// Downloads go to `work_dir`, or to a temporary directory removed
    /// when the run ends.
    pub async fn update(&mut self, work_dir: Option<&Path>) -> TapResult<UpdateReport> {
        self.phase = UpdatePhase::Init;
        let acquired = self
            .store
            .try_lock()
            .await
            .map_err(during("acquiring update lock"))?;
        if !acquired {
            return Err(TapError::Locked);
        }

        let result = match work_dir {
            Some(dir) => self.run(dir).await,
            None => match tempfile::tempdir() {
                Ok(tmp) => self.run(tmp.path()).await,
                Err(e) => Err(TapError::Io {
                    path: std::env::temp_dir(),
                    source: e,
                }),
            },
        };

        if let Err(e) = self.store.unlock().await {
            warn!(error = %e, "failed to release update lock");
        }
        match &result {
            Ok(report) => info!(
                version = %report.version.version,
                schemas = report.schemas.len(),
                promotion = ?report.promotion,
                "TAP_SCHEMA update complete"
            ),
            Err(e) => warn!(version = %self.plan.version, phase = %self.phase, error = %e, "TAP_SCHEMA update failed"),
        }
        result
    }

    async fn run(&mut self, work_dir: &Path) -> TapResult<UpdateReport> {
        self.reset_staging().await?;

        let dir = self
            .source
            .fetch(&self.plan.version, &self.plan.source_template, work_dir)
            .await?;
        self.advance(UpdatePhase::Downloaded);

        self.load(&dir).await?;

        self.store
            .create_views(STAGING_SCHEMA, &self.mgr.view_specs())
            .await
            .map_err(during("creating views"))?;
        self.advance(UpdatePhase::ViewsCreated);

        let version = VersionLedger::new(STAGING_SCHEMA)
            .record(&mut self.store, &self.plan.version)
            .await?;
        self.advance(UpdatePhase::VersionRecorded);

        StagingValidator::new(&self.mgr, &self.plan.version)
            .validate(&mut self.store, &self.plan.schemas)
            .await?;
        self.advance(UpdatePhase::Validated);

        let promotion = self.promote().await?;

        Ok(UpdateReport {
            version,
            schemas: self.plan.schemas.clone(),
            promotion,
        })
    }

    /// Drop and recreate the staging namespace.
    pub async fn reset_staging(&mut self) -> TapResult<()> {
        self.store
            .recreate_namespace(STAGING_SCHEMA)
            .await
            .map_err(during("resetting staging"))?;
        self.advance(UpdatePhase::SchemasReset);
        Ok(())
    }

    /// Create the TAP_SCHEMA tables in staging and load every planned
    /// document from `dir`, in plan order.
    ///
    /// A missing document aborts before anything later in the list is read.
    pub async fn load(&mut self, dir: &Path) -> TapResult<()> {
        self.mgr.initialize(&mut self.store).await?;
        self.mgr.insert_metadata(&mut self.store).await?;

        let loader = DataLoader::new(&self.mgr);
        for name in &self.plan.schemas {
            let path = locate_document(dir, name)?;
            let doc = SchemaDocument::from_path(&path)?;
            loader.load(&mut self.store, &doc).await?;
        }
        self.advance(UpdatePhase::Loaded);
        Ok(())
    }

    /// Promote staging to production.
    ///
    /// All renames commit together, so production is never absent.
    pub async fn promote(&mut self) -> TapResult<Promotion> {
        let exists = self
            .store
            .namespace_exists(PRODUCTION_SCHEMA)
            .await
            .map_err(during("checking production schema"))?;

        let promotion = if exists {
            info!(
                production = PRODUCTION_SCHEMA,
                staging = STAGING_SCHEMA,
                temp = TEMP_SCHEMA,
                "swapping staging with production"
            );
            self.store
                .rename_namespaces(&[
                    (PRODUCTION_SCHEMA, TEMP_SCHEMA),
                    (STAGING_SCHEMA, PRODUCTION_SCHEMA),
                    (TEMP_SCHEMA, STAGING_SCHEMA),
                ])
                .await
                .map_err(during("swapping schemas"))?;
            Promotion::Swapped
        } else {
            info!(
                source = STAGING_SCHEMA,
                target = PRODUCTION_SCHEMA,
                "no production schema, performing initial deployment"
            );
            self.store
                .rename_namespaces(&[(STAGING_SCHEMA, PRODUCTION_SCHEMA)])
                .await
                .map_err(during("promoting staging"))?;
            Promotion::FirstDeployment
        };
        self.advance(UpdatePhase::Swapped);
        Ok(promotion)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phases_are_ordered() {
        assert!(UpdatePhase::Init < UpdatePhase::SchemasReset);
        assert!(UpdatePhase::ViewsCreated < UpdatePhase::VersionRecorded);
        assert!(UpdatePhase::Validated < UpdatePhase::Swapped);
    }

    #[test]
    fn phase_display() {
        assert_eq!(UpdatePhase::VersionRecorded.to_string(), "version_recorded");
        assert_eq!(UpdatePhase::Swapped.to_string(), "swapped");
    }
}
