//! Staging validation gate run before promotion.

use std::collections::BTreeSet;

use tracing::{info, warn};

use crate::error::{TapError, TapResult, during};
use crate::manager::{TAP_SCHEMA_NAME, TableManager, TapTable};
use crate::store::TapStore;

/// Checks that staging holds exactly the requested schemas.
pub struct StagingValidator<'a> {
    mgr: &'a TableManager,
    version: &'a str,
}

impl<'a> StagingValidator<'a> {
    pub fn new(mgr: &'a TableManager, version: &'a str) -> Self {
        Self { mgr, version }
    }

    /// Fail unless the schema registry, minus the `tap_schema` row, has
    /// exactly `expected.len()` rows. Name mismatches are only logged.
    pub async fn validate<S>(&self, store: &mut S, expected: &[String]) -> TapResult<()>
    where
        S: TapStore + ?Sized,
    {
        let loaded: Vec<String> = store
            .column_values(
                self.mgr.namespace(),
                self.mgr.table_name(TapTable::Schemas),
                "schema_name",
            )
            .await
            .map_err(during("validating staging"))?
            .into_iter()
            .filter(|name| name != TAP_SCHEMA_NAME)
            .collect();

        if loaded.len() != expected.len() {
            return Err(TapError::Validation {
                expected: expected.len(),
                found: loaded.len(),
                version: self.version.to_string(),
            });
        }

        let loaded_set: BTreeSet<&str> = loaded.iter().map(String::as_str).collect();
        let missing: Vec<&str> = expected
            .iter()
            .map(String::as_str)
            .filter(|name| !loaded_set.contains(name))
            .collect();
        if !missing.is_empty() {
            warn!(
                version = %self.version,
                missing = ?missing,
                loaded = ?loaded_set,
                "requested schemas not found in staging"
            );
        }

        info!(version = %self.version, schemas = loaded.len(), "staging validated");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::MemoryTapStore;
    use crate::store::{RowBatch, Value};

    async fn staging_with(names: &[&str]) -> (MemoryTapStore, TableManager) {
        let mut store = MemoryTapStore::new();
        store.recreate_namespace("staging").await.unwrap();
        let mgr = TableManager::new("staging", "11");
        mgr.initialize(&mut store).await.unwrap();
        mgr.insert_metadata(&mut store).await.unwrap();
        let rows = names
            .iter()
            .map(|n| vec![Value::from(*n), Value::Null, Value::Null, Value::Null])
            .collect();
        let batch = RowBatch {
            table: mgr.table(TapTable::Schemas),
            rows,
        };
        store.insert_rows("staging", &[batch]).await.unwrap();
        (store, mgr)
    }

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn exact_count_passes() {
        let (mut store, mgr) = staging_with(&["a", "b"]).await;
        StagingValidator::new(&mgr, "v1")
            .validate(&mut store, &names(&["a", "b"]))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn sentinel_row_is_not_counted() {
        let (mut store, mgr) = staging_with(&[]).await;
        let err = StagingValidator::new(&mgr, "v1")
            .validate(&mut store, &names(&["a"]))
            .await
            .unwrap_err();
        assert!(matches!(err, TapError::Validation { expected: 1, found: 0, .. }));
    }

    #[tokio::test]
    async fn too_many_rows_fails_with_both_counts() {
        let (mut store, mgr) = staging_with(&["a", "b", "c"]).await;
        let err = StagingValidator::new(&mgr, "w.2025.43")
            .validate(&mut store, &names(&["a", "b"]))
            .await
            .unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("expected 2"), "{msg}");
        assert!(msg.contains("found 3"), "{msg}");
        assert!(msg.contains("w.2025.43"), "{msg}");
    }

    #[tokio::test]
    async fn name_mismatch_with_matching_count_only_warns() {
        let (mut store, mgr) = staging_with(&["a", "x"]).await;
        StagingValidator::new(&mgr, "v1")
            .validate(&mut store, &names(&["a", "a"]))
            .await
            .unwrap();
    }
}
