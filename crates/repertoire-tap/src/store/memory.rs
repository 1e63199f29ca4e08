//! In-memory `TapStore` backend.
//!
//! Models a catalog of namespaces holding tables, views and a version
//! ledger. Clones share the catalog and the session; `new_session` gives a
//! second session over the same catalog, which is how tests exercise lock
//! contention. Every operation is applied to a copy and swapped in only on
//! success, matching the all-or-nothing behaviour of the PostgreSQL backend.

use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::Utc;
use tracing::debug;

use super::{RowBatch, StoreError, StoreResult, TableSpec, TapStore, Value, ViewSpec};
use crate::ledger::SchemaVersion;

static NEXT_SESSION: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone)]
struct MemTable {
    spec: TableSpec,
    rows: Vec<Vec<Value>>,
}

#[derive(Debug, Clone, Default)]
struct Namespace {
    tables: BTreeMap<String, MemTable>,
    views: BTreeMap<String, String>,
    versions: BTreeMap<String, SchemaVersion>,
}

impl Namespace {
    /// Resolve a table or view name to its backing table.
    fn relation(&self, name: &str) -> Option<&MemTable> {
        match self.views.get(name) {
            Some(table) => self.tables.get(table),
            None => self.tables.get(name),
        }
    }
}

#[derive(Debug, Default)]
struct Catalog {
    namespaces: BTreeMap<String, Namespace>,
    lock_holder: Option<u64>,
}

/// Shared in-memory catalog with a session identity.
#[derive(Debug, Clone)]
pub struct MemoryTapStore {
    catalog: Arc<Mutex<Catalog>>,
    session: u64,
}

impl Default for MemoryTapStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryTapStore {
    pub fn new() -> Self {
        Self {
            catalog: Arc::new(Mutex::new(Catalog::default())),
            session: NEXT_SESSION.fetch_add(1, Ordering::Relaxed),
        }
    }

    /// A new session over the same catalog.
    pub fn new_session(&self) -> Self {
        Self {
            catalog: Arc::clone(&self.catalog),
            session: NEXT_SESSION.fetch_add(1, Ordering::Relaxed),
        }
    }

    fn catalog(&self) -> MutexGuard<'_, Catalog> {
        self.catalog.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Names of all namespaces, sorted.
    pub fn namespaces(&self) -> Vec<String> {
        self.catalog().namespaces.keys().cloned().collect()
    }

    /// Table and view names in `namespace`, sorted, or `None` if absent.
    pub fn relations(&self, namespace: &str) -> Option<Vec<String>> {
        let catalog = self.catalog();
        let ns = catalog.namespaces.get(namespace)?;
        let mut names: Vec<String> = ns.tables.keys().chain(ns.views.keys()).cloned().collect();
        names.sort();
        Some(names)
    }

    /// Rows of a table or view, or `None` if it does not exist.
    pub fn rows(&self, namespace: &str, relation: &str) -> Option<Vec<Vec<Value>>> {
        let catalog = self.catalog();
        catalog
            .namespaces
            .get(namespace)?
            .relation(relation)
            .map(|t| t.rows.clone())
    }

    /// Ledger rows of `namespace`, ordered by version.
    pub fn version_rows(&self, namespace: &str) -> Vec<SchemaVersion> {
        self.catalog()
            .namespaces
            .get(namespace)
            .map(|ns| ns.versions.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Run `op` against a copy of `namespace` and keep the result only if
    /// it succeeds.
    fn modify<T>(
        &self,
        namespace: &str,
        op: impl FnOnce(&mut Namespace) -> StoreResult<T>,
    ) -> StoreResult<T> {
        let mut catalog = self.catalog();
        let current = catalog
            .namespaces
            .get(namespace)
            .ok_or_else(|| StoreError::MissingNamespace(namespace.to_string()))?;
        let mut draft = current.clone();
        let out = op(&mut draft)?;
        catalog.namespaces.insert(namespace.to_string(), draft);
        Ok(out)
    }
}

fn check_row(table: &TableSpec, row: &[Value]) -> StoreResult<()> {
    if row.len() != table.columns.len() {
        return Err(StoreError::InvalidRow {
            table: table.name.clone(),
            reason: format!("expected {} values, got {}", table.columns.len(), row.len()),
        });
    }
    for (column, value) in table.columns.iter().zip(row) {
        if value.is_null() && !column.nullable {
            return Err(StoreError::InvalidRow {
                table: table.name.clone(),
                reason: format!("null value in non-nullable column {}", column.name),
            });
        }
    }
    Ok(())
}

fn key_of(table: &TableSpec, row: &[Value]) -> Vec<Value> {
    table
        .primary_key
        .iter()
        .filter_map(|k| table.column_index(k))
        .map(|i| row[i].clone())
        .collect()
}

#[async_trait]
impl TapStore for MemoryTapStore {
    async fn try_lock(&mut self) -> StoreResult<bool> {
        let mut catalog = self.catalog();
        match catalog.lock_holder {
            Some(holder) if holder != self.session => Ok(false),
            _ => {
                catalog.lock_holder = Some(self.session);
                Ok(true)
            }
        }
    }

    async fn unlock(&mut self) -> StoreResult<()> {
        let mut catalog = self.catalog();
        if catalog.lock_holder == Some(self.session) {
            catalog.lock_holder = None;
        }
        Ok(())
    }

    async fn recreate_namespace(&mut self, namespace: &str) -> StoreResult<()> {
        let mut catalog = self.catalog();
        let existed = catalog
            .namespaces
            .insert(namespace.to_string(), Namespace::default())
            .is_some();
        debug!(namespace, existed, "namespace recreated");
        Ok(())
    }

    async fn namespace_exists(&mut self, namespace: &str) -> StoreResult<bool> {
        Ok(self.catalog().namespaces.contains_key(namespace))
    }

    async fn create_table(&mut self, namespace: &str, table: &TableSpec) -> StoreResult<()> {
        self.modify(namespace, |ns| {
            ns.tables.entry(table.name.clone()).or_insert_with(|| MemTable {
                spec: table.clone(),
                rows: Vec::new(),
            });
            Ok(())
        })
    }

    async fn insert_rows(&mut self, namespace: &str, batches: &[RowBatch<'_>]) -> StoreResult<()> {
        self.modify(namespace, |ns| {
            for batch in batches {
                let table = ns
                    .tables
                    .get_mut(&batch.table.name)
                    .ok_or_else(|| StoreError::MissingRelation(batch.table.name.clone()))?;
                let mut keys: HashSet<Vec<Value>> =
                    table.rows.iter().map(|r| key_of(&table.spec, r)).collect();
                for row in &batch.rows {
                    check_row(&table.spec, row)?;
                    let key = key_of(&table.spec, row);
                    if !key.is_empty() && !keys.insert(key.clone()) {
                        return Err(StoreError::DuplicateKey {
                            table: table.spec.name.clone(),
                            key: key.iter().map(Value::to_string).collect::<Vec<_>>().join(", "),
                        });
                    }
                    table.rows.push(row.clone());
                }
            }
            Ok(())
        })
    }

    async fn create_views(&mut self, namespace: &str, views: &[ViewSpec]) -> StoreResult<()> {
        self.modify(namespace, |ns| {
            for view in views {
                if !ns.tables.contains_key(&view.table) {
                    return Err(StoreError::MissingRelation(view.table.clone()));
                }
                ns.views.insert(view.view.clone(), view.table.clone());
            }
            Ok(())
        })
    }

    async fn upsert_version(&mut self, namespace: &str, version: &str) -> StoreResult<SchemaVersion> {
        self.modify(namespace, |ns| {
            let row = SchemaVersion {
                version: version.to_string(),
                loaded_at: Utc::now(),
            };
            ns.versions.insert(version.to_string(), row.clone());
            Ok(row)
        })
    }

    async fn current_version(&mut self, namespace: &str) -> StoreResult<Option<SchemaVersion>> {
        let catalog = self.catalog();
        Ok(catalog
            .namespaces
            .get(namespace)
            .and_then(|ns| ns.versions.values().max_by_key(|v| v.loaded_at).cloned()))
    }

    async fn column_values(
        &mut self,
        namespace: &str,
        relation: &str,
        column: &str,
    ) -> StoreResult<Vec<String>> {
        let catalog = self.catalog();
        let ns = catalog
            .namespaces
            .get(namespace)
            .ok_or_else(|| StoreError::MissingNamespace(namespace.to_string()))?;
        let table = ns
            .relation(relation)
            .ok_or_else(|| StoreError::MissingRelation(format!("{namespace}.{relation}")))?;
        let index = table
            .spec
            .column_index(column)
            .ok_or_else(|| StoreError::MissingRelation(format!("{namespace}.{relation}.{column}")))?;
        Ok(table
            .rows
            .iter()
            .map(|row| &row[index])
            .filter(|v| !v.is_null())
            .map(Value::to_string)
            .collect())
    }

    async fn rename_namespaces(&mut self, renames: &[(&str, &str)]) -> StoreResult<()> {
        let mut catalog = self.catalog();
        let mut draft = catalog.namespaces.clone();
        for (from, to) in renames {
            if draft.contains_key(*to) {
                return Err(StoreError::NamespaceExists(to.to_string()));
            }
            let ns = draft
                .remove(*from)
                .ok_or_else(|| StoreError::MissingNamespace(from.to_string()))?;
            draft.insert(to.to_string(), ns);
        }
        catalog.namespaces = draft;
        debug!(count = renames.len(), "namespaces renamed");
        Ok(())
    }
}
