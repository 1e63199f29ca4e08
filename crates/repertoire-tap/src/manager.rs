//! TAP_SCHEMA 1.1 table manager and data loader.
//!
//! `TableManager` knows the physical layout of the five TAP_SCHEMA tables
//! for one namespace and postfix. `DataLoader` turns a parsed schema
//! document into rows for those tables and inserts them in one commit.

use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::document::SchemaDocument;
use crate::download::{DOCUMENT_EXTENSION, list_documents};
use crate::error::{TapError, TapResult, during};
use crate::store::{ColumnSpec, RowBatch, SqlType, TableSpec, TapStore, Value, ViewSpec};

/// Name under which TAP_SCHEMA describes itself.
pub const TAP_SCHEMA_NAME: &str = "tap_schema";

/// Self-description of the TAP_SCHEMA tables, loaded by `insert_metadata`.
const TAP_SCHEMA_DOCUMENT: &str = include_str!("tap_schema.yaml");

/// The five TAP_SCHEMA tables, by logical (view) name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TapTable {
    Schemas,
    Tables,
    Columns,
    Keys,
    KeyColumns,
}

impl TapTable {
    pub const ALL: [TapTable; 5] = [
        TapTable::Schemas,
        TapTable::Tables,
        TapTable::Columns,
        TapTable::Keys,
        TapTable::KeyColumns,
    ];

    pub fn logical_name(self) -> &'static str {
        match self {
            TapTable::Schemas => "schemas",
            TapTable::Tables => "tables",
            TapTable::Columns => "columns",
            TapTable::Keys => "keys",
            TapTable::KeyColumns => "key_columns",
        }
    }

    fn columns(self) -> Vec<ColumnSpec> {
        match self {
            TapTable::Schemas => vec![
                text("schema_name", false),
                text("utype", true),
                text("description", true),
                int("schema_index", true),
            ],
            TapTable::Tables => vec![
                text("schema_name", false),
                text("table_name", false),
                text("table_type", false),
                text("utype", true),
                text("description", true),
                int("table_index", true),
            ],
            TapTable::Columns => vec![
                text("table_name", false),
                text("column_name", false),
                text("datatype", false),
                text("arraysize", true),
                text("xtype", true),
                int("size", true),
                text("description", true),
                text("utype", true),
                text("unit", true),
                text("ucd", true),
                int("indexed", false),
                int("principal", false),
                int("std", false),
                int("column_index", true),
            ],
            TapTable::Keys => vec![
                text("key_id", false),
                text("from_table", false),
                text("target_table", false),
                text("utype", true),
                text("description", true),
            ],
            TapTable::KeyColumns => vec![
                text("key_id", false),
                text("from_column", false),
                text("target_column", false),
            ],
        }
    }

    fn primary_key(self) -> &'static [&'static str] {
        match self {
            TapTable::Schemas => &["schema_name"],
            TapTable::Tables => &["table_name"],
            TapTable::Columns => &["table_name", "column_name"],
            TapTable::Keys => &["key_id"],
            TapTable::KeyColumns => &["key_id", "from_column"],
        }
    }
}

fn text(name: &str, nullable: bool) -> ColumnSpec {
    ColumnSpec {
        name: name.to_string(),
        ty: SqlType::Text,
        nullable,
    }
}

fn int(name: &str, nullable: bool) -> ColumnSpec {
    ColumnSpec {
        name: name.to_string(),
        ty: SqlType::Integer,
        nullable,
    }
}

/// Physical TAP_SCHEMA tables in one namespace.
#[derive(Debug, Clone)]
pub struct TableManager {
    namespace: String,
    postfix: String,
    tables: Vec<TableSpec>,
    self_description: Option<PathBuf>,
}

impl TableManager {
    pub fn new(namespace: &str, postfix: &str) -> Self {
        let tables = TapTable::ALL
            .iter()
            .map(|t| TableSpec {
                name: format!("{}{postfix}", t.logical_name()),
                columns: t.columns(),
                primary_key: t.primary_key().iter().map(|k| k.to_string()).collect(),
            })
            .collect();
        Self {
            namespace: namespace.to_string(),
            postfix: postfix.to_string(),
            tables,
            self_description: None,
        }
    }

    /// Describe TAP_SCHEMA from the document at `path` instead of the
    /// built-in one.
    pub fn with_self_description(mut self, path: impl Into<PathBuf>) -> Self {
        self.self_description = Some(path.into());
        self
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Physical (postfixed) name of a table.
    pub fn table_name(&self, table: TapTable) -> &str {
        &self.table(table).name
    }

    pub fn table(&self, table: TapTable) -> &TableSpec {
        // `tables` is built from `TapTable::ALL` in declaration order.
        &self.tables[table as usize]
    }

    pub fn table_specs(&self) -> &[TableSpec] {
        &self.tables
    }

    /// Unpostfixed views over every table.
    pub fn view_specs(&self) -> Vec<ViewSpec> {
        TapTable::ALL
            .iter()
            .map(|t| ViewSpec {
                view: t.logical_name().to_string(),
                table: self.table_name(*t).to_string(),
            })
            .collect()
    }

    /// Create every TAP_SCHEMA table that does not exist yet.
    pub async fn initialize<S>(&self, store: &mut S) -> TapResult<()>
    where
        S: TapStore + ?Sized,
    {
        for table in &self.tables {
            store
                .create_table(&self.namespace, table)
                .await
                .map_err(during("creating TAP_SCHEMA tables"))?;
        }
        debug!(namespace = %self.namespace, postfix = %self.postfix, "TAP_SCHEMA tables ready");
        Ok(())
    }

    /// Parse the TAP_SCHEMA self-description.
    ///
    /// A replacement document must still be named `tap_schema`.
    pub fn self_description(&self) -> TapResult<SchemaDocument> {
        let (path, doc) = match &self.self_description {
            Some(path) => (path.clone(), SchemaDocument::from_path(path)?),
            None => {
                let path = PathBuf::from("tap_schema.yaml");
                let doc = SchemaDocument::parse(TAP_SCHEMA_DOCUMENT).map_err(|reason| {
                    TapError::Document {
                        path: path.clone(),
                        reason,
                    }
                })?;
                (path, doc)
            }
        };
        if doc.name != TAP_SCHEMA_NAME {
            return Err(TapError::Document {
                path,
                reason: format!("self-description must be named {TAP_SCHEMA_NAME}, got {}", doc.name),
            });
        }
        Ok(doc)
    }

    /// Insert the rows describing TAP_SCHEMA itself.
    pub async fn insert_metadata<S>(&self, store: &mut S) -> TapResult<()>
    where
        S: TapStore + ?Sized,
    {
        let doc = self.self_description()?;
        let batches = DataLoader::new(self).rows(&doc);
        store
            .insert_rows(&self.namespace, &batches)
            .await
            .map_err(during("inserting TAP_SCHEMA metadata"))?;
        Ok(())
    }
}

/// Path of the document for `name` in `dir`.
///
/// A missing document is reported together with every document name that
/// is present, sorted.
pub fn locate_document(dir: &Path, name: &str) -> TapResult<PathBuf> {
    let path = dir.join(format!("{name}.{DOCUMENT_EXTENSION}"));
    if path.is_file() {
        return Ok(path);
    }
    Err(TapError::SchemaNotFound {
        name: name.to_string(),
        available: list_documents(dir)?,
    })
}

/// Writes schema documents into the tables of a `TableManager`.
pub struct DataLoader<'a> {
    mgr: &'a TableManager,
}

impl<'a> DataLoader<'a> {
    pub fn new(mgr: &'a TableManager) -> Self {
        Self { mgr }
    }

    /// Build TAP_SCHEMA rows for one document.
    pub fn rows(&self, doc: &SchemaDocument) -> Vec<RowBatch<'a>> {
        let columns_by_id = doc.columns_by_id();
        let indexed = doc.indexed_column_ids();
        let flag = |b: bool| Value::Int(i32::from(b));

        let schemas = vec![vec![
            Value::from(doc.name.as_str()),
            Value::from(doc.utype.clone()),
            Value::from(doc.description.clone()),
            Value::from(doc.schema_index),
        ]];

        let mut tables = Vec::new();
        let mut columns = Vec::new();
        let mut keys = Vec::new();
        let mut key_columns = Vec::new();

        for table in &doc.tables {
            let table_name = doc.qualified_table_name(table);
            tables.push(vec![
                Value::from(doc.name.as_str()),
                Value::from(table_name.as_str()),
                Value::from("table"),
                Value::from(table.utype.clone()),
                Value::from(table.description.clone()),
                Value::from(table.table_index),
            ]);

            for column in &table.columns {
                let is_indexed = column
                    .id
                    .as_deref()
                    .is_some_and(|id| indexed.contains(id));
                columns.push(vec![
                    Value::from(table_name.as_str()),
                    Value::from(column.name.as_str()),
                    Value::from(column.votable_datatype()),
                    Value::from(column.arraysize()),
                    Value::from(column.xtype()),
                    Value::from(column.length),
                    Value::from(column.description.clone()),
                    Value::from(column.utype.clone()),
                    Value::from(column.unit().map(str::to_string)),
                    Value::from(column.ucd.clone()),
                    flag(is_indexed),
                    flag(column.principal.unwrap_or(0) != 0),
                    flag(column.std.unwrap_or(0) != 0),
                    Value::from(column.column_index),
                ]);
            }

            for constraint in table.constraints.iter().filter(|c| c.is_foreign_key()) {
                let pairs: Vec<_> = constraint
                    .columns
                    .iter()
                    .zip(&constraint.referenced_columns)
                    .filter_map(|(from, to)| {
                        Some((columns_by_id.get(from.as_str())?, columns_by_id.get(to.as_str())?))
                    })
                    .collect();
                let Some((_, first_target)) = pairs.first() else {
                    continue;
                };
                let key_id = constraint.key_id();
                keys.push(vec![
                    Value::from(key_id),
                    Value::from(table_name.as_str()),
                    Value::from(doc.qualified_table_name(first_target.table)),
                    Value::from(constraint.utype.clone()),
                    Value::from(constraint.description.clone()),
                ]);
                for (from, to) in &pairs {
                    key_columns.push(vec![
                        Value::from(key_id),
                        Value::from(from.column.name.as_str()),
                        Value::from(to.column.name.as_str()),
                    ]);
                }
            }
        }

        let mgr = self.mgr;
        vec![
            RowBatch {
                table: mgr.table(TapTable::Schemas),
                rows: schemas,
            },
            RowBatch {
                table: mgr.table(TapTable::Tables),
                rows: tables,
            },
            RowBatch {
                table: mgr.table(TapTable::Columns),
                rows: columns,
            },
            RowBatch {
                table: mgr.table(TapTable::Keys),
                rows: keys,
            },
            RowBatch {
                table: mgr.table(TapTable::KeyColumns),
                rows: key_columns,
            },
        ]
    }

    /// Insert one document's rows in a single commit.
    pub async fn load<S>(&self, store: &mut S, doc: &SchemaDocument) -> TapResult<()>
    where
        S: TapStore + ?Sized,
    {
        let batches = self.rows(doc);
        let counts: Vec<usize> = batches.iter().map(|b| b.rows.len()).collect();
        store
            .insert_rows(self.mgr.namespace(), &batches)
            .await
            .map_err(during("loading schema document"))?;
        info!(
            schema = %doc.name,
            tables = counts[1],
            columns = counts[2],
            keys = counts[3],
            "schema loaded"
        );
        Ok(())
    }
}
