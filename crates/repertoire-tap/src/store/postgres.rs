//! PostgreSQL `TapStore` backend.
//!
//! Holds one `tokio_postgres::Client`. Multi-statement operations run in an
//! explicit transaction; schema renames are transactional in PostgreSQL, so
//! the whole production/staging rotation commits or rolls back as one unit.

use async_trait::async_trait;
use tokio_postgres::types::ToSql;
use tokio_postgres::{Client, NoTls};
use tracing::{debug, error};

use super::{RowBatch, StoreResult, TableSpec, TapStore, ViewSpec, qualified, quote_ident};
use crate::ledger::{SchemaVersion, VERSION_TABLE};

/// Advisory lock key serializing TAP_SCHEMA updates on one database.
pub const UPDATE_LOCK_KEY: i64 = 0x7461_705f_7363_6865;

pub struct PgTapStore {
    client: Client,
}

impl PgTapStore {
    /// Connect without TLS and spawn the connection task.
    pub async fn connect(config: &tokio_postgres::Config) -> StoreResult<Self> {
        let (client, connection) = config.connect(NoTls).await?;
        tokio::spawn(async move {
            if let Err(e) = connection.await {
                error!(error = %e, "postgres connection terminated");
            }
        });
        Ok(Self::from_client(client))
    }

    pub fn from_client(client: Client) -> Self {
        Self { client }
    }

    pub fn client(&self) -> &Client {
        &self.client
    }
}

fn create_table_sql(namespace: &str, table: &TableSpec) -> String {
    let mut parts: Vec<String> = table
        .columns
        .iter()
        .map(|c| {
            let null = if c.nullable { "" } else { " NOT NULL" };
            format!("{} {}{null}", quote_ident(&c.name), c.ty.ddl())
        })
        .collect();
    if !table.primary_key.is_empty() {
        let keys: Vec<String> = table.primary_key.iter().map(|k| quote_ident(k)).collect();
        parts.push(format!("PRIMARY KEY ({})", keys.join(", ")));
    }
    format!(
        "CREATE TABLE IF NOT EXISTS {} ({})",
        qualified(namespace, &table.name),
        parts.join(", ")
    )
}

fn insert_sql(namespace: &str, table: &TableSpec) -> String {
    let columns: Vec<String> = table.columns.iter().map(|c| quote_ident(&c.name)).collect();
    let params: Vec<String> = (1..=table.columns.len()).map(|i| format!("${i}")).collect();
    format!(
        "INSERT INTO {} ({}) VALUES ({})",
        qualified(namespace, &table.name),
        columns.join(", "),
        params.join(", ")
    )
}

fn create_view_sql(namespace: &str, view: &ViewSpec) -> String {
    format!(
        "CREATE OR REPLACE VIEW {} AS SELECT * FROM {}",
        qualified(namespace, &view.view),
        qualified(namespace, &view.table)
    )
}

fn version_table_sql(namespace: &str) -> String {
    format!(
        "CREATE TABLE IF NOT EXISTS {} (version TEXT PRIMARY KEY, loaded_at TIMESTAMPTZ NOT NULL)",
        qualified(namespace, VERSION_TABLE)
    )
}

#[async_trait]
impl TapStore for PgTapStore {
    async fn try_lock(&mut self) -> StoreResult<bool> {
        let row = self
            .client
            .query_one("SELECT pg_try_advisory_lock($1)", &[&UPDATE_LOCK_KEY])
            .await?;
        Ok(row.get(0))
    }

    async fn unlock(&mut self) -> StoreResult<()> {
        self.client
            .execute("SELECT pg_advisory_unlock($1)", &[&UPDATE_LOCK_KEY])
            .await?;
        Ok(())
    }

    async fn recreate_namespace(&mut self, namespace: &str) -> StoreResult<()> {
        let ns = quote_ident(namespace);
        let tx = self.client.transaction().await?;
        tx.batch_execute(&format!("DROP SCHEMA IF EXISTS {ns} CASCADE; CREATE SCHEMA {ns}"))
            .await?;
        tx.commit().await?;
        debug!(namespace, "namespace recreated");
        Ok(())
    }

    async fn namespace_exists(&mut self, namespace: &str) -> StoreResult<bool> {
        let row = self
            .client
            .query_one(
                "SELECT EXISTS (SELECT 1 FROM pg_namespace WHERE nspname = $1)",
                &[&namespace],
            )
            .await?;
        Ok(row.get(0))
    }

    async fn create_table(&mut self, namespace: &str, table: &TableSpec) -> StoreResult<()> {
        self.client
            .batch_execute(&create_table_sql(namespace, table))
            .await?;
        Ok(())
    }

    async fn insert_rows(&mut self, namespace: &str, batches: &[RowBatch<'_>]) -> StoreResult<()> {
        let tx = self.client.transaction().await?;
        for batch in batches {
            if batch.rows.is_empty() {
                continue;
            }
            let stmt = tx.prepare(&insert_sql(namespace, batch.table)).await?;
            for row in &batch.rows {
                let params: Vec<&(dyn ToSql + Sync)> =
                    row.iter().map(|v| v as &(dyn ToSql + Sync)).collect();
                tx.execute(&stmt, &params).await?;
            }
            debug!(table = %batch.table.name, rows = batch.rows.len(), "rows inserted");
        }
        tx.commit().await?;
        Ok(())
    }

    async fn create_views(&mut self, namespace: &str, views: &[ViewSpec]) -> StoreResult<()> {
        let tx = self.client.transaction().await?;
        for view in views {
            tx.batch_execute(&create_view_sql(namespace, view)).await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn upsert_version(&mut self, namespace: &str, version: &str) -> StoreResult<SchemaVersion> {
        let tx = self.client.transaction().await?;
        tx.batch_execute(&version_table_sql(namespace)).await?;
        let row = tx
            .query_one(
                &format!(
                    "INSERT INTO {} (version, loaded_at) VALUES ($1, clock_timestamp()) \
                     ON CONFLICT (version) DO UPDATE SET loaded_at = EXCLUDED.loaded_at \
                     RETURNING version, loaded_at",
                    qualified(namespace, VERSION_TABLE)
                ),
                &[&version],
            )
            .await?;
        tx.commit().await?;
        Ok(SchemaVersion {
            version: row.get(0),
            loaded_at: row.get(1),
        })
    }

    async fn current_version(&mut self, namespace: &str) -> StoreResult<Option<SchemaVersion>> {
        let table = qualified(namespace, VERSION_TABLE);
        let exists: bool = self
            .client
            .query_one("SELECT to_regclass($1) IS NOT NULL", &[&table])
            .await?
            .get(0);
        if !exists {
            return Ok(None);
        }
        let row = self
            .client
            .query_opt(
                &format!("SELECT version, loaded_at FROM {table} ORDER BY loaded_at DESC LIMIT 1"),
                &[],
            )
            .await?;
        Ok(row.map(|r| SchemaVersion {
            version: r.get(0),
            loaded_at: r.get(1),
        }))
    }

    async fn column_values(
        &mut self,
        namespace: &str,
        relation: &str,
        column: &str,
    ) -> StoreResult<Vec<String>> {
        let col = quote_ident(column);
        let rows = self
            .client
            .query(
                &format!(
                    "SELECT {col}::text FROM {} WHERE {col} IS NOT NULL",
                    qualified(namespace, relation)
                ),
                &[],
            )
            .await?;
        Ok(rows.iter().map(|r| r.get::<_, String>(0)).collect())
    }

    async fn rename_namespaces(&mut self, renames: &[(&str, &str)]) -> StoreResult<()> {
        let tx = self.client.transaction().await?;
        for (from, to) in renames {
            tx.batch_execute(&format!(
                "ALTER SCHEMA {} RENAME TO {}",
                quote_ident(from),
                quote_ident(to)
            ))
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{ColumnSpec, SqlType};

    fn spec() -> TableSpec {
        TableSpec {
            name: "key_columns11".to_string(),
            columns: vec![
                ColumnSpec {
                    name: "key_id".to_string(),
                    ty: SqlType::Text,
                    nullable: false,
                },
                ColumnSpec {
                    name: "from_column".to_string(),
                    ty: SqlType::Text,
                    nullable: false,
                },
                ColumnSpec {
                    name: "note".to_string(),
                    ty: SqlType::Integer,
                    nullable: true,
                },
            ],
            primary_key: vec!["key_id".to_string(), "from_column".to_string()],
        }
    }

    #[test]
    fn create_table_statement() {
        assert_eq!(
            create_table_sql("tap_schema_staging", &spec()),
            "CREATE TABLE IF NOT EXISTS \"tap_schema_staging\".\"key_columns11\" \
             (\"key_id\" TEXT NOT NULL, \"from_column\" TEXT NOT NULL, \"note\" INTEGER, \
             PRIMARY KEY (\"key_id\", \"from_column\"))"
        );
    }

    #[test]
    fn insert_statement_binds_every_column() {
        assert_eq!(
            insert_sql("s", &spec()),
            "INSERT INTO \"s\".\"key_columns11\" (\"key_id\", \"from_column\", \"note\") VALUES ($1, $2, $3)"
        );
    }

    #[test]
    fn view_statement_aliases_table() {
        let view = ViewSpec {
            view: "schemas".to_string(),
            table: "schemas11".to_string(),
        };
        assert_eq!(
            create_view_sql("s", &view),
            "CREATE OR REPLACE VIEW \"s\".\"schemas\" AS SELECT * FROM \"s\".\"schemas11\""
        );
    }

    #[test]
    fn version_table_lives_in_namespace() {
        assert!(version_table_sql("tap_schema_staging").contains("\"tap_schema_staging\".\"version\""));
    }
}
