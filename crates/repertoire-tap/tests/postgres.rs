//! PostgreSQL backend tests.
//!
//! Run with `--features integration` and `REPERTOIRE_TEST_DATABASE_URL`
//! pointing at a disposable database. The tests drop and recreate the
//! TAP_SCHEMA namespaces.

#![cfg(feature = "integration")]

mod common;

use common::{LocalSource, plan_for};
use repertoire_tap::{
    PRODUCTION_SCHEMA, PgTapStore, Promotion, STAGING_SCHEMA, TapSchemaUpdater, TapStore,
    VersionLedger,
};
use tokio::sync::Mutex;

/// Tests share one database; run them one at a time.
static DATABASE: Mutex<()> = Mutex::const_new(());

async fn connect() -> PgTapStore {
    let url = std::env::var("REPERTOIRE_TEST_DATABASE_URL")
        .expect("REPERTOIRE_TEST_DATABASE_URL must be set for integration tests");
    let config: tokio_postgres::Config = url.parse().unwrap();
    PgTapStore::connect(&config).await.unwrap()
}

async fn clean(store: &PgTapStore) {
    store
        .client()
        .batch_execute(
            "DROP SCHEMA IF EXISTS tap_schema CASCADE;
             DROP SCHEMA IF EXISTS tap_schema_staging CASCADE;
             DROP SCHEMA IF EXISTS tap_schema_temp CASCADE;",
        )
        .await
        .unwrap();
}

async fn schema_names(store: &PgTapStore, namespace: &str) -> Vec<String> {
    store
        .client()
        .query(&format!("SELECT schema_name FROM \"{namespace}\".schemas ORDER BY schema_name"), &[])
        .await
        .unwrap()
        .iter()
        .map(|r| r.get(0))
        .collect()
}

#[tokio::test]
async fn full_runs_deploy_then_rotate() {
    let _guard = DATABASE.lock().await;
    let store = connect().await;
    clean(&store).await;

    let mut first = TapSchemaUpdater::new(store, LocalSource::new(&["a"]), plan_for("v1", &["a"]));
    let report = first.update(None).await.unwrap();
    assert_eq!(report.promotion, Promotion::FirstDeployment);
    let store = first.into_store();
    assert_eq!(schema_names(&store, PRODUCTION_SCHEMA).await, vec!["a", "tap_schema"]);

    let mut second = TapSchemaUpdater::new(store, LocalSource::new(&["a", "b"]), plan_for("v2", &["a", "b"]));
    let report = second.update(None).await.unwrap();
    assert_eq!(report.promotion, Promotion::Swapped);
    let mut store = second.into_store();

    assert_eq!(schema_names(&store, PRODUCTION_SCHEMA).await, vec!["a", "b", "tap_schema"]);
    assert_eq!(schema_names(&store, STAGING_SCHEMA).await, vec!["a", "tap_schema"]);
    let current = VersionLedger::new(PRODUCTION_SCHEMA).read(&mut store).await.unwrap();
    assert_eq!(current.unwrap().version, "v2");
    assert!(!store.namespace_exists("tap_schema_temp").await.unwrap());

    clean(&store).await;
}

#[tokio::test]
async fn version_upsert_refreshes_timestamp() {
    let _guard = DATABASE.lock().await;
    let mut store = connect().await;
    clean(&store).await;
    store.recreate_namespace(STAGING_SCHEMA).await.unwrap();

    let ledger = VersionLedger::new(STAGING_SCHEMA);
    let first = ledger.record(&mut store, "v1").await.unwrap();
    let second = ledger.record(&mut store, "v1").await.unwrap();
    assert!(second.loaded_at > first.loaded_at);

    let count: i64 = store
        .client()
        .query_one("SELECT count(*) FROM tap_schema_staging.version", &[])
        .await
        .unwrap()
        .get(0);
    assert_eq!(count, 1);

    clean(&store).await;
}

#[tokio::test]
async fn advisory_lock_is_exclusive() {
    let _guard = DATABASE.lock().await;
    let mut first = connect().await;
    let mut second = connect().await;

    assert!(first.try_lock().await.unwrap());
    assert!(!second.try_lock().await.unwrap());
    first.unlock().await.unwrap();
    assert!(second.try_lock().await.unwrap());
    second.unlock().await.unwrap();
}

#[tokio::test]
async fn failed_rename_rolls_back_whole_swap() {
    let _guard = DATABASE.lock().await;
    let mut store = connect().await;
    clean(&store).await;
    store.recreate_namespace(PRODUCTION_SCHEMA).await.unwrap();

    // Staging is missing, so the second rename fails.
    let err = store
        .rename_namespaces(&[
            (PRODUCTION_SCHEMA, "tap_schema_temp"),
            (STAGING_SCHEMA, PRODUCTION_SCHEMA),
        ])
        .await;
    assert!(err.is_err());
    assert!(store.namespace_exists(PRODUCTION_SCHEMA).await.unwrap());
    assert!(!store.namespace_exists("tap_schema_temp").await.unwrap());

    clean(&store).await;
}
