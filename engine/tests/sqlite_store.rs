//! The offline store persisted to SQLite files.

use flora_engine::storage::{Connection, SqliteEngine};
use flora_engine::{
    Farmer, LocalStore, MarketRate, NewPendingEntry, OfflineStore, SchemaCatalog, FARMERS_CACHE,
    STORE_NAME,
};
use serde_json::json;
use tempfile::TempDir;

fn offline(dir: &TempDir) -> OfflineStore {
    let engine = SqliteEngine::new(dir.path());
    OfflineStore::new(LocalStore::new(engine, SchemaCatalog::flora()))
}

#[tokio::test]
async fn data_and_version_persist_across_reopen() {
    let dir = TempDir::new().unwrap();

    let first = offline(&dir);
    let id = first
        .pending_entries
        .add(NewPendingEntry::new("farmer-1", "2024-02-01", 12.5))
        .await
        .unwrap();
    first
        .market_rates
        .replace_all(vec![MarketRate::new("r1", 40.0).current()])
        .await
        .unwrap();
    first
        .sync_queue
        .enqueue(json!({"op": "create", "id": id.clone()}))
        .await
        .unwrap();
    first.store().close().await;

    let second = offline(&dir);
    let connection = second.store().open().await.unwrap();
    assert_eq!(connection.version().await.unwrap(), 4);

    let entry = second.pending_entries.get(&id).await.unwrap().unwrap();
    assert_eq!(entry.fields.quantity, 12.5);
    assert_eq!(second.market_rates.get_current().await.unwrap().unwrap().id, "r1");
    assert_eq!(second.sync_queue.list().await.unwrap()[0].action["id"], json!(id));
}

#[tokio::test]
async fn dropped_table_is_recreated_on_next_access() {
    let dir = TempDir::new().unwrap();
    let offline = offline(&dir);
    offline
        .farmers
        .replace_all(vec![Farmer::new("1", "Asha")])
        .await
        .unwrap();

    sqlx_drop_table(&dir, FARMERS_CACHE).await;

    assert!(offline.farmers.list().await.unwrap().is_empty());
    offline
        .farmers
        .replace_all(vec![Farmer::new("2", "Bala")])
        .await
        .unwrap();
    assert_eq!(offline.farmers.count().await.unwrap(), 1);
}

/// Drop a table through a second, independent SQLite connection.
async fn sqlx_drop_table(dir: &TempDir, table: &str) {
    use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};

    let path = SqliteEngine::new(dir.path()).path_for(STORE_NAME);
    let other = SqlitePoolOptions::new()
        .connect_with(SqliteConnectOptions::new().filename(path))
        .await
        .unwrap();
    sqlx::query(&format!("DROP TABLE \"{table}\""))
        .execute(&other)
        .await
        .unwrap();
    other.close().await;
}
