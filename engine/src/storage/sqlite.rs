//! SQLite storage engine.
//!
//! One file per database name under the engine's data directory. Each
//! collection is a table `(key TEXT PRIMARY KEY, value TEXT NOT NULL)`
//! holding JSON, and the schema version is SQLite's own `user_version`.
//!
//! SQLite has no channel to ask other connections to step aside, so this
//! engine never emits [`StoreEvent::Blocking`]. An upgrade that cannot take
//! the write lock reports [`StoreEvent::UpgradeBlocked`] on its own
//! connection instead; peers are not notified.

use super::{Connection, EventSink, StorageEngine, StoreEvent};
use crate::{error::Result, CollectionDef, CollectionName, Error, RecordKey, SchemaVersion};
use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::Value;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// How long a statement waits on a lock held by another process.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Opens SQLite-backed databases under a directory.
#[derive(Debug, Clone)]
pub struct SqliteEngine {
    data_dir: PathBuf,
}

impl SqliteEngine {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
        }
    }

    /// File backing database `name`.
    pub fn path_for(&self, name: &str) -> PathBuf {
        self.data_dir.join(format!("{name}.db"))
    }
}

#[async_trait]
impl StorageEngine for SqliteEngine {
    async fn connect(&self, name: &str, events: EventSink) -> Result<Arc<dyn Connection>> {
        tokio::fs::create_dir_all(&self.data_dir).await.map_err(|e| {
            Error::Storage(format!(
                "failed to create data directory {}: {e}",
                self.data_dir.display()
            ))
        })?;

        let path = self.path_for(name);
        let options = SqliteConnectOptions::new()
            .filename(&path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(BUSY_TIMEOUT);

        // One connection: the store is a single writer and SQLite would
        // serialize writes anyway.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .map_err(|e| Error::Storage(format!("failed to open {}: {e}", path.display())))?;

        let connection = SqliteConnection {
            pool,
            known: RwLock::new(BTreeSet::new()),
            closed: AtomicBool::new(false),
            events,
        };
        connection.refresh_known().await?;

        tracing::debug!(path = %path.display(), "opened sqlite store");
        Ok(Arc::new(connection))
    }
}

struct SqliteConnection {
    pool: SqlitePool,
    known: RwLock<BTreeSet<CollectionName>>,
    closed: AtomicBool,
    events: EventSink,
}

impl SqliteConnection {
    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::Storage("connection is closed".into()));
        }
        Ok(())
    }

    async fn refresh_known(&self) -> Result<()> {
        let names: Vec<String> = sqlx::query_scalar(
            "SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%'",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| self.map_err(None, e))?;

        *self.known.write() = names.into_iter().collect();
        Ok(())
    }

    /// Translate a driver error, raising `Terminated` when the pool went away
    /// without `close()` being called.
    fn map_err(&self, collection: Option<&str>, err: sqlx::Error) -> Error {
        match &err {
            sqlx::Error::Database(db) if db.message().contains("no such table") => {
                Error::CollectionNotFound(collection.unwrap_or_default().to_string())
            }
            sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
                if !self.closed.swap(true, Ordering::SeqCst) {
                    (self.events)(StoreEvent::Terminated {
                        reason: err.to_string(),
                    });
                }
                Error::Storage(err.to_string())
            }
            _ => Error::Storage(err.to_string()),
        }
    }
}

fn is_busy(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.message().contains("database is locked"))
}

fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

fn create_table_sql(def: &CollectionDef) -> String {
    format!(
        "CREATE TABLE IF NOT EXISTS {} (key TEXT PRIMARY KEY NOT NULL, value TEXT NOT NULL)",
        quote_ident(&def.name)
    )
}

fn create_index_sql(def: &CollectionDef) -> Vec<String> {
    def.indexes
        .iter()
        .map(|index| {
            format!(
                "CREATE INDEX IF NOT EXISTS {} ON {} (json_extract(value, '$.{}'))",
                quote_ident(&format!("{}__{}", def.name, index.name)),
                quote_ident(&def.name),
                index.field.replace('\'', "''")
            )
        })
        .collect()
}

fn decode(raw: &str) -> Result<Value> {
    Ok(serde_json::from_str(raw)?)
}

#[async_trait]
impl Connection for SqliteConnection {
    fn known_collections(&self) -> BTreeSet<CollectionName> {
        self.known.read().clone()
    }

    async fn version(&self) -> Result<SchemaVersion> {
        self.ensure_open()?;
        let version: i64 = sqlx::query_scalar("PRAGMA user_version")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| self.map_err(None, e))?;
        Ok(version.max(0) as SchemaVersion)
    }

    async fn upgrade(&self, target: SchemaVersion, create: &[CollectionDef]) -> Result<()> {
        self.ensure_open()?;
        let stored = self.version().await?;

        let result: std::result::Result<(), sqlx::Error> = async {
            let mut tx = self.pool.begin().await?;
            for def in create {
                sqlx::query(&create_table_sql(def)).execute(&mut *tx).await?;
                for sql in create_index_sql(def) {
                    sqlx::query(&sql).execute(&mut *tx).await?;
                }
            }
            if target > stored {
                // PRAGMA does not take bound parameters.
                sqlx::query(&format!("PRAGMA user_version = {target}"))
                    .execute(&mut *tx)
                    .await?;
            }
            tx.commit().await
        }
        .await;

        if let Err(err) = result {
            if is_busy(&err) {
                (self.events)(StoreEvent::UpgradeBlocked {
                    old_version: stored,
                    new_version: target,
                });
            }
            return Err(self.map_err(None, err));
        }

        self.refresh_known().await
    }

    async fn get(&self, collection: &str, key: &str) -> Result<Option<Value>> {
        self.ensure_open()?;
        let raw: Option<String> = sqlx::query_scalar(&format!(
            "SELECT value FROM {} WHERE key = ?",
            quote_ident(collection)
        ))
        .bind(key)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| self.map_err(Some(collection), e))?;

        raw.as_deref().map(decode).transpose()
    }

    async fn put(&self, collection: &str, key: &str, value: Value) -> Result<()> {
        self.ensure_open()?;
        let raw = serde_json::to_string(&value)?;
        sqlx::query(&format!(
            "INSERT INTO {} (key, value) VALUES (?, ?) \
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            quote_ident(collection)
        ))
        .bind(key)
        .bind(raw)
        .execute(&self.pool)
        .await
        .map_err(|e| self.map_err(Some(collection), e))?;
        Ok(())
    }

    async fn delete(&self, collection: &str, key: &str) -> Result<()> {
        self.ensure_open()?;
        sqlx::query(&format!(
            "DELETE FROM {} WHERE key = ?",
            quote_ident(collection)
        ))
        .bind(key)
        .execute(&self.pool)
        .await
        .map_err(|e| self.map_err(Some(collection), e))?;
        Ok(())
    }

    async fn entries(&self, collection: &str) -> Result<Vec<(RecordKey, Value)>> {
        self.ensure_open()?;
        let rows: Vec<(String, String)> = sqlx::query_as(&format!(
            "SELECT key, value FROM {} ORDER BY key ASC",
            quote_ident(collection)
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| self.map_err(Some(collection), e))?;

        rows.into_iter()
            .map(|(key, raw)| Ok::<_, Error>((key, decode(&raw)?)))
            .collect()
    }

    async fn count(&self, collection: &str) -> Result<usize> {
        self.ensure_open()?;
        let count: i64 = sqlx::query_scalar(&format!(
            "SELECT COUNT(*) FROM {}",
            quote_ident(collection)
        ))
        .fetch_one(&self.pool)
        .await
        .map_err(|e| self.map_err(Some(collection), e))?;
        Ok(count.max(0) as usize)
    }

    async fn clear(&self, collection: &str) -> Result<()> {
        self.ensure_open()?;
        sqlx::query(&format!("DELETE FROM {}", quote_ident(collection)))
            .execute(&self.pool)
            .await
            .map_err(|e| self.map_err(Some(collection), e))?;
        Ok(())
    }

    async fn replace_all(&self, collection: &str, entries: Vec<(RecordKey, Value)>) -> Result<()> {
        self.ensure_open()?;
        let table = quote_ident(collection);
        let rows = entries
            .into_iter()
            .map(|(key, value)| Ok::<_, Error>((key, serde_json::to_string(&value)?)))
            .collect::<Result<Vec<_>>>()?;

        let result: std::result::Result<(), sqlx::Error> = async {
            let mut tx = self.pool.begin().await?;
            sqlx::query(&format!("DELETE FROM {table}"))
                .execute(&mut *tx)
                .await?;
            let insert = format!(
                "INSERT INTO {table} (key, value) VALUES (?, ?) \
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value"
            );
            for (key, raw) in rows {
                sqlx::query(&insert)
                    .bind(key)
                    .bind(raw)
                    .execute(&mut *tx)
                    .await?;
            }
            tx.commit().await
        }
        .await;

        result.map_err(|e| self.map_err(Some(collection), e))
    }

    async fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.pool.close().await;
        }
    }
}
