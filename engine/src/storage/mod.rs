//! The storage boundary.
//!
//! A [`StorageEngine`] opens named, versioned databases and hands out
//! [`Connection`]s to them. Each collection is a key/value table whose
//! values are JSON documents. Two engines ship with the crate:
//!
//! - [`MemoryEngine`] keeps everything in process and can simulate the
//!   awkward situations a real store runs into (collections vanishing,
//!   connections dying, older connections blocking an upgrade).
//! - [`SqliteEngine`] persists each database to its own SQLite file.

mod memory;
mod sqlite;

pub use memory::{MemoryEngine, OpenGate};
pub use sqlite::SqliteEngine;

use crate::{error::Result, CollectionDef, CollectionName, RecordKey, SchemaVersion};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;
use std::sync::Arc;

/// Lifecycle signals raised by a connection.
///
/// These describe expected contention between several contexts sharing one
/// database. They are reported, never thrown.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum StoreEvent {
    /// Another open connection prevents this one from upgrading.
    #[serde(rename_all = "camelCase")]
    UpgradeBlocked {
        old_version: SchemaVersion,
        new_version: SchemaVersion,
    },
    /// This connection prevents another context from upgrading.
    #[serde(rename_all = "camelCase")]
    Blocking { requested_version: SchemaVersion },
    /// The connection closed without being asked to.
    Terminated { reason: String },
}

/// Callback a connection uses to report lifecycle signals.
pub type EventSink = Arc<dyn Fn(StoreEvent) + Send + Sync>;

/// Opens databases.
#[async_trait]
pub trait StorageEngine: Send + Sync + 'static {
    /// Open the database `name`, creating it empty at version 0 if absent.
    ///
    /// Migration is the caller's job; the returned connection reports the
    /// stored version and the collections it knows about.
    async fn connect(&self, name: &str, events: EventSink) -> Result<Arc<dyn Connection>>;
}

/// A live connection to one database.
///
/// Data methods fail with `Error::CollectionNotFound` when the collection
/// does not physically exist, whatever the connection believes.
#[async_trait]
pub trait Connection: Send + Sync {
    /// Collections this connection believes exist, as of open or its last upgrade.
    fn known_collections(&self) -> BTreeSet<CollectionName>;

    fn has_collection(&self, name: &str) -> bool {
        self.known_collections().contains(name)
    }

    /// Schema version recorded by the database.
    async fn version(&self) -> Result<SchemaVersion>;

    /// Create the given collections (skipping any that exist) and stamp
    /// `target` as the stored version, as one unit.
    async fn upgrade(&self, target: SchemaVersion, create: &[CollectionDef]) -> Result<()>;

    async fn get(&self, collection: &str, key: &str) -> Result<Option<Value>>;

    /// Insert or overwrite.
    async fn put(&self, collection: &str, key: &str, value: Value) -> Result<()>;

    /// Remove `key`; absent keys are not an error.
    async fn delete(&self, collection: &str, key: &str) -> Result<()>;

    /// Every entry, ascending by key.
    async fn entries(&self, collection: &str) -> Result<Vec<(RecordKey, Value)>>;

    async fn count(&self, collection: &str) -> Result<usize>;

    async fn clear(&self, collection: &str) -> Result<()>;

    /// Clear the collection and insert `entries`. No reader observes the
    /// intermediate empty state.
    async fn replace_all(&self, collection: &str, entries: Vec<(RecordKey, Value)>) -> Result<()>;

    /// Close the connection. Later calls fail.
    async fn close(&self);
}
