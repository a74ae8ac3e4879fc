//! In-process storage engine.

use super::{Connection, EventSink, StorageEngine, StoreEvent};
use crate::{error::Result, CollectionDef, CollectionName, Error, RecordKey, SchemaVersion};
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::Semaphore;

/// Stores databases in memory for the lifetime of the engine value.
///
/// Clones share the same databases, so two `LocalStore`s built from clones
/// of one engine behave like two tabs of the same application.
#[derive(Clone, Default)]
pub struct MemoryEngine {
    inner: Arc<EngineState>,
}

#[derive(Default)]
struct EngineState {
    databases: Mutex<HashMap<String, Arc<MemoryDatabase>>>,
    opens: AtomicUsize,
    pending_failures: AtomicUsize,
    next_connection_id: AtomicU64,
    gate: Mutex<Option<Arc<Semaphore>>>,
}

#[derive(Default)]
struct MemoryDatabase {
    state: RwLock<DatabaseState>,
    connections: Mutex<Vec<Weak<MemoryConnection>>>,
}

#[derive(Default)]
struct DatabaseState {
    version: SchemaVersion,
    collections: BTreeMap<CollectionName, BTreeMap<RecordKey, Value>>,
}

impl MemoryDatabase {
    fn live_connections(&self) -> Vec<Arc<MemoryConnection>> {
        let mut connections = self.connections.lock();
        connections.retain(|weak| weak.upgrade().is_some_and(|c| !c.is_closed()));
        connections.iter().filter_map(Weak::upgrade).collect()
    }
}

/// Holds pending opens until released.
pub struct OpenGate {
    semaphore: Arc<Semaphore>,
}

impl OpenGate {
    /// Let every held and future open proceed.
    pub fn release(self) {
        self.semaphore.close();
    }
}

impl MemoryEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of physical opens performed so far.
    pub fn open_count(&self) -> usize {
        self.inner.opens.load(Ordering::SeqCst)
    }

    /// Make the next open fail with a storage error.
    pub fn fail_next_open(&self) {
        self.inner.pending_failures.fetch_add(1, Ordering::SeqCst);
    }

    /// Hold every open until the returned gate is released.
    pub fn pause_opens(&self) -> OpenGate {
        let semaphore = Arc::new(Semaphore::new(0));
        *self.inner.gate.lock() = Some(semaphore.clone());
        OpenGate { semaphore }
    }

    /// Create (or overwrite) database `name` as an older build would have left it.
    pub fn seed(&self, name: &str, version: SchemaVersion, collections: &[&str]) {
        let database = self.database(name);
        let mut state = database.state.write();
        state.version = version;
        state.collections = collections
            .iter()
            .map(|c| (c.to_string(), BTreeMap::new()))
            .collect();
    }

    /// Write a raw value, bypassing every connection.
    pub fn put_raw(&self, name: &str, collection: &str, key: &str, value: Value) {
        let database = self.database(name);
        let mut state = database.state.write();
        state
            .collections
            .entry(collection.to_string())
            .or_default()
            .insert(key.to_string(), value);
    }

    /// Drop a collection behind the back of every open connection. Their
    /// known-collection sets are left stale.
    pub fn remove_collection(&self, name: &str, collection: &str) {
        self.database(name).state.write().collections.remove(collection);
    }

    /// Drop a collection and make every open connection aware it is gone.
    pub fn forget_collection(&self, name: &str, collection: &str) {
        let database = self.database(name);
        database.state.write().collections.remove(collection);
        for connection in database.live_connections() {
            connection.known.write().remove(collection);
        }
    }

    /// Close every open connection to `name` as if the engine had shut it down.
    pub fn terminate(&self, name: &str, reason: &str) {
        for connection in self.database(name).live_connections() {
            connection.closed.store(true, Ordering::SeqCst);
            (connection.events)(StoreEvent::Terminated {
                reason: reason.to_string(),
            });
        }
    }

    /// Stored version of `name`, if the database exists.
    pub fn version_of(&self, name: &str) -> Option<SchemaVersion> {
        let databases = self.inner.databases.lock();
        databases.get(name).map(|db| db.state.read().version)
    }

    /// Collections physically present in `name`.
    pub fn collections_of(&self, name: &str) -> BTreeSet<CollectionName> {
        let databases = self.inner.databases.lock();
        databases
            .get(name)
            .map(|db| db.state.read().collections.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Number of connections to `name` that are still open.
    pub fn live_connection_count(&self, name: &str) -> usize {
        self.database(name).live_connections().len()
    }

    fn database(&self, name: &str) -> Arc<MemoryDatabase> {
        self.inner
            .databases
            .lock()
            .entry(name.to_string())
            .or_default()
            .clone()
    }
}

#[async_trait]
impl StorageEngine for MemoryEngine {
    async fn connect(&self, name: &str, events: EventSink) -> Result<Arc<dyn Connection>> {
        self.inner.opens.fetch_add(1, Ordering::SeqCst);

        let gate = self.inner.gate.lock().clone();
        if let Some(gate) = gate {
            // Closed semaphore means the gate was released.
            let _ = gate.acquire().await;
        }

        let injected = self
            .inner
            .pending_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            return Err(Error::Storage(format!("injected open failure for {name}")));
        }

        let database = self.database(name);
        let known = database.state.read().collections.keys().cloned().collect();
        let connection = Arc::new(MemoryConnection {
            id: self.inner.next_connection_id.fetch_add(1, Ordering::SeqCst),
            database: database.clone(),
            known: RwLock::new(known),
            closed: AtomicBool::new(false),
            events,
        });
        database
            .connections
            .lock()
            .push(Arc::downgrade(&connection));

        Ok(connection)
    }
}

struct MemoryConnection {
    id: u64,
    database: Arc<MemoryDatabase>,
    known: RwLock<BTreeSet<CollectionName>>,
    closed: AtomicBool,
    events: EventSink,
}

impl MemoryConnection {
    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            return Err(Error::Storage("connection is closed".into()));
        }
        Ok(())
    }

    fn read<T>(
        &self,
        collection: &str,
        f: impl FnOnce(&BTreeMap<RecordKey, Value>) -> T,
    ) -> Result<T> {
        self.ensure_open()?;
        let state = self.database.state.read();
        let records = state
            .collections
            .get(collection)
            .ok_or_else(|| Error::CollectionNotFound(collection.to_string()))?;
        Ok(f(records))
    }

    fn write<T>(
        &self,
        collection: &str,
        f: impl FnOnce(&mut BTreeMap<RecordKey, Value>) -> T,
    ) -> Result<T> {
        self.ensure_open()?;
        let mut state = self.database.state.write();
        let records = state
            .collections
            .get_mut(collection)
            .ok_or_else(|| Error::CollectionNotFound(collection.to_string()))?;
        Ok(f(records))
    }

    /// Ask every other open connection to step aside; report if any stays.
    fn notify_blockers(&self, old_version: SchemaVersion, new_version: SchemaVersion) {
        let others: Vec<_> = self
            .database
            .live_connections()
            .into_iter()
            .filter(|c| c.id != self.id)
            .collect();

        for other in &others {
            (other.events)(StoreEvent::Blocking {
                requested_version: new_version,
            });
        }

        if others.iter().any(|c| !c.is_closed()) {
            (self.events)(StoreEvent::UpgradeBlocked {
                old_version,
                new_version,
            });
        }
    }
}

#[async_trait]
impl Connection for MemoryConnection {
    fn known_collections(&self) -> BTreeSet<CollectionName> {
        self.known.read().clone()
    }

    async fn version(&self) -> Result<SchemaVersion> {
        self.ensure_open()?;
        Ok(self.database.state.read().version)
    }

    async fn upgrade(&self, target: SchemaVersion, create: &[CollectionDef]) -> Result<()> {
        self.ensure_open()?;

        let stored = self.database.state.read().version;
        if target > stored {
            self.notify_blockers(stored, target);
        }

        let mut state = self.database.state.write();
        for def in create {
            state.collections.entry(def.name.clone()).or_default();
        }
        state.version = state.version.max(target);
        *self.known.write() = state.collections.keys().cloned().collect();

        Ok(())
    }

    async fn get(&self, collection: &str, key: &str) -> Result<Option<Value>> {
        self.read(collection, |records| records.get(key).cloned())
    }

    async fn put(&self, collection: &str, key: &str, value: Value) -> Result<()> {
        self.write(collection, |records| {
            records.insert(key.to_string(), value);
        })
    }

    async fn delete(&self, collection: &str, key: &str) -> Result<()> {
        self.write(collection, |records| {
            records.remove(key);
        })
    }

    async fn entries(&self, collection: &str) -> Result<Vec<(RecordKey, Value)>> {
        self.read(collection, |records| {
            records
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect()
        })
    }

    async fn count(&self, collection: &str) -> Result<usize> {
        self.read(collection, |records| records.len())
    }

    async fn clear(&self, collection: &str) -> Result<()> {
        self.write(collection, |records| records.clear())
    }

    async fn replace_all(&self, collection: &str, entries: Vec<(RecordKey, Value)>) -> Result<()> {
        // Single write lock: readers see the old or the new contents only.
        self.write(collection, |records| {
            *records = entries.into_iter().collect();
        })
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn quiet() -> EventSink {
        Arc::new(|_| {})
    }

    fn recording() -> (EventSink, Arc<Mutex<Vec<StoreEvent>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink_seen = seen.clone();
        let sink: EventSink = Arc::new(move |event| sink_seen.lock().push(event));
        (sink, seen)
    }

    #[tokio::test]
    async fn new_database_starts_empty_at_version_zero() {
        let engine = MemoryEngine::new();
        let conn = engine.connect("db", quiet()).await.unwrap();

        assert_eq!(conn.version().await.unwrap(), 0);
        assert!(conn.known_collections().is_empty());
        assert_eq!(engine.open_count(), 1);
    }

    #[tokio::test]
    async fn upgrade_creates_collections_and_stamps_version() {
        let engine = MemoryEngine::new();
        let conn = engine.connect("db", quiet()).await.unwrap();

        conn.upgrade(2, &[CollectionDef::new("a", 1), CollectionDef::new("b", 2)])
            .await
            .unwrap();

        assert_eq!(conn.version().await.unwrap(), 2);
        assert!(conn.has_collection("a"));
        assert!(conn.has_collection("b"));
        assert_eq!(engine.version_of("db"), Some(2));
    }

    #[tokio::test]
    async fn upgrade_keeps_existing_data() {
        let engine = MemoryEngine::new();
        let conn = engine.connect("db", quiet()).await.unwrap();
        conn.upgrade(1, &[CollectionDef::new("a", 1)]).await.unwrap();
        conn.put("a", "k", json!(1)).await.unwrap();

        conn.upgrade(2, &[CollectionDef::new("a", 1), CollectionDef::new("b", 2)])
            .await
            .unwrap();

        assert_eq!(conn.get("a", "k").await.unwrap(), Some(json!(1)));
    }

    #[tokio::test]
    async fn missing_collection_is_reported_as_drift() {
        let engine = MemoryEngine::new();
        let conn = engine.connect("db", quiet()).await.unwrap();

        let err = conn.get("nope", "k").await.unwrap_err();
        assert_eq!(err, Error::CollectionNotFound("nope".into()));
    }

    #[tokio::test]
    async fn entries_are_key_ordered() {
        let engine = MemoryEngine::new();
        let conn = engine.connect("db", quiet()).await.unwrap();
        conn.upgrade(1, &[CollectionDef::new("a", 1)]).await.unwrap();

        for key in ["c", "a", "b"] {
            conn.put("a", key, json!(key)).await.unwrap();
        }

        let keys: Vec<_> = conn
            .entries("a")
            .await
            .unwrap()
            .into_iter()
            .map(|(k, _)| k)
            .collect();
        assert_eq!(keys, vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn replace_all_discards_previous_contents() {
        let engine = MemoryEngine::new();
        let conn = engine.connect("db", quiet()).await.unwrap();
        conn.upgrade(1, &[CollectionDef::new("a", 1)]).await.unwrap();
        conn.put("a", "old", json!(0)).await.unwrap();

        conn.replace_all("a", vec![("x".into(), json!(1)), ("y".into(), json!(2))])
            .await
            .unwrap();

        assert_eq!(conn.count("a").await.unwrap(), 2);
        assert_eq!(conn.get("a", "old").await.unwrap(), None);
    }

    #[tokio::test]
    async fn remove_collection_leaves_known_set_stale() {
        let engine = MemoryEngine::new();
        let conn = engine.connect("db", quiet()).await.unwrap();
        conn.upgrade(1, &[CollectionDef::new("a", 1)]).await.unwrap();

        engine.remove_collection("db", "a");

        assert!(conn.has_collection("a"));
        assert!(matches!(
            conn.count("a").await,
            Err(Error::CollectionNotFound(_))
        ));
    }

    #[tokio::test]
    async fn forget_collection_updates_known_set() {
        let engine = MemoryEngine::new();
        let conn = engine.connect("db", quiet()).await.unwrap();
        conn.upgrade(1, &[CollectionDef::new("a", 1)]).await.unwrap();

        engine.forget_collection("db", "a");

        assert!(!conn.has_collection("a"));
    }

    #[tokio::test]
    async fn terminate_closes_and_signals() {
        let engine = MemoryEngine::new();
        let (sink, seen) = recording();
        let conn = engine.connect("db", sink).await.unwrap();

        engine.terminate("db", "storage reset");

        assert!(matches!(conn.version().await, Err(Error::Storage(_))));
        assert_eq!(
            seen.lock().as_slice(),
            &[StoreEvent::Terminated {
                reason: "storage reset".into()
            }]
        );
        assert_eq!(engine.live_connection_count("db"), 0);
    }

    #[tokio::test]
    async fn upgrade_with_older_connection_open_signals_both_sides() {
        let engine = MemoryEngine::new();
        let (old_sink, old_seen) = recording();
        let (new_sink, new_seen) = recording();

        let old = engine.connect("db", old_sink).await.unwrap();
        old.upgrade(1, &[CollectionDef::new("a", 1)]).await.unwrap();

        let new = engine.connect("db", new_sink).await.unwrap();
        new.upgrade(2, &[CollectionDef::new("b", 2)]).await.unwrap();

        assert_eq!(
            old_seen.lock().as_slice(),
            &[StoreEvent::Blocking {
                requested_version: 2
            }]
        );
        assert_eq!(
            new_seen.lock().as_slice(),
            &[StoreEvent::UpgradeBlocked {
                old_version: 1,
                new_version: 2
            }]
        );
    }

    #[tokio::test]
    async fn closed_connections_do_not_block() {
        let engine = MemoryEngine::new();
        let (new_sink, new_seen) = recording();

        let old = engine.connect("db", quiet()).await.unwrap();
        old.close().await;

        let new = engine.connect("db", new_sink).await.unwrap();
        new.upgrade(1, &[CollectionDef::new("a", 1)]).await.unwrap();

        assert!(new_seen.lock().is_empty());
    }

    #[tokio::test]
    async fn injected_failure_applies_once() {
        let engine = MemoryEngine::new();
        engine.fail_next_open();

        assert!(engine.connect("db", quiet()).await.is_err());
        assert!(engine.connect("db", quiet()).await.is_ok());
        assert_eq!(engine.open_count(), 2);
    }

    #[tokio::test]
    async fn seed_simulates_older_store() {
        let engine = MemoryEngine::new();
        engine.seed("db", 3, &["a", "c"]);

        let conn = engine.connect("db", quiet()).await.unwrap();
        assert_eq!(conn.version().await.unwrap(), 3);
        assert_eq!(
            conn.known_collections(),
            ["a", "c"].iter().map(|s| s.to_string()).collect()
        );
    }
}
