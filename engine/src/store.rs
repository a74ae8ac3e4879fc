//! LocalStore - owner of the single connection to the offline database.
//!
//! The store opens the database lazily, migrates it to the catalog's
//! version, and hands the same connection to every caller. Concurrent
//! callers that arrive before the first open finishes all await that one
//! open: the in-flight initialization is memoized as a shared future rather
//! than guarded by a lock.

use crate::storage::{Connection, EventSink, StorageEngine, StoreEvent};
use crate::{error::Result, Error, SchemaCatalog, STORE_NAME};
use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::broadcast;

/// Capacity of the lifecycle event channel.
const EVENT_CAPACITY: usize = 64;

type OpenFuture = Shared<BoxFuture<'static, Result<Arc<dyn Connection>>>>;

/// The memoized open, tagged so stale signals cannot clear a newer one.
struct PendingOpen {
    generation: u64,
    future: OpenFuture,
}

struct StoreInner {
    engine: Arc<dyn StorageEngine>,
    catalog: Arc<SchemaCatalog>,
    name: String,
    slot: Mutex<Option<PendingOpen>>,
    /// Discarded connections still in use by in-flight calls
    retired: Mutex<Vec<Arc<dyn Connection>>>,
    next_generation: AtomicU64,
    events: broadcast::Sender<StoreEvent>,
}

impl StoreInner {
    /// Forget the memoized open if it is still the one from `generation`.
    fn invalidate(&self, generation: u64) -> Option<PendingOpen> {
        let mut slot = self.slot.lock();
        match slot.as_ref() {
            Some(pending) if pending.generation == generation => slot.take(),
            _ => None,
        }
    }

    fn handle_event(&self, generation: u64, event: StoreEvent) {
        match &event {
            StoreEvent::UpgradeBlocked {
                old_version,
                new_version,
            } => {
                tracing::warn!(
                    store = %self.name,
                    old_version,
                    new_version,
                    "schema upgrade blocked by another open connection"
                );
            }
            StoreEvent::Blocking { requested_version } => {
                tracing::warn!(
                    store = %self.name,
                    requested_version,
                    "this connection is blocking a schema upgrade elsewhere"
                );
            }
            StoreEvent::Terminated { reason } => {
                tracing::warn!(store = %self.name, %reason, "connection terminated unexpectedly");
                self.invalidate(generation);
            }
        }

        // No subscribers is fine.
        let _ = self.events.send(event);
    }
}

/// Shared handle to the offline database. Cheap to clone.
#[derive(Clone)]
pub struct LocalStore {
    inner: Arc<StoreInner>,
}

impl LocalStore {
    /// Create a store for the fixed ledger database name.
    pub fn new(engine: impl StorageEngine, catalog: SchemaCatalog) -> Self {
        Self::with_name(Arc::new(engine), catalog, STORE_NAME)
    }

    /// Create a store over an already shared engine and a custom name.
    pub fn with_name(
        engine: Arc<dyn StorageEngine>,
        catalog: SchemaCatalog,
        name: impl Into<String>,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            inner: Arc::new(StoreInner {
                engine,
                catalog: Arc::new(catalog),
                name: name.into(),
                slot: Mutex::new(None),
                retired: Mutex::new(Vec::new()),
                next_generation: AtomicU64::new(1),
                events,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn catalog(&self) -> &SchemaCatalog {
        &self.inner.catalog
    }

    /// Receive lifecycle signals (blocked, blocking, terminated).
    pub fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.inner.events.subscribe()
    }

    /// Whether a connection is open and ready.
    pub fn is_open(&self) -> bool {
        self.inner
            .slot
            .lock()
            .as_ref()
            .is_some_and(|pending| matches!(pending.future.peek(), Some(Ok(_))))
    }

    /// Return the shared connection, opening and migrating it first if needed.
    ///
    /// A failed open is not memoized: the next call starts from scratch.
    pub async fn open(&self) -> Result<Arc<dyn Connection>> {
        self.checkout().await.map(|(_, connection)| connection)
    }

    /// Like [`open`](Self::open), also returning the generation the
    /// connection belongs to.
    pub(crate) async fn checkout(&self) -> Result<(u64, Arc<dyn Connection>)> {
        let (generation, future) = self.pending_open();
        match future.await {
            Ok(connection) => Ok((generation, connection)),
            Err(err) => {
                self.inner.invalidate(generation);
                Err(err)
            }
        }
    }

    /// Stop handing out the connection from `generation`.
    ///
    /// Callers still holding it keep a working connection; it is closed by
    /// [`close_retired`](Self::close_retired) once the last of them is done.
    /// A newer generation is left alone.
    pub(crate) fn discard(&self, generation: u64) {
        let Some(pending) = self.inner.invalidate(generation) else {
            return;
        };
        if let Some(Ok(connection)) = pending.future.peek() {
            self.inner.retired.lock().push(connection.clone());
        }
    }

    /// Close discarded connections nobody holds any more.
    pub(crate) async fn close_retired(&self) {
        let idle: Vec<_> = {
            let mut retired = self.inner.retired.lock();
            let (idle, busy): (Vec<_>, Vec<_>) = retired
                .drain(..)
                .partition(|connection| Arc::strong_count(connection) == 1);
            *retired = busy;
            idle
        };
        for connection in idle {
            connection.close().await;
        }
    }

    /// Drop the cached connection and close it. The next `open()` reconnects.
    ///
    /// An open still in flight is awaited and its connection closed as soon
    /// as it resolves. This is also the response to a `Blocking` signal.
    pub async fn close(&self) {
        let taken = self.inner.slot.lock().take();
        if let Some(pending) = taken {
            if let Ok(connection) = pending.future.await {
                connection.close().await;
            }
        }
        self.close_retired().await;
    }

    fn pending_open(&self) -> (u64, OpenFuture) {
        let mut slot = self.inner.slot.lock();
        if let Some(pending) = slot.as_ref() {
            return (pending.generation, pending.future.clone());
        }

        let generation = self.inner.next_generation.fetch_add(1, Ordering::SeqCst);
        let future = initialize(
            self.inner.engine.clone(),
            self.inner.catalog.clone(),
            self.inner.name.clone(),
            event_sink(Arc::downgrade(&self.inner), generation),
        )
        .boxed()
        .shared();

        *slot = Some(PendingOpen {
            generation,
            future: future.clone(),
        });
        (generation, future)
    }
}

fn event_sink(inner: Weak<StoreInner>, generation: u64) -> EventSink {
    Arc::new(move |event| {
        if let Some(inner) = inner.upgrade() {
            inner.handle_event(generation, event);
        }
    })
}

/// One physical open: connect, then migrate.
async fn initialize(
    engine: Arc<dyn StorageEngine>,
    catalog: Arc<SchemaCatalog>,
    name: String,
    events: EventSink,
) -> Result<Arc<dyn Connection>> {
    tracing::debug!(store = %name, "opening offline store");

    let connection = engine
        .connect(&name, events)
        .await
        .map_err(|e| initialization_failed(&name, e))?;

    if let Err(err) = migrate(connection.as_ref(), &catalog).await {
        connection.close().await;
        return Err(initialization_failed(&name, err));
    }

    Ok(connection)
}

fn initialization_failed(name: &str, err: Error) -> Error {
    tracing::error!(store = %name, error = %err, "offline store initialization failed");
    match err {
        Error::InitializationFailed(_) => err,
        other => Error::InitializationFailed(other.to_string()),
    }
}

/// Bring `connection` up to the catalog's version.
///
/// Runs on every physical open, not only on version changes: a store already
/// at the current version but missing a collection is repaired too.
pub async fn migrate(connection: &dyn Connection, catalog: &SchemaCatalog) -> Result<()> {
    let stored = connection.version().await?;
    let target = catalog.current_version();

    if stored > target {
        return Err(Error::InitializationFailed(format!(
            "stored schema version {stored} is newer than supported version {target}"
        )));
    }

    let plan = catalog.migration_plan(stored, target, &connection.known_collections());
    if stored == target && plan.is_empty() {
        return Ok(());
    }

    if !plan.healed.is_empty() {
        tracing::warn!(
            healed = ?plan.healed,
            "recreating collections missing from an earlier schema version"
        );
    }

    connection.upgrade(target, &plan.create).await?;

    let known = connection.known_collections();
    if let Some(missing) = catalog
        .collections()
        .iter()
        .find(|def| !known.contains(&def.name))
    {
        return Err(Error::InitializationFailed(format!(
            "collection {} missing after migration",
            missing.name
        )));
    }

    tracing::info!(
        from_version = stored,
        to_version = target,
        created = plan.create.len(),
        "offline store migrated"
    );
    Ok(())
}
