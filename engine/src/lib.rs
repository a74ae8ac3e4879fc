//! # Flora Engine
//!
//! Offline persistence for the flower-market ledger.
//!
//! Weighing stations lose connectivity often. This crate keeps a local,
//! versioned database of ledger entries created offline, caches of remote
//! reference data, and a queue of outbound actions to replay once the
//! network comes back.
//!
//! ## Layers
//!
//! - [`SchemaCatalog`] declares every collection and the schema version
//!   that introduced it.
//! - [`LocalStore`] owns the one connection to the database. It opens
//!   lazily, migrates on every open, and makes concurrent first callers
//!   share a single open.
//! - [`LocalStore::perform`] wraps each collection access and recovers
//!   once from schema drift by reopening the store.
//! - Typed accessors ([`PendingEntries`], [`Cache`], [`SyncQueue`],
//!   [`SuggestionCache`]) sit on top and are bundled as [`OfflineStore`].
//!
//! Storage itself is behind [`storage::StorageEngine`]; the crate ships an
//! in-memory engine and a SQLite engine.
//!
//! ## Quick Start
//!
//! ```rust
//! use flora_engine::storage::MemoryEngine;
//! use flora_engine::{LocalStore, NewPendingEntry, OfflineStore, SchemaCatalog};
//! use serde_json::json;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> flora_engine::error::Result<()> {
//! let store = LocalStore::new(MemoryEngine::new(), SchemaCatalog::flora());
//! let offline = OfflineStore::new(store);
//!
//! let id = offline
//!     .pending_entries
//!     .add(NewPendingEntry::new("farmer-7", "2024-02-01", 12.5))
//!     .await?;
//! offline.sync_queue.enqueue(json!({"op": "createEntry", "id": id})).await?;
//!
//! assert_eq!(offline.usage_summary().await?.total, 2);
//! # Ok(())
//! # }
//! ```

pub mod clock;
pub mod collections;
pub mod error;
pub mod offline;
pub mod queue;
pub mod record;
pub mod resilient;
pub mod schema;
pub mod storage;
pub mod store;
pub mod suggestion;

// Re-export main types at crate root
pub use clock::{now_millis, IdGenerator, MintedId};
pub use collections::{
    Cache, FarmerProductsCache, FarmersCache, MarketRatesCache, PendingEntries, RecordCollection,
};
pub use error::Error;
pub use offline::{OfflineStore, UsageSummary};
pub use queue::{ActionReplayer, DrainReport, FailedReplay, SyncQueue};
pub use record::{
    composite_key, CacheRecord, Farmer, FarmerProduct, MarketRate, NewPendingEntry, PendingEntry,
    SyncQueueItem,
};
pub use resilient::retry_once;
pub use schema::{
    CollectionDef, IndexDef, MigrationPlan, SchemaCatalog, FARMERS_CACHE, FARMER_PRODUCTS_CACHE,
    MARKET_RATES_CACHE, PENDING_ENTRIES, STORE_NAME, SYNC_QUEUE,
};
pub use storage::StoreEvent;
pub use store::{migrate, LocalStore};
pub use suggestion::{rank, FlowerSuggestion, SuggestionCache, SuggestionLookup, SuggestionSource};

/// Type aliases for clarity
pub type CollectionName = String;
pub type RecordKey = String;
pub type Timestamp = u64;
pub type SchemaVersion = u32;
