//! Schema catalog and migration planning.
//!
//! The catalog declares every collection the offline store must contain and
//! the schema version that introduced it. Versions only ever add
//! collections, so the set of collections expected at version `v` is simply
//! every entry introduced at or before `v`.

use crate::{error::Result, CollectionName, Error, SchemaVersion};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Fixed name of the local database.
pub const STORE_NAME: &str = "flora-ledger";

/// Locally created ledger entries awaiting confirmation.
pub const PENDING_ENTRIES: &str = "pending-entries";
/// Mirror of the remote farmer list.
pub const FARMERS_CACHE: &str = "farmers-cache";
/// Mirror of the remote market rates.
pub const MARKET_RATES_CACHE: &str = "market-rates-cache";
/// Outbound actions awaiting replay.
pub const SYNC_QUEUE: &str = "sync-queue";
/// Farmer/flower-type usage links, keyed by `farmerId:flowerTypeId`.
pub const FARMER_PRODUCTS_CACHE: &str = "farmer-products-cache";

/// A secondary index on one top-level field of the stored JSON value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexDef {
    /// Index name, unique within its collection
    pub name: String,
    /// Top-level field of the record the index covers
    pub field: String,
}

impl IndexDef {
    pub fn new(name: impl Into<String>, field: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            field: field.into(),
        }
    }
}

/// Declaration of one collection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectionDef {
    /// Collection name
    pub name: CollectionName,
    /// Schema version that introduced this collection
    pub introduced_in: SchemaVersion,
    /// Secondary indexes created together with the collection
    pub indexes: Vec<IndexDef>,
}

impl CollectionDef {
    /// Create a collection definition without indexes.
    pub fn new(name: impl Into<CollectionName>, introduced_in: SchemaVersion) -> Self {
        Self {
            name: name.into(),
            introduced_in,
            indexes: Vec::new(),
        }
    }

    /// Builder-style method to add an index.
    pub fn with_index(mut self, index: IndexDef) -> Self {
        self.indexes.push(index);
        self
    }
}

/// The versioned set of collections the store must contain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchemaCatalog {
    collections: Vec<CollectionDef>,
}

impl SchemaCatalog {
    /// Build a catalog, checking that names are unique and versions start at 1.
    pub fn new(mut collections: Vec<CollectionDef>) -> Result<Self> {
        let mut seen = BTreeSet::new();
        for def in &collections {
            if def.introduced_in == 0 {
                return Err(Error::InitializationFailed(format!(
                    "collection {} declares schema version 0",
                    def.name
                )));
            }
            if !seen.insert(def.name.as_str()) {
                return Err(Error::InitializationFailed(format!(
                    "collection {} is declared twice",
                    def.name
                )));
            }
        }
        collections.sort_by_key(|def| def.introduced_in);
        Ok(Self { collections })
    }

    /// The catalog of the flower-market ledger.
    ///
    /// | version | collection |
    /// |---------|------------|
    /// | 1 | `pending-entries` |
    /// | 2 | `farmers-cache`, `market-rates-cache` |
    /// | 3 | `sync-queue` |
    /// | 4 | `farmer-products-cache` |
    pub fn flora() -> Self {
        Self {
            collections: vec![
                CollectionDef::new(PENDING_ENTRIES, 1)
                    .with_index(IndexDef::new("by_created_at", "createdAt")),
                CollectionDef::new(FARMERS_CACHE, 2),
                CollectionDef::new(MARKET_RATES_CACHE, 2),
                CollectionDef::new(SYNC_QUEUE, 3)
                    .with_index(IndexDef::new("by_timestamp", "timestamp")),
                CollectionDef::new(FARMER_PRODUCTS_CACHE, 4)
                    .with_index(IndexDef::new("by_farmer", "farmerId")),
            ],
        }
    }

    /// The catalog as an older build of the application would have declared it.
    pub fn up_to(&self, version: SchemaVersion) -> Self {
        Self {
            collections: self
                .collections
                .iter()
                .filter(|def| def.introduced_in <= version)
                .cloned()
                .collect(),
        }
    }

    /// Highest version declared; 0 for an empty catalog.
    pub fn current_version(&self) -> SchemaVersion {
        self.collections
            .iter()
            .map(|def| def.introduced_in)
            .max()
            .unwrap_or(0)
    }

    /// All declared collections, ordered by version.
    pub fn collections(&self) -> &[CollectionDef] {
        &self.collections
    }

    /// Get a collection definition by name.
    pub fn get(&self, name: &str) -> Option<&CollectionDef> {
        self.collections.iter().find(|def| def.name == name)
    }

    /// Collections introduced exactly at `version`.
    pub fn introduced_at(&self, version: SchemaVersion) -> impl Iterator<Item = &CollectionDef> {
        self.collections
            .iter()
            .filter(move |def| def.introduced_in == version)
    }

    /// Plan the migration from `old` to `new` given the collections that are
    /// actually present.
    ///
    /// Every version in `(old, new]` contributes the collections it
    /// introduced. Collections from versions at or below `old` are included
    /// too when they are missing, so a store that lost a collection is
    /// repaired rather than trusted.
    pub fn migration_plan(
        &self,
        old: SchemaVersion,
        new: SchemaVersion,
        present: &BTreeSet<CollectionName>,
    ) -> MigrationPlan {
        let mut plan = MigrationPlan::default();

        for version in 1..=new {
            for def in self.introduced_at(version) {
                if present.contains(&def.name) {
                    continue;
                }
                if version <= old {
                    plan.healed.push(def.name.clone());
                }
                plan.create.push(def.clone());
            }
        }

        plan
    }
}

impl Default for SchemaCatalog {
    fn default() -> Self {
        Self::flora()
    }
}

/// Collections a migration must create.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MigrationPlan {
    /// Every collection to create, in version order
    pub create: Vec<CollectionDef>,
    /// Subset of `create` that an earlier migration should already have made
    pub healed: Vec<CollectionName>,
}

impl MigrationPlan {
    pub fn is_empty(&self) -> bool {
        self.create.is_empty()
    }
}
