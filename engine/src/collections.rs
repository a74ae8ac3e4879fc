//! Typed access to individual collections.
//!
//! Every call goes through [`LocalStore::perform`], so an accessor never
//! sees a connection that lacks its collection. Values are stored as JSON
//! and decoded into the collection's record type on the way out.

use crate::clock::IdGenerator;
use crate::record::{CacheRecord, Farmer, FarmerProduct, MarketRate, NewPendingEntry, PendingEntry};
use crate::{error::Result, Error, LocalStore, RecordKey};
use crate::{FARMERS_CACHE, FARMER_PRODUCTS_CACHE, MARKET_RATES_CACHE, PENDING_ENTRIES};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};
use std::marker::PhantomData;
use std::sync::Arc;

/// Fields of a pending entry that an update may never touch.
const IMMUTABLE_ENTRY_FIELDS: [&str; 2] = ["id", "createdAt"];

/// A collection whose values decode into `T`.
pub struct RecordCollection<T> {
    store: LocalStore,
    name: &'static str,
    _record: PhantomData<fn() -> T>,
}

impl<T> Clone for RecordCollection<T> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            name: self.name,
            _record: PhantomData,
        }
    }
}

impl<T> RecordCollection<T>
where
    T: Serialize + DeserializeOwned,
{
    pub fn new(store: LocalStore, name: &'static str) -> Self {
        Self {
            store,
            name,
            _record: PhantomData,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub async fn get(&self, key: &str) -> Result<Option<T>> {
        let name = self.name;
        let value = self
            .store
            .perform(name, |conn| async move { conn.get(name, key).await })
            .await?;
        value.map(|value| self.decode(key, value)).transpose()
    }

    /// The raw stored document, without decoding.
    pub async fn get_value(&self, key: &str) -> Result<Option<Value>> {
        let name = self.name;
        self.store
            .perform(name, |conn| async move { conn.get(name, key).await })
            .await
    }

    pub async fn put(&self, key: &str, record: &T) -> Result<()> {
        let name = self.name;
        let value = serde_json::to_value(record)?;
        self.store
            .perform(name, |conn| {
                let value = value.clone();
                async move { conn.put(name, key, value).await }
            })
            .await
    }

    pub async fn delete(&self, key: &str) -> Result<()> {
        let name = self.name;
        self.store
            .perform(name, |conn| async move { conn.delete(name, key).await })
            .await
    }

    /// Every record, ascending by key.
    pub async fn list(&self) -> Result<Vec<T>> {
        Ok(self
            .entries()
            .await?
            .into_iter()
            .map(|(_, record)| record)
            .collect())
    }

    /// Every record with its key, ascending by key.
    pub async fn entries(&self) -> Result<Vec<(RecordKey, T)>> {
        let name = self.name;
        let raw = self
            .store
            .perform(name, |conn| async move { conn.entries(name).await })
            .await?;
        raw.into_iter()
            .map(|(key, value)| {
                let record = self.decode(&key, value)?;
                Ok::<_, Error>((key, record))
            })
            .collect()
    }

    pub async fn count(&self) -> Result<usize> {
        let name = self.name;
        self.store
            .perform(name, |conn| async move { conn.count(name).await })
            .await
    }

    pub async fn clear(&self) -> Result<()> {
        let name = self.name;
        self.store
            .perform(name, |conn| async move { conn.clear(name).await })
            .await
    }

    /// Swap the whole collection for `records` in one step.
    pub async fn replace_all(&self, records: Vec<(RecordKey, T)>) -> Result<()> {
        let name = self.name;
        let entries = records
            .into_iter()
            .map(|(key, record)| Ok::<_, Error>((key, serde_json::to_value(&record)?)))
            .collect::<Result<Vec<_>>>()?;
        self.store
            .perform(name, |conn| {
                let entries = entries.clone();
                async move { conn.replace_all(name, entries).await }
            })
            .await
    }

    fn decode(&self, key: &str, value: Value) -> Result<T> {
        serde_json::from_value(value)
            .map_err(|e| Error::InvalidRecord(format!("{}/{key}: {e}", self.name)))
    }
}

/// Ledger entries created offline and waiting for the server.
#[derive(Clone)]
pub struct PendingEntries {
    records: RecordCollection<PendingEntry>,
    ids: Arc<IdGenerator>,
}

impl PendingEntries {
    pub fn new(store: LocalStore, ids: Arc<IdGenerator>) -> Self {
        Self {
            records: RecordCollection::new(store, PENDING_ENTRIES),
            ids,
        }
    }

    /// Store `entry` under a freshly generated id and creation time.
    pub async fn add(&self, entry: NewPendingEntry) -> Result<RecordKey> {
        let minted = self.ids.next();
        let record = PendingEntry {
            id: minted.id,
            created_at: minted.timestamp,
            fields: entry,
        };
        self.records.put(&record.id, &record).await?;
        tracing::debug!(id = %record.id, farmer_id = %record.fields.farmer_id, "pending entry stored");
        Ok(record.id)
    }

    pub async fn get(&self, id: &str) -> Result<Option<PendingEntry>> {
        self.records.get(id).await
    }

    /// Merge `patch` into the stored entry.
    ///
    /// Returns `Ok(None)` without writing when `id` is not stored. `id` and
    /// `createdAt` in the patch are ignored. The merged document must still
    /// be a valid entry.
    pub async fn update(&self, id: &str, patch: Map<String, Value>) -> Result<Option<PendingEntry>> {
        let Some(Value::Object(mut merged)) = self.records.get_value(id).await? else {
            tracing::debug!(id, "update of unknown pending entry ignored");
            return Ok(None);
        };

        for (field, value) in patch {
            if !IMMUTABLE_ENTRY_FIELDS.contains(&field.as_str()) {
                merged.insert(field, value);
            }
        }

        let record: PendingEntry = serde_json::from_value(Value::Object(merged))
            .map_err(|e| Error::InvalidRecord(format!("{PENDING_ENTRIES}/{id}: {e}")))?;
        self.records.put(id, &record).await?;
        Ok(Some(record))
    }

    pub async fn delete(&self, id: &str) -> Result<()> {
        self.records.delete(id).await
    }

    /// All entries, oldest first.
    pub async fn list(&self) -> Result<Vec<PendingEntry>> {
        let mut entries = self.records.list().await?;
        entries.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(entries)
    }

    pub async fn count(&self) -> Result<usize> {
        self.records.count().await
    }

    pub async fn clear(&self) -> Result<()> {
        self.records.clear().await
    }
}

/// A local mirror of remote reference data, refreshed wholesale.
pub struct Cache<T> {
    records: RecordCollection<T>,
}

impl<T> Clone for Cache<T> {
    fn clone(&self) -> Self {
        Self {
            records: self.records.clone(),
        }
    }
}

pub type FarmersCache = Cache<Farmer>;
pub type MarketRatesCache = Cache<MarketRate>;
pub type FarmerProductsCache = Cache<FarmerProduct>;

impl<T> Cache<T>
where
    T: CacheRecord + Serialize + DeserializeOwned,
{
    pub fn new(store: LocalStore, collection: &'static str) -> Self {
        Self {
            records: RecordCollection::new(store, collection),
        }
    }

    /// Replace the cached set with `records`. Readers never see a partial refresh.
    pub async fn replace_all(&self, records: Vec<T>) -> Result<()> {
        let total = records.len();
        let keyed = records
            .into_iter()
            .map(|record| (record.cache_key(), record))
            .collect();
        self.records.replace_all(keyed).await?;
        tracing::debug!(collection = self.records.name(), total, "cache refreshed");
        Ok(())
    }

    pub async fn list(&self) -> Result<Vec<T>> {
        self.records.list().await
    }

    pub async fn get_by_id(&self, id: &str) -> Result<Option<T>> {
        self.records.get(id).await
    }

    pub async fn count(&self) -> Result<usize> {
        self.records.count().await
    }

    pub async fn clear(&self) -> Result<()> {
        self.records.clear().await
    }
}

impl Cache<Farmer> {
    pub fn farmers(store: LocalStore) -> Self {
        Self::new(store, FARMERS_CACHE)
    }
}

impl Cache<MarketRate> {
    pub fn market_rates(store: LocalStore) -> Self {
        Self::new(store, MARKET_RATES_CACHE)
    }

    /// The first cached rate flagged as current, if any.
    pub async fn get_current(&self) -> Result<Option<MarketRate>> {
        Ok(self.list().await?.into_iter().find(|rate| rate.is_current))
    }
}

impl Cache<FarmerProduct> {
    pub fn farmer_products(store: LocalStore) -> Self {
        Self::new(store, FARMER_PRODUCTS_CACHE)
    }

    pub async fn list_by_farmer(&self, farmer_id: &str) -> Result<Vec<FarmerProduct>> {
        Ok(self
            .list()
            .await?
            .into_iter()
            .filter(|product| product.farmer_id == farmer_id)
            .collect())
    }

    /// Insert or overwrite a single farmer/flower pair.
    pub async fn upsert_one(&self, product: &FarmerProduct) -> Result<()> {
        self.records.put(&product.key(), product).await
    }

    pub async fn remove_one(&self, farmer_id: &str, flower_type_id: &str) -> Result<()> {
        self.records
            .delete(&crate::record::composite_key(farmer_id, flower_type_id))
            .await
    }
}
