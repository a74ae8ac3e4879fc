//! The accessor bundle handed to the UI layer.

use crate::clock::IdGenerator;
use crate::collections::{FarmerProductsCache, FarmersCache, MarketRatesCache, PendingEntries};
use crate::queue::SyncQueue;
use crate::suggestion::SuggestionCache;
use crate::{error::Result, CollectionName, LocalStore};
use crate::{FARMERS_CACHE, FARMER_PRODUCTS_CACHE, MARKET_RATES_CACHE, PENDING_ENTRIES, SYNC_QUEUE};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Record counts per collection.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageSummary {
    pub collections: BTreeMap<CollectionName, usize>,
    pub total: usize,
}

/// One accessor per collection, all sharing a single [`LocalStore`].
#[derive(Clone)]
pub struct OfflineStore {
    store: LocalStore,
    pub pending_entries: PendingEntries,
    pub farmers: FarmersCache,
    pub market_rates: MarketRatesCache,
    pub farmer_products: FarmerProductsCache,
    pub sync_queue: SyncQueue,
    pub suggestions: SuggestionCache,
}

impl OfflineStore {
    pub fn new(store: LocalStore) -> Self {
        let ids = Arc::new(IdGenerator::new());
        Self {
            pending_entries: PendingEntries::new(store.clone(), ids.clone()),
            farmers: FarmersCache::farmers(store.clone()),
            market_rates: MarketRatesCache::market_rates(store.clone()),
            farmer_products: FarmerProductsCache::farmer_products(store.clone()),
            sync_queue: SyncQueue::new(store.clone(), ids),
            suggestions: SuggestionCache::new(store.clone()),
            store,
        }
    }

    pub fn store(&self) -> &LocalStore {
        &self.store
    }

    /// Count the records in every collection.
    pub async fn usage_summary(&self) -> Result<UsageSummary> {
        let counts = [
            (PENDING_ENTRIES, self.pending_entries.count().await?),
            (FARMERS_CACHE, self.farmers.count().await?),
            (MARKET_RATES_CACHE, self.market_rates.count().await?),
            (SYNC_QUEUE, self.sync_queue.count().await?),
            (FARMER_PRODUCTS_CACHE, self.farmer_products.count().await?),
        ];

        let mut summary = UsageSummary::default();
        for (name, count) in counts {
            summary.collections.insert(name.to_string(), count);
            summary.total += count;
        }
        Ok(summary)
    }

    /// Empty every collection, e.g. on logout.
    pub async fn clear_all(&self) -> Result<()> {
        self.pending_entries.clear().await?;
        self.farmers.clear().await?;
        self.market_rates.clear().await?;
        self.sync_queue.clear().await?;
        self.farmer_products.clear().await?;
        tracing::info!("offline store cleared");
        Ok(())
    }
}
