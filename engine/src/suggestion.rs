//! Which flower is a farmer most likely bringing today.
//!
//! The live answer comes from the remote API. When that is out of reach the
//! answer is derived from the cached farmer-product pairs, ranked by how
//! many entries each pair has seen.

use crate::collections::FarmerProductsCache;
use crate::error::Result;
use crate::record::FarmerProduct;
use crate::LocalStore;
use async_trait::async_trait;
use serde::Serialize;
use std::cmp::Ordering;
use std::fmt::Display;

/// Remote source of a farmer's products.
#[async_trait]
pub trait SuggestionLookup: Send + Sync {
    type Error: Display + Send;

    async fn products_for(&self, farmer_id: &str) -> std::result::Result<Vec<FarmerProduct>, Self::Error>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum SuggestionSource {
    Live,
    OfflineCache,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FlowerSuggestion {
    /// Top-ranked product; `None` when nothing is known about the farmer
    pub suggested: Option<FarmerProduct>,
    pub ranked: Vec<FarmerProduct>,
    pub source: SuggestionSource,
}

impl FlowerSuggestion {
    fn from_ranked(ranked: Vec<FarmerProduct>, source: SuggestionSource) -> Self {
        Self {
            suggested: ranked.first().cloned(),
            ranked,
            source,
        }
    }
}

/// Most used first; ties broken by flower type id so the order is stable.
pub fn rank(mut products: Vec<FarmerProduct>) -> Vec<FarmerProduct> {
    products.sort_by(|a, b| match b.entry_count.cmp(&a.entry_count) {
        Ordering::Equal => a.flower_type_id.cmp(&b.flower_type_id),
        other => other,
    });
    products
}

#[derive(Clone)]
pub struct SuggestionCache {
    products: FarmerProductsCache,
}

impl SuggestionCache {
    pub fn new(store: LocalStore) -> Self {
        Self {
            products: FarmerProductsCache::farmer_products(store),
        }
    }

    /// Suggestion derived from cached pairs only.
    pub async fn offline_suggestion(&self, farmer_id: &str) -> Result<FlowerSuggestion> {
        let products = self.products.list_by_farmer(farmer_id).await?;
        Ok(FlowerSuggestion::from_ranked(
            rank(products),
            SuggestionSource::OfflineCache,
        ))
    }

    /// Ask `lookup` first and fall back to the cache when it fails.
    ///
    /// Live results are written into the cache so the next offline answer
    /// reflects them; a failure to cache them does not fail the call.
    pub async fn suggest<L>(&self, farmer_id: &str, lookup: &L) -> Result<FlowerSuggestion>
    where
        L: SuggestionLookup + ?Sized,
    {
        match lookup.products_for(farmer_id).await {
            Ok(products) => {
                for product in &products {
                    if let Err(err) = self.products.upsert_one(product).await {
                        tracing::warn!(farmer_id, error = %err, "could not cache live products");
                        break;
                    }
                }
                Ok(FlowerSuggestion::from_ranked(rank(products), SuggestionSource::Live))
            }
            Err(err) => {
                tracing::info!(farmer_id, error = %err, "suggestion lookup failed; using offline cache");
                self.offline_suggestion(farmer_id).await
            }
        }
    }
}
