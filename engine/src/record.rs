//! Record types for each collection.
//!
//! Every record spells out the fields the offline layer relies on and keeps
//! everything else the remote API sends in a flattened `extra` map, so
//! fields added server-side survive a round trip through the cache.

use crate::{RecordKey, Timestamp};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Fields the UI supplies when creating a pending ledger entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewPendingEntry {
    pub farmer_id: String,
    /// Calendar date of the weighing, `YYYY-MM-DD`
    pub entry_date: String,
    /// Weight or count brought in
    pub quantity: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flower_type_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rate: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl NewPendingEntry {
    pub fn new(farmer_id: impl Into<String>, entry_date: impl Into<String>, quantity: f64) -> Self {
        Self {
            farmer_id: farmer_id.into(),
            entry_date: entry_date.into(),
            quantity,
            flower_type_id: None,
            rate: None,
            notes: None,
            extra: Map::new(),
        }
    }

    pub fn with_flower_type(mut self, flower_type_id: impl Into<String>) -> Self {
        self.flower_type_id = Some(flower_type_id.into());
        self
    }
}

/// A locally created ledger entry awaiting remote confirmation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingEntry {
    /// Generated locally; never supplied by callers
    pub id: RecordKey,
    /// Creation time (milliseconds since epoch)
    pub created_at: Timestamp,
    #[serde(flatten)]
    pub fields: NewPendingEntry,
}

/// Cached farmer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Farmer {
    pub id: RecordKey,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub village: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Farmer {
    pub fn new(id: impl Into<RecordKey>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            phone: None,
            village: None,
            extra: Map::new(),
        }
    }
}

/// Cached market rate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarketRate {
    pub id: RecordKey,
    pub rate: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flower_type_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub effective_date: Option<String>,
    /// Marks the rate currently in force
    #[serde(default)]
    pub is_current: bool,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl MarketRate {
    pub fn new(id: impl Into<RecordKey>, rate: f64) -> Self {
        Self {
            id: id.into(),
            rate,
            flower_type_id: None,
            effective_date: None,
            is_current: false,
            extra: Map::new(),
        }
    }

    pub fn current(mut self) -> Self {
        self.is_current = true;
        self
    }
}

/// Link between a farmer and a flower type they bring, with usage count.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FarmerProduct {
    pub farmer_id: String,
    pub flower_type_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flower_name: Option<String>,
    /// Number of ledger entries recorded for this pair
    #[serde(default)]
    pub entry_count: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_used_at: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl FarmerProduct {
    pub fn new(
        farmer_id: impl Into<String>,
        flower_type_id: impl Into<String>,
        entry_count: u64,
    ) -> Self {
        Self {
            farmer_id: farmer_id.into(),
            flower_type_id: flower_type_id.into(),
            flower_name: None,
            entry_count,
            last_used_at: None,
            extra: Map::new(),
        }
    }

    /// Composite key `farmerId:flowerTypeId`.
    pub fn key(&self) -> RecordKey {
        composite_key(&self.farmer_id, &self.flower_type_id)
    }
}

/// Build the farmer-products key for a farmer and flower type.
pub fn composite_key(farmer_id: &str, flower_type_id: &str) -> RecordKey {
    format!("{farmer_id}:{flower_type_id}")
}

/// An outbound action awaiting replay. Never mutated once queued.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncQueueItem {
    pub id: RecordKey,
    /// When the action was queued (milliseconds since epoch)
    pub timestamp: Timestamp,
    /// Opaque to the store
    pub action: Value,
}

/// Records that live in a cache collection and know their own key.
pub trait CacheRecord {
    fn cache_key(&self) -> RecordKey;
}

impl CacheRecord for Farmer {
    fn cache_key(&self) -> RecordKey {
        self.id.clone()
    }
}

impl CacheRecord for MarketRate {
    fn cache_key(&self) -> RecordKey {
        self.id.clone()
    }
}

impl CacheRecord for FarmerProduct {
    fn cache_key(&self) -> RecordKey {
        self.key()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn pending_entry_flattens_fields() {
        let entry = PendingEntry {
            id: "0000000001000-0000-abcdef01".into(),
            created_at: 1000,
            fields: NewPendingEntry::new("farmer-1", "2024-02-01", 12.5).with_flower_type("rose"),
        };

        let value = serde_json::to_value(&entry).unwrap();
        assert_eq!(value["id"], "0000000001000-0000-abcdef01");
        assert_eq!(value["createdAt"], 1000);
        assert_eq!(value["farmerId"], "farmer-1");
        assert_eq!(value["flowerTypeId"], "rose");
        assert!(value.get("notes").is_none());
    }

    #[test]
    fn unknown_fields_survive_in_extra() {
        let farmer: Farmer = serde_json::from_value(json!({
            "id": "f1",
            "name": "Lakshmi",
            "village": "Hosur",
            "bankAccount": {"ifsc": "SBIN0001"}
        }))
        .unwrap();

        assert_eq!(farmer.village.as_deref(), Some("Hosur"));
        assert_eq!(farmer.extra["bankAccount"]["ifsc"], "SBIN0001");

        let back = serde_json::to_value(&farmer).unwrap();
        assert_eq!(back["bankAccount"]["ifsc"], "SBIN0001");
    }

    #[test]
    fn missing_required_field_is_rejected() {
        let result: Result<Farmer, _> = serde_json::from_value(json!({"id": "f1"}));
        assert!(result.is_err());
    }

    #[test]
    fn market_rate_defaults_to_not_current() {
        let rate: MarketRate = serde_json::from_value(json!({"id": "r1", "rate": 40.0})).unwrap();
        assert!(!rate.is_current);
        assert!(MarketRate::new("r2", 42.0).current().is_current);
    }

    #[test]
    fn farmer_product_composite_key() {
        let product = FarmerProduct::new("7", "12", 3);
        assert_eq!(product.key(), "7:12");
        assert_eq!(product.cache_key(), composite_key("7", "12"));
    }

    #[test]
    fn farmer_product_count_defaults_to_zero() {
        let product: FarmerProduct =
            serde_json::from_value(json!({"farmerId": "1", "flowerTypeId": "2"})).unwrap();
        assert_eq!(product.entry_count, 0);
    }
}
