//! Reference-data caches and the offline flower suggestion.
//!
//! `PUT` on a collection path replaces the whole cached set with the body.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, put},
    Json, Router,
};
use flora_engine::{Farmer, FarmerProduct, FlowerSuggestion, MarketRate};

use crate::error::{AppError, Result};
use crate::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/farmers", get(list_farmers).put(replace_farmers))
        .route("/farmers/{id}", get(get_farmer))
        .route("/market-rates", get(list_rates).put(replace_rates))
        .route("/market-rates/current", get(current_rate))
        .route("/market-rates/{id}", get(get_rate))
        .route("/farmer-products", get(list_products).put(replace_products))
        .route("/farmers/{id}/products", get(products_for_farmer))
        .route(
            "/farmers/{id}/products/{flower_type_id}",
            put(upsert_product).delete(remove_product),
        )
        .route("/farmers/{id}/suggestion", get(suggestion))
}

// ============================================================================
// Farmers
// ============================================================================

async fn list_farmers(State(state): State<AppState>) -> Result<Json<Vec<Farmer>>> {
    Ok(Json(state.offline.farmers.list().await?))
}

async fn replace_farmers(
    State(state): State<AppState>,
    Json(farmers): Json<Vec<Farmer>>,
) -> Result<StatusCode> {
    state
        .offline
        .farmers
        .replace_all(farmers)
        .await
        .map_err(AppError::write)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn get_farmer(State(state): State<AppState>, Path(id): Path<String>) -> Result<Json<Farmer>> {
    state
        .offline
        .farmers
        .get_by_id(&id)
        .await?
        .map(Json)
        .ok_or_else(|| AppError::NotFound(format!("farmer {id}")))
}

// ============================================================================
// Market rates
// ============================================================================

async fn list_rates(State(state): State<AppState>) -> Result<Json<Vec<MarketRate>>> {
    Ok(Json(state.offline.market_rates.list().await?))
}

async fn replace_rates(
    State(state): State<AppState>,
    Json(rates): Json<Vec<MarketRate>>,
) -> Result<StatusCode> {
    state
        .offline
        .market_rates
        .replace_all(rates)
        .await
        .map_err(AppError::write)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn current_rate(State(state): State<AppState>) -> Result<Json<MarketRate>> {
    state
        .offline
        .market_rates
        .get_current()
        .await?
        .map(Json)
        .ok_or_else(|| AppError::NotFound("no current market rate cached".into()))
}

async fn get_rate(State(state): State<AppState>, Path(id): Path<String>) -> Result<Json<MarketRate>> {
    state
        .offline
        .market_rates
        .get_by_id(&id)
        .await?
        .map(Json)
        .ok_or_else(|| AppError::NotFound(format!("market rate {id}")))
}

// ============================================================================
// Farmer products
// ============================================================================

async fn list_products(State(state): State<AppState>) -> Result<Json<Vec<FarmerProduct>>> {
    Ok(Json(state.offline.farmer_products.list().await?))
}

async fn replace_products(
    State(state): State<AppState>,
    Json(products): Json<Vec<FarmerProduct>>,
) -> Result<StatusCode> {
    state
        .offline
        .farmer_products
        .replace_all(products)
        .await
        .map_err(AppError::write)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn products_for_farmer(
    State(state): State<AppState>,
    Path(farmer_id): Path<String>,
) -> Result<Json<Vec<FarmerProduct>>> {
    Ok(Json(
        state.offline.farmer_products.list_by_farmer(&farmer_id).await?,
    ))
}

/// PUT /farmers/{id}/products/{flower_type_id} - the path wins over the body's ids.
async fn upsert_product(
    State(state): State<AppState>,
    Path((farmer_id, flower_type_id)): Path<(String, String)>,
    Json(mut product): Json<FarmerProduct>,
) -> Result<Json<FarmerProduct>> {
    product.farmer_id = farmer_id;
    product.flower_type_id = flower_type_id;
    state
        .offline
        .farmer_products
        .upsert_one(&product)
        .await
        .map_err(AppError::write)?;
    Ok(Json(product))
}

async fn remove_product(
    State(state): State<AppState>,
    Path((farmer_id, flower_type_id)): Path<(String, String)>,
) -> Result<StatusCode> {
    state
        .offline
        .farmer_products
        .remove_one(&farmer_id, &flower_type_id)
        .await
        .map_err(AppError::write)?;
    Ok(StatusCode::NO_CONTENT)
}

/// GET /farmers/{id}/suggestion - answered from the cache only.
async fn suggestion(
    State(state): State<AppState>,
    Path(farmer_id): Path<String>,
) -> Result<Json<FlowerSuggestion>> {
    Ok(Json(
        state.offline.suggestions.offline_suggestion(&farmer_id).await?,
    ))
}
