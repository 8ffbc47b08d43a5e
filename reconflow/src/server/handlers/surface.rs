use super::query;
use crate::server::{AppResult, AppState};
use axum::{
    extract::{rejection::QueryRejection, Path, Query, State},
    Json,
};
use consolidation::{ConsolidationEngine, ConsolidationSummary};
use reconflow_core::{
    AssetCounts, AssetType, AttackSurfaceAsset, AttackSurfaceDnsRecord, AttackSurfaceMetadata,
    AttackSurfaceRelationship, ConsolidatedCompanyDomain, ConsolidatedNetworkRange,
};
use results_sqlite::Db;
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

/// Runs a consolidation pass off the async workers.
async fn pass<T, F>(state: &AppState, f: F) -> AppResult<T>
where
    T: Send + 'static,
    F: FnOnce(&ConsolidationEngine) -> results_sqlite::Result<T> + Send + 'static,
{
    let engine = state.orchestrator.engine().clone();
    Ok(tokio::task::spawn_blocking(move || f(&engine)).await??)
}

/// Read for an existing target; unknown ids are a 404 rather than an empty list.
fn read<T>(state: &AppState, id: Uuid, f: impl FnOnce(&Db) -> results_sqlite::Result<T>) -> AppResult<T> {
    Ok(state.orchestrator.store().with(|db| {
        db.scope_target(id)?;
        f(db)
    })?)
}

fn subdomain_body(id: Uuid, subdomains: Vec<String>) -> Json<Value> {
    Json(json!({ "scope_target_id": id, "count": subdomains.len(), "subdomains": subdomains }))
}

pub async fn consolidate_subdomains(State(state): State<AppState>, Path(id): Path<Uuid>) -> AppResult<Json<Value>> {
    let names = pass(&state, move |e| e.consolidate_subdomains(id)).await?;
    Ok(subdomain_body(id, names))
}

pub async fn consolidated_subdomains(State(state): State<AppState>, Path(id): Path<Uuid>) -> AppResult<Json<Value>> {
    let names = read(&state, id, |db| db.consolidated_subdomains(id))?;
    Ok(subdomain_body(id, names))
}

pub async fn consolidate_company_domains(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> AppResult<Json<Vec<ConsolidatedCompanyDomain>>> {
    Ok(Json(pass(&state, move |e| e.consolidate_company_domains(id)).await?))
}

pub async fn consolidated_company_domains(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> AppResult<Json<Vec<ConsolidatedCompanyDomain>>> {
    Ok(Json(read(&state, id, |db| db.consolidated_company_domains(id))?))
}

pub async fn consolidate_network_ranges(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> AppResult<Json<Vec<ConsolidatedNetworkRange>>> {
    Ok(Json(pass(&state, move |e| e.consolidate_network_ranges(id)).await?))
}

pub async fn consolidated_network_ranges(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> AppResult<Json<Vec<ConsolidatedNetworkRange>>> {
    state.orchestrator.store().with(|db| db.scope_target(id))?;
    Ok(Json(state.orchestrator.engine().network_ranges(id)?))
}

pub async fn consolidate_attack_surface(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> AppResult<Json<ConsolidationSummary>> {
    Ok(Json(pass(&state, move |e| e.consolidate_attack_surface(id)).await?))
}

#[derive(Debug, Deserialize)]
pub struct AssetFilter {
    asset_type: Option<AssetType>,
}

pub async fn assets(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    filter: Result<Query<AssetFilter>, QueryRejection>,
) -> AppResult<Json<Vec<AttackSurfaceAsset>>> {
    let filter = query(filter)?;
    Ok(Json(read(&state, id, |db| db.attack_surface_assets(id, filter.asset_type))?))
}

pub async fn asset_counts(State(state): State<AppState>, Path(id): Path<Uuid>) -> AppResult<Json<AssetCounts>> {
    Ok(Json(read(&state, id, |db| db.attack_surface_asset_counts(id))?))
}

pub async fn relationships(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> AppResult<Json<Vec<AttackSurfaceRelationship>>> {
    Ok(Json(read(&state, id, |db| db.attack_surface_relationships(id))?))
}

pub async fn dns_records(State(state): State<AppState>, Path(id): Path<Uuid>) -> AppResult<Json<Vec<AttackSurfaceDnsRecord>>> {
    Ok(Json(read(&state, id, |db| db.attack_surface_dns_records(id))?))
}

pub async fn metadata(State(state): State<AppState>, Path(id): Path<Uuid>) -> AppResult<Json<Vec<AttackSurfaceMetadata>>> {
    Ok(Json(read(&state, id, |db| db.attack_surface_metadata(id))?))
}
