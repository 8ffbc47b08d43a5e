use super::body;
use crate::server::{AppError, AppResult, AppState};
use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    Json,
};
use reconflow_core::{ScanMode, ScopeTarget, TargetKind};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;
use uuid::Uuid;

#[derive(Debug, Deserialize)]
pub struct NewTarget {
    #[serde(rename = "type")]
    kind: String,
    mode: String,
    #[serde(alias = "scope_target")]
    target: String,
    #[serde(default)]
    active: bool,
}

pub async fn add(
    State(state): State<AppState>,
    payload: Result<Json<NewTarget>, JsonRejection>,
) -> AppResult<(StatusCode, Json<ScopeTarget>)> {
    let req = body(payload)?;
    let kind: TargetKind = req.kind.parse().map_err(|e: reconflow_core::ParseError| AppError::bad_request(e.to_string()))?;
    let mode: ScanMode = req.mode.parse().map_err(|e: reconflow_core::ParseError| AppError::bad_request(e.to_string()))?;
    let mut target = ScopeTarget::new(kind, mode, req.target.trim());
    target.active = req.active;
    state.orchestrator.store().with(|db| db.insert_scope_target(&target))?;
    info!(scope_target_id = %target.id, kind = kind.as_str(), target = %target.target, "scope target added");
    Ok((StatusCode::CREATED, Json(target)))
}

pub async fn list(State(state): State<AppState>) -> AppResult<Json<Vec<ScopeTarget>>> {
    Ok(Json(state.orchestrator.store().with(|db| db.list_scope_targets())?))
}

pub async fn remove(State(state): State<AppState>, Path(id): Path<Uuid>) -> AppResult<Json<Value>> {
    state.orchestrator.store().with(|db| db.delete_scope_target(id))?;
    info!(scope_target_id = %id, "scope target deleted");
    Ok(Json(json!({ "deleted": id })))
}
