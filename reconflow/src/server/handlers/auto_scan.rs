use super::{body, query};
use crate::server::{AppResult, AppState};
use axum::{
    extract::{rejection::JsonRejection, rejection::QueryRejection, Path, Query, State},
    Json,
};
use reconflow_core::{AutoScanConfig, AutoScanSession, AutoScanState, FinalCounts};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{error, info};
use uuid::Uuid;

pub async fn get_state(State(state): State<AppState>, Path(target_id): Path<Uuid>) -> AppResult<Json<AutoScanState>> {
    let s = state.orchestrator.store().with(|db| {
        db.scope_target(target_id)?;
        db.auto_scan_state(target_id)
    })?;
    Ok(Json(s))
}

/// Partial update; omitted fields keep their stored values.
#[derive(Debug, Deserialize)]
pub struct StateUpdate {
    current_step: Option<String>,
    is_paused: Option<bool>,
    is_cancelled: Option<bool>,
}

pub async fn put_state(
    State(state): State<AppState>,
    Path(target_id): Path<Uuid>,
    payload: Result<Json<StateUpdate>, JsonRejection>,
) -> AppResult<Json<AutoScanState>> {
    let update = body(payload)?;
    let s = state.orchestrator.store().with(|db| {
        db.scope_target(target_id)?;
        let mut current = db.auto_scan_state(target_id)?;
        if let Some(step) = update.current_step {
            current.current_step = step;
        }
        if let Some(paused) = update.is_paused {
            current.is_paused = paused;
        }
        if let Some(cancelled) = update.is_cancelled {
            current.is_cancelled = cancelled;
        }
        db.put_auto_scan_state(&current)
    })?;
    info!(scope_target_id = %target_id, step = %s.current_step, paused = s.is_paused, cancelled = s.is_cancelled, "auto-scan state updated");
    Ok(Json(s))
}

pub async fn get_config(State(state): State<AppState>) -> AppResult<Json<AutoScanConfig>> {
    Ok(Json(state.orchestrator.store().with(|db| db.auto_scan_config())?))
}

pub async fn put_config(
    State(state): State<AppState>,
    payload: Result<Json<AutoScanConfig>, JsonRejection>,
) -> AppResult<Json<AutoScanConfig>> {
    let config = body(payload)?;
    let saved = state.orchestrator.store().with(|db| db.put_auto_scan_config(&config))?;
    Ok(Json(saved))
}

#[derive(Debug, Deserialize)]
pub struct StartRequest {
    scope_target_id: Uuid,
    config_snapshot: Option<AutoScanConfig>,
}

pub async fn start_session(
    State(state): State<AppState>,
    payload: Result<Json<StartRequest>, JsonRejection>,
) -> AppResult<Json<Value>> {
    let req = body(payload)?;
    let (session, handle) = state.orchestrator.start(req.scope_target_id, req.config_snapshot)?;
    let session_id = session.id;
    tokio::spawn(async move {
        match handle.await {
            Ok(Ok(done)) => info!(%session_id, status = done.status.as_str(), "background run ended"),
            Ok(Err(err)) => error!(%session_id, error = %err, "background run failed"),
            Err(err) => error!(%session_id, error = %err, "background run panicked"),
        }
    });
    Ok(Json(json!({ "session_id": session_id })))
}

pub async fn get_session(State(state): State<AppState>, Path(id): Path<Uuid>) -> AppResult<Json<AutoScanSession>> {
    Ok(Json(state.orchestrator.store().with(|db| db.session(id))?))
}

#[derive(Debug, Deserialize)]
pub struct SessionFilter {
    target_id: Option<Uuid>,
}

pub async fn list_sessions(
    State(state): State<AppState>,
    filter: Result<Query<SessionFilter>, QueryRejection>,
) -> AppResult<Json<Vec<AutoScanSession>>> {
    let filter = query(filter)?;
    Ok(Json(state.orchestrator.store().with(|db| db.list_sessions(filter.target_id))?))
}

#[derive(Debug, Default, Deserialize)]
pub struct CancelParams {
    #[serde(default)]
    completed: bool,
}

pub async fn cancel_session(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    params: Result<Query<CancelParams>, QueryRejection>,
) -> AppResult<Json<Value>> {
    let params = query(params)?;
    let outcome = state.orchestrator.cancel(id, params.completed)?;
    let message = if outcome.already_completed {
        "Session already completed"
    } else if params.completed {
        "Session marked completed"
    } else {
        "Session cancelled"
    };
    info!(session_id = %id, status = outcome.session.status.as_str(), "{message}");
    Ok(Json(json!({
        "message": message,
        "already_completed": outcome.already_completed,
        "session": outcome.session,
    })))
}

#[derive(Debug, Deserialize)]
pub struct FinalStats {
    scope_target_id: Uuid,
    final_consolidated_subdomains: u64,
    final_live_web_servers: u64,
}

pub async fn final_stats(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    payload: Result<Json<FinalStats>, JsonRejection>,
) -> AppResult<Json<AutoScanSession>> {
    let stats = body(payload)?;
    let counts = FinalCounts {
        consolidated_subdomains: stats.final_consolidated_subdomains,
        live_web_servers: stats.final_live_web_servers,
    };
    let session = state.orchestrator.store().with(|db| db.record_final_stats(id, stats.scope_target_id, counts))?;
    Ok(Json(session))
}
