pub mod auto_scan;
pub mod surface;
pub mod targets;

use crate::server::{AppError, AppResult};
use axum::extract::{rejection::JsonRejection, rejection::QueryRejection, Query};
use axum::Json;

/// Unwraps a JSON body, turning every rejection into a 400.
fn body<T>(payload: Result<Json<T>, JsonRejection>) -> AppResult<T> {
    payload.map(|Json(v)| v).map_err(AppError::from)
}

fn query<T>(params: Result<Query<T>, QueryRejection>) -> AppResult<T> {
    params.map(|Query(v)| v).map_err(AppError::from)
}
