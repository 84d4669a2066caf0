//! HTTP handlers for subscription-service.

pub mod reconciliation;
pub mod subscriptions;
pub mod webhook;

use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde_json::json;
use service_core::error::AppError;

use crate::services::get_metrics;
use crate::AppState;

pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(json!({
            "status": "ok",
            "service": state.config.service_name,
            "version": env!("CARGO_PKG_VERSION"),
        })),
    )
}

/// Ready once the ledger backend answers.
pub async fn readiness_check(State(state): State<AppState>) -> Result<impl IntoResponse, AppError> {
    if let Some(mongo) = &state.mongo_ledger {
        mongo.health_check().await.map_err(AppError::DatabaseError)?;
    }

    Ok((StatusCode::OK, Json(json!({ "status": "ready" }))))
}

pub async fn metrics() -> impl IntoResponse {
    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4")],
        get_metrics(),
    )
}
