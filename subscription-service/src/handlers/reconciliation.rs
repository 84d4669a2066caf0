//! Operator-facing reconciliation endpoints.

use axum::{extract::State, http::HeaderMap, Json};
use chrono::{DateTime, Utc};
use secrecy::ExposeSecret;
use serde::Serialize;
use service_core::error::AppError;
use service_core::utils::signature::constant_time_eq;

use crate::services::schedule::OrphanedRenewal;
use crate::AppState;

pub const OPERATOR_KEY_HEADER: &str = "x-operator-key";

#[derive(Debug, Serialize)]
pub struct OrphanedRenewalsResponse {
    pub checked_at: DateTime<Utc>,
    pub count: usize,
    pub orphans: Vec<OrphanedRenewal>,
}

fn authorize_operator(state: &AppState, headers: &HeaderMap) -> Result<(), AppError> {
    let Some(expected) = &state.config.operator.api_key else {
        return Err(AppError::Forbidden(anyhow::anyhow!(
            "Operator endpoints are disabled"
        )));
    };

    let provided = headers
        .get(OPERATOR_KEY_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();

    if constant_time_eq(provided.as_bytes(), expected.expose_secret().as_bytes()) {
        Ok(())
    } else {
        Err(AppError::Forbidden(anyhow::anyhow!("Invalid operator key")))
    }
}

/// Paid periods due for renewal that have no scheduled charge behind them.
pub async fn orphaned_renewals(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<OrphanedRenewalsResponse>, AppError> {
    authorize_operator(&state, &headers)?;

    let now = Utc::now();
    let orphans = state
        .orchestrator
        .reconciler()
        .find_orphaned_renewals(now)
        .await?;

    Ok(Json(OrphanedRenewalsResponse {
        checked_at: now,
        count: orphans.len(),
        orphans,
    }))
}
