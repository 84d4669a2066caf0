//! Subscriber-facing endpoints. Every route requires a verified bearer token.

use axum::{extract::State, http::StatusCode, Json};
use chrono::Utc;
use rand::{distributions::Alphanumeric, Rng};
use serde::{Deserialize, Serialize};
use service_core::error::AppError;
use validator::Validate;

use crate::middleware::AuthenticatedSubject;
use crate::models::{BillingEvent, SubscriptionStatusView};
use crate::services::entitlement;
use crate::services::gateway::BillingKeyPayment;
use crate::AppState;

const DEFAULT_CANCEL_REASON: &str = "Subscription cancelled by customer";

#[derive(Debug, Deserialize, Validate)]
pub struct SubscribeRequest {
    #[validate(length(min = 1, message = "billing_key is required"))]
    pub billing_key: String,
    #[validate(length(min = 1, max = 200))]
    pub order_name: String,
    #[validate(range(min = 1))]
    pub amount: i64,
}

#[derive(Debug, Serialize)]
pub struct SubscribeResponse {
    pub payment_id: String,
    pub provider_response: serde_json::Value,
}

#[derive(Debug, Deserialize, Validate)]
pub struct CancelRequest {
    #[validate(length(min = 1, message = "transaction_key is required"))]
    pub transaction_key: String,
    #[validate(length(max = 200))]
    pub reason: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct CancelResponse {
    pub transaction_key: String,
    pub provider_response: serde_json::Value,
}

/// `payment_<millis>_<7 random chars>`
fn new_payment_id() -> String {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(7)
        .map(char::from)
        .collect();
    format!(
        "payment_{}_{}",
        Utc::now().timestamp_millis(),
        suffix.to_lowercase()
    )
}

pub async fn status(
    State(state): State<AppState>,
    subject: AuthenticatedSubject,
) -> Result<Json<SubscriptionStatusView>, AppError> {
    let events = state.ledger.list_for_subject(&subject.subject_id).await?;
    let entitlement = entitlement::evaluate(&events, Utc::now());

    tracing::debug!(
        subject_id = %subject.subject_id,
        rows = events.len(),
        active = entitlement.active,
        "Entitlement evaluated"
    );

    Ok(Json(SubscriptionStatusView::from(entitlement)))
}

pub async fn payments(
    State(state): State<AppState>,
    subject: AuthenticatedSubject,
) -> Result<Json<Vec<BillingEvent>>, AppError> {
    let events = state.ledger.list_for_subject(&subject.subject_id).await?;
    Ok(Json(events))
}

/// Charge the stored billing key. The ledger row is written by the `paid` webhook.
pub async fn subscribe(
    State(state): State<AppState>,
    subject: AuthenticatedSubject,
    Json(payload): Json<SubscribeRequest>,
) -> Result<(StatusCode, Json<SubscribeResponse>), AppError> {
    payload.validate()?;

    let payment_id = new_payment_id();
    tracing::info!(
        subject_id = %subject.subject_id,
        payment_id = %payment_id,
        amount = payload.amount,
        "Charging billing key"
    );

    let charge = BillingKeyPayment {
        billing_key: payload.billing_key,
        order_name: payload.order_name,
        amount: payload.amount,
        customer_id: subject.subject_id,
        currency: state.config.portone.currency.clone(),
    };

    let provider_response = state
        .gateway
        .pay_with_billing_key(&payment_id, &charge)
        .await
        .map_err(|e| {
            tracing::error!(error = %e, payment_id = %payment_id, "Billing key charge failed");
            AppError::BadGateway(format!("Billing key charge failed: {}", e))
        })?;

    Ok((
        StatusCode::CREATED,
        Json(SubscribeResponse {
            payment_id,
            provider_response,
        }),
    ))
}

/// Ask the provider to cancel a payment the subject owns. The compensating
/// ledger row is written by the resulting `cancelled` webhook.
pub async fn cancel(
    State(state): State<AppState>,
    subject: AuthenticatedSubject,
    Json(payload): Json<CancelRequest>,
) -> Result<Json<CancelResponse>, AppError> {
    payload.validate()?;

    let owned = state
        .ledger
        .find_by_transaction(&payload.transaction_key)
        .await?
        .iter()
        .any(|row| row.subject_id.as_deref() == Some(subject.subject_id.as_str()));

    if !owned {
        return Err(AppError::NotFound(anyhow::anyhow!(
            "No payment {} for this subscriber",
            payload.transaction_key
        )));
    }

    let reason = payload.reason.as_deref().unwrap_or(DEFAULT_CANCEL_REASON);
    let provider_response = state
        .gateway
        .cancel_payment(&payload.transaction_key, reason)
        .await
        .map_err(|e| {
            tracing::error!(
                error = %e,
                transaction_key = %payload.transaction_key,
                "Payment cancellation failed"
            );
            AppError::BadGateway(format!("Payment cancellation failed: {}", e))
        })?;

    tracing::info!(
        subject_id = %subject.subject_id,
        transaction_key = %payload.transaction_key,
        "Payment cancellation requested"
    );

    Ok(Json(CancelResponse {
        transaction_key: payload.transaction_key,
        provider_response,
    }))
}
