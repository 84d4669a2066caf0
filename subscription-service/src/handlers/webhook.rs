//! Payment provider webhook endpoint.

use axum::{body::Bytes, extract::State, http::HeaderMap, Json};
use chrono::Utc;
use service_core::error::AppError;

use crate::services::metrics::record_webhook;
use crate::services::orchestrator::StepReport;
use crate::services::webhook::{SignedDelivery, WebhookEvent};
use crate::AppState;

const WEBHOOK_ID_HEADER: &str = "webhook-id";
const WEBHOOK_TIMESTAMP_HEADER: &str = "webhook-timestamp";
const WEBHOOK_SIGNATURE_HEADER: &str = "webhook-signature";

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

fn signed_delivery(headers: &HeaderMap) -> Option<SignedDelivery<'_>> {
    Some(SignedDelivery {
        webhook_id: header(headers, WEBHOOK_ID_HEADER)?,
        timestamp: header(headers, WEBHOOK_TIMESTAMP_HEADER)?,
        signature: header(headers, WEBHOOK_SIGNATURE_HEADER)?,
    })
}

/// PortOne payment notification.
///
/// 200 with a step report on success or graceful skip, 400 for unclassifiable
/// payloads, 500 for downstream failures so the provider redelivers.
pub async fn portone_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<StepReport>, AppError> {
    if let Some(verifier) = &state.webhook_verifier {
        verifier
            .verify(signed_delivery(&headers), &body, Utc::now())
            .map_err(|e| {
                record_webhook("unverified", "rejected");
                AppError::Unauthorized(anyhow::anyhow!(e))
            })?;
    }

    let event = WebhookEvent::from_body(&body);
    let kind = event.kind();

    tracing::info!(event = ?event, "Payment webhook received");

    let event = event.into_result().map_err(|e| {
        record_webhook(kind, e.kind());
        AppError::from(e)
    })?;

    match state.orchestrator.handle(event, Utc::now()).await {
        Ok(report) => {
            record_webhook(kind, "processed");
            Ok(Json(report))
        }
        Err(e) => {
            record_webhook(kind, e.kind());
            tracing::error!(error = %e, kind = e.kind(), "Payment webhook failed");
            Err(e.into())
        }
    }
}
