//! Inbound payment notification normalization and signature verification.

use chrono::{DateTime, Utc};
use secrecy::{ExposeSecret, Secret};
use serde::Deserialize;
use service_core::utils::signature::verify_webhook;

use crate::services::error::BillingError;

/// Maximum accepted skew between the delivery timestamp and now.
pub const SIGNATURE_TOLERANCE_SECS: u64 = 5 * 60;

/// Raw notification body. Providers have used both spellings of the payment id.
#[derive(Debug, Default, Deserialize)]
pub struct RawWebhook {
    pub payment_id: Option<String>,
    #[serde(rename = "paymentId")]
    pub payment_id_camel: Option<String>,
    pub status: Option<String>,
}

/// Canonical classification of a notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebhookEvent {
    Paid { transaction_id: String },
    Cancelled { transaction_id: String },
    Invalid(String),
}

impl WebhookEvent {
    /// Classify a raw body. Never fails; unparseable input becomes `Invalid`.
    pub fn from_body(body: &[u8]) -> Self {
        match serde_json::from_slice::<RawWebhook>(body) {
            Ok(raw) => Self::normalize(raw),
            Err(e) => WebhookEvent::Invalid(format!("Malformed webhook body: {}", e)),
        }
    }

    pub fn normalize(raw: RawWebhook) -> Self {
        let transaction_id = raw
            .payment_id
            .or(raw.payment_id_camel)
            .map(|id| id.trim().to_string())
            .filter(|id| !id.is_empty());

        let Some(transaction_id) = transaction_id else {
            return WebhookEvent::Invalid("Missing payment id".to_string());
        };

        let status = raw.status.unwrap_or_default().trim().to_lowercase();
        match status.as_str() {
            "paid" => WebhookEvent::Paid { transaction_id },
            "cancelled" => WebhookEvent::Cancelled { transaction_id },
            "" => WebhookEvent::Invalid("Missing status".to_string()),
            other => WebhookEvent::Invalid(format!("Unsupported status: {}", other)),
        }
    }

    /// Metric label.
    pub fn kind(&self) -> &'static str {
        match self {
            WebhookEvent::Paid { .. } => "paid",
            WebhookEvent::Cancelled { .. } => "cancelled",
            WebhookEvent::Invalid(_) => "invalid",
        }
    }

    pub fn into_result(self) -> Result<Self, BillingError> {
        match self {
            WebhookEvent::Invalid(reason) => Err(BillingError::Validation(reason)),
            event => Ok(event),
        }
    }
}

/// Signature headers of one delivery.
#[derive(Debug, Clone, Copy)]
pub struct SignedDelivery<'a> {
    pub webhook_id: &'a str,
    pub timestamp: &'a str,
    pub signature: &'a str,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum SignatureError {
    #[error("Missing webhook signature headers")]
    MissingHeaders,
    #[error("Invalid webhook timestamp")]
    InvalidTimestamp,
    #[error("Webhook timestamp outside tolerance")]
    Expired,
    #[error("Webhook signature mismatch")]
    Mismatch,
}

/// Verifies Standard Webhooks signatures with a shared secret.
#[derive(Clone)]
pub struct WebhookVerifier {
    secret: Secret<String>,
    tolerance_secs: u64,
}

impl WebhookVerifier {
    pub fn new(secret: Secret<String>) -> Self {
        Self {
            secret,
            tolerance_secs: SIGNATURE_TOLERANCE_SECS,
        }
    }

    pub fn verify(
        &self,
        delivery: Option<SignedDelivery<'_>>,
        body: &[u8],
        now: DateTime<Utc>,
    ) -> Result<(), SignatureError> {
        let delivery = delivery.ok_or(SignatureError::MissingHeaders)?;

        let timestamp: i64 = delivery
            .timestamp
            .trim()
            .parse()
            .map_err(|_| SignatureError::InvalidTimestamp)?;

        if now.timestamp().abs_diff(timestamp) > self.tolerance_secs {
            return Err(SignatureError::Expired);
        }

        let matched = verify_webhook(
            self.secret.expose_secret(),
            delivery.webhook_id,
            timestamp,
            body,
            delivery.signature,
        )
        .map_err(|e| {
            tracing::error!(error = %e, "Webhook secret unusable");
            SignatureError::Mismatch
        })?;

        if matched {
            Ok(())
        } else {
            Err(SignatureError::Mismatch)
        }
    }
}
