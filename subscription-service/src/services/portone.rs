//! PortOne V2 payment provider client.
//!
//! Implements payment lookup, billing-key charges, cancellation and the
//! payment-schedule API used for monthly renewals. Every call is bounded by the
//! configured request timeout and fails fast; retries are left to the webhook
//! sender redelivering the notification.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::SecondsFormat;
use reqwest::{Client, Method, RequestBuilder, Url};
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::time::Duration;

use crate::config::PortOneConfig;
use crate::services::gateway::{
    BillingKeyPayment, PaymentDetails, PaymentGateway, ScheduleFilter, ScheduleRequest,
    ScheduledCharge,
};
use crate::services::metrics::record_provider_call;

/// PortOne client for interacting with the PortOne REST API.
#[derive(Clone)]
pub struct PortOneClient {
    client: Client,
    config: PortOneConfig,
}

/// PortOne API error response.
#[derive(Debug, Deserialize)]
pub struct PortOneError {
    #[serde(rename = "type")]
    pub error_type: Option<String>,
    pub message: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ScheduledPayment<'a> {
    billing_key: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    order_name: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    customer: Option<CustomerRef<'a>>,
    amount: AmountRef,
    currency: &'a str,
}

#[derive(Debug, Serialize)]
struct CustomerRef<'a> {
    id: &'a str,
}

#[derive(Debug, Serialize)]
struct AmountRef {
    total: i64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateScheduleBody<'a> {
    payment: ScheduledPayment<'a>,
    time_to_pay: String,
}

#[derive(Debug, Deserialize)]
struct CreateScheduleResponse {
    schedule: Option<ScheduleSummary>,
}

#[derive(Debug, Deserialize)]
struct ScheduleSummary {
    id: String,
}

#[derive(Debug, Deserialize)]
struct ScheduleList {
    #[serde(default)]
    items: Vec<ScheduledCharge>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct BillingKeyPaymentBody<'a> {
    billing_key: &'a str,
    order_name: &'a str,
    amount: AmountRef,
    customer: CustomerRef<'a>,
    currency: &'a str,
}

impl PortOneClient {
    /// Create a new PortOne client with the configured per-call timeout.
    pub fn new(config: PortOneConfig) -> Result<Self> {
        let timeout = Duration::from_secs(config.request_timeout_secs.max(1));
        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .build()
            .context("Failed to build PortOne HTTP client")?;

        Ok(Self { client, config })
    }

    /// Check if PortOne is configured (API secret is set).
    pub fn is_configured(&self) -> bool {
        !self.config.api_secret.expose_secret().is_empty()
    }

    /// Endpoint under the base URL. Each segment is percent-encoded, so ids
    /// containing `/`, `?` or `#` stay inside their own path segment.
    fn url(&self, segments: &[&str]) -> Result<Url> {
        if let Some(segment) = segments
            .iter()
            .find(|s| s.is_empty() || **s == "." || **s == "..")
        {
            return Err(anyhow!("Invalid PortOne path segment {:?}", segment));
        }

        let mut url = Url::parse(&self.config.api_base_url)
            .with_context(|| format!("Invalid PortOne base URL {}", self.config.api_base_url))?;
        url.path_segments_mut()
            .map_err(|_| anyhow!("PortOne base URL cannot carry a path"))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn request(&self, method: Method, segments: &[&str]) -> Result<RequestBuilder> {
        if !self.is_configured() {
            return Err(anyhow!("PortOne API secret is not configured"));
        }

        Ok(self.client.request(method, self.url(segments)?).header(
            reqwest::header::AUTHORIZATION,
            format!("PortOne {}", self.config.api_secret.expose_secret()),
        ))
    }

    /// Send a request and return the raw success body; non-2xx becomes an error
    /// carrying PortOne's error type and message.
    async fn send(&self, operation: &'static str, request: RequestBuilder) -> Result<String> {
        let result = self.send_inner(operation, request).await;
        record_provider_call(operation, result.is_ok());
        result
    }

    async fn send_inner(&self, operation: &'static str, request: RequestBuilder) -> Result<String> {
        let response = request
            .send()
            .await
            .with_context(|| format!("PortOne {} request failed", operation))?;

        let status = response.status();
        let body = response.text().await?;

        tracing::debug!(operation, status = %status, "PortOne response");

        if status.is_success() {
            return Ok(body);
        }

        let error: PortOneError = serde_json::from_str(&body).unwrap_or(PortOneError {
            error_type: None,
            message: Some(body.clone()),
        });
        tracing::error!(
            operation,
            status = %status,
            error_type = ?error.error_type,
            message = ?error.message,
            "PortOne request rejected"
        );

        Err(anyhow!(
            "PortOne {} failed with {}: {} - {}",
            operation,
            status.as_u16(),
            error.error_type.as_deref().unwrap_or("UNKNOWN"),
            error.message.as_deref().unwrap_or("")
        ))
    }
}

#[async_trait]
impl PaymentGateway for PortOneClient {
    async fn get_payment(&self, payment_id: &str) -> Result<PaymentDetails> {
        let request = self.request(Method::GET, &["payments", payment_id])?;
        let body = self.send("get_payment", request).await?;

        let payment: PaymentDetails =
            serde_json::from_str(&body).context("Unexpected PortOne payment payload")?;

        tracing::info!(
            payment_id = %payment_id,
            amount = payment.total_amount(),
            has_billing_key = payment.resolve_billing_key().is_some(),
            "PortOne payment fetched"
        );

        Ok(payment)
    }

    async fn create_schedule(
        &self,
        schedule_id: &str,
        request: &ScheduleRequest,
    ) -> Result<Option<String>> {
        let body = CreateScheduleBody {
            payment: ScheduledPayment {
                billing_key: &request.billing_key,
                order_name: request.order_name.as_deref(),
                customer: request.customer_id.as_deref().map(|id| CustomerRef { id }),
                amount: AmountRef {
                    total: request.amount,
                },
                currency: &request.currency,
            },
            time_to_pay: request
                .time_to_pay
                .to_rfc3339_opts(SecondsFormat::Secs, true),
        };

        let http = self
            .request(Method::POST, &["payments", schedule_id, "schedule"])?
            .json(&body);
        let response = self.send("create_schedule", http).await?;

        let provider_id = serde_json::from_str::<CreateScheduleResponse>(&response)
            .ok()
            .and_then(|r| r.schedule)
            .map(|s| s.id);

        tracing::info!(
            schedule_id = %schedule_id,
            provider_schedule_id = ?provider_id,
            time_to_pay = %body.time_to_pay,
            "PortOne payment schedule created"
        );

        Ok(provider_id)
    }

    async fn list_schedules(&self, filter: &ScheduleFilter) -> Result<Vec<ScheduledCharge>> {
        let request_body = json!({
            "filter": {
                "billingKey": filter.billing_key,
                "from": filter.from.to_rfc3339_opts(SecondsFormat::Secs, true),
                "until": filter.until.to_rfc3339_opts(SecondsFormat::Secs, true),
            }
        });

        let http = self
            .request(Method::GET, &["payment-schedules"])?
            .query(&[("requestBody", request_body.to_string())]);
        let response = self.send("list_schedules", http).await?;

        let list: ScheduleList =
            serde_json::from_str(&response).context("Unexpected PortOne schedule list payload")?;

        tracing::debug!(count = list.items.len(), "PortOne payment schedules listed");
        Ok(list.items)
    }

    async fn delete_schedules(&self, schedule_ids: &[String]) -> Result<()> {
        let http = self
            .request(Method::DELETE, &["payment-schedules"])?
            .json(&json!({ "scheduleIds": schedule_ids }));
        self.send("delete_schedules", http).await?;

        tracing::info!(schedule_ids = ?schedule_ids, "PortOne payment schedules revoked");
        Ok(())
    }

    async fn pay_with_billing_key(
        &self,
        payment_id: &str,
        payment: &BillingKeyPayment,
    ) -> Result<serde_json::Value> {
        let body = BillingKeyPaymentBody {
            billing_key: &payment.billing_key,
            order_name: &payment.order_name,
            amount: AmountRef {
                total: payment.amount,
            },
            customer: CustomerRef {
                id: &payment.customer_id,
            },
            currency: &payment.currency,
        };

        let http = self
            .request(Method::POST, &["payments", payment_id, "billing-key"])?
            .json(&body);
        let response = self.send("pay_with_billing_key", http).await?;

        tracing::info!(payment_id = %payment_id, amount = payment.amount, "Billing key charged");
        Ok(serde_json::from_str(&response).unwrap_or(serde_json::Value::Null))
    }

    async fn cancel_payment(&self, payment_id: &str, reason: &str) -> Result<serde_json::Value> {
        let http = self
            .request(Method::POST, &["payments", payment_id, "cancel"])?
            .json(&json!({ "reason": reason }));
        let response = self.send("cancel_payment", http).await?;

        tracing::info!(payment_id = %payment_id, "PortOne payment cancellation requested");
        Ok(serde_json::from_str(&response).unwrap_or(serde_json::Value::Null))
    }
}
