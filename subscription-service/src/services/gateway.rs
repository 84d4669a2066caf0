//! Payment provider port.
//!
//! The provider owns payments and scheduled charges. This service only keeps the
//! mapping from ledger rows to schedule ids, so everything it needs from the
//! provider goes through [`PaymentGateway`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct PaymentAmount {
    #[serde(default)]
    pub total: i64,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentMethod {
    pub billing_key: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct PaymentCustomer {
    pub id: Option<String>,
}

/// Authoritative payment details as returned by `GET /payments/{id}`.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentDetails {
    pub id: Option<String>,
    pub status: Option<String>,
    #[serde(default)]
    pub amount: PaymentAmount,
    pub billing_key: Option<String>,
    /// Older payload shape nests the billing key under `method`.
    pub method: Option<PaymentMethod>,
    pub order_name: Option<String>,
    pub customer: Option<PaymentCustomer>,
    pub currency: Option<String>,
}

impl PaymentDetails {
    /// Billing method token: top-level `billingKey`, else `method.billingKey`.
    pub fn resolve_billing_key(&self) -> Option<&str> {
        self.billing_key
            .as_deref()
            .or_else(|| self.method.as_ref().and_then(|m| m.billing_key.as_deref()))
            .filter(|key| !key.is_empty())
    }

    pub fn total_amount(&self) -> i64 {
        self.amount.total
    }

    pub fn customer_id(&self) -> Option<&str> {
        self.customer
            .as_ref()
            .and_then(|c| c.id.as_deref())
            .filter(|id| !id.is_empty())
    }
}

/// Charge to register with the provider's scheduler.
#[derive(Debug, Clone)]
pub struct ScheduleRequest {
    pub billing_key: String,
    pub order_name: Option<String>,
    pub customer_id: Option<String>,
    pub amount: i64,
    pub currency: String,
    pub time_to_pay: DateTime<Utc>,
}

/// A charge registered with the provider's scheduler.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduledCharge {
    pub id: String,
    /// Payment id the schedule will create when it fires.
    pub payment_id: Option<String>,
    pub billing_key: Option<String>,
    pub status: Option<String>,
    pub time_to_pay: Option<String>,
}

impl ScheduledCharge {
    /// Schedules are registered under the ledger's `next_schedule_id`; depending on
    /// the provider response that id shows up as the schedule id or its payment id.
    pub fn matches(&self, schedule_id: &str) -> bool {
        self.id == schedule_id || self.payment_id.as_deref() == Some(schedule_id)
    }
}

/// Time-window query for scheduled charges on one billing method.
#[derive(Debug, Clone)]
pub struct ScheduleFilter {
    pub billing_key: String,
    pub from: DateTime<Utc>,
    pub until: DateTime<Utc>,
}

/// One-off charge against a stored billing method.
#[derive(Debug, Clone)]
pub struct BillingKeyPayment {
    pub billing_key: String,
    pub order_name: String,
    pub amount: i64,
    pub customer_id: String,
    pub currency: String,
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn get_payment(&self, payment_id: &str) -> anyhow::Result<PaymentDetails>;

    /// Register a future charge under `schedule_id`. Returns the provider's schedule id.
    async fn create_schedule(
        &self,
        schedule_id: &str,
        request: &ScheduleRequest,
    ) -> anyhow::Result<Option<String>>;

    async fn list_schedules(&self, filter: &ScheduleFilter) -> anyhow::Result<Vec<ScheduledCharge>>;

    async fn delete_schedules(&self, schedule_ids: &[String]) -> anyhow::Result<()>;

    async fn pay_with_billing_key(
        &self,
        payment_id: &str,
        payment: &BillingKeyPayment,
    ) -> anyhow::Result<serde_json::Value>;

    async fn cancel_payment(&self, payment_id: &str, reason: &str) -> anyhow::Result<serde_json::Value>;
}
