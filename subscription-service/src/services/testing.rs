//! In-process payment provider used by unit tests.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use crate::services::gateway::{
    BillingKeyPayment, PaymentDetails, PaymentGateway, ScheduleFilter, ScheduleRequest,
    ScheduledCharge,
};

#[derive(Default)]
pub struct FakeGateway {
    payments: Mutex<HashMap<String, PaymentDetails>>,
    schedules: Mutex<Vec<ScheduledCharge>>,
    created: Mutex<Vec<(String, ScheduleRequest)>>,
    deleted: Mutex<Vec<String>>,
    fail_lookup: AtomicBool,
    fail_schedule: AtomicBool,
}

impl FakeGateway {
    pub fn with_payment(self, payment_id: &str, details: PaymentDetails) -> Self {
        self.payments
            .lock()
            .unwrap()
            .insert(payment_id.to_string(), details);
        self
    }

    pub fn fail_lookups(&self) {
        self.fail_lookup.store(true, Ordering::SeqCst);
    }

    pub fn fail_schedules(&self) {
        self.fail_schedule.store(true, Ordering::SeqCst);
    }

    pub fn forget_schedules(&self) {
        self.schedules.lock().unwrap().clear();
    }

    pub fn created(&self) -> Vec<(String, ScheduleRequest)> {
        self.created.lock().unwrap().clone()
    }

    pub fn deleted(&self) -> Vec<String> {
        self.deleted.lock().unwrap().clone()
    }

    pub fn live_schedules(&self) -> Vec<ScheduledCharge> {
        self.schedules.lock().unwrap().clone()
    }
}

pub fn paid_details(amount: i64, billing_key: Option<&str>) -> PaymentDetails {
    serde_json::from_value(serde_json::json!({
        "amount": { "total": amount },
        "method": { "billingKey": billing_key },
        "orderName": "Monthly magazine",
        "customer": { "id": "user-1" }
    }))
    .unwrap()
}

#[async_trait]
impl PaymentGateway for FakeGateway {
    async fn get_payment(&self, payment_id: &str) -> anyhow::Result<PaymentDetails> {
        if self.fail_lookup.load(Ordering::SeqCst) {
            anyhow::bail!("provider unavailable");
        }
        self.payments
            .lock()
            .unwrap()
            .get(payment_id)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("payment {} not found", payment_id))
    }

    async fn create_schedule(
        &self,
        schedule_id: &str,
        request: &ScheduleRequest,
    ) -> anyhow::Result<Option<String>> {
        if self.fail_schedule.load(Ordering::SeqCst) {
            anyhow::bail!("scheduler unavailable");
        }
        self.created
            .lock()
            .unwrap()
            .push((schedule_id.to_string(), request.clone()));
        self.schedules.lock().unwrap().push(ScheduledCharge {
            id: format!("sch-{}", schedule_id),
            payment_id: Some(schedule_id.to_string()),
            billing_key: Some(request.billing_key.clone()),
            status: Some("SCHEDULED".to_string()),
            time_to_pay: Some(request.time_to_pay.to_rfc3339()),
        });
        Ok(Some(format!("sch-{}", schedule_id)))
    }

    async fn list_schedules(&self, filter: &ScheduleFilter) -> anyhow::Result<Vec<ScheduledCharge>> {
        if self.fail_schedule.load(Ordering::SeqCst) {
            anyhow::bail!("scheduler unavailable");
        }
        Ok(self
            .schedules
            .lock()
            .unwrap()
            .iter()
            .filter(|s| s.billing_key.as_deref() == Some(filter.billing_key.as_str()))
            .cloned()
            .collect())
    }

    async fn delete_schedules(&self, schedule_ids: &[String]) -> anyhow::Result<()> {
        if self.fail_schedule.load(Ordering::SeqCst) {
            anyhow::bail!("scheduler unavailable");
        }
        self.schedules
            .lock()
            .unwrap()
            .retain(|s| !schedule_ids.contains(&s.id));
        self.deleted.lock().unwrap().extend_from_slice(schedule_ids);
        Ok(())
    }

    async fn pay_with_billing_key(
        &self,
        payment_id: &str,
        _payment: &BillingKeyPayment,
    ) -> anyhow::Result<serde_json::Value> {
        Ok(serde_json::json!({ "payment": { "id": payment_id } }))
    }

    async fn cancel_payment(&self, payment_id: &str, _reason: &str) -> anyhow::Result<serde_json::Value> {
        Ok(serde_json::json!({ "cancellation": { "id": payment_id } }))
    }
}
