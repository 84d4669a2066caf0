//! Webhook-driven billing state machine.
//!
//! The Paid path is a two-step saga: the ledger append is the durability point,
//! the renewal schedule comes second and is never rolled back into the ledger.
//! A Paid row left without a schedule is surfaced by
//! [`ScheduleReconciler::find_orphaned_renewals`].

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use uuid::Uuid;

use crate::models::{BillingEvent, BillingStatus, InsertOutcome, NewBillingEvent};
use crate::services::error::BillingError;
use crate::services::gateway::{PaymentGateway, ScheduleRequest};
use crate::services::ledger::LedgerStore;
use crate::services::policy::BillingPolicy;
use crate::services::schedule::ScheduleReconciler;
use crate::services::webhook::WebhookEvent;

pub const STEP_PAYMENT_INQUIRY: &str = "step1_payment_inquiry";
pub const STEP_DATABASE_INSERT: &str = "step2_database_insert";
pub const STEP_SUBSCRIPTION_SCHEDULE: &str = "step3_subscription_schedule";

pub const STEP_LEDGER_LOOKUP: &str = "step1_ledger_lookup";
pub const STEP_CANCEL_INSERT: &str = "step2_cancel_insert";
pub const STEP_BILLING_KEY: &str = "step3_billing_key_resolution";
pub const STEP_SCHEDULE_LOOKUP: &str = "step4_schedule_lookup";
pub const STEP_SCHEDULE_DELETE: &str = "step5_schedule_delete";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    Completed,
    Skipped,
}

#[derive(Debug, Clone, Serialize)]
pub struct StepOutcome {
    pub status: StepStatus,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl StepOutcome {
    pub fn completed(message: impl Into<String>, data: Value) -> Self {
        Self {
            status: StepStatus::Completed,
            message: message.into(),
            data: Some(data),
        }
    }

    pub fn skipped(message: impl Into<String>) -> Self {
        Self {
            status: StepStatus::Skipped,
            message: message.into(),
            data: None,
        }
    }
}

/// Per-step outcome of one webhook delivery. Informational only.
#[derive(Debug, Clone, Serialize)]
pub struct StepReport {
    pub success: bool,
    pub steps: BTreeMap<String, StepOutcome>,
    pub timestamp: DateTime<Utc>,
}

impl StepReport {
    fn new(now: DateTime<Utc>) -> Self {
        Self {
            success: true,
            steps: BTreeMap::new(),
            timestamp: now,
        }
    }

    fn record(&mut self, step: &str, outcome: StepOutcome) {
        tracing::info!(
            step,
            status = ?outcome.status,
            message = %outcome.message,
            "Billing step"
        );
        self.steps.insert(step.to_string(), outcome);
    }

    fn skip_all(&mut self, steps: &[&str], message: &str) {
        for step in steps {
            self.record(step, StepOutcome::skipped(message));
        }
    }

    pub fn status_of(&self, step: &str) -> Option<StepStatus> {
        self.steps.get(step).map(|outcome| outcome.status)
    }
}

#[derive(Clone)]
pub struct BillingOrchestrator {
    ledger: Arc<dyn LedgerStore>,
    gateway: Arc<dyn PaymentGateway>,
    policy: BillingPolicy,
    reconciler: ScheduleReconciler,
    currency: String,
}

impl BillingOrchestrator {
    pub fn new(
        ledger: Arc<dyn LedgerStore>,
        gateway: Arc<dyn PaymentGateway>,
        policy: BillingPolicy,
        currency: String,
    ) -> Self {
        let reconciler = ScheduleReconciler::new(ledger.clone(), gateway.clone(), policy.clone());
        Self {
            ledger,
            gateway,
            policy,
            reconciler,
            currency,
        }
    }

    pub fn reconciler(&self) -> &ScheduleReconciler {
        &self.reconciler
    }

    pub async fn handle(
        &self,
        event: WebhookEvent,
        now: DateTime<Utc>,
    ) -> Result<StepReport, BillingError> {
        match event {
            WebhookEvent::Paid { transaction_id } => self.handle_paid(&transaction_id, now).await,
            WebhookEvent::Cancelled { transaction_id } => {
                self.handle_cancelled(&transaction_id, now).await
            }
            WebhookEvent::Invalid(reason) => Err(BillingError::Validation(reason)),
        }
    }

    #[tracing::instrument(skip(self, now), fields(path = "paid"))]
    pub async fn handle_paid(
        &self,
        transaction_id: &str,
        now: DateTime<Utc>,
    ) -> Result<StepReport, BillingError> {
        let mut report = StepReport::new(now);

        // Redelivery guard; the store's insert-if-absent covers concurrent duplicates.
        let existing = self.ledger.find_by_transaction(transaction_id).await?;
        if !existing.is_empty() {
            tracing::info!(rows = existing.len(), "Payment already recorded, skipping");
            report.skip_all(
                &[
                    STEP_PAYMENT_INQUIRY,
                    STEP_DATABASE_INSERT,
                    STEP_SUBSCRIPTION_SCHEDULE,
                ],
                "Already recorded",
            );
            return Ok(report);
        }

        let payment = self
            .gateway
            .get_payment(transaction_id)
            .await
            .map_err(|e| BillingError::upstream(transaction_id, e))?;

        let billing_key = payment.resolve_billing_key().map(str::to_string);
        report.record(
            STEP_PAYMENT_INQUIRY,
            StepOutcome::completed(
                "Payment details fetched",
                json!({
                    "amount": payment.total_amount(),
                    "order_name": payment.order_name,
                    "customer_id": payment.customer_id(),
                    "has_billing_key": billing_key.is_some(),
                }),
            ),
        );

        let window = self.policy.window(now);
        let minute = BillingPolicy::random_renewal_minute();
        let next_schedule_time = self.policy.next_renewal_at(window.period_end, minute);
        let next_schedule_id = Uuid::new_v4().to_string();

        let row = NewBillingEvent {
            transaction_key: transaction_id.to_string(),
            subject_id: payment.customer_id().map(str::to_string),
            amount: payment.total_amount(),
            status: BillingStatus::Paid,
            period_start: window.period_start,
            period_end: window.period_end,
            grace_end: window.grace_end,
            next_schedule_time,
            next_schedule_id: next_schedule_id.clone(),
        };

        tracing::info!(
            next_schedule_id = %next_schedule_id,
            next_schedule_time = %next_schedule_time,
            "Renewal saga started: ledger append, then schedule creation"
        );

        let recorded = match self.ledger.insert(row).await? {
            InsertOutcome::Inserted(recorded) => recorded,
            InsertOutcome::Duplicate => {
                report.skip_all(
                    &[STEP_DATABASE_INSERT, STEP_SUBSCRIPTION_SCHEDULE],
                    "Recorded by a concurrent delivery",
                );
                return Ok(report);
            }
        };

        report.record(
            STEP_DATABASE_INSERT,
            StepOutcome::completed(
                "Ledger row recorded",
                json!({
                    "id": recorded.id,
                    "transaction_key": recorded.transaction_key,
                    "amount": recorded.amount,
                    "period_start": recorded.period_start,
                    "period_end": recorded.period_end,
                    "grace_end": recorded.grace_end,
                    "next_schedule_time": recorded.next_schedule_time,
                    "next_schedule_id": recorded.next_schedule_id,
                }),
            ),
        );

        let Some(billing_key) = billing_key else {
            tracing::error!("No billing key on payment; renewal not scheduled");
            report.record(
                STEP_SUBSCRIPTION_SCHEDULE,
                StepOutcome::skipped("No billing key on payment"),
            );
            return Ok(report);
        };

        let request = ScheduleRequest {
            billing_key,
            order_name: payment.order_name.clone(),
            customer_id: payment.customer_id().map(str::to_string),
            amount: payment.total_amount(),
            currency: self.currency.clone(),
            time_to_pay: next_schedule_time,
        };

        let provider_schedule_id = self
            .gateway
            .create_schedule(&next_schedule_id, &request)
            .await
            .map_err(|e| {
                tracing::error!(
                    error = %e,
                    next_schedule_id = %next_schedule_id,
                    "Renewal schedule failed after ledger append; row kept"
                );
                BillingError::schedule("create", e)
            })?;

        report.record(
            STEP_SUBSCRIPTION_SCHEDULE,
            StepOutcome::completed(
                "Renewal scheduled",
                json!({
                    "schedule_id": next_schedule_id,
                    "provider_schedule_id": provider_schedule_id,
                    "time_to_pay": next_schedule_time,
                }),
            ),
        );

        Ok(report)
    }

    #[tracing::instrument(skip(self, now), fields(path = "cancelled"))]
    pub async fn handle_cancelled(
        &self,
        transaction_id: &str,
        now: DateTime<Utc>,
    ) -> Result<StepReport, BillingError> {
        let mut report = StepReport::new(now);

        let latest = self
            .ledger
            .latest_for_transaction(transaction_id)
            .await?
            .ok_or_else(|| BillingError::UnrecordedTransaction(transaction_id.to_string()))?;

        report.record(
            STEP_LEDGER_LOOKUP,
            StepOutcome::completed(
                "Ledger row found",
                json!({
                    "status": latest.status,
                    "next_schedule_id": latest.next_schedule_id,
                    "next_schedule_time": latest.next_schedule_time,
                }),
            ),
        );

        self.append_cancellation(&latest, &mut report).await?;

        let payment = self
            .gateway
            .get_payment(transaction_id)
            .await
            .map_err(|e| BillingError::upstream(transaction_id, e))?;

        let Some(billing_key) = payment.resolve_billing_key() else {
            tracing::warn!("No billing key resolvable; schedule cleanup skipped");
            report.skip_all(
                &[STEP_BILLING_KEY, STEP_SCHEDULE_LOOKUP, STEP_SCHEDULE_DELETE],
                "No billing key on payment",
            );
            return Ok(report);
        };

        report.record(
            STEP_BILLING_KEY,
            StepOutcome::completed("Billing key resolved", json!({ "resolved": true })),
        );

        let Some(charge) = self
            .reconciler
            .find_pending_charge(billing_key, &latest)
            .await?
        else {
            report.skip_all(
                &[STEP_SCHEDULE_LOOKUP, STEP_SCHEDULE_DELETE],
                "No scheduled charge matches",
            );
            return Ok(report);
        };

        report.record(
            STEP_SCHEDULE_LOOKUP,
            StepOutcome::completed(
                "Scheduled charge found",
                json!({
                    "schedule_id": charge.id,
                    "status": charge.status,
                    "time_to_pay": charge.time_to_pay,
                }),
            ),
        );

        self.reconciler.cancel_charge(&charge).await?;

        report.record(
            STEP_SCHEDULE_DELETE,
            StepOutcome::completed("Scheduled charge revoked", json!({ "schedule_id": charge.id })),
        );

        Ok(report)
    }

    async fn append_cancellation(
        &self,
        latest: &BillingEvent,
        report: &mut StepReport,
    ) -> Result<(), BillingError> {
        if latest.status == BillingStatus::Cancel {
            report.record(STEP_CANCEL_INSERT, StepOutcome::skipped("Already cancelled"));
            return Ok(());
        }

        match self.ledger.insert(latest.cancellation()).await? {
            InsertOutcome::Inserted(row) => report.record(
                STEP_CANCEL_INSERT,
                StepOutcome::completed(
                    "Compensating row recorded",
                    json!({ "id": row.id, "amount": row.amount }),
                ),
            ),
            InsertOutcome::Duplicate => {
                report.record(STEP_CANCEL_INSERT, StepOutcome::skipped("Already cancelled"))
            }
        }

        Ok(())
    }
}
