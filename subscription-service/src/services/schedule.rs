//! Reconciliation between ledger rows and the provider's scheduled charges.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;

use crate::models::BillingEvent;
use crate::services::error::BillingError;
use crate::services::gateway::{PaymentGateway, ScheduleFilter, ScheduledCharge};
use crate::services::ledger::LedgerStore;
use crate::services::policy::BillingPolicy;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OrphanReason {
    /// The provider no longer reports a billing key for the payment.
    MissingBillingKey,
    /// No schedule in any state carries the row's schedule id.
    ScheduleNotFound,
}

/// A paid period whose renewal is due but has no scheduled charge behind it.
#[derive(Debug, Clone, Serialize)]
pub struct OrphanedRenewal {
    pub transaction_key: String,
    pub subject_id: Option<String>,
    pub next_schedule_id: String,
    pub next_schedule_time: DateTime<Utc>,
    pub period_end: DateTime<Utc>,
    pub reason: OrphanReason,
}

#[derive(Clone)]
pub struct ScheduleReconciler {
    ledger: Arc<dyn LedgerStore>,
    gateway: Arc<dyn PaymentGateway>,
    policy: BillingPolicy,
}

impl ScheduleReconciler {
    pub fn new(
        ledger: Arc<dyn LedgerStore>,
        gateway: Arc<dyn PaymentGateway>,
        policy: BillingPolicy,
    ) -> Self {
        Self {
            ledger,
            gateway,
            policy,
        }
    }

    /// Scheduled charge registered for `event`, searched on `billing_key`
    /// around the row's renewal time.
    pub async fn find_pending_charge(
        &self,
        billing_key: &str,
        event: &BillingEvent,
    ) -> Result<Option<ScheduledCharge>, BillingError> {
        let (from, until) = self.policy.lookup_range(event.next_schedule_time);
        let filter = ScheduleFilter {
            billing_key: billing_key.to_string(),
            from,
            until,
        };

        let schedules = self
            .gateway
            .list_schedules(&filter)
            .await
            .map_err(|e| BillingError::schedule("list", e))?;

        let found = schedules
            .into_iter()
            .find(|charge| charge.matches(&event.next_schedule_id));

        tracing::debug!(
            transaction_key = %event.transaction_key,
            next_schedule_id = %event.next_schedule_id,
            found = found.is_some(),
            "Scheduled charge lookup"
        );

        Ok(found)
    }

    pub async fn cancel_charge(&self, charge: &ScheduledCharge) -> Result<(), BillingError> {
        self.gateway
            .delete_schedules(std::slice::from_ref(&charge.id))
            .await
            .map_err(|e| BillingError::schedule("delete", e))
    }

    /// Paid periods due for renewal at `now` with no scheduled charge behind
    /// them. Transactions whose newest row is a cancellation are ignored.
    pub async fn find_orphaned_renewals(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<OrphanedRenewal>, BillingError> {
        let due = self.ledger.list_paid_renewals_due(now).await?;
        let mut seen = HashSet::new();
        let mut orphans = Vec::new();

        for row in due {
            if !seen.insert(row.transaction_key.clone()) {
                continue;
            }

            let latest = self.ledger.latest_for_transaction(&row.transaction_key).await?;
            let Some(latest) = latest.filter(|latest| latest.is_paid()) else {
                continue;
            };

            let payment = self
                .gateway
                .get_payment(&latest.transaction_key)
                .await
                .map_err(|e| BillingError::upstream(&latest.transaction_key, e))?;

            let reason = match payment.resolve_billing_key() {
                None => Some(OrphanReason::MissingBillingKey),
                Some(billing_key) => match self.find_pending_charge(billing_key, &latest).await? {
                    Some(_) => None,
                    None => Some(OrphanReason::ScheduleNotFound),
                },
            };

            if let Some(reason) = reason {
                tracing::warn!(
                    transaction_key = %latest.transaction_key,
                    next_schedule_id = %latest.next_schedule_id,
                    reason = ?reason,
                    "Orphaned renewal detected"
                );
                orphans.push(OrphanedRenewal {
                    transaction_key: latest.transaction_key,
                    subject_id: latest.subject_id,
                    next_schedule_id: latest.next_schedule_id,
                    next_schedule_time: latest.next_schedule_time,
                    period_end: latest.period_end,
                    reason,
                });
            }
        }

        tracing::info!(count = orphans.len(), "Orphaned renewal sweep finished");
        Ok(orphans)
    }
}
