//! Append-only ledger of billing events.
//!
//! Stores never update or delete rows. `insert` is an atomic insert-if-absent
//! keyed by [`NewBillingEvent::idempotency_key`], so two concurrent deliveries
//! of the same notification cannot both append.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::models::{BillingEvent, BillingStatus, InsertOutcome, NewBillingEvent};
use crate::services::error::BillingError;

#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Append a row unless one with the same idempotency key exists.
    async fn insert(&self, event: NewBillingEvent) -> Result<InsertOutcome, BillingError>;

    /// All rows for a transaction, newest first.
    async fn find_by_transaction(
        &self,
        transaction_key: &str,
    ) -> Result<Vec<BillingEvent>, BillingError>;

    /// All rows for a subject, newest first.
    async fn list_for_subject(&self, subject_id: &str) -> Result<Vec<BillingEvent>, BillingError>;

    /// Paid rows whose renewal was due at or before `cutoff`, newest first.
    async fn list_paid_renewals_due(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<BillingEvent>, BillingError>;

    async fn latest_for_transaction(
        &self,
        transaction_key: &str,
    ) -> Result<Option<BillingEvent>, BillingError> {
        Ok(self
            .find_by_transaction(transaction_key)
            .await?
            .into_iter()
            .next())
    }
}

/// Newest first: descending `(created_at, sequence)`.
pub fn sort_newest_first(events: &mut [BillingEvent]) {
    events.sort_by(|a, b| b.recency().cmp(&a.recency()));
}

#[derive(Default)]
struct MemoryState {
    rows: Vec<BillingEvent>,
    next_sequence: i64,
}

/// Process-local ledger used for development and tests.
#[derive(Clone, Default)]
pub struct InMemoryLedgerStore {
    state: Arc<RwLock<MemoryState>>,
}

impl InMemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored rows.
    pub async fn len(&self) -> usize {
        self.state.read().await.rows.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    async fn select<F>(&self, predicate: F) -> Vec<BillingEvent>
    where
        F: Fn(&BillingEvent) -> bool,
    {
        let state = self.state.read().await;
        let mut rows: Vec<BillingEvent> =
            state.rows.iter().filter(|row| predicate(row)).cloned().collect();
        sort_newest_first(&mut rows);
        rows
    }
}

#[async_trait]
impl LedgerStore for InMemoryLedgerStore {
    async fn insert(&self, event: NewBillingEvent) -> Result<InsertOutcome, BillingError> {
        let mut state = self.state.write().await;

        let key = event.idempotency_key();
        let exists = state.rows.iter().any(|row| {
            row.transaction_key == event.transaction_key && row.status == event.status
        });
        if exists {
            tracing::debug!(idempotency_key = %key, "Ledger insert skipped, key exists");
            return Ok(InsertOutcome::Duplicate);
        }

        // created_at never moves backwards even if the wall clock does.
        let now = Utc::now();
        let created_at = state
            .rows
            .last()
            .map(|last| last.created_at.max(now))
            .unwrap_or(now);

        state.next_sequence += 1;
        let row = BillingEvent {
            id: Uuid::new_v4().to_string(),
            transaction_key: event.transaction_key,
            subject_id: event.subject_id,
            amount: event.amount,
            status: event.status,
            period_start: event.period_start,
            period_end: event.period_end,
            grace_end: event.grace_end,
            next_schedule_time: event.next_schedule_time,
            next_schedule_id: event.next_schedule_id,
            created_at,
            sequence: state.next_sequence,
        };
        state.rows.push(row.clone());

        Ok(InsertOutcome::Inserted(row))
    }

    async fn find_by_transaction(
        &self,
        transaction_key: &str,
    ) -> Result<Vec<BillingEvent>, BillingError> {
        Ok(self
            .select(|row| row.transaction_key == transaction_key)
            .await)
    }

    async fn list_for_subject(&self, subject_id: &str) -> Result<Vec<BillingEvent>, BillingError> {
        Ok(self
            .select(|row| row.subject_id.as_deref() == Some(subject_id))
            .await)
    }

    async fn list_paid_renewals_due(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<BillingEvent>, BillingError> {
        Ok(self
            .select(|row| row.status == BillingStatus::Paid && row.next_schedule_time <= cutoff)
            .await)
    }
}
