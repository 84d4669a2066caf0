//! Ledger row model.
//!
//! Rows are immutable. A transaction's true state is its most recently created
//! row; cancellation appends a `Cancel` row carrying the negated amount.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Billing outcome recorded by a ledger row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BillingStatus {
    Paid,
    Cancel,
}

impl BillingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BillingStatus::Paid => "Paid",
            BillingStatus::Cancel => "Cancel",
        }
    }
}

impl std::fmt::Display for BillingStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A stored ledger row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BillingEvent {
    pub id: String,
    /// Provider payment id, stable across redeliveries of the same payment.
    pub transaction_key: String,
    /// Provider customer id, set by the client to the authenticated user id.
    pub subject_id: Option<String>,
    /// Positive for a charge, negative for the cancellation of that charge.
    pub amount: i64,
    pub status: BillingStatus,
    pub period_start: DateTime<Utc>,
    pub period_end: DateTime<Utc>,
    pub grace_end: DateTime<Utc>,
    pub next_schedule_time: DateTime<Utc>,
    pub next_schedule_id: String,
    /// Assigned by the store at insertion.
    pub created_at: DateTime<Utc>,
    /// Strictly increasing insertion ordinal; breaks `created_at` ties.
    pub sequence: i64,
}

impl BillingEvent {
    /// Ordering key for "most recent row" comparisons.
    pub fn recency(&self) -> (DateTime<Utc>, i64) {
        (self.created_at, self.sequence)
    }

    pub fn is_paid(&self) -> bool {
        self.status == BillingStatus::Paid
    }

    /// Inclusive on both ends.
    pub fn entitles_at(&self, now: DateTime<Utc>) -> bool {
        self.is_paid() && self.period_start <= now && now <= self.grace_end
    }

    /// Compensating row for this one: same identity and windows, negated amount.
    pub fn cancellation(&self) -> NewBillingEvent {
        NewBillingEvent {
            transaction_key: self.transaction_key.clone(),
            subject_id: self.subject_id.clone(),
            amount: -self.amount,
            status: BillingStatus::Cancel,
            period_start: self.period_start,
            period_end: self.period_end,
            grace_end: self.grace_end,
            next_schedule_time: self.next_schedule_time,
            next_schedule_id: self.next_schedule_id.clone(),
        }
    }
}

/// A row about to be appended; the store assigns id, `created_at` and `sequence`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewBillingEvent {
    pub transaction_key: String,
    pub subject_id: Option<String>,
    pub amount: i64,
    pub status: BillingStatus,
    pub period_start: DateTime<Utc>,
    pub period_end: DateTime<Utc>,
    pub grace_end: DateTime<Utc>,
    pub next_schedule_time: DateTime<Utc>,
    pub next_schedule_id: String,
}

impl NewBillingEvent {
    /// At most one row per (transaction, status) may exist.
    pub fn idempotency_key(&self) -> String {
        format!("{}:{}", self.transaction_key, self.status.as_str())
    }
}

/// Result of an insert-if-absent append.
#[derive(Debug, Clone)]
pub enum InsertOutcome {
    Inserted(BillingEvent),
    /// A row with the same idempotency key already exists; nothing was written.
    Duplicate,
}
