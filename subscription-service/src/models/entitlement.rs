//! Derived subscription entitlement. Never stored.

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Outcome of evaluating a subject's ledger at one instant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Entitlement {
    pub active: bool,
    /// Newest transaction currently granting access.
    pub transaction_key: Option<String>,
    /// Grace end of that transaction.
    pub entitled_until: Option<DateTime<Utc>>,
}

impl Entitlement {
    pub fn inactive() -> Self {
        Self {
            active: false,
            transaction_key: None,
            entitled_until: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionState {
    Subscribed,
    Free,
}

/// Response body of `GET /subscriptions/status`.
#[derive(Debug, Clone, Serialize)]
pub struct SubscriptionStatusView {
    pub active: bool,
    pub status: SubscriptionState,
    pub can_cancel: bool,
    pub can_subscribe: bool,
    pub transaction_key: Option<String>,
    pub entitled_until: Option<DateTime<Utc>>,
}

impl From<Entitlement> for SubscriptionStatusView {
    fn from(entitlement: Entitlement) -> Self {
        let status = if entitlement.active {
            SubscriptionState::Subscribed
        } else {
            SubscriptionState::Free
        };

        Self {
            active: entitlement.active,
            status,
            can_cancel: entitlement.active,
            can_subscribe: !entitlement.active,
            transaction_key: entitlement.transaction_key,
            entitled_until: entitlement.entitled_until,
        }
    }
}
