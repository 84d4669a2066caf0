//! Entitlement evaluation over a subject's ledger rows.

use chrono::{DateTime, Utc};
use std::collections::HashMap;

use crate::models::{BillingEvent, Entitlement};

/// Newest row per transaction key, by `(created_at, sequence)`.
pub fn latest_per_transaction(events: &[BillingEvent]) -> Vec<&BillingEvent> {
    let mut latest: HashMap<&str, &BillingEvent> = HashMap::new();

    for event in events {
        latest
            .entry(event.transaction_key.as_str())
            .and_modify(|current| {
                if event.recency() > current.recency() {
                    *current = event;
                }
            })
            .or_insert(event);
    }

    latest.into_values().collect()
}

/// Active when any transaction's newest row is Paid and `now` falls in
/// `[period_start, grace_end]`. Reports the entitling row that runs longest.
pub fn evaluate(events: &[BillingEvent], now: DateTime<Utc>) -> Entitlement {
    let entitling = latest_per_transaction(events)
        .into_iter()
        .filter(|event| event.entitles_at(now))
        .max_by(|a, b| {
            a.grace_end
                .cmp(&b.grace_end)
                .then_with(|| a.recency().cmp(&b.recency()))
        });

    match entitling {
        Some(event) => Entitlement {
            active: true,
            transaction_key: Some(event.transaction_key.clone()),
            entitled_until: Some(event.grace_end),
        },
        None => Entitlement::inactive(),
    }
}
