pub mod billing_event;
pub mod entitlement;

pub use billing_event::{BillingEvent, BillingStatus, InsertOutcome, NewBillingEvent};
pub use entitlement::{Entitlement, SubscriptionState, SubscriptionStatusView};
