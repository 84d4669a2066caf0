pub mod entitlement;
pub mod error;
pub mod gateway;
pub mod ledger;
pub mod metrics;
pub mod orchestrator;
pub mod policy;
pub mod portone;
pub mod repository;
pub mod schedule;
pub mod webhook;

#[cfg(test)]
pub(crate) mod testing;

pub use error::BillingError;
pub use gateway::PaymentGateway;
pub use ledger::{InMemoryLedgerStore, LedgerStore};
pub use metrics::{get_metrics, init_metrics};
pub use orchestrator::{BillingOrchestrator, StepOutcome, StepReport, StepStatus};
pub use policy::BillingPolicy;
pub use portone::PortOneClient;
pub use repository::MongoLedgerStore;
pub use schedule::{OrphanedRenewal, ScheduleReconciler};
pub use webhook::{WebhookEvent, WebhookVerifier};
