use service_core::error::AppError;
use thiserror::Error;

/// Failure classes of the billing reconciliation core.
#[derive(Error, Debug)]
pub enum BillingError {
    /// Malformed or unsupported webhook payload. Not retried.
    #[error("Invalid webhook: {0}")]
    Validation(String),

    /// Provider payment lookup failed; the provider is expected to redeliver.
    #[error("Payment lookup failed for {transaction_id}: {source:#}")]
    UpstreamLookup {
        transaction_id: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("Ledger {operation} failed: {source:#}")]
    Persistence {
        operation: &'static str,
        #[source]
        source: anyhow::Error,
    },

    #[error("Schedule {operation} failed: {source:#}")]
    ScheduleOperation {
        operation: &'static str,
        #[source]
        source: anyhow::Error,
    },

    /// Cancellation for a transaction the ledger has never seen.
    #[error("No ledger row for transaction {0}")]
    UnrecordedTransaction(String),
}

impl BillingError {
    pub fn persistence(operation: &'static str, source: impl Into<anyhow::Error>) -> Self {
        BillingError::Persistence {
            operation,
            source: source.into(),
        }
    }

    pub fn schedule(operation: &'static str, source: impl Into<anyhow::Error>) -> Self {
        BillingError::ScheduleOperation {
            operation,
            source: source.into(),
        }
    }

    pub fn upstream(transaction_id: &str, source: impl Into<anyhow::Error>) -> Self {
        BillingError::UpstreamLookup {
            transaction_id: transaction_id.to_string(),
            source: source.into(),
        }
    }

    /// Label used by the webhook outcome metric.
    pub fn kind(&self) -> &'static str {
        match self {
            BillingError::Validation(_) => "validation",
            BillingError::UpstreamLookup { .. } => "upstream_lookup",
            BillingError::Persistence { .. } => "persistence",
            BillingError::ScheduleOperation { .. } => "schedule_operation",
            BillingError::UnrecordedTransaction(_) => "unrecorded_transaction",
        }
    }
}

impl From<BillingError> for AppError {
    fn from(err: BillingError) -> Self {
        match err {
            BillingError::Validation(reason) => AppError::BadRequest(anyhow::anyhow!(reason)),
            BillingError::Persistence { .. } => AppError::DatabaseError(anyhow::Error::new(err)),
            other => AppError::InternalError(anyhow::Error::new(other)),
        }
    }
}
