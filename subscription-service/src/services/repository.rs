//! MongoDB-backed ledger store.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::TryStreamExt;
use mongodb::bson::{self, doc, Document};
use mongodb::error::{ErrorKind, WriteFailure};
use mongodb::options::{
    FindOneAndUpdateOptions, FindOptions, IndexOptions, ReturnDocument,
};
use mongodb::{Collection, Database, IndexModel};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{BillingEvent, BillingStatus, InsertOutcome, NewBillingEvent};
use crate::services::error::BillingError;
use crate::services::ledger::LedgerStore;
use crate::services::metrics::LEDGER_QUERY_DURATION;

const EVENTS_COLLECTION: &str = "billing_events";
const COUNTERS_COLLECTION: &str = "ledger_counters";
const SEQUENCE_COUNTER_ID: &str = "billing_events";
const DUPLICATE_KEY_CODE: i32 = 11000;

/// Stored shape of a ledger row.
#[derive(Debug, Serialize, Deserialize)]
struct BillingEventDocument {
    #[serde(rename = "_id")]
    id: String,
    transaction_key: String,
    subject_id: Option<String>,
    amount: i64,
    status: BillingStatus,
    period_start: bson::DateTime,
    period_end: bson::DateTime,
    grace_end: bson::DateTime,
    next_schedule_time: bson::DateTime,
    next_schedule_id: String,
    created_at: bson::DateTime,
    sequence: i64,
    idempotency_key: String,
}

impl From<BillingEventDocument> for BillingEvent {
    fn from(doc: BillingEventDocument) -> Self {
        Self {
            id: doc.id,
            transaction_key: doc.transaction_key,
            subject_id: doc.subject_id,
            amount: doc.amount,
            status: doc.status,
            period_start: doc.period_start.to_chrono(),
            period_end: doc.period_end.to_chrono(),
            grace_end: doc.grace_end.to_chrono(),
            next_schedule_time: doc.next_schedule_time.to_chrono(),
            next_schedule_id: doc.next_schedule_id,
            created_at: doc.created_at.to_chrono(),
            sequence: doc.sequence,
        }
    }
}

fn is_duplicate_key(err: &mongodb::error::Error) -> bool {
    matches!(
        err.kind.as_ref(),
        ErrorKind::Write(WriteFailure::WriteError(write_error))
            if write_error.code == DUPLICATE_KEY_CODE
    )
}

fn slot_from_counter(counter: &Document) -> Result<(i64, DateTime<Utc>), BillingError> {
    let sequence = counter
        .get_i64("seq")
        .map_err(|e| BillingError::persistence("sequence", e))?;
    let created_at = counter
        .get_datetime("at")
        .map_err(|e| BillingError::persistence("sequence", e))?
        .to_chrono();
    Ok((sequence, created_at))
}

#[derive(Clone)]
pub struct MongoLedgerStore {
    events: Collection<BillingEventDocument>,
    counters: Collection<Document>,
}

impl MongoLedgerStore {
    pub fn new(db: &Database) -> Self {
        Self {
            events: db.collection(EVENTS_COLLECTION),
            counters: db.collection(COUNTERS_COLLECTION),
        }
    }

    /// Initialize ledger indexes. The unique idempotency index is what makes
    /// `insert` an insert-if-absent.
    pub async fn init_indexes(&self) -> anyhow::Result<()> {
        let idempotency_index = IndexModel::builder()
            .keys(doc! { "idempotency_key": 1 })
            .options(
                IndexOptions::builder()
                    .name("billing_event_idempotency_idx".to_string())
                    .unique(true)
                    .build(),
            )
            .build();

        let transaction_index = IndexModel::builder()
            .keys(doc! { "transaction_key": 1, "created_at": -1, "sequence": -1 })
            .options(
                IndexOptions::builder()
                    .name("billing_event_transaction_idx".to_string())
                    .build(),
            )
            .build();

        let subject_index = IndexModel::builder()
            .keys(doc! { "subject_id": 1, "created_at": -1, "sequence": -1 })
            .options(
                IndexOptions::builder()
                    .name("billing_event_subject_idx".to_string())
                    .build(),
            )
            .build();

        let renewal_index = IndexModel::builder()
            .keys(doc! { "status": 1, "next_schedule_time": 1 })
            .options(
                IndexOptions::builder()
                    .name("billing_event_renewal_idx".to_string())
                    .build(),
            )
            .build();

        self.events
            .create_indexes(
                [
                    idempotency_index,
                    transaction_index,
                    subject_index,
                    renewal_index,
                ],
                None,
            )
            .await?;

        tracing::info!("Ledger indexes initialized");
        Ok(())
    }

    /// Check database health.
    pub async fn health_check(&self) -> anyhow::Result<()> {
        self.events
            .find_one(doc! { "_id": "__health__" }, None)
            .await?;
        Ok(())
    }

    /// Allocate the next `(sequence, created_at)` pair in one atomic update of
    /// the counter document. `created_at` comes from the server clock and is
    /// clamped to the last value handed out, so it never moves backwards across
    /// replicas or clock steps.
    async fn allocate_slot(&self) -> Result<(i64, DateTime<Utc>), BillingError> {
        let options = FindOneAndUpdateOptions::builder()
            .upsert(true)
            .return_document(ReturnDocument::After)
            .build();

        let update = vec![doc! {
            "$set": {
                "seq": { "$add": [{ "$ifNull": ["$seq", 0_i64] }, 1_i64] },
                "at": { "$max": ["$at", "$$NOW"] },
            }
        }];

        let counter = self
            .counters
            .find_one_and_update(doc! { "_id": SEQUENCE_COUNTER_ID }, update, options)
            .await
            .map_err(|e| BillingError::persistence("sequence", e))?
            .ok_or_else(|| {
                BillingError::persistence("sequence", anyhow::anyhow!("counter upsert returned nothing"))
            })?;

        slot_from_counter(&counter)
    }

    async fn find_sorted(
        &self,
        operation: &'static str,
        filter: Document,
    ) -> Result<Vec<BillingEvent>, BillingError> {
        let timer = LEDGER_QUERY_DURATION
            .with_label_values(&[operation])
            .start_timer();

        let options = FindOptions::builder()
            .sort(doc! { "created_at": -1, "sequence": -1 })
            .build();

        let cursor = self
            .events
            .find(filter, options)
            .await
            .map_err(|e| BillingError::persistence(operation, e))?;

        let docs: Vec<BillingEventDocument> = cursor
            .try_collect()
            .await
            .map_err(|e| BillingError::persistence(operation, e))?;

        timer.observe_duration();

        Ok(docs.into_iter().map(BillingEvent::from).collect())
    }
}

#[async_trait]
impl LedgerStore for MongoLedgerStore {
    async fn insert(&self, event: NewBillingEvent) -> Result<InsertOutcome, BillingError> {
        let timer = LEDGER_QUERY_DURATION
            .with_label_values(&["insert"])
            .start_timer();

        let (sequence, created_at) = self.allocate_slot().await?;
        let idempotency_key = event.idempotency_key();

        let document = BillingEventDocument {
            id: Uuid::new_v4().to_string(),
            transaction_key: event.transaction_key,
            subject_id: event.subject_id,
            amount: event.amount,
            status: event.status,
            period_start: bson::DateTime::from_chrono(event.period_start),
            period_end: bson::DateTime::from_chrono(event.period_end),
            grace_end: bson::DateTime::from_chrono(event.grace_end),
            next_schedule_time: bson::DateTime::from_chrono(event.next_schedule_time),
            next_schedule_id: event.next_schedule_id,
            created_at: bson::DateTime::from_chrono(created_at),
            sequence,
            idempotency_key,
        };

        match self.events.insert_one(&document, None).await {
            Ok(_) => {
                timer.observe_duration();
                tracing::info!(
                    transaction_key = %document.transaction_key,
                    status = %document.status,
                    sequence = document.sequence,
                    "Ledger row appended"
                );
                Ok(InsertOutcome::Inserted(BillingEvent::from(document)))
            }
            Err(e) if is_duplicate_key(&e) => {
                tracing::info!(
                    idempotency_key = %document.idempotency_key,
                    "Ledger row already present"
                );
                Ok(InsertOutcome::Duplicate)
            }
            Err(e) => Err(BillingError::persistence("insert", e)),
        }
    }

    async fn find_by_transaction(
        &self,
        transaction_key: &str,
    ) -> Result<Vec<BillingEvent>, BillingError> {
        self.find_sorted(
            "find_by_transaction",
            doc! { "transaction_key": transaction_key },
        )
        .await
    }

    async fn list_for_subject(&self, subject_id: &str) -> Result<Vec<BillingEvent>, BillingError> {
        self.find_sorted("list_for_subject", doc! { "subject_id": subject_id })
            .await
    }

    async fn list_paid_renewals_due(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<BillingEvent>, BillingError> {
        self.find_sorted(
            "list_paid_renewals_due",
            doc! {
                "status": BillingStatus::Paid.as_str(),
                "next_schedule_time": { "$lte": bson::DateTime::from_chrono(cutoff) },
            },
        )
        .await
    }
}
