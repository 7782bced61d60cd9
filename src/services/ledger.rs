//! Idempotency ledger.
//!
//! Maps an external reference to at most one live orchestration
//! attempt. Reservation is a single conditional insert against the
//! store, so concurrent callers racing on the same reference get
//! exactly one winner; the losers are handed the existing
//! transaction's current state instead of a second provider call.

use chrono::Utc;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

use crate::domain::Transaction;
use crate::error::CoreError;
use crate::store::{keys, KeyValueStore};

/// Window for the loser of a reservation race to observe the winner's
/// transaction record, which is written immediately after the lease.
const EXISTING_LOOKUP_ATTEMPTS: u32 = 3;
const EXISTING_LOOKUP_DELAY: Duration = Duration::from_millis(10);

#[derive(Clone)]
pub struct IdempotencyLedger {
    store: Arc<dyn KeyValueStore>,
}

/// Proof of a won reservation. Must be resolved via `commit` or
/// `rollback` exactly once.
#[derive(Debug)]
pub struct Lease {
    reference: String,
}

impl Lease {
    pub fn reference(&self) -> &str {
        &self.reference
    }
}

pub enum Reservation {
    Fresh(Lease),
    Existing(Box<Transaction>),
}

impl IdempotencyLedger {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    pub async fn reserve(&self, external_reference: &str) -> Result<Reservation, CoreError> {
        let won = self
            .store
            .conditional_insert(
                &keys::lease(external_reference),
                json!({
                    "state": "in_flight",
                    "reserved_at": Utc::now(),
                }),
            )
            .await?;

        if won {
            return Ok(Reservation::Fresh(Lease {
                reference: external_reference.to_string(),
            }));
        }

        for attempt in 0..EXISTING_LOOKUP_ATTEMPTS {
            if let Some(value) = self.store.get(&keys::transaction(external_reference)).await? {
                let transaction: Transaction = serde_json::from_value(value)
                    .map_err(|e| CoreError::Store(e.to_string()))?;
                return Ok(Reservation::Existing(Box::new(transaction)));
            }
            if attempt + 1 < EXISTING_LOOKUP_ATTEMPTS {
                tokio::time::sleep(EXISTING_LOOKUP_DELAY).await;
            }
        }

        Err(CoreError::AlreadyExists(external_reference.to_string()))
    }

    /// Marks the attempt resolved. The lease entry stays behind so the
    /// reference can never start a second live attempt.
    pub async fn commit(&self, lease: Lease) -> Result<(), CoreError> {
        self.store
            .put(
                &keys::lease(&lease.reference),
                json!({
                    "state": "resolved",
                    "resolved_at": Utc::now(),
                }),
            )
            .await?;
        Ok(())
    }

    /// Releases a reservation whose attempt never produced a
    /// transaction record, freeing the reference for a retry.
    pub async fn rollback(&self, lease: Lease) -> Result<(), CoreError> {
        self.store.delete(&keys::lease(&lease.reference)).await?;
        Ok(())
    }
}
