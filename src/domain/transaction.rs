//! Canonical transaction record and its lifecycle state machine.
//!
//! Events arrive from adapters, webhooks, polling, or the caller, in
//! any order and possibly duplicated; `Transaction::apply` is the only
//! mutation path and enforces the transition table.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{Provider, SettlementMode};
use crate::error::CoreError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    Created,
    PendingAction,
    Authorized,
    Settling,
    Paid,
    Failed,
    Expired,
    Cancelled,
}

impl TransactionStatus {
    /// Terminal states accept no further transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TransactionStatus::Paid
                | TransactionStatus::Failed
                | TransactionStatus::Expired
                | TransactionStatus::Cancelled
        )
    }
}

/// Provider-reported payment status, normalized across gateways.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportedStatus {
    Pending,
    Paid,
    Failed,
    Expired,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventSource {
    Adapter,
    Webhook,
    Poll,
    Caller,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TransactionEvent {
    ProviderAccepted {
        provider_transaction_id: String,
        mode: SettlementMode,
    },
    PaymentAuthorized,
    CaptureConfirmed,
    StatusPaid {
        provider_transaction_id: String,
        amount_minor_units: Option<i64>,
    },
    StatusFailed {
        reason: String,
    },
    StatusExpired,
    UserCancelled,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppliedEvent {
    pub event: TransactionEvent,
    pub source: EventSource,
    pub at: DateTime<Utc>,
}

/// Outcome of folding an event into a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    Transitioned(TransactionStatus),
    /// Event acknowledged but not applied (transaction already
    /// terminal, or a no-op pending report).
    Ignored,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transaction {
    pub id: Uuid,
    pub external_reference: String,
    pub provider: Provider,
    pub provider_transaction_id: Option<String>,
    pub amount_minor_units: i64,
    pub currency: String,
    pub status: TransactionStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub history: Vec<AppliedEvent>,
}

impl Transaction {
    pub fn new(
        external_reference: String,
        provider: Provider,
        amount_minor_units: i64,
        currency: String,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            external_reference,
            provider,
            provider_transaction_id: None,
            amount_minor_units,
            currency,
            status: TransactionStatus::Created,
            created_at: now,
            updated_at: now,
            history: Vec::new(),
        }
    }

    /// Folds one event into the transaction.
    ///
    /// Terminal states ignore further events, except that a duplicate
    /// paid report must still match the recorded amount and provider
    /// transaction id or the record is escalated as inconsistent.
    pub fn apply(
        &mut self,
        event: TransactionEvent,
        source: EventSource,
    ) -> Result<Applied, CoreError> {
        use TransactionStatus::*;

        if self.status.is_terminal() {
            if self.status == Paid {
                if let TransactionEvent::StatusPaid {
                    provider_transaction_id,
                    amount_minor_units,
                } = &event
                {
                    self.verify_paid_duplicate(provider_transaction_id, *amount_minor_units)?;
                }
            }
            tracing::info!(
                transaction = %self.id,
                status = ?self.status,
                event = ?event,
                "event ignored: transaction already terminal"
            );
            return Ok(Applied::Ignored);
        }

        let next = match (&event, self.status) {
            (TransactionEvent::ProviderAccepted { provider_transaction_id, mode }, Created) => {
                self.record_provider_transaction_id(provider_transaction_id)?;
                match mode {
                    SettlementMode::Poll => Settling,
                    SettlementMode::Sync | SettlementMode::Webhook => PendingAction,
                }
            }
            (TransactionEvent::PaymentAuthorized, PendingAction) => Authorized,
            (TransactionEvent::CaptureConfirmed, PendingAction | Authorized) => Settling,
            (
                TransactionEvent::StatusPaid { provider_transaction_id, .. },
                Settling | PendingAction,
            ) => {
                self.record_provider_transaction_id(provider_transaction_id)?;
                Paid
            }
            (TransactionEvent::StatusFailed { .. }, _) => Failed,
            (TransactionEvent::StatusExpired, PendingAction | Settling) => Expired,
            (TransactionEvent::UserCancelled, PendingAction) => Cancelled,
            _ => {
                return Err(CoreError::IllegalTransition(format!(
                    "{:?} not accepted in state {:?}",
                    event, self.status
                )));
            }
        };

        self.status = next;
        self.updated_at = Utc::now();
        self.history.push(AppliedEvent {
            event,
            source,
            at: self.updated_at,
        });

        Ok(Applied::Transitioned(next))
    }

    /// `provider_transaction_id` is write-once: a conflicting value on
    /// a later event is a data-integrity failure, not an update.
    fn record_provider_transaction_id(&mut self, candidate: &str) -> Result<(), CoreError> {
        match &self.provider_transaction_id {
            None => {
                self.provider_transaction_id = Some(candidate.to_string());
                Ok(())
            }
            Some(existing) if existing == candidate => Ok(()),
            Some(existing) => Err(CoreError::Inconsistent(format!(
                "provider transaction id {} conflicts with recorded {}",
                candidate, existing
            ))),
        }
    }

    fn verify_paid_duplicate(
        &self,
        provider_transaction_id: &str,
        amount_minor_units: Option<i64>,
    ) -> Result<(), CoreError> {
        let id_matches =
            self.provider_transaction_id.as_deref() == Some(provider_transaction_id);
        let amount_matches = amount_minor_units.map_or(true, |a| a == self.amount_minor_units);

        if id_matches && amount_matches {
            Ok(())
        } else {
            Err(CoreError::Inconsistent(format!(
                "duplicate paid report for {} does not match recorded amount/provider id",
                self.external_reference
            )))
        }
    }
}
