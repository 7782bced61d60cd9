//! Domain entities: payment intents and the canonical transaction.

pub mod intent;
pub mod transaction;

pub use intent::{PaymentIntent, Provider};
pub use transaction::{
    Applied, AppliedEvent, EventSource, ReportedStatus, Transaction, TransactionEvent,
    TransactionStatus,
};

use serde::{Deserialize, Serialize};

/// How a provider reports final settlement: synchronously from the
/// capture call, via an asynchronous webhook, or by being polled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SettlementMode {
    Sync,
    Webhook,
    Poll,
}
