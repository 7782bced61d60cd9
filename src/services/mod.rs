pub mod ledger;
pub mod orchestrator;

pub use ledger::{IdempotencyLedger, Lease, Reservation};
pub use orchestrator::{Orchestrator, PaymentOutcome, WebhookDisposition};
