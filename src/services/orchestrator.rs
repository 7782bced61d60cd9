//! Top-level orchestration facade.
//!
//! Owns transaction creation; folds every adapter result, webhook, and
//! poll report through the state machine; and is the only component
//! that touches the idempotency ledger. Adapters never mutate a
//! transaction and webhooks never bypass verification.

use serde::Serialize;
use serde_json::json;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::config::{Config, RetryPolicy};
use crate::domain::{
    Applied, EventSource, PaymentIntent, Provider, ReportedStatus, SettlementMode, Transaction,
    TransactionEvent, TransactionStatus,
};
use crate::error::CoreError;
use crate::money::{AmountNormalizer, NormalizedAmount, RateProvider, StaticRates};
use crate::providers::{
    BinanceAdapter, CompletionAction, GatewayClient, MoneyGramAdapter, PayPalAdapter,
    PaystackAdapter, ProviderAdapter, XenditAdapter,
};
use crate::services::ledger::{IdempotencyLedger, Lease, Reservation};
use crate::store::{keys, KeyValueStore};
use crate::webhooks::{WebhookEvent, WebhookVerifier};

/// Bounded lookup window for a webhook racing the initiate response.
const WEBHOOK_LOOKUP_ATTEMPTS: u32 = 3;
const WEBHOOK_LOOKUP_BASE_DELAY: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, Serialize)]
pub struct PaymentOutcome {
    pub transaction: Transaction,
    pub action: CompletionAction,
}

/// How an inbound webhook was resolved. Every variant is acknowledged
/// 200 to the sender; only malformed requests error out of the
/// handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WebhookDisposition {
    Applied,
    Ignored,
    Duplicate,
    Rejected,
    Unmatched,
    Inconsistent,
}

pub struct Orchestrator {
    store: Arc<dyn KeyValueStore>,
    ledger: IdempotencyLedger,
    normalizer: AmountNormalizer,
    adapters: HashMap<Provider, Arc<dyn ProviderAdapter>>,
    verifier: WebhookVerifier,
    retry: RetryPolicy,
    poll_timeout: Duration,
    /// Serializes read-modify-write event folding; creation and dedup
    /// races are settled by the store's conditional insert.
    apply_lock: Mutex<()>,
}

impl Orchestrator {
    pub fn new(
        store: Arc<dyn KeyValueStore>,
        rates: Arc<dyn RateProvider>,
        verifier: WebhookVerifier,
        retry: RetryPolicy,
        poll_timeout: Duration,
    ) -> Self {
        Self {
            ledger: IdempotencyLedger::new(store.clone()),
            normalizer: AmountNormalizer::new(rates),
            adapters: HashMap::new(),
            verifier,
            retry,
            poll_timeout,
            apply_lock: Mutex::new(()),
            store,
        }
    }

    pub fn with_adapter(mut self, adapter: Arc<dyn ProviderAdapter>) -> Self {
        self.adapters.insert(adapter.provider(), adapter);
        self
    }

    /// Wires the full production adapter set from configuration.
    pub fn from_config(config: &Config, store: Arc<dyn KeyValueStore>) -> Arc<Self> {
        let mut rates = StaticRates::new();
        for entry in &config.rates {
            rates = rates.with_rate(&entry.from, &entry.to, entry.rate.clone());
        }

        let orchestrator = Self::new(
            store,
            Arc::new(rates),
            WebhookVerifier::from_config(config),
            config.retry,
            config.poll_timeout,
        )
        .with_adapter(Arc::new(XenditAdapter::new(
            config.xendit.clone(),
            GatewayClient::new(),
        )))
        .with_adapter(Arc::new(PaystackAdapter::new(
            config.paystack.clone(),
            GatewayClient::new(),
        )))
        .with_adapter(Arc::new(BinanceAdapter::new(
            config.binance.clone(),
            GatewayClient::new(),
        )))
        .with_adapter(Arc::new(MoneyGramAdapter::new(
            config.moneygram.clone(),
            GatewayClient::new(),
        )))
        .with_adapter(Arc::new(PayPalAdapter::new(
            config.paypal.clone(),
            GatewayClient::new(),
        )));

        Arc::new(orchestrator)
    }

    fn adapter(&self, provider: Provider) -> Result<Arc<dyn ProviderAdapter>, CoreError> {
        self.adapters
            .get(&provider)
            .cloned()
            .ok_or_else(|| CoreError::ValidationFailed(format!("unsupported provider {}", provider)))
    }

    /// Accepts an intent: normalize, reserve the reference, call the
    /// gateway, fold the acceptance. A reference already reserved with
    /// the same details returns the existing transaction without a
    /// second gateway call.
    pub async fn create_payment(
        self: Arc<Self>,
        intent: PaymentIntent,
    ) -> Result<PaymentOutcome, CoreError> {
        let adapter = self.adapter(intent.provider())?;
        let amount = self
            .normalizer
            .normalize(intent.amount(), intent.currency(), adapter.required_currency())
            .await?;

        match self.ledger.reserve(intent.external_reference()).await? {
            Reservation::Existing(existing) => {
                if existing.provider != intent.provider()
                    || existing.amount_minor_units != amount.minor_units
                    || existing.currency != amount.currency
                {
                    return Err(CoreError::AlreadyExists(format!(
                        "reference {} already used with different payment details",
                        intent.external_reference()
                    )));
                }
                tracing::info!(
                    reference = %intent.external_reference(),
                    "duplicate intent, returning existing transaction"
                );
                Ok(PaymentOutcome {
                    transaction: *existing,
                    action: CompletionAction::None,
                })
            }
            Reservation::Fresh(lease) => {
                // The attempt runs on its own task: cancelling the
                // caller must not strand the lease or the gateway call.
                let this = Arc::clone(&self);
                let handle = tokio::spawn(async move {
                    this.run_attempt(adapter, intent, amount, lease).await
                });
                match handle.await {
                    Ok(outcome) => outcome,
                    Err(err) => Err(CoreError::Store(format!("initiate task failed: {}", err))),
                }
            }
        }
    }

    async fn run_attempt(
        &self,
        adapter: Arc<dyn ProviderAdapter>,
        intent: PaymentIntent,
        amount: NormalizedAmount,
        lease: Lease,
    ) -> Result<PaymentOutcome, CoreError> {
        let reference = intent.external_reference().to_string();
        let transaction = Transaction::new(
            reference.clone(),
            intent.provider(),
            amount.minor_units,
            amount.currency.clone(),
        );

        let record = serde_json::to_value(&transaction)
            .map_err(|e| CoreError::Store(e.to_string()))?;
        let inserted = self
            .store
            .conditional_insert(&keys::transaction(&reference), record)
            .await?;
        if !inserted {
            self.ledger.rollback(lease).await?;
            return Err(CoreError::AlreadyExists(reference));
        }

        if let Err(err) = self
            .store
            .put(
                &keys::transaction_id(&transaction.id),
                json!(transaction.external_reference),
            )
            .await
        {
            self.resolve_lease(lease).await;
            return Err(err.into());
        }

        match self
            .call_with_retry(adapter.provider(), || adapter.initiate(&intent, &amount))
            .await
        {
            Ok(result) => {
                let folded = self
                    .fold(
                        &reference,
                        TransactionEvent::ProviderAccepted {
                            provider_transaction_id: result.provider_transaction_id.clone(),
                            mode: adapter.settlement_mode(),
                        },
                        EventSource::Adapter,
                    )
                    .await;
                let (mut transaction, _) = match folded {
                    Ok(folded) => folded,
                    Err(err) => {
                        self.resolve_lease(lease).await;
                        return Err(err);
                    }
                };

                if let Err(err) = self
                    .store
                    .put(
                        &keys::provider_transaction(
                            transaction.provider,
                            &result.provider_transaction_id,
                        ),
                        json!(reference),
                    )
                    .await
                {
                    self.resolve_lease(lease).await;
                    return Err(err.into());
                }

                // Sync flows may already know the outcome.
                if let Some(report) = result.reported {
                    if let Some(event) =
                        event_for_report(report, &result.provider_transaction_id, None)
                    {
                        match self.fold(&reference, event, EventSource::Adapter).await {
                            Ok((updated, _)) => transaction = updated,
                            Err(err) => {
                                self.resolve_lease(lease).await;
                                return Err(err);
                            }
                        }
                    }
                }

                self.resolve_lease(lease).await;
                Ok(PaymentOutcome {
                    transaction,
                    action: result.action,
                })
            }
            Err(err) => {
                // The attempt is resolved as failed; the reference
                // stays bound to this terminal transaction.
                if let Err(fold_err) = self
                    .fold(
                        &reference,
                        TransactionEvent::StatusFailed {
                            reason: err.to_string(),
                        },
                        EventSource::Adapter,
                    )
                    .await
                {
                    tracing::error!(
                        reference = %reference,
                        error = %fold_err,
                        "failed to record gateway failure"
                    );
                }
                self.resolve_lease(lease).await;
                Err(err)
            }
        }
    }

    async fn resolve_lease(&self, lease: Lease) {
        if let Err(err) = self.ledger.commit(lease).await {
            tracing::error!(error = %err, "failed to resolve idempotency lease");
        }
    }

    /// Second phase for authorize/capture providers. The capture
    /// request doubles as the buyer-approval signal from the client
    /// side, which is what moves the transaction through AUTHORIZED.
    pub async fn capture_payment(&self, id: Uuid) -> Result<PaymentOutcome, CoreError> {
        let transaction = self.load_by_id(id).await?;
        let adapter = self.adapter(transaction.provider)?;

        if !adapter.supports_capture() {
            return Err(CoreError::ValidationFailed(format!(
                "{} does not support capture",
                transaction.provider
            )));
        }
        if !matches!(
            transaction.status,
            TransactionStatus::PendingAction | TransactionStatus::Authorized
        ) {
            return Err(CoreError::IllegalTransition(format!(
                "capture not accepted in state {:?}",
                transaction.status
            )));
        }
        let provider_transaction_id =
            transaction.provider_transaction_id.clone().ok_or_else(|| {
                CoreError::IllegalTransition(
                    "capture before provider acknowledgement".to_string(),
                )
            })?;
        let reference = transaction.external_reference.clone();

        if transaction.status == TransactionStatus::PendingAction {
            self.fold(&reference, TransactionEvent::PaymentAuthorized, EventSource::Caller)
                .await?;
        }

        match self
            .call_with_retry(adapter.provider(), || {
                adapter.capture(&provider_transaction_id)
            })
            .await
        {
            Ok(result) => {
                let (mut transaction, _) = self
                    .fold(&reference, TransactionEvent::CaptureConfirmed, EventSource::Adapter)
                    .await?;
                if let Some(report) = result.reported {
                    if let Some(event) =
                        event_for_report(report, &provider_transaction_id, None)
                    {
                        let (updated, _) =
                            self.fold(&reference, event, EventSource::Adapter).await?;
                        transaction = updated;
                    }
                }
                Ok(PaymentOutcome {
                    transaction,
                    action: result.action,
                })
            }
            Err(err @ CoreError::ProviderRejected { .. }) => {
                let _ = self
                    .fold(
                        &reference,
                        TransactionEvent::StatusFailed {
                            reason: err.to_string(),
                        },
                        EventSource::Adapter,
                    )
                    .await;
                Err(err)
            }
            // Transient faults leave the transaction AUTHORIZED so the
            // capture can be retried.
            Err(err) => Err(err),
        }
    }

    /// Buyer abandoned the flow (client-side cancel callback).
    pub async fn cancel_payment(&self, id: Uuid) -> Result<Transaction, CoreError> {
        let transaction = self.load_by_id(id).await?;
        let (transaction, _) = self
            .fold(
                &transaction.external_reference,
                TransactionEvent::UserCancelled,
                EventSource::Caller,
            )
            .await?;
        Ok(transaction)
    }

    /// Verifies, dedups, and folds one inbound webhook. Returns how the
    /// event was resolved; the HTTP layer acknowledges 200 for every
    /// disposition.
    pub async fn handle_webhook(
        &self,
        provider_slug: &str,
        raw_body: &[u8],
        headers: &axum::http::HeaderMap,
    ) -> Result<WebhookDisposition, CoreError> {
        let provider = Provider::from_slug(provider_slug).ok_or_else(|| {
            CoreError::ValidationFailed(format!("unknown provider '{}'", provider_slug))
        })?;

        let event = match self.verifier.verify(provider, raw_body, headers) {
            Ok(event) => event,
            Err(CoreError::SignatureInvalid(reason)) => {
                tracing::warn!(provider = %provider, reason = %reason, "webhook rejected");
                self.audit(
                    "webhook_rejected",
                    json!({ "provider": provider, "reason": reason }),
                )
                .await;
                return Ok(WebhookDisposition::Rejected);
            }
            Err(err) => return Err(err),
        };

        let dedup_key = keys::webhook_event(provider, &event.event_id);
        let first_delivery = self
            .store
            .conditional_insert(
                &dedup_key,
                json!({ "received_at": chrono::Utc::now(), "disposition": "processing" }),
            )
            .await?;
        if !first_delivery {
            tracing::info!(
                provider = %provider,
                event_id = %event.event_id,
                "duplicate webhook delivery acknowledged"
            );
            return Ok(WebhookDisposition::Duplicate);
        }

        let disposition = self.apply_webhook(&event).await?;
        self.store
            .put(
                &dedup_key,
                json!({ "received_at": chrono::Utc::now(), "disposition": disposition }),
            )
            .await?;
        Ok(disposition)
    }

    async fn apply_webhook(&self, event: &WebhookEvent) -> Result<WebhookDisposition, CoreError> {
        let lookup_key =
            keys::provider_transaction(event.provider, &event.provider_transaction_id);

        // The webhook can beat the initiate response that records the
        // provider transaction id; give that write a bounded window.
        let mut reference = None;
        let mut delay = WEBHOOK_LOOKUP_BASE_DELAY;
        for attempt in 0..WEBHOOK_LOOKUP_ATTEMPTS {
            if let Some(value) = self.store.get(&lookup_key).await? {
                reference = value.as_str().map(str::to_string);
                break;
            }
            if attempt + 1 < WEBHOOK_LOOKUP_ATTEMPTS {
                tokio::time::sleep(delay).await;
                delay *= 2;
            }
        }

        let Some(reference) = reference else {
            tracing::warn!(
                provider = %event.provider,
                provider_transaction_id = %event.provider_transaction_id,
                "webhook for unknown transaction"
            );
            self.audit(
                "webhook_unmatched",
                json!({
                    "provider": event.provider,
                    "provider_transaction_id": event.provider_transaction_id,
                    "event_id": event.event_id,
                }),
            )
            .await;
            return Ok(WebhookDisposition::Unmatched);
        };

        let Some(tx_event) = event_for_report(
            event.reported_status,
            &event.provider_transaction_id,
            event.amount_minor_units,
        ) else {
            return Ok(WebhookDisposition::Ignored);
        };

        match self.fold(&reference, tx_event, EventSource::Webhook).await {
            Ok((_, Applied::Transitioned(_))) => Ok(WebhookDisposition::Applied),
            Ok((_, Applied::Ignored)) => Ok(WebhookDisposition::Ignored),
            Err(CoreError::Inconsistent(reason)) => {
                self.audit(
                    "inconsistent_event",
                    json!({
                        "reference": reference,
                        "event_id": event.event_id,
                        "reason": reason,
                    }),
                )
                .await;
                Ok(WebhookDisposition::Inconsistent)
            }
            Err(CoreError::IllegalTransition(reason)) => {
                self.audit(
                    "webhook_out_of_order",
                    json!({
                        "reference": reference,
                        "event_id": event.event_id,
                        "reason": reason,
                    }),
                )
                .await;
                Ok(WebhookDisposition::Ignored)
            }
            Err(err) => Err(err),
        }
    }

    /// Status entry point. Poll-mode providers are queried under the
    /// caller's timeout; on timeout (or for other modes) the stored
    /// state is returned unchanged.
    pub async fn poll_status(
        &self,
        id: Uuid,
        timeout: Option<Duration>,
    ) -> Result<Transaction, CoreError> {
        let transaction = self.load_by_id(id).await?;
        let adapter = self.adapter(transaction.provider)?;

        if adapter.settlement_mode() != SettlementMode::Poll || transaction.status.is_terminal() {
            return Ok(transaction);
        }
        let Some(provider_transaction_id) = transaction.provider_transaction_id.clone() else {
            return Ok(transaction);
        };

        let timeout = timeout.unwrap_or(self.poll_timeout);
        let query = self.call_with_retry(adapter.provider(), || {
            adapter.query_status(&provider_transaction_id)
        });

        match tokio::time::timeout(timeout, query).await {
            Err(_elapsed) => {
                tracing::warn!(
                    transaction = %transaction.id,
                    "status poll timed out, returning last known state"
                );
                Ok(transaction)
            }
            Ok(Err(err)) => Err(err),
            Ok(Ok(report)) => {
                match event_for_report(report, &provider_transaction_id, None) {
                    None => Ok(transaction),
                    Some(event) => {
                        let (transaction, _) = self
                            .fold(&transaction.external_reference, event, EventSource::Poll)
                            .await?;
                        Ok(transaction)
                    }
                }
            }
        }
    }

    pub async fn get_payment(&self, id: Uuid) -> Result<Transaction, CoreError> {
        self.load_by_id(id).await
    }

    pub async fn store_healthy(&self) -> bool {
        self.store.get("health:probe").await.is_ok()
    }

    async fn call_with_retry<T, F, Fut>(
        &self,
        provider: Provider,
        operation: F,
    ) -> Result<T, CoreError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, CoreError>>,
    {
        let mut attempt = 0;
        loop {
            match operation().await {
                Err(CoreError::ProviderUnavailable(reason))
                    if attempt + 1 < self.retry.max_attempts =>
                {
                    attempt += 1;
                    let delay = self.retry.base_delay * 2u32.pow(attempt - 1);
                    tracing::warn!(
                        provider = %provider,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        reason = %reason,
                        "provider unavailable, backing off"
                    );
                    tokio::time::sleep(delay).await;
                }
                other => return other,
            }
        }
    }

    async fn fold(
        &self,
        reference: &str,
        event: TransactionEvent,
        source: EventSource,
    ) -> Result<(Transaction, Applied), CoreError> {
        let _guard = self.apply_lock.lock().await;
        let mut transaction = self.load_by_reference(reference).await?;
        let applied = transaction.apply(event, source)?;
        if matches!(applied, Applied::Transitioned(_)) {
            self.persist(&transaction).await?;
        }
        Ok((transaction, applied))
    }

    async fn load_by_reference(&self, reference: &str) -> Result<Transaction, CoreError> {
        let value = self
            .store
            .get(&keys::transaction(reference))
            .await?
            .ok_or_else(|| CoreError::UnknownTransaction(reference.to_string()))?;
        serde_json::from_value(value).map_err(|e| CoreError::Store(e.to_string()))
    }

    async fn load_by_id(&self, id: Uuid) -> Result<Transaction, CoreError> {
        let value = self
            .store
            .get(&keys::transaction_id(&id))
            .await?
            .ok_or_else(|| CoreError::NotFound(format!("transaction {}", id)))?;
        let reference = value
            .as_str()
            .ok_or_else(|| CoreError::Store("transaction id index is corrupt".to_string()))?
            .to_string();
        self.load_by_reference(&reference).await
    }

    async fn persist(&self, transaction: &Transaction) -> Result<(), CoreError> {
        let value =
            serde_json::to_value(transaction).map_err(|e| CoreError::Store(e.to_string()))?;
        self.store
            .put(&keys::transaction(&transaction.external_reference), value)
            .await?;
        Ok(())
    }

    /// Records an operator-facing audit entry; never fails the caller.
    async fn audit(&self, kind: &str, detail: serde_json::Value) {
        let id = Uuid::new_v4();
        tracing::warn!(kind, audit_id = %id, "recorded audit entry");
        let record = json!({ "kind": kind, "detail": detail, "at": chrono::Utc::now() });
        if let Err(err) = self.store.put(&keys::audit(&id), record).await {
            tracing::error!(error = %err, "failed to persist audit entry");
        }
    }
}

fn event_for_report(
    report: ReportedStatus,
    provider_transaction_id: &str,
    amount_minor_units: Option<i64>,
) -> Option<TransactionEvent> {
    match report {
        ReportedStatus::Paid => Some(TransactionEvent::StatusPaid {
            provider_transaction_id: provider_transaction_id.to_string(),
            amount_minor_units,
        }),
        ReportedStatus::Failed => Some(TransactionEvent::StatusFailed {
            reason: "provider reported failure".to_string(),
        }),
        ReportedStatus::Expired => Some(TransactionEvent::StatusExpired),
        ReportedStatus::Pending => None,
    }
}
