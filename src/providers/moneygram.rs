//! MoneyGram remittance adapter: quote-then-commit flow, settled by
//! polling.
//!
//! The gateway's protocol is a strict three-step sequence — quote,
//! update, commit — where every step must present the identifier
//! issued by the previous one. The adapter tracks each transfer's
//! stage and refuses out-of-order calls with `InvalidSequence` before
//! any bytes hit the wire.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use super::{
    response_error, transport_error, CompletionAction, GatewayClient, ProviderAdapter,
    ProviderResult,
};
use crate::config::MoneyGramSettings;
use crate::domain::{PaymentIntent, Provider, ReportedStatus, SettlementMode};
use crate::error::CoreError;
use crate::money::{to_major_string, NormalizedAmount};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TransferStage {
    Quoted,
    Updated,
    Committed,
}

pub struct MoneyGramAdapter {
    client: GatewayClient,
    settings: MoneyGramSettings,
    stages: Mutex<HashMap<String, TransferStage>>,
}

#[derive(Debug, Deserialize)]
struct QuoteResponse {
    #[serde(rename = "quoteId")]
    quote_id: String,
}

#[derive(Debug, Deserialize)]
struct UpdateResponse {
    #[serde(rename = "transferId")]
    transfer_id: String,
}

#[derive(Debug, Deserialize)]
struct StatusResponse {
    status: String,
}

impl MoneyGramAdapter {
    pub fn new(settings: MoneyGramSettings, client: GatewayClient) -> Self {
        Self {
            client,
            settings,
            stages: Mutex::new(HashMap::new()),
        }
    }

    fn stages(&self) -> MutexGuard<'_, HashMap<String, TransferStage>> {
        match self.stages.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn require_stage(&self, id: &str, expected: TransferStage, step: &str) -> Result<(), CoreError> {
        match self.stages().get(id) {
            Some(stage) if *stage == expected => Ok(()),
            Some(stage) => Err(CoreError::InvalidSequence(format!(
                "{} called for transfer {} in stage {:?}",
                step, id, stage
            ))),
            None => Err(CoreError::InvalidSequence(format!(
                "{} called for unknown transfer {}",
                step, id
            ))),
        }
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.settings.base_url.trim_end_matches('/'), path)
    }

    /// Step 1: price the transfer. Returns the quote id required by
    /// `update`.
    pub async fn quote(
        &self,
        intent: &PaymentIntent,
        amount: &NormalizedAmount,
    ) -> Result<String, CoreError> {
        let request = self
            .client
            .http()
            .post(self.endpoint("/transfers/quotes"))
            .bearer_auth(&self.settings.api_token)
            .json(&json!({
                "sendAmount": to_major_string(amount.minor_units, &amount.currency),
                "sendCurrency": amount.currency,
                "reference": intent.external_reference(),
            }));

        let quote = self
            .client
            .guard(Provider::Moneygram, async move {
                let response = request
                    .send()
                    .await
                    .map_err(|e| transport_error(Provider::Moneygram, e))?;
                if !response.status().is_success() {
                    return Err(response_error(Provider::Moneygram, response).await);
                }
                response
                    .json::<QuoteResponse>()
                    .await
                    .map_err(|e| transport_error(Provider::Moneygram, e))
            })
            .await?;

        self.stages()
            .insert(quote.quote_id.clone(), TransferStage::Quoted);
        Ok(quote.quote_id)
    }

    /// Step 2: attach sender details to a quoted transfer. Must be
    /// called with the id returned by `quote`.
    pub async fn update(
        &self,
        quote_id: &str,
        intent: &PaymentIntent,
    ) -> Result<String, CoreError> {
        self.require_stage(quote_id, TransferStage::Quoted, "update")?;

        let request = self
            .client
            .http()
            .put(self.endpoint(&format!("/transfers/{}", quote_id)))
            .bearer_auth(&self.settings.api_token)
            .json(&json!({
                "senderEmail": intent.payer_email(),
                "description": intent.description(),
            }));

        let updated = self
            .client
            .guard(Provider::Moneygram, async move {
                let response = request
                    .send()
                    .await
                    .map_err(|e| transport_error(Provider::Moneygram, e))?;
                if !response.status().is_success() {
                    return Err(response_error(Provider::Moneygram, response).await);
                }
                response
                    .json::<UpdateResponse>()
                    .await
                    .map_err(|e| transport_error(Provider::Moneygram, e))
            })
            .await?;

        let mut stages = self.stages();
        stages.remove(quote_id);
        stages.insert(updated.transfer_id.clone(), TransferStage::Updated);
        Ok(updated.transfer_id)
    }

    /// Step 3: irrevocably start the transfer. Must be called with the
    /// id returned by `update`.
    pub async fn commit_transfer(
        &self,
        transfer_id: &str,
    ) -> Result<serde_json::Value, CoreError> {
        self.require_stage(transfer_id, TransferStage::Updated, "commit")?;

        let request = self
            .client
            .http()
            .put(self.endpoint(&format!("/transfers/{}/commit", transfer_id)))
            .bearer_auth(&self.settings.api_token);

        let raw = self
            .client
            .guard(Provider::Moneygram, async move {
                let response = request
                    .send()
                    .await
                    .map_err(|e| transport_error(Provider::Moneygram, e))?;
                if !response.status().is_success() {
                    return Err(response_error(Provider::Moneygram, response).await);
                }
                response
                    .json::<serde_json::Value>()
                    .await
                    .map_err(|e| transport_error(Provider::Moneygram, e))
            })
            .await?;

        self.stages()
            .insert(transfer_id.to_string(), TransferStage::Committed);
        Ok(raw)
    }

    fn map_status(status: &str) -> ReportedStatus {
        match status {
            "RECEIVED" | "DELIVERED" => ReportedStatus::Paid,
            "REJECTED" | "REFUNDED" => ReportedStatus::Failed,
            "EXPIRED" => ReportedStatus::Expired,
            _ => ReportedStatus::Pending,
        }
    }
}

#[async_trait]
impl ProviderAdapter for MoneyGramAdapter {
    fn provider(&self) -> Provider {
        Provider::Moneygram
    }

    fn settlement_mode(&self) -> SettlementMode {
        SettlementMode::Poll
    }

    async fn initiate(
        &self,
        intent: &PaymentIntent,
        amount: &NormalizedAmount,
    ) -> Result<ProviderResult, CoreError> {
        let quote_id = self.quote(intent, amount).await?;
        let transfer_id = self.update(&quote_id, intent).await?;
        let raw = self.commit_transfer(&transfer_id).await?;

        Ok(ProviderResult {
            provider_transaction_id: transfer_id,
            action: CompletionAction::None,
            reported: None,
            raw,
        })
    }

    async fn query_status(
        &self,
        provider_transaction_id: &str,
    ) -> Result<ReportedStatus, CoreError> {
        let request = self
            .client
            .http()
            .get(self.endpoint(&format!("/transfers/{}/status", provider_transaction_id)))
            .bearer_auth(&self.settings.api_token);

        let status = self
            .client
            .guard(Provider::Moneygram, async move {
                let response = request
                    .send()
                    .await
                    .map_err(|e| transport_error(Provider::Moneygram, e))?;
                if !response.status().is_success() {
                    return Err(response_error(Provider::Moneygram, response).await);
                }
                response
                    .json::<StatusResponse>()
                    .await
                    .map_err(|e| transport_error(Provider::Moneygram, e))
            })
            .await?;

        Ok(Self::map_status(&status.status))
    }
}
