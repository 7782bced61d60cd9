//! Xendit invoice adapter: redirect-checkout flow, settled by webhook.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use super::{
    json_number, response_error, transport_error, CompletionAction, GatewayClient,
    ProviderAdapter, ProviderResult,
};
use crate::config::XenditSettings;
use crate::domain::{PaymentIntent, Provider, ReportedStatus, SettlementMode};
use crate::error::CoreError;
use crate::money::{to_major_string, NormalizedAmount};

pub struct XenditAdapter {
    client: GatewayClient,
    settings: XenditSettings,
}

#[derive(Debug, Deserialize)]
struct Invoice {
    id: String,
    invoice_url: Option<String>,
    status: String,
}

impl XenditAdapter {
    pub fn new(settings: XenditSettings, client: GatewayClient) -> Self {
        Self { client, settings }
    }

    fn map_status(status: &str) -> ReportedStatus {
        match status {
            "PAID" | "SETTLED" => ReportedStatus::Paid,
            "EXPIRED" => ReportedStatus::Expired,
            "PENDING" => ReportedStatus::Pending,
            _ => ReportedStatus::Failed,
        }
    }
}

#[async_trait]
impl ProviderAdapter for XenditAdapter {
    fn provider(&self) -> Provider {
        Provider::Xendit
    }

    fn settlement_mode(&self) -> SettlementMode {
        SettlementMode::Webhook
    }

    async fn initiate(
        &self,
        intent: &PaymentIntent,
        amount: &NormalizedAmount,
    ) -> Result<ProviderResult, CoreError> {
        let url = format!("{}/v2/invoices", self.settings.base_url.trim_end_matches('/'));
        let body = json!({
            "external_id": intent.external_reference(),
            "amount": json_number(&to_major_string(amount.minor_units, &amount.currency))?,
            "currency": amount.currency,
            "payer_email": intent.payer_email(),
            "description": intent.description(),
            "success_redirect_url": self.settings.success_redirect_url,
            "failure_redirect_url": self.settings.failure_redirect_url,
        });

        let request = self
            .client
            .http()
            .post(&url)
            .basic_auth(&self.settings.secret_key, Some(""))
            .json(&body);

        let raw = self
            .client
            .guard(Provider::Xendit, async move {
                let response = request
                    .send()
                    .await
                    .map_err(|e| transport_error(Provider::Xendit, e))?;
                if !response.status().is_success() {
                    return Err(response_error(Provider::Xendit, response).await);
                }
                response
                    .json::<serde_json::Value>()
                    .await
                    .map_err(|e| transport_error(Provider::Xendit, e))
            })
            .await?;

        let invoice: Invoice = serde_json::from_value(raw.clone()).map_err(|e| {
            CoreError::ProviderRejected {
                code: "invalid_response".to_string(),
                message: format!("xendit invoice payload: {}", e),
            }
        })?;

        let action = match invoice.invoice_url {
            Some(url) => CompletionAction::Redirect { url },
            None => CompletionAction::None,
        };

        Ok(ProviderResult {
            provider_transaction_id: invoice.id,
            action,
            reported: None,
            raw,
        })
    }

    async fn query_status(
        &self,
        provider_transaction_id: &str,
    ) -> Result<ReportedStatus, CoreError> {
        let url = format!(
            "{}/v2/invoices/{}",
            self.settings.base_url.trim_end_matches('/'),
            provider_transaction_id
        );

        let request = self
            .client
            .http()
            .get(&url)
            .basic_auth(&self.settings.secret_key, Some(""));

        let invoice = self
            .client
            .guard(Provider::Xendit, async move {
                let response = request
                    .send()
                    .await
                    .map_err(|e| transport_error(Provider::Xendit, e))?;
                if !response.status().is_success() {
                    return Err(response_error(Provider::Xendit, response).await);
                }
                response
                    .json::<Invoice>()
                    .await
                    .map_err(|e| transport_error(Provider::Xendit, e))
            })
            .await?;

        Ok(Self::map_status(&invoice.status))
    }
}
