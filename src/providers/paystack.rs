//! Paystack adapter: client-tokenized inline flow.
//!
//! `initiate` produces an access code that the buyer-side SDK consumes;
//! the charge itself is confirmed back to us by webhook. Paystack only
//! settles in GHS here, so the orchestrator converts other currencies
//! before the adapter is called.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use super::{
    response_error, transport_error, CompletionAction, GatewayClient, ProviderAdapter,
    ProviderResult,
};
use crate::config::PaystackSettings;
use crate::domain::{PaymentIntent, Provider, ReportedStatus, SettlementMode};
use crate::error::CoreError;
use crate::money::NormalizedAmount;

const SETTLEMENT_CURRENCY: &str = "GHS";

pub struct PaystackAdapter {
    client: GatewayClient,
    settings: PaystackSettings,
}

#[derive(Debug, Deserialize)]
struct ApiEnvelope<T> {
    status: bool,
    #[serde(default)]
    message: String,
    data: Option<T>,
}

#[derive(Debug, Deserialize)]
struct InitializeData {
    access_code: String,
    reference: String,
}

#[derive(Debug, Deserialize)]
struct VerifyData {
    status: String,
}

impl PaystackAdapter {
    pub fn new(settings: PaystackSettings, client: GatewayClient) -> Self {
        Self { client, settings }
    }

    fn map_status(status: &str) -> ReportedStatus {
        match status {
            "success" => ReportedStatus::Paid,
            "failed" | "reversed" => ReportedStatus::Failed,
            "abandoned" => ReportedStatus::Expired,
            _ => ReportedStatus::Pending,
        }
    }

    fn unwrap_envelope<T>(envelope: ApiEnvelope<T>) -> Result<T, CoreError> {
        if !envelope.status {
            return Err(CoreError::ProviderRejected {
                code: "declined".to_string(),
                message: envelope.message,
            });
        }
        envelope.data.ok_or_else(|| CoreError::ProviderRejected {
            code: "invalid_response".to_string(),
            message: "paystack response missing data".to_string(),
        })
    }
}

#[async_trait]
impl ProviderAdapter for PaystackAdapter {
    fn provider(&self) -> Provider {
        Provider::Paystack
    }

    fn settlement_mode(&self) -> SettlementMode {
        SettlementMode::Webhook
    }

    fn required_currency(&self) -> Option<&str> {
        Some(SETTLEMENT_CURRENCY)
    }

    async fn initiate(
        &self,
        intent: &PaymentIntent,
        amount: &NormalizedAmount,
    ) -> Result<ProviderResult, CoreError> {
        let url = format!(
            "{}/transaction/initialize",
            self.settings.base_url.trim_end_matches('/')
        );
        // Paystack takes integer minor units (pesewas).
        let body = json!({
            "email": intent.payer_email(),
            "amount": amount.minor_units,
            "currency": amount.currency,
            "reference": intent.external_reference(),
            "metadata": intent.metadata(),
        });

        let request = self
            .client
            .http()
            .post(&url)
            .bearer_auth(&self.settings.secret_key)
            .json(&body);

        let raw = self
            .client
            .guard(Provider::Paystack, async move {
                let response = request
                    .send()
                    .await
                    .map_err(|e| transport_error(Provider::Paystack, e))?;
                if !response.status().is_success() {
                    return Err(response_error(Provider::Paystack, response).await);
                }
                response
                    .json::<serde_json::Value>()
                    .await
                    .map_err(|e| transport_error(Provider::Paystack, e))
            })
            .await?;

        let envelope: ApiEnvelope<InitializeData> =
            serde_json::from_value(raw.clone()).map_err(|e| CoreError::ProviderRejected {
                code: "invalid_response".to_string(),
                message: format!("paystack initialize payload: {}", e),
            })?;
        let data = Self::unwrap_envelope(envelope)?;

        Ok(ProviderResult {
            provider_transaction_id: data.reference,
            action: CompletionAction::ClientAction {
                token: data.access_code,
            },
            reported: None,
            raw,
        })
    }

    async fn query_status(
        &self,
        provider_transaction_id: &str,
    ) -> Result<ReportedStatus, CoreError> {
        let url = format!(
            "{}/transaction/verify/{}",
            self.settings.base_url.trim_end_matches('/'),
            provider_transaction_id
        );

        let request = self
            .client
            .http()
            .get(&url)
            .bearer_auth(&self.settings.secret_key);

        let envelope = self
            .client
            .guard(Provider::Paystack, async move {
                let response = request
                    .send()
                    .await
                    .map_err(|e| transport_error(Provider::Paystack, e))?;
                if !response.status().is_success() {
                    return Err(response_error(Provider::Paystack, response).await);
                }
                response
                    .json::<ApiEnvelope<VerifyData>>()
                    .await
                    .map_err(|e| transport_error(Provider::Paystack, e))
            })
            .await?;

        let data = Self::unwrap_envelope(envelope)?;
        Ok(Self::map_status(&data.status))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::str::FromStr;

    fn settings(base_url: String) -> PaystackSettings {
        PaystackSettings {
            secret_key: "sk_test_abc".to_string(),
            base_url,
        }
    }

    fn intent() -> PaymentIntent {
        PaymentIntent::new(
            Provider::Paystack,
            bigdecimal::BigDecimal::from_str("50").unwrap(),
            "GHS",
            "buyer@example.com",
            "Starter package",
            BTreeMap::new(),
            Some("ord-7".to_string()),
        )
        .unwrap()
    }

    fn amount() -> NormalizedAmount {
        NormalizedAmount {
            minor_units: 5_000,
            currency: "GHS".to_string(),
        }
    }

    #[tokio::test]
    async fn initiate_returns_client_action_token() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/transaction/initialize")
            .match_header("authorization", "Bearer sk_test_abc")
            .with_status(200)
            .with_body(
                r#"{"status":true,"message":"Authorization URL created","data":{"authorization_url":"https://checkout.paystack.com/abc","access_code":"ac_123","reference":"ord-7"}}"#,
            )
            .create_async()
            .await;

        let adapter = PaystackAdapter::new(settings(server.url()), GatewayClient::new());
        let result = adapter.initiate(&intent(), &amount()).await.unwrap();

        mock.assert_async().await;
        assert_eq!(result.provider_transaction_id, "ord-7");
        assert_eq!(
            result.action,
            CompletionAction::ClientAction {
                token: "ac_123".to_string()
            }
        );
    }

    #[tokio::test]
    async fn declined_envelope_is_a_rejection() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/transaction/initialize")
            .with_status(200)
            .with_body(r#"{"status":false,"message":"Invalid key","data":null}"#)
            .create_async()
            .await;

        let adapter = PaystackAdapter::new(settings(server.url()), GatewayClient::new());
        let result = adapter.initiate(&intent(), &amount()).await;
        assert!(matches!(
            result,
            Err(CoreError::ProviderRejected { .. })
        ));
    }

    #[tokio::test]
    async fn verify_maps_charge_states() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/transaction/verify/ord-7")
            .with_status(200)
            .with_body(r#"{"status":true,"message":"Verification successful","data":{"status":"success"}}"#)
            .create_async()
            .await;

        let adapter = PaystackAdapter::new(settings(server.url()), GatewayClient::new());
        assert_eq!(
            adapter.query_status("ord-7").await.unwrap(),
            ReportedStatus::Paid
        );
    }

    #[test]
    fn status_mapping_covers_terminal_states() {
        assert_eq!(PaystackAdapter::map_status("success"), ReportedStatus::Paid);
        assert_eq!(PaystackAdapter::map_status("failed"), ReportedStatus::Failed);
        assert_eq!(
            PaystackAdapter::map_status("abandoned"),
            ReportedStatus::Expired
        );
        assert_eq!(
            PaystackAdapter::map_status("ongoing"),
            ReportedStatus::Pending
        );
    }
}
