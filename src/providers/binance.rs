//! Binance Pay adapter: direct order capture in USDT, settled by
//! polling the order-query endpoint.
//!
//! Every request is signed: HMAC-SHA512 over
//! `"{timestamp}\n{nonce}\n{body}\n"` with the merchant secret, carried
//! in the `BinancePay-*` headers.

use async_trait::async_trait;
use chrono::Utc;
use hmac::{Hmac, Mac};
use serde::Deserialize;
use serde_json::json;
use sha2::Sha512;
use uuid::Uuid;

use super::{
    response_error, transport_error, CompletionAction, GatewayClient, ProviderAdapter,
    ProviderResult,
};
use crate::config::BinanceSettings;
use crate::domain::{PaymentIntent, Provider, ReportedStatus, SettlementMode};
use crate::error::CoreError;
use crate::money::{to_major_string, NormalizedAmount};

type HmacSha512 = Hmac<Sha512>;

const SETTLEMENT_CURRENCY: &str = "USDT";

pub struct BinanceAdapter {
    client: GatewayClient,
    settings: BinanceSettings,
}

#[derive(Debug, Deserialize)]
struct ApiEnvelope {
    status: String,
    #[serde(default)]
    code: String,
    #[serde(rename = "errorMessage")]
    error_message: Option<String>,
    data: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct OrderData {
    #[serde(rename = "prepayId")]
    prepay_id: String,
    #[serde(rename = "checkoutUrl")]
    checkout_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OrderStatusData {
    status: String,
}

impl BinanceAdapter {
    pub fn new(settings: BinanceSettings, client: GatewayClient) -> Self {
        Self { client, settings }
    }

    fn sign(&self, timestamp: &str, nonce: &str, body: &str) -> Result<String, CoreError> {
        let payload = format!("{}\n{}\n{}\n", timestamp, nonce, body);
        let mut mac = HmacSha512::new_from_slice(self.settings.api_secret.as_bytes())
            .map_err(|_| CoreError::ValidationFailed("binance api secret is empty".to_string()))?;
        mac.update(payload.as_bytes());
        Ok(hex::encode(mac.finalize().into_bytes()))
    }

    async fn signed_post(&self, path: &str, body: String) -> Result<serde_json::Value, CoreError> {
        let url = format!("{}{}", self.settings.base_url.trim_end_matches('/'), path);
        let timestamp = Utc::now().timestamp_millis().to_string();
        let nonce = Uuid::new_v4().simple().to_string();
        let signature = self.sign(&timestamp, &nonce, &body)?;

        let request = self
            .client
            .http()
            .post(&url)
            .header("Content-Type", "application/json")
            .header("BinancePay-Timestamp", timestamp)
            .header("BinancePay-Nonce", nonce)
            .header("BinancePay-Certificate-SN", &self.settings.api_key)
            .header("BinancePay-Signature", signature)
            .body(body);

        self.client
            .guard(Provider::Binance, async move {
                let response = request
                    .send()
                    .await
                    .map_err(|e| transport_error(Provider::Binance, e))?;
                if !response.status().is_success() {
                    return Err(response_error(Provider::Binance, response).await);
                }
                response
                    .json::<serde_json::Value>()
                    .await
                    .map_err(|e| transport_error(Provider::Binance, e))
            })
            .await
    }

    fn unwrap_envelope(raw: &serde_json::Value) -> Result<serde_json::Value, CoreError> {
        let envelope: ApiEnvelope =
            serde_json::from_value(raw.clone()).map_err(|e| CoreError::ProviderRejected {
                code: "invalid_response".to_string(),
                message: format!("binance pay payload: {}", e),
            })?;

        if envelope.status != "SUCCESS" {
            return Err(CoreError::ProviderRejected {
                code: envelope.code,
                message: envelope
                    .error_message
                    .unwrap_or_else(|| "order rejected".to_string()),
            });
        }

        envelope.data.ok_or_else(|| CoreError::ProviderRejected {
            code: "invalid_response".to_string(),
            message: "binance pay response missing data".to_string(),
        })
    }

    fn map_status(status: &str) -> ReportedStatus {
        match status {
            "PAID" => ReportedStatus::Paid,
            "EXPIRED" => ReportedStatus::Expired,
            "CANCELED" | "CLOSED" | "ERROR" => ReportedStatus::Failed,
            _ => ReportedStatus::Pending,
        }
    }
}

#[async_trait]
impl ProviderAdapter for BinanceAdapter {
    fn provider(&self) -> Provider {
        Provider::Binance
    }

    fn settlement_mode(&self) -> SettlementMode {
        SettlementMode::Poll
    }

    fn required_currency(&self) -> Option<&str> {
        Some(SETTLEMENT_CURRENCY)
    }

    async fn initiate(
        &self,
        intent: &PaymentIntent,
        amount: &NormalizedAmount,
    ) -> Result<ProviderResult, CoreError> {
        let body = json!({
            "merchantTradeNo": intent.external_reference(),
            "orderAmount": to_major_string(amount.minor_units, &amount.currency),
            "currency": amount.currency,
            "goods": {
                "goodsType": "01",
                "goodsCategory": "D000",
                "referenceGoodsId": intent.external_reference(),
                "goodsName": intent.description(),
            },
        });
        let body = serde_json::to_string(&body)
            .map_err(|e| CoreError::ValidationFailed(format!("order encoding: {}", e)))?;

        let raw = self.signed_post("/binancepay/openapi/v2/order", body).await?;
        let data = Self::unwrap_envelope(&raw)?;
        let order: OrderData =
            serde_json::from_value(data).map_err(|e| CoreError::ProviderRejected {
                code: "invalid_response".to_string(),
                message: format!("binance pay order payload: {}", e),
            })?;

        let action = match order.checkout_url {
            Some(url) => CompletionAction::Redirect { url },
            None => CompletionAction::ClientAction {
                token: order.prepay_id.clone(),
            },
        };

        Ok(ProviderResult {
            provider_transaction_id: order.prepay_id,
            action,
            reported: None,
            raw,
        })
    }

    async fn query_status(
        &self,
        provider_transaction_id: &str,
    ) -> Result<ReportedStatus, CoreError> {
        let body = json!({ "prepayId": provider_transaction_id });
        let body = serde_json::to_string(&body)
            .map_err(|e| CoreError::ValidationFailed(format!("query encoding: {}", e)))?;

        let raw = self
            .signed_post("/binancepay/openapi/v2/order/query", body)
            .await?;
        let data = Self::unwrap_envelope(&raw)?;
        let status: OrderStatusData =
            serde_json::from_value(data).map_err(|e| CoreError::ProviderRejected {
                code: "invalid_response".to_string(),
                message: format!("binance pay status payload: {}", e),
            })?;

        Ok(Self::map_status(&status.status))
    }
}
