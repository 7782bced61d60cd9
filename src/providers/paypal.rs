//! PayPal adapter: two-phase order/capture flow with synchronous
//! settlement — the capture response carries the final status.
//!
//! Token acquisition is OAuth client-credentials; the access token is
//! cached until shortly before expiry.

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::Deserialize;
use serde_json::json;
use tokio::sync::RwLock;

use super::{
    response_error, transport_error, CompletionAction, GatewayClient, ProviderAdapter,
    ProviderResult,
};
use crate::config::PayPalSettings;
use crate::domain::{PaymentIntent, Provider, ReportedStatus, SettlementMode};
use crate::error::CoreError;
use crate::money::{to_major_string, NormalizedAmount};

/// Refresh the token this long before the provider expires it.
const TOKEN_EXPIRY_MARGIN_SECS: i64 = 60;

pub struct PayPalAdapter {
    client: GatewayClient,
    settings: PayPalSettings,
    token: RwLock<Option<CachedToken>>,
}

#[derive(Debug, Clone)]
struct CachedToken {
    access_token: String,
    expires_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: i64,
}

#[derive(Debug, Deserialize)]
struct OrderLink {
    href: String,
    rel: String,
}

#[derive(Debug, Deserialize)]
struct OrderResponse {
    id: String,
    status: String,
    #[serde(default)]
    links: Vec<OrderLink>,
}

impl PayPalAdapter {
    pub fn new(settings: PayPalSettings, client: GatewayClient) -> Self {
        Self {
            client,
            settings,
            token: RwLock::new(None),
        }
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.settings.base_url.trim_end_matches('/'), path)
    }

    async fn access_token(&self) -> Result<String, CoreError> {
        if let Some(cached) = self.token.read().await.as_ref() {
            if cached.expires_at > Utc::now() {
                return Ok(cached.access_token.clone());
            }
        }

        let request = self
            .client
            .http()
            .post(self.endpoint("/v1/oauth2/token"))
            .basic_auth(&self.settings.client_id, Some(&self.settings.client_secret))
            .form(&[("grant_type", "client_credentials")]);

        let token = self
            .client
            .guard(Provider::Paypal, async move {
                let response = request
                    .send()
                    .await
                    .map_err(|e| transport_error(Provider::Paypal, e))?;
                if !response.status().is_success() {
                    return Err(response_error(Provider::Paypal, response).await);
                }
                response
                    .json::<TokenResponse>()
                    .await
                    .map_err(|e| transport_error(Provider::Paypal, e))
            })
            .await?;

        let cached = CachedToken {
            access_token: token.access_token.clone(),
            expires_at: Utc::now()
                + ChronoDuration::seconds((token.expires_in - TOKEN_EXPIRY_MARGIN_SECS).max(0)),
        };
        *self.token.write().await = Some(cached);

        Ok(token.access_token)
    }

    async fn post_order(
        &self,
        path: String,
        body: serde_json::Value,
    ) -> Result<serde_json::Value, CoreError> {
        let token = self.access_token().await?;
        let request = self
            .client
            .http()
            .post(self.endpoint(&path))
            .bearer_auth(token)
            .json(&body);

        self.client
            .guard(Provider::Paypal, async move {
                let response = request
                    .send()
                    .await
                    .map_err(|e| transport_error(Provider::Paypal, e))?;
                if !response.status().is_success() {
                    return Err(response_error(Provider::Paypal, response).await);
                }
                response
                    .json::<serde_json::Value>()
                    .await
                    .map_err(|e| transport_error(Provider::Paypal, e))
            })
            .await
    }

    fn parse_order(raw: &serde_json::Value) -> Result<OrderResponse, CoreError> {
        serde_json::from_value(raw.clone()).map_err(|e| CoreError::ProviderRejected {
            code: "invalid_response".to_string(),
            message: format!("paypal order payload: {}", e),
        })
    }

    fn map_status(status: &str) -> ReportedStatus {
        match status {
            "COMPLETED" => ReportedStatus::Paid,
            "VOIDED" => ReportedStatus::Failed,
            _ => ReportedStatus::Pending,
        }
    }
}

#[async_trait]
impl ProviderAdapter for PayPalAdapter {
    fn provider(&self) -> Provider {
        Provider::Paypal
    }

    fn settlement_mode(&self) -> SettlementMode {
        SettlementMode::Sync
    }

    fn supports_capture(&self) -> bool {
        true
    }

    async fn initiate(
        &self,
        intent: &PaymentIntent,
        amount: &NormalizedAmount,
    ) -> Result<ProviderResult, CoreError> {
        let body = json!({
            "intent": "CAPTURE",
            "purchase_units": [{
                "amount": {
                    "currency_code": amount.currency,
                    "value": to_major_string(amount.minor_units, &amount.currency),
                },
                "description": intent.description(),
                "custom_id": intent.external_reference(),
            }],
        });

        let raw = self.post_order("/v2/checkout/orders".to_string(), body).await?;
        let order = Self::parse_order(&raw)?;

        let approve = order
            .links
            .iter()
            .find(|link| link.rel == "approve")
            .map(|link| link.href.clone());

        let action = match approve {
            Some(url) => CompletionAction::Redirect { url },
            None => CompletionAction::ClientAction {
                token: order.id.clone(),
            },
        };

        Ok(ProviderResult {
            provider_transaction_id: order.id,
            action,
            reported: None,
            raw,
        })
    }

    async fn query_status(
        &self,
        provider_transaction_id: &str,
    ) -> Result<ReportedStatus, CoreError> {
        let token = self.access_token().await?;
        let request = self
            .client
            .http()
            .get(self.endpoint(&format!("/v2/checkout/orders/{}", provider_transaction_id)))
            .bearer_auth(token);

        let order = self
            .client
            .guard(Provider::Paypal, async move {
                let response = request
                    .send()
                    .await
                    .map_err(|e| transport_error(Provider::Paypal, e))?;
                if !response.status().is_success() {
                    return Err(response_error(Provider::Paypal, response).await);
                }
                response
                    .json::<OrderResponse>()
                    .await
                    .map_err(|e| transport_error(Provider::Paypal, e))
            })
            .await?;

        Ok(Self::map_status(&order.status))
    }

    async fn capture(&self, provider_transaction_id: &str) -> Result<ProviderResult, CoreError> {
        let raw = self
            .post_order(
                format!("/v2/checkout/orders/{}/capture", provider_transaction_id),
                json!({}),
            )
            .await?;
        let order = Self::parse_order(&raw)?;

        Ok(ProviderResult {
            provider_transaction_id: order.id,
            action: CompletionAction::None,
            reported: Some(Self::map_status(&order.status)),
            raw,
        })
    }
}
