//! Gateway adapters.
//!
//! One module per external payment system. Each adapter translates a
//! normalized intent into the gateway's wire format, performs the call
//! through a circuit-breaker-guarded HTTP client, and maps the
//! response back into a `ProviderResult`. Adapters never touch the
//! transaction record; the orchestrator folds their results.

pub mod binance;
pub mod moneygram;
pub mod paypal;
pub mod paystack;
pub mod xendit;

use async_trait::async_trait;
use failsafe::futures::CircuitBreaker;
use failsafe::{backoff, failure_policy, Config, Error as FailsafeError, StateMachine};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;

use crate::domain::{PaymentIntent, Provider, ReportedStatus, SettlementMode};
use crate::error::CoreError;
use crate::money::NormalizedAmount;

pub use binance::BinanceAdapter;
pub use moneygram::MoneyGramAdapter;
pub use paypal::PayPalAdapter;
pub use paystack::PaystackAdapter;
pub use xendit::XenditAdapter;

/// How the caller completes the flow after acceptance. Redirect and
/// client action are mutually exclusive by construction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CompletionAction {
    Redirect { url: String },
    ClientAction { token: String },
    None,
}

#[derive(Debug, Clone)]
pub struct ProviderResult {
    pub provider_transaction_id: String,
    pub action: CompletionAction,
    /// Status already known at acceptance time (sync flows).
    pub reported: Option<ReportedStatus>,
    /// Retained for audit and debugging only; never interpreted.
    pub raw: serde_json::Value,
}

#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    fn provider(&self) -> Provider;

    fn settlement_mode(&self) -> SettlementMode;

    /// Currency the gateway settles in, when it only accepts one.
    fn required_currency(&self) -> Option<&str> {
        None
    }

    /// Whether the gateway runs a two-phase authorize/capture flow.
    fn supports_capture(&self) -> bool {
        false
    }

    async fn initiate(
        &self,
        intent: &PaymentIntent,
        amount: &NormalizedAmount,
    ) -> Result<ProviderResult, CoreError>;

    async fn query_status(
        &self,
        provider_transaction_id: &str,
    ) -> Result<ReportedStatus, CoreError>;

    /// Second phase of authorize/capture flows. Single-phase adapters
    /// keep the default rejection.
    async fn capture(&self, provider_transaction_id: &str) -> Result<ProviderResult, CoreError> {
        Err(CoreError::ValidationFailed(format!(
            "{} does not support capture",
            self.provider()
        )))
    }
}

const HTTP_TIMEOUT: Duration = Duration::from_secs(30);
const BREAKER_FAILURE_THRESHOLD: u32 = 3;
const BREAKER_RESET: Duration = Duration::from_secs(60);

/// HTTP client shared by all adapters: request timeout plus a
/// consecutive-failures circuit breaker. A rejected call surfaces as
/// `ProviderUnavailable` like any other transient fault.
#[derive(Clone)]
pub struct GatewayClient {
    http: reqwest::Client,
    breaker: StateMachine<failure_policy::ConsecutiveFailures<backoff::EqualJittered>, ()>,
}

impl GatewayClient {
    pub fn new() -> Self {
        let http = reqwest::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .unwrap_or_default();

        let backoff = backoff::equal_jittered(BREAKER_RESET, BREAKER_RESET * 2);
        let policy = failure_policy::consecutive_failures(BREAKER_FAILURE_THRESHOLD, backoff);
        let breaker = Config::new().failure_policy(policy).build();

        Self { http, breaker }
    }

    pub fn http(&self) -> &reqwest::Client {
        &self.http
    }

    pub async fn guard<T, F>(&self, provider: Provider, call: F) -> Result<T, CoreError>
    where
        F: Future<Output = Result<T, CoreError>>,
    {
        match self.breaker.call(call).await {
            Ok(value) => Ok(value),
            Err(FailsafeError::Rejected) => Err(CoreError::ProviderUnavailable(format!(
                "{} circuit breaker is open",
                provider
            ))),
            Err(FailsafeError::Inner(err)) => Err(err),
        }
    }
}

impl Default for GatewayClient {
    fn default() -> Self {
        Self::new()
    }
}

/// Network-level failures are transient by definition.
pub(crate) fn transport_error(provider: Provider, err: reqwest::Error) -> CoreError {
    CoreError::ProviderUnavailable(format!("{}: {}", provider, err))
}

/// Maps a non-success gateway response: 5xx is a transient fault, the
/// rest is a decision and is never retried.
pub(crate) async fn response_error(provider: Provider, response: reqwest::Response) -> CoreError {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();

    if status.is_server_error() {
        return CoreError::ProviderUnavailable(format!("{} returned {}", provider, status));
    }

    let message = serde_json::from_str::<serde_json::Value>(&body)
        .ok()
        .and_then(|value| {
            ["message", "error", "error_description", "errorMessage"]
                .iter()
                .find_map(|key| {
                    value
                        .get(key)
                        .and_then(|m| m.as_str())
                        .map(str::to_string)
                })
        })
        .unwrap_or_else(|| body.chars().take(200).collect());

    CoreError::ProviderRejected {
        code: status.as_u16().to_string(),
        message,
    }
}

/// Parses a decimal string into a JSON number without going through a
/// binary float.
pub(crate) fn json_number(decimal: &str) -> Result<serde_json::Number, CoreError> {
    serde_json::from_str(decimal)
        .map_err(|_| CoreError::InvalidAmount(format!("not a decimal number: {}", decimal)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn completion_action_serializes_with_tag() {
        let action = CompletionAction::Redirect {
            url: "https://checkout.example/inv-1".to_string(),
        };
        let value = serde_json::to_value(&action).unwrap();
        assert_eq!(value["type"], "redirect");
        assert_eq!(value["url"], "https://checkout.example/inv-1");

        let none = serde_json::to_value(&CompletionAction::None).unwrap();
        assert_eq!(none["type"], "none");
    }

    #[test]
    fn json_number_preserves_decimal_text() {
        let n = json_number("12.34").unwrap();
        assert_eq!(serde_json::to_string(&n).unwrap(), "12.34");
        assert!(json_number("not-a-number").is_err());
    }
}
