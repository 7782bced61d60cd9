//! Inbound webhook verification and normalization.
//!
//! Raw bytes in, either a fully trusted `WebhookEvent` or a rejection
//! out — there is no partially-trusted middle ground. Verification is
//! provider-specific (keyed hash of the raw body, or a shared callback
//! token) and fails closed: missing configuration rejects the event.

use axum::http::HeaderMap;
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::{Digest, Sha256, Sha512};

use crate::config::Config;
use crate::domain::{Provider, ReportedStatus};
use crate::error::CoreError;
use crate::money;

type HmacSha256 = Hmac<Sha256>;
type HmacSha512 = Hmac<Sha512>;

/// A verified, normalized asynchronous event.
#[derive(Debug, Clone)]
pub struct WebhookEvent {
    pub provider: Provider,
    pub event_id: String,
    pub provider_transaction_id: String,
    pub reported_status: ReportedStatus,
    pub amount_minor_units: Option<i64>,
    pub raw: serde_json::Value,
}

#[derive(Clone)]
pub struct WebhookVerifier {
    xendit_callback_token: String,
    paystack_secret: String,
    moneygram_secret: String,
}

impl WebhookVerifier {
    pub fn from_config(config: &Config) -> Self {
        Self {
            xendit_callback_token: config.xendit.callback_token.clone(),
            paystack_secret: config.paystack.secret_key.clone(),
            moneygram_secret: config.moneygram.webhook_secret.clone(),
        }
    }

    pub fn new(
        xendit_callback_token: String,
        paystack_secret: String,
        moneygram_secret: String,
    ) -> Self {
        Self {
            xendit_callback_token,
            paystack_secret,
            moneygram_secret,
        }
    }

    /// Authenticates the raw body against the provider's scheme and
    /// normalizes the payload. Providers without a webhook channel are
    /// a caller error, not a signature failure.
    pub fn verify(
        &self,
        provider: Provider,
        raw_body: &[u8],
        headers: &HeaderMap,
    ) -> Result<WebhookEvent, CoreError> {
        match provider {
            Provider::Xendit => self.verify_xendit(raw_body, headers),
            Provider::Paystack => self.verify_paystack(raw_body, headers),
            Provider::Moneygram => self.verify_moneygram(raw_body, headers),
            Provider::Binance | Provider::Paypal => Err(CoreError::ValidationFailed(format!(
                "{} does not deliver webhooks to this endpoint",
                provider
            ))),
        }
    }

    fn verify_paystack(
        &self,
        raw_body: &[u8],
        headers: &HeaderMap,
    ) -> Result<WebhookEvent, CoreError> {
        if self.paystack_secret.is_empty() {
            return Err(CoreError::SignatureInvalid(
                "paystack webhook secret not configured".to_string(),
            ));
        }
        let signature = header_value(headers, "x-paystack-signature")?;
        let expected = hex::decode(signature)
            .map_err(|_| CoreError::SignatureInvalid("signature is not hex".to_string()))?;

        let mut mac = HmacSha512::new_from_slice(self.paystack_secret.as_bytes())
            .map_err(|_| CoreError::SignatureInvalid("invalid secret".to_string()))?;
        mac.update(raw_body);
        mac.verify_slice(&expected)
            .map_err(|_| CoreError::SignatureInvalid("paystack signature mismatch".to_string()))?;

        #[derive(Deserialize)]
        struct ChargeData {
            id: serde_json::Number,
            reference: String,
            #[serde(default)]
            status: Option<String>,
            #[serde(default)]
            amount: Option<i64>,
        }
        #[derive(Deserialize)]
        struct Payload {
            event: String,
            data: ChargeData,
        }

        let raw = parse_payload(raw_body)?;
        let payload: Payload = serde_json::from_value(raw.clone())
            .map_err(|e| CoreError::ValidationFailed(format!("paystack payload: {}", e)))?;

        let reported_status = match payload.event.as_str() {
            "charge.success" => ReportedStatus::Paid,
            _ => match payload.data.status.as_deref() {
                Some("failed") | Some("reversed") => ReportedStatus::Failed,
                Some("abandoned") => ReportedStatus::Expired,
                _ => ReportedStatus::Pending,
            },
        };

        Ok(WebhookEvent {
            provider: Provider::Paystack,
            event_id: format!("{}:{}", payload.event, payload.data.id),
            provider_transaction_id: payload.data.reference,
            reported_status,
            amount_minor_units: payload.data.amount,
            raw,
        })
    }

    fn verify_moneygram(
        &self,
        raw_body: &[u8],
        headers: &HeaderMap,
    ) -> Result<WebhookEvent, CoreError> {
        if self.moneygram_secret.is_empty() {
            return Err(CoreError::SignatureInvalid(
                "moneygram webhook secret not configured".to_string(),
            ));
        }
        let signature = header_value(headers, "x-mg-signature")?;
        let expected = hex::decode(signature)
            .map_err(|_| CoreError::SignatureInvalid("signature is not hex".to_string()))?;

        let mut mac = HmacSha256::new_from_slice(self.moneygram_secret.as_bytes())
            .map_err(|_| CoreError::SignatureInvalid("invalid secret".to_string()))?;
        mac.update(raw_body);
        mac.verify_slice(&expected)
            .map_err(|_| CoreError::SignatureInvalid("moneygram signature mismatch".to_string()))?;

        #[derive(Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct Payload {
            event_id: String,
            transfer_id: String,
            status: String,
            #[serde(default)]
            amount_minor_units: Option<i64>,
        }

        let raw = parse_payload(raw_body)?;
        let payload: Payload = serde_json::from_value(raw.clone())
            .map_err(|e| CoreError::ValidationFailed(format!("moneygram payload: {}", e)))?;

        let reported_status = match payload.status.as_str() {
            "RECEIVED" | "DELIVERED" => ReportedStatus::Paid,
            "REJECTED" | "REFUNDED" => ReportedStatus::Failed,
            "EXPIRED" => ReportedStatus::Expired,
            _ => ReportedStatus::Pending,
        };

        Ok(WebhookEvent {
            provider: Provider::Moneygram,
            event_id: payload.event_id,
            provider_transaction_id: payload.transfer_id,
            reported_status,
            amount_minor_units: payload.amount_minor_units,
            raw,
        })
    }

    fn verify_xendit(
        &self,
        raw_body: &[u8],
        headers: &HeaderMap,
    ) -> Result<WebhookEvent, CoreError> {
        if self.xendit_callback_token.is_empty() {
            return Err(CoreError::SignatureInvalid(
                "xendit callback token not configured".to_string(),
            ));
        }
        let token = header_value(headers, "x-callback-token")?;
        if !constant_time_eq(token, &self.xendit_callback_token) {
            return Err(CoreError::SignatureInvalid(
                "xendit callback token mismatch".to_string(),
            ));
        }

        #[derive(Deserialize)]
        struct Payload {
            id: String,
            status: String,
            #[serde(default)]
            currency: Option<String>,
            #[serde(default)]
            paid_amount: Option<serde_json::Number>,
            #[serde(default)]
            amount: Option<serde_json::Number>,
        }

        let raw = parse_payload(raw_body)?;
        let payload: Payload = serde_json::from_value(raw.clone())
            .map_err(|e| CoreError::ValidationFailed(format!("xendit payload: {}", e)))?;

        let reported_status = match payload.status.as_str() {
            "PAID" | "SETTLED" => ReportedStatus::Paid,
            "EXPIRED" => ReportedStatus::Expired,
            "PENDING" => ReportedStatus::Pending,
            _ => ReportedStatus::Failed,
        };

        // Invoice callbacks carry major-unit amounts.
        let amount_minor_units = match (
            payload.paid_amount.or(payload.amount),
            payload.currency.as_deref(),
        ) {
            (Some(number), Some(currency)) => {
                match number.to_string().parse::<bigdecimal::BigDecimal>() {
                    Ok(decimal) => Some(money::to_minor_units(&decimal, currency)?),
                    Err(_) => None,
                }
            }
            _ => None,
        };

        // Xendit retries under a fresh delivery id; the invoice id plus
        // reported status identifies the logical event.
        let event_id = match headers.get("webhook-id").and_then(|v| v.to_str().ok()) {
            Some(id) => id.to_string(),
            None => format!("{}:{}", payload.id, payload.status),
        };

        Ok(WebhookEvent {
            provider: Provider::Xendit,
            event_id,
            provider_transaction_id: payload.id,
            reported_status,
            amount_minor_units,
            raw,
        })
    }
}

fn header_value<'a>(headers: &'a HeaderMap, name: &str) -> Result<&'a str, CoreError> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .ok_or_else(|| CoreError::SignatureInvalid(format!("missing {} header", name)))
}

fn parse_payload(raw_body: &[u8]) -> Result<serde_json::Value, CoreError> {
    serde_json::from_slice(raw_body)
        .map_err(|e| CoreError::ValidationFailed(format!("webhook body is not JSON: {}", e)))
}

/// Token comparison through fixed-length digests, so the comparison
/// time does not depend on where the strings diverge.
fn constant_time_eq(candidate: &str, expected: &str) -> bool {
    Sha256::digest(candidate.as_bytes()) == Sha256::digest(expected.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn verifier() -> WebhookVerifier {
        WebhookVerifier::new(
            "cb-token".to_string(),
            "sk_test_secret".to_string(),
            "mg-secret".to_string(),
        )
    }

    fn sign_sha512(secret: &str, body: &[u8]) -> String {
        let mut mac = HmacSha512::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(body);
        hex::encode(mac.finalize().into_bytes())
    }

    fn sign_sha256(secret: &str, body: &[u8]) -> String {
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(body);
        hex::encode(mac.finalize().into_bytes())
    }

    #[test]
    fn paystack_event_verifies_and_normalizes() {
        let body = br#"{"event":"charge.success","data":{"id":302961,"reference":"ord-7","status":"success","amount":5000}}"#;
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-paystack-signature",
            HeaderValue::from_str(&sign_sha512("sk_test_secret", body)).unwrap(),
        );

        let event = verifier()
            .verify(Provider::Paystack, body, &headers)
            .unwrap();
        assert_eq!(event.event_id, "charge.success:302961");
        assert_eq!(event.provider_transaction_id, "ord-7");
        assert_eq!(event.reported_status, ReportedStatus::Paid);
        assert_eq!(event.amount_minor_units, Some(5000));
    }

    #[test]
    fn tampered_paystack_body_is_rejected() {
        let body = br#"{"event":"charge.success","data":{"id":1,"reference":"ord-7","amount":5000}}"#;
        let tampered = br#"{"event":"charge.success","data":{"id":1,"reference":"ord-7","amount":9999}}"#;
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-paystack-signature",
            HeaderValue::from_str(&sign_sha512("sk_test_secret", body)).unwrap(),
        );

        let result = verifier().verify(Provider::Paystack, tampered, &headers);
        assert!(matches!(result, Err(CoreError::SignatureInvalid(_))));
    }

    #[test]
    fn missing_signature_header_fails_closed() {
        let body = br#"{"event":"charge.success","data":{"id":1,"reference":"ord-7"}}"#;
        let result = verifier().verify(Provider::Paystack, body, &HeaderMap::new());
        assert!(matches!(result, Err(CoreError::SignatureInvalid(_))));
    }

    #[test]
    fn unconfigured_secret_fails_closed() {
        let v = WebhookVerifier::new(String::new(), String::new(), String::new());
        let body = br#"{"id":"inv-1","status":"PAID"}"#;
        let mut headers = HeaderMap::new();
        headers.insert("x-callback-token", HeaderValue::from_static("anything"));

        let result = v.verify(Provider::Xendit, body, &headers);
        assert!(matches!(result, Err(CoreError::SignatureInvalid(_))));
    }

    #[test]
    fn xendit_token_match_normalizes_amount_to_minor_units() {
        let body = br#"{"id":"inv-1","external_id":"ord-1","status":"PAID","currency":"PHP","paid_amount":120.50}"#;
        let mut headers = HeaderMap::new();
        headers.insert("x-callback-token", HeaderValue::from_static("cb-token"));
        headers.insert("webhook-id", HeaderValue::from_static("wh-123"));

        let event = verifier().verify(Provider::Xendit, body, &headers).unwrap();
        assert_eq!(event.event_id, "wh-123");
        assert_eq!(event.provider_transaction_id, "inv-1");
        assert_eq!(event.reported_status, ReportedStatus::Paid);
        assert_eq!(event.amount_minor_units, Some(12_050));
    }

    #[test]
    fn xendit_token_mismatch_is_rejected() {
        let body = br#"{"id":"inv-1","status":"PAID"}"#;
        let mut headers = HeaderMap::new();
        headers.insert("x-callback-token", HeaderValue::from_static("wrong"));

        let result = verifier().verify(Provider::Xendit, body, &headers);
        assert!(matches!(result, Err(CoreError::SignatureInvalid(_))));
    }

    #[test]
    fn moneygram_event_verifies_with_sha256() {
        let body = br#"{"eventId":"evt-9","transferId":"t-1","status":"RECEIVED"}"#;
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-mg-signature",
            HeaderValue::from_str(&sign_sha256("mg-secret", body)).unwrap(),
        );

        let event = verifier()
            .verify(Provider::Moneygram, body, &headers)
            .unwrap();
        assert_eq!(event.event_id, "evt-9");
        assert_eq!(event.reported_status, ReportedStatus::Paid);
    }

    #[test]
    fn malformed_json_after_valid_auth_is_a_validation_error() {
        let body = b"not-json";
        let mut headers = HeaderMap::new();
        headers.insert("x-callback-token", HeaderValue::from_static("cb-token"));

        let result = verifier().verify(Provider::Xendit, body, &headers);
        assert!(matches!(result, Err(CoreError::ValidationFailed(_))));
    }

    #[test]
    fn providers_without_webhooks_are_rejected_as_invalid_requests() {
        let result = verifier().verify(Provider::Binance, b"{}", &HeaderMap::new());
        assert!(matches!(result, Err(CoreError::ValidationFailed(_))));
    }
}
