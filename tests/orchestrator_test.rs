//! End-to-end orchestration flows against mocked gateways and the
//! in-memory store.

use bigdecimal::BigDecimal;
use std::collections::BTreeMap;
use std::io::Write as _;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use paygate_core::config::{
    BinanceSettings, PayPalSettings, PaystackSettings, RetryPolicy, XenditSettings,
};
use paygate_core::domain::{PaymentIntent, Provider, TransactionStatus};
use paygate_core::error::CoreError;
use paygate_core::money::StaticRates;
use paygate_core::providers::{
    BinanceAdapter, CompletionAction, GatewayClient, PayPalAdapter, PaystackAdapter,
    ProviderAdapter, XenditAdapter,
};
use paygate_core::services::Orchestrator;
use paygate_core::store::{KeyValueStore, MemoryStore};
use paygate_core::webhooks::WebhookVerifier;

fn fast_retry() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 3,
        base_delay: Duration::from_millis(5),
    }
}

fn verifier() -> WebhookVerifier {
    WebhookVerifier::new(
        "cb-token".to_string(),
        "sk_test_secret".to_string(),
        "mg-secret".to_string(),
    )
}

fn orchestrator_with(
    adapter: Arc<dyn ProviderAdapter>,
    rates: StaticRates,
) -> Arc<Orchestrator> {
    let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
    Arc::new(
        Orchestrator::new(
            store,
            Arc::new(rates),
            verifier(),
            fast_retry(),
            Duration::from_secs(2),
        )
        .with_adapter(adapter),
    )
}

fn xendit_adapter(base_url: String) -> Arc<dyn ProviderAdapter> {
    Arc::new(XenditAdapter::new(
        XenditSettings {
            secret_key: "xnd_development_key".to_string(),
            callback_token: "cb-token".to_string(),
            base_url,
            success_redirect_url: "https://shop.example/payment-success".to_string(),
            failure_redirect_url: "https://shop.example/payment-failed".to_string(),
        },
        GatewayClient::new(),
    ))
}

fn intent(provider: Provider, reference: &str, amount: &str, currency: &str) -> PaymentIntent {
    PaymentIntent::new(
        provider,
        BigDecimal::from_str(amount).unwrap(),
        currency,
        "buyer@example.com",
        "Family package",
        BTreeMap::new(),
        Some(reference.to_string()),
    )
    .unwrap()
}

fn invoice_body(id: &str) -> String {
    format!(
        r#"{{"id":"{}","invoice_url":"https://checkout.xendit.co/web/{}","status":"PENDING"}}"#,
        id, id
    )
}

#[tokio::test]
async fn webhook_mode_intent_lands_in_pending_action() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", "/v2/invoices")
        .with_status(200)
        .with_body(invoice_body("inv-1"))
        .create_async()
        .await;

    let orchestrator = orchestrator_with(xendit_adapter(server.url()), StaticRates::new());
    let outcome = orchestrator
        .clone()
        .create_payment(intent(Provider::Xendit, "ord-1", "100", "USD"))
        .await
        .unwrap();

    mock.assert_async().await;
    assert_eq!(outcome.transaction.status, TransactionStatus::PendingAction);
    assert_eq!(outcome.transaction.amount_minor_units, 10_000);
    assert_eq!(
        outcome.transaction.provider_transaction_id.as_deref(),
        Some("inv-1")
    );
    assert!(matches!(outcome.action, CompletionAction::Redirect { .. }));
}

#[tokio::test]
async fn duplicate_reference_returns_existing_without_second_gateway_call() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", "/v2/invoices")
        .with_status(200)
        .with_body(invoice_body("inv-1"))
        .expect(1)
        .create_async()
        .await;

    let orchestrator = orchestrator_with(xendit_adapter(server.url()), StaticRates::new());

    let first = orchestrator
        .clone()
        .create_payment(intent(Provider::Xendit, "ord-1", "100", "USD"))
        .await
        .unwrap();
    let second = orchestrator
        .clone()
        .create_payment(intent(Provider::Xendit, "ord-1", "100", "USD"))
        .await
        .unwrap();

    mock.assert_async().await;
    assert_eq!(second.transaction.id, first.transaction.id);
    assert_eq!(second.action, CompletionAction::None);
}

#[tokio::test]
async fn same_reference_with_different_amount_conflicts() {
    let mut server = mockito::Server::new_async().await;
    let _mock = server
        .mock("POST", "/v2/invoices")
        .with_status(200)
        .with_body(invoice_body("inv-1"))
        .create_async()
        .await;

    let orchestrator = orchestrator_with(xendit_adapter(server.url()), StaticRates::new());
    orchestrator
        .clone()
        .create_payment(intent(Provider::Xendit, "ord-1", "100", "USD"))
        .await
        .unwrap();

    let result = orchestrator
        .clone()
        .create_payment(intent(Provider::Xendit, "ord-1", "250", "USD"))
        .await;
    assert!(matches!(result, Err(CoreError::AlreadyExists(_))));
}

#[tokio::test]
async fn concurrent_identical_intents_create_one_transaction() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", "/v2/invoices")
        .with_status(200)
        .with_body(invoice_body("inv-1"))
        .expect(1)
        .create_async()
        .await;

    let orchestrator = orchestrator_with(xendit_adapter(server.url()), StaticRates::new());

    let mut handles = Vec::new();
    for _ in 0..8 {
        let orchestrator = orchestrator.clone();
        handles.push(tokio::spawn(async move {
            orchestrator
                .create_payment(intent(Provider::Xendit, "ord-1", "100", "USD"))
                .await
        }));
    }

    let mut ids = Vec::new();
    for handle in handles {
        let outcome = handle.await.unwrap().unwrap();
        ids.push(outcome.transaction.id);
    }

    mock.assert_async().await;
    ids.dedup();
    assert_eq!(ids.len(), 1, "every caller must see the same transaction");
}

#[tokio::test]
async fn gateway_rejection_fails_the_transaction_and_is_not_retried() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", "/v2/invoices")
        .with_status(400)
        .with_body(r#"{"message":"MINIMUM_AMOUNT_ERROR"}"#)
        .expect(1)
        .create_async()
        .await;

    let orchestrator = orchestrator_with(xendit_adapter(server.url()), StaticRates::new());
    let result = orchestrator
        .clone()
        .create_payment(intent(Provider::Xendit, "ord-1", "1", "USD"))
        .await;

    mock.assert_async().await;
    assert!(matches!(result, Err(CoreError::ProviderRejected { .. })));

    // The reference is burned: the failed attempt is the record.
    let retry = orchestrator
        .clone()
        .create_payment(intent(Provider::Xendit, "ord-1", "1", "USD"))
        .await
        .unwrap();
    assert_eq!(retry.transaction.status, TransactionStatus::Failed);
}

#[tokio::test]
async fn unavailable_gateway_is_retried_with_backoff_then_surfaced() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", "/v2/invoices")
        .with_status(503)
        .expect(3)
        .create_async()
        .await;

    let orchestrator = orchestrator_with(xendit_adapter(server.url()), StaticRates::new());
    let result = orchestrator
        .clone()
        .create_payment(intent(Provider::Xendit, "ord-1", "100", "USD"))
        .await;

    mock.assert_async().await;
    assert!(matches!(result, Err(CoreError::ProviderUnavailable(_))));
}

#[tokio::test]
async fn paystack_intent_converts_currency_before_the_gateway_call() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", "/transaction/initialize")
        .match_body(mockito::Matcher::PartialJson(serde_json::json!({
            "amount": 125_000,
            "currency": "GHS",
        })))
        .with_status(200)
        .with_body(
            r#"{"status":true,"message":"ok","data":{"authorization_url":"https://checkout.paystack.com/x","access_code":"ac_1","reference":"ord-2"}}"#,
        )
        .create_async()
        .await;

    let adapter: Arc<dyn ProviderAdapter> = Arc::new(PaystackAdapter::new(
        PaystackSettings {
            secret_key: "sk_test_secret".to_string(),
            base_url: server.url(),
        },
        GatewayClient::new(),
    ));
    let rates = StaticRates::new().with_rate("USD", "GHS", BigDecimal::from_str("12.5").unwrap());
    let orchestrator = orchestrator_with(adapter, rates);

    let outcome = orchestrator
        .clone()
        .create_payment(intent(Provider::Paystack, "ord-2", "100", "USD"))
        .await
        .unwrap();

    mock.assert_async().await;
    assert_eq!(outcome.transaction.currency, "GHS");
    assert_eq!(outcome.transaction.amount_minor_units, 125_000);
    assert!(matches!(outcome.action, CompletionAction::ClientAction { .. }));
}

#[tokio::test]
async fn missing_rate_fails_before_any_reservation() {
    let server = mockito::Server::new_async().await;
    let adapter: Arc<dyn ProviderAdapter> = Arc::new(PaystackAdapter::new(
        PaystackSettings {
            secret_key: "sk_test_secret".to_string(),
            base_url: server.url(),
        },
        GatewayClient::new(),
    ));
    let orchestrator = orchestrator_with(adapter, StaticRates::new());

    let result = orchestrator
        .clone()
        .create_payment(intent(Provider::Paystack, "ord-2", "100", "USD"))
        .await;
    assert!(matches!(result, Err(CoreError::RateUnavailable { .. })));
}

#[tokio::test]
async fn poll_mode_intent_settles_via_status_query() {
    let mut server = mockito::Server::new_async().await;
    let _order = server
        .mock("POST", "/binancepay/openapi/v2/order")
        .with_status(200)
        .with_body(
            r#"{"status":"SUCCESS","code":"000000","data":{"prepayId":"98765","checkoutUrl":"https://pay.binance.com/c/98765"},"errorMessage":null}"#,
        )
        .create_async()
        .await;
    let _query = server
        .mock("POST", "/binancepay/openapi/v2/order/query")
        .with_status(200)
        .with_body(r#"{"status":"SUCCESS","code":"000000","data":{"status":"PAID"},"errorMessage":null}"#)
        .create_async()
        .await;

    let adapter: Arc<dyn ProviderAdapter> = Arc::new(BinanceAdapter::new(
        BinanceSettings {
            api_key: "cert-sn".to_string(),
            api_secret: "merchant-secret".to_string(),
            base_url: server.url(),
        },
        GatewayClient::new(),
    ));
    let rates = StaticRates::new().with_rate("USD", "USDT", BigDecimal::from_str("1").unwrap());
    let orchestrator = orchestrator_with(adapter, rates);

    let outcome = orchestrator
        .clone()
        .create_payment(intent(Provider::Binance, "ord-4", "25", "USD"))
        .await
        .unwrap();
    assert_eq!(outcome.transaction.status, TransactionStatus::Settling);

    let polled = orchestrator
        .poll_status(outcome.transaction.id, None)
        .await
        .unwrap();
    assert_eq!(polled.status, TransactionStatus::Paid);

    // Terminal transactions are returned without another gateway call.
    let again = orchestrator
        .poll_status(outcome.transaction.id, None)
        .await
        .unwrap();
    assert_eq!(again.status, TransactionStatus::Paid);
}

#[tokio::test]
async fn poll_timeout_leaves_last_known_state() {
    let mut server = mockito::Server::new_async().await;
    let _order = server
        .mock("POST", "/binancepay/openapi/v2/order")
        .with_status(200)
        .with_body(
            r#"{"status":"SUCCESS","code":"000000","data":{"prepayId":"98765"},"errorMessage":null}"#,
        )
        .create_async()
        .await;
    // The status endpoint stalls past the caller's poll timeout.
    let _query = server
        .mock("POST", "/binancepay/openapi/v2/order/query")
        .with_status(200)
        .with_chunked_body(|writer| {
            std::thread::sleep(std::time::Duration::from_millis(500));
            writer.write_all(
                br#"{"status":"SUCCESS","code":"000000","data":{"status":"PAID"},"errorMessage":null}"#,
            )
        })
        .create_async()
        .await;

    let adapter: Arc<dyn ProviderAdapter> = Arc::new(BinanceAdapter::new(
        BinanceSettings {
            api_key: "cert-sn".to_string(),
            api_secret: "merchant-secret".to_string(),
            base_url: server.url(),
        },
        GatewayClient::new(),
    ));
    let rates = StaticRates::new().with_rate("USD", "USDT", BigDecimal::from_str("1").unwrap());
    let orchestrator = orchestrator_with(adapter, rates);

    let outcome = orchestrator
        .clone()
        .create_payment(intent(Provider::Binance, "ord-4", "25", "USD"))
        .await
        .unwrap();

    let polled = orchestrator
        .poll_status(outcome.transaction.id, Some(Duration::from_millis(50)))
        .await
        .unwrap();
    assert_eq!(polled.status, TransactionStatus::Settling);
}

#[tokio::test]
async fn two_phase_capture_settles_synchronously() {
    let mut server = mockito::Server::new_async().await;
    let _token = server
        .mock("POST", "/v1/oauth2/token")
        .with_status(200)
        .with_body(r#"{"access_token":"A21AAA","token_type":"Bearer","expires_in":32400}"#)
        .create_async()
        .await;
    let _order = server
        .mock("POST", "/v2/checkout/orders")
        .with_status(201)
        .with_body(
            r#"{"id":"o-1","status":"CREATED","links":[{"href":"https://sandbox.paypal.com/checkoutnow?token=o-1","rel":"approve","method":"GET"}]}"#,
        )
        .create_async()
        .await;
    let _capture = server
        .mock("POST", "/v2/checkout/orders/o-1/capture")
        .with_status(201)
        .with_body(r#"{"id":"o-1","status":"COMPLETED","links":[]}"#)
        .create_async()
        .await;

    let adapter: Arc<dyn ProviderAdapter> = Arc::new(PayPalAdapter::new(
        PayPalSettings {
            client_id: "client-id".to_string(),
            client_secret: "client-secret".to_string(),
            base_url: server.url(),
        },
        GatewayClient::new(),
    ));
    let orchestrator = orchestrator_with(adapter, StaticRates::new());

    let outcome = orchestrator
        .clone()
        .create_payment(intent(Provider::Paypal, "ord-5", "49.99", "USD"))
        .await
        .unwrap();
    assert_eq!(outcome.transaction.status, TransactionStatus::PendingAction);
    assert!(matches!(outcome.action, CompletionAction::Redirect { .. }));

    let captured = orchestrator
        .capture_payment(outcome.transaction.id)
        .await
        .unwrap();
    assert_eq!(captured.transaction.status, TransactionStatus::Paid);

    // The authorize and capture steps are both on the record.
    assert!(captured.transaction.history.len() >= 3);
}

#[tokio::test]
async fn capture_is_rejected_for_single_phase_providers() {
    let mut server = mockito::Server::new_async().await;
    let _mock = server
        .mock("POST", "/v2/invoices")
        .with_status(200)
        .with_body(invoice_body("inv-1"))
        .create_async()
        .await;

    let orchestrator = orchestrator_with(xendit_adapter(server.url()), StaticRates::new());
    let outcome = orchestrator
        .clone()
        .create_payment(intent(Provider::Xendit, "ord-1", "100", "USD"))
        .await
        .unwrap();

    let result = orchestrator.capture_payment(outcome.transaction.id).await;
    assert!(matches!(result, Err(CoreError::ValidationFailed(_))));
}

#[tokio::test]
async fn buyer_cancellation_is_terminal() {
    let mut server = mockito::Server::new_async().await;
    let _mock = server
        .mock("POST", "/v2/invoices")
        .with_status(200)
        .with_body(invoice_body("inv-1"))
        .create_async()
        .await;

    let orchestrator = orchestrator_with(xendit_adapter(server.url()), StaticRates::new());
    let outcome = orchestrator
        .clone()
        .create_payment(intent(Provider::Xendit, "ord-1", "100", "USD"))
        .await
        .unwrap();

    let cancelled = orchestrator
        .cancel_payment(outcome.transaction.id)
        .await
        .unwrap();
    assert_eq!(cancelled.status, TransactionStatus::Cancelled);

    // A repeated cancel is acknowledged but ignored: terminal states
    // accept no further transitions.
    let again = orchestrator
        .cancel_payment(outcome.transaction.id)
        .await
        .unwrap();
    assert_eq!(again.status, TransactionStatus::Cancelled);
    assert_eq!(again.history.len(), cancelled.history.len());
}

#[tokio::test]
async fn unknown_transaction_id_is_not_found() {
    let server = mockito::Server::new_async().await;
    let orchestrator = orchestrator_with(xendit_adapter(server.url()), StaticRates::new());

    let result = orchestrator.get_payment(uuid::Uuid::new_v4()).await;
    assert!(matches!(result, Err(CoreError::NotFound(_))));
}
