use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use bigdecimal::BigDecimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use uuid::Uuid;

use crate::domain::{PaymentIntent, Provider, TransactionStatus};
use crate::error::CoreError;
use crate::providers::CompletionAction;
use crate::services::PaymentOutcome;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct CreatePaymentRequest {
    pub provider: Provider,
    pub amount: BigDecimal,
    pub currency: String,
    pub payer_email: String,
    pub description: String,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
    #[serde(default)]
    pub external_reference: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct PaymentResponse {
    pub transaction_id: Uuid,
    pub external_reference: String,
    pub provider: Provider,
    pub status: TransactionStatus,
    pub amount_minor_units: i64,
    pub currency: String,
    pub action: CompletionAction,
}

impl From<PaymentOutcome> for PaymentResponse {
    fn from(outcome: PaymentOutcome) -> Self {
        Self {
            transaction_id: outcome.transaction.id,
            external_reference: outcome.transaction.external_reference,
            provider: outcome.transaction.provider,
            status: outcome.transaction.status,
            amount_minor_units: outcome.transaction.amount_minor_units,
            currency: outcome.transaction.currency,
            action: outcome.action,
        }
    }
}

pub async fn create_payment(
    State(state): State<AppState>,
    Json(request): Json<CreatePaymentRequest>,
) -> Result<impl IntoResponse, CoreError> {
    let intent = PaymentIntent::new(
        request.provider,
        request.amount,
        &request.currency,
        &request.payer_email,
        &request.description,
        request.metadata,
        request.external_reference,
    )?;

    let outcome = state.orchestrator.clone().create_payment(intent).await?;
    Ok((StatusCode::CREATED, Json(PaymentResponse::from(outcome))))
}

#[derive(Debug, Deserialize)]
pub struct StatusQuery {
    /// Poll timeout in milliseconds for poll-mode providers.
    pub timeout_ms: Option<u64>,
}

pub async fn get_payment(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Query(query): Query<StatusQuery>,
) -> Result<impl IntoResponse, CoreError> {
    let timeout = query.timeout_ms.map(Duration::from_millis);
    let transaction = state.orchestrator.poll_status(id, timeout).await?;
    Ok(Json(transaction))
}

pub async fn capture_payment(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, CoreError> {
    let outcome = state.orchestrator.capture_payment(id).await?;
    Ok(Json(PaymentResponse::from(outcome)))
}

pub async fn cancel_payment(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, CoreError> {
    let transaction = state.orchestrator.cancel_payment(id).await?;
    Ok(Json(transaction))
}
