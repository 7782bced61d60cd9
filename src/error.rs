use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;

/// Error taxonomy for the orchestration core.
///
/// Validation and state-machine violations carry enough detail for the
/// caller to correct the request; provider failures distinguish a
/// decision (`ProviderRejected`, never retried) from a transient fault
/// (`ProviderUnavailable`, retried with backoff).
#[derive(Error, Debug)]
pub enum CoreError {
    #[error("invalid amount: {0}")]
    InvalidAmount(String),

    #[error("exchange rate unavailable for {from}->{to}")]
    RateUnavailable { from: String, to: String },

    #[error("validation failed: {0}")]
    ValidationFailed(String),

    #[error("provider rejected ({code}): {message}")]
    ProviderRejected { code: String, message: String },

    #[error("provider unavailable: {0}")]
    ProviderUnavailable(String),

    #[error("invalid step sequence: {0}")]
    InvalidSequence(String),

    #[error("illegal transition: {0}")]
    IllegalTransition(String),

    #[error("signature verification failed: {0}")]
    SignatureInvalid(String),

    #[error("unknown transaction: {0}")]
    UnknownTransaction(String),

    #[error("inconsistent payment data: {0}")]
    Inconsistent(String),

    #[error("reference already in use: {0}")]
    AlreadyExists(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("store error: {0}")]
    Store(String),
}

impl CoreError {
    /// Stable machine-readable code for API consumers.
    pub fn code(&self) -> &'static str {
        match self {
            CoreError::InvalidAmount(_) => "invalid_amount",
            CoreError::RateUnavailable { .. } => "rate_unavailable",
            CoreError::ValidationFailed(_) => "validation_failed",
            CoreError::ProviderRejected { .. } => "provider_rejected",
            CoreError::ProviderUnavailable(_) => "provider_unavailable",
            CoreError::InvalidSequence(_) => "invalid_sequence",
            CoreError::IllegalTransition(_) => "illegal_transition",
            CoreError::SignatureInvalid(_) => "signature_invalid",
            CoreError::UnknownTransaction(_) => "unknown_transaction",
            CoreError::Inconsistent(_) => "inconsistent",
            CoreError::AlreadyExists(_) => "already_exists",
            CoreError::NotFound(_) => "not_found",
            CoreError::Store(_) => "store_error",
        }
    }

    fn status_code(&self) -> StatusCode {
        match self {
            CoreError::InvalidAmount(_)
            | CoreError::RateUnavailable { .. }
            | CoreError::ValidationFailed(_)
            | CoreError::IllegalTransition(_)
            | CoreError::InvalidSequence(_) => StatusCode::BAD_REQUEST,
            CoreError::SignatureInvalid(_) => StatusCode::UNAUTHORIZED,
            CoreError::NotFound(_) | CoreError::UnknownTransaction(_) => StatusCode::NOT_FOUND,
            CoreError::AlreadyExists(_) => StatusCode::CONFLICT,
            CoreError::ProviderRejected { .. } | CoreError::ProviderUnavailable(_) => {
                StatusCode::BAD_GATEWAY
            }
            CoreError::Inconsistent(_) | CoreError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for CoreError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = Json(json!({
            "error": self.to_string(),
            "code": self.code(),
            "status": status.as_u16(),
        }));

        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_error_status_code() {
        let error = CoreError::ValidationFailed("payer_email is required".to_string());
        assert_eq!(error.status_code(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_invalid_amount_status_code() {
        let error = CoreError::InvalidAmount("must be greater than zero".to_string());
        assert_eq!(error.status_code(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_already_exists_status_code() {
        let error = CoreError::AlreadyExists("ord-1".to_string());
        assert_eq!(error.status_code(), StatusCode::CONFLICT);
    }

    #[test]
    fn test_provider_errors_map_to_bad_gateway() {
        let rejected = CoreError::ProviderRejected {
            code: "400".to_string(),
            message: "card declined".to_string(),
        };
        let unavailable = CoreError::ProviderUnavailable("connect timeout".to_string());
        assert_eq!(rejected.status_code(), StatusCode::BAD_GATEWAY);
        assert_eq!(unavailable.status_code(), StatusCode::BAD_GATEWAY);
    }

    #[test]
    fn test_inconsistent_is_internal() {
        let error = CoreError::Inconsistent("amount mismatch on paid transaction".to_string());
        assert_eq!(error.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_error_codes_are_stable() {
        assert_eq!(
            CoreError::SignatureInvalid("bad hmac".to_string()).code(),
            "signature_invalid"
        );
        assert_eq!(
            CoreError::InvalidSequence("commit before update".to_string()).code(),
            "invalid_sequence"
        );
    }

    #[tokio::test]
    async fn test_validation_error_response() {
        let error = CoreError::ValidationFailed("currency must be a 3-letter code".to_string());
        let response = error.into_response();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_not_found_error_response() {
        let error = CoreError::NotFound("transaction 42".to_string());
        let response = error.into_response();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
