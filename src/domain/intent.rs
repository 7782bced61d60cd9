use bigdecimal::BigDecimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

use crate::error::CoreError;
use crate::validation::{
    sanitize_string, validate_currency_code, validate_external_reference, validate_max_len,
    validate_payer_email, validate_positive_amount, validate_required, DESCRIPTION_MAX_LEN,
    METADATA_MAX_ENTRIES, METADATA_VALUE_MAX_LEN,
};

/// Supported payment gateways.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    Xendit,
    Paystack,
    Binance,
    Moneygram,
    Paypal,
}

impl Provider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::Xendit => "xendit",
            Provider::Paystack => "paystack",
            Provider::Binance => "binance",
            Provider::Moneygram => "moneygram",
            Provider::Paypal => "paypal",
        }
    }

    pub fn from_slug(slug: &str) -> Option<Provider> {
        match slug {
            "xendit" => Some(Provider::Xendit),
            "paystack" => Some(Provider::Paystack),
            "binance" => Some(Provider::Binance),
            "moneygram" => Some(Provider::Moneygram),
            "paypal" => Some(Provider::Paypal),
            _ => None,
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A caller's request to begin a payment. Validated and frozen at
/// construction; fields are only reachable through accessors.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentIntent {
    amount: BigDecimal,
    currency: String,
    payer_email: String,
    description: String,
    provider: Provider,
    metadata: BTreeMap<String, String>,
    external_reference: String,
}

impl PaymentIntent {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        provider: Provider,
        amount: BigDecimal,
        currency: &str,
        payer_email: &str,
        description: &str,
        metadata: BTreeMap<String, String>,
        external_reference: Option<String>,
    ) -> Result<Self, CoreError> {
        validate_positive_amount(&amount)
            .map_err(|e| CoreError::InvalidAmount(e.message.clone()))?;
        validate_currency_code(currency)?;
        validate_payer_email(payer_email)?;

        let description = sanitize_string(description);
        validate_required("description", &description)?;
        validate_max_len("description", &description, DESCRIPTION_MAX_LEN)?;

        if metadata.len() > METADATA_MAX_ENTRIES {
            return Err(CoreError::ValidationFailed(format!(
                "metadata: must have at most {} entries",
                METADATA_MAX_ENTRIES
            )));
        }
        for value in metadata.values() {
            validate_max_len("metadata", value, METADATA_VALUE_MAX_LEN)?;
        }

        let external_reference = match external_reference {
            Some(reference) => {
                validate_external_reference(&reference)?;
                reference
            }
            None => Self::generate_reference(),
        };

        Ok(Self {
            amount,
            currency: sanitize_string(currency),
            payer_email: sanitize_string(payer_email),
            description,
            provider,
            metadata,
            external_reference,
        })
    }

    /// Caller-facing idempotency key when none was supplied.
    fn generate_reference() -> String {
        format!("ord-{}", Uuid::new_v4().simple())
    }

    pub fn amount(&self) -> &BigDecimal {
        &self.amount
    }

    pub fn currency(&self) -> &str {
        &self.currency
    }

    pub fn payer_email(&self) -> &str {
        &self.payer_email
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn provider(&self) -> Provider {
        self.provider
    }

    pub fn metadata(&self) -> &BTreeMap<String, String> {
        &self.metadata
    }

    pub fn external_reference(&self) -> &str {
        &self.external_reference
    }
}
