//! Amount normalization.
//!
//! Providers disagree about units: some take integer minor units, some
//! take decimal major units, and some only settle in a single currency.
//! The canonical transaction record always stores integer minor units,
//! converted here with deterministic round-half-up at the currency's
//! ISO 4217 exponent.

use async_trait::async_trait;
use bigdecimal::{BigDecimal, ToPrimitive};
use bigdecimal::rounding::RoundingMode;
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::CoreError;
use crate::validation::validate_positive_amount;

/// Minor-unit exponent per ISO 4217. Currencies not listed use 2.
pub fn currency_exponent(currency: &str) -> u32 {
    match currency {
        "BIF" | "CLP" | "DJF" | "GNF" | "ISK" | "JPY" | "KMF" | "KRW" | "PYG" | "RWF"
        | "UGX" | "VND" | "VUV" | "XAF" | "XOF" | "XPF" => 0,
        "BHD" | "IQD" | "JOD" | "KWD" | "LYD" | "OMR" | "TND" => 3,
        _ => 2,
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedAmount {
    pub minor_units: i64,
    pub currency: String,
}

/// Injected exchange-rate lookup. Returns `None` when the pair cannot
/// be resolved; the normalizer maps that to `RateUnavailable`.
#[async_trait]
pub trait RateProvider: Send + Sync {
    async fn rate(&self, from: &str, to: &str) -> Option<BigDecimal>;
}

/// Fixed rate table, loaded from configuration at startup.
#[derive(Debug, Default)]
pub struct StaticRates {
    rates: HashMap<(String, String), BigDecimal>,
}

impl StaticRates {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_rate(mut self, from: &str, to: &str, rate: BigDecimal) -> Self {
        self.rates.insert((from.to_string(), to.to_string()), rate);
        self
    }
}

#[async_trait]
impl RateProvider for StaticRates {
    async fn rate(&self, from: &str, to: &str) -> Option<BigDecimal> {
        if from == to {
            return Some(BigDecimal::from(1));
        }
        self.rates
            .get(&(from.to_string(), to.to_string()))
            .cloned()
    }
}

/// Converts a decimal amount to integer minor units, rounding half-up
/// at the currency's exponent.
pub fn to_minor_units(amount: &BigDecimal, currency: &str) -> Result<i64, CoreError> {
    let exponent = currency_exponent(currency);
    let factor = BigDecimal::from(10i64.pow(exponent));
    (amount * factor)
        .with_scale_round(0, RoundingMode::HalfUp)
        .to_i64()
        .ok_or_else(|| CoreError::InvalidAmount("amount out of representable range".to_string()))
}

/// Renders minor units back into the major-unit decimal string some
/// gateways require on the wire (e.g. "12.34", "1000").
pub fn to_major_string(minor_units: i64, currency: &str) -> String {
    let exponent = currency_exponent(currency);
    if exponent == 0 {
        return minor_units.to_string();
    }
    let factor = 10i64.pow(exponent);
    format!(
        "{}.{:0width$}",
        minor_units / factor,
        minor_units % factor,
        width = exponent as usize
    )
}

#[derive(Clone)]
pub struct AmountNormalizer {
    rates: Arc<dyn RateProvider>,
}

impl AmountNormalizer {
    pub fn new(rates: Arc<dyn RateProvider>) -> Self {
        Self { rates }
    }

    /// Normalizes a caller amount into minor units of `target` (or of
    /// the input currency when no target is given), converting through
    /// the injected rate lookup when the currencies differ.
    pub async fn normalize(
        &self,
        amount: &BigDecimal,
        currency: &str,
        target: Option<&str>,
    ) -> Result<NormalizedAmount, CoreError> {
        validate_positive_amount(amount)
            .map_err(|e| CoreError::InvalidAmount(e.message.clone()))?;

        match target {
            Some(to) if to != currency => {
                let rate = self.rates.rate(currency, to).await.ok_or_else(|| {
                    CoreError::RateUnavailable {
                        from: currency.to_string(),
                        to: to.to_string(),
                    }
                })?;
                Ok(NormalizedAmount {
                    minor_units: to_minor_units(&(amount * rate), to)?,
                    currency: to.to_string(),
                })
            }
            _ => Ok(NormalizedAmount {
                minor_units: to_minor_units(amount, currency)?,
                currency: currency.to_string(),
            }),
        }
    }
}
