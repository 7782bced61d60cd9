use anyhow::Context;
use bigdecimal::BigDecimal;
use dotenvy::dotenv;
use std::env;
use std::str::FromStr;
use std::time::Duration;

/// Process configuration, resolved once at startup. All components
/// receive their slice of this at construction; nothing reads the
/// environment after boot.
///
/// One deployment talks to one environment: every base URL defaults to
/// the provider's sandbox host and is overridden wholesale for
/// production.
#[derive(Debug, Clone)]
pub struct Config {
    pub server_port: u16,
    pub database_url: Option<String>,
    pub retry: RetryPolicy,
    pub poll_timeout: Duration,
    /// Fixed exchange rates, `FROM:TO=RATE` comma-separated.
    pub rates: Vec<RateEntry>,
    pub xendit: XenditSettings,
    pub paystack: PaystackSettings,
    pub binance: BinanceSettings,
    pub moneygram: MoneyGramSettings,
    pub paypal: PayPalSettings,
}

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

#[derive(Debug, Clone)]
pub struct RateEntry {
    pub from: String,
    pub to: String,
    pub rate: BigDecimal,
}

#[derive(Debug, Clone)]
pub struct XenditSettings {
    pub secret_key: String,
    /// Shared token Xendit echoes back in `x-callback-token`.
    pub callback_token: String,
    pub base_url: String,
    pub success_redirect_url: String,
    pub failure_redirect_url: String,
}

#[derive(Debug, Clone)]
pub struct PaystackSettings {
    /// Also the webhook signing key; Paystack signs callbacks with the
    /// account secret.
    pub secret_key: String,
    pub base_url: String,
}

#[derive(Debug, Clone)]
pub struct BinanceSettings {
    pub api_key: String,
    pub api_secret: String,
    pub base_url: String,
}

#[derive(Debug, Clone)]
pub struct MoneyGramSettings {
    pub api_token: String,
    pub webhook_secret: String,
    pub base_url: String,
}

#[derive(Debug, Clone)]
pub struct PayPalSettings {
    pub client_id: String,
    pub client_secret: String,
    pub base_url: String,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenv().ok(); // Load .env file if present

        let config = Config {
            server_port: env_or("SERVER_PORT", "3000")
                .parse()
                .context("SERVER_PORT must be a port number")?,
            database_url: env::var("DATABASE_URL").ok(),
            retry: RetryPolicy {
                max_attempts: env_or("PROVIDER_RETRY_ATTEMPTS", "3")
                    .parse()
                    .context("PROVIDER_RETRY_ATTEMPTS must be an integer")?,
                base_delay: Duration::from_millis(
                    env_or("PROVIDER_RETRY_BASE_DELAY_MS", "100")
                        .parse()
                        .context("PROVIDER_RETRY_BASE_DELAY_MS must be an integer")?,
                ),
            },
            poll_timeout: Duration::from_millis(
                env_or("POLL_TIMEOUT_MS", "10000")
                    .parse()
                    .context("POLL_TIMEOUT_MS must be an integer")?,
            ),
            rates: parse_rates(&env_or("EXCHANGE_RATES", ""))?,
            xendit: XenditSettings {
                secret_key: env_or("XENDIT_SECRET_KEY", ""),
                callback_token: env_or("XENDIT_CALLBACK_TOKEN", ""),
                base_url: env_or("XENDIT_BASE_URL", "https://api.xendit.co"),
                success_redirect_url: env_or(
                    "PAYMENT_SUCCESS_REDIRECT_URL",
                    "http://localhost:5173/payment-success",
                ),
                failure_redirect_url: env_or(
                    "PAYMENT_FAILURE_REDIRECT_URL",
                    "http://localhost:5173/payment-failed",
                ),
            },
            paystack: PaystackSettings {
                secret_key: env_or("PAYSTACK_SECRET_KEY", ""),
                base_url: env_or("PAYSTACK_BASE_URL", "https://api.paystack.co"),
            },
            binance: BinanceSettings {
                api_key: env_or("BINANCE_API_KEY", ""),
                api_secret: env_or("BINANCE_API_SECRET", ""),
                base_url: env_or("BINANCE_BASE_URL", "https://bpay.binanceapi.com"),
            },
            moneygram: MoneyGramSettings {
                api_token: env_or("MONEYGRAM_API_TOKEN", ""),
                webhook_secret: env_or("MONEYGRAM_WEBHOOK_SECRET", ""),
                base_url: env_or("MONEYGRAM_BASE_URL", "https://sandbox.moneygram.com"),
            },
            paypal: PayPalSettings {
                client_id: env_or("PAYPAL_CLIENT_ID", ""),
                client_secret: env_or("PAYPAL_CLIENT_SECRET", ""),
                base_url: env_or("PAYPAL_BASE_URL", "https://api-m.sandbox.paypal.com"),
            },
        };

        config.validate_urls()?;
        Ok(config)
    }

    fn validate_urls(&self) -> anyhow::Result<()> {
        for (name, value) in [
            ("XENDIT_BASE_URL", &self.xendit.base_url),
            ("PAYSTACK_BASE_URL", &self.paystack.base_url),
            ("BINANCE_BASE_URL", &self.binance.base_url),
            ("MONEYGRAM_BASE_URL", &self.moneygram.base_url),
            ("PAYPAL_BASE_URL", &self.paypal.base_url),
            (
                "PAYMENT_SUCCESS_REDIRECT_URL",
                &self.xendit.success_redirect_url,
            ),
            (
                "PAYMENT_FAILURE_REDIRECT_URL",
                &self.xendit.failure_redirect_url,
            ),
        ] {
            url::Url::parse(value).with_context(|| format!("{} is not a valid URL", name))?;
        }
        Ok(())
    }
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn parse_rates(raw: &str) -> anyhow::Result<Vec<RateEntry>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(Vec::new());
    }

    raw.split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| {
            let (pair, rate) = entry
                .split_once('=')
                .with_context(|| format!("rate entry '{}' must look like FROM:TO=RATE", entry))?;
            let (from, to) = pair
                .split_once(':')
                .with_context(|| format!("rate entry '{}' must look like FROM:TO=RATE", entry))?;
            Ok(RateEntry {
                from: from.trim().to_string(),
                to: to.trim().to_string(),
                rate: BigDecimal::from_str(rate.trim())
                    .with_context(|| format!("rate '{}' is not a decimal", rate))?,
            })
        })
        .collect()
}
