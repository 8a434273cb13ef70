//! Service configuration loaded from the environment.

use std::env;

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// An environment variable holds a value of the wrong shape.
    #[error("invalid value for {var}: {value}")]
    InvalidValue {
        /// The variable name.
        var: &'static str,
        /// The offending value.
        value: String,
    },
}

/// Service configuration.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Socket address to bind, e.g. `0.0.0.0:8080`.
    pub listen_addr: String,

    /// NowPayments API key. `None` disables payment creation.
    pub nowpayments_api_key: Option<String>,

    /// NowPayments IPN shared secret. `None` disables the webhook.
    pub nowpayments_ipn_secret: Option<String>,

    /// NowPayments API base URL, overridable for tests.
    pub nowpayments_base_url: String,

    /// Public URL the provider posts IPN callbacks to.
    pub ipn_callback_url: String,

    /// Redirect after successful checkout.
    pub success_url: String,

    /// Redirect after cancelled checkout.
    pub cancel_url: String,

    /// Allowed CORS origins. `*` allows any.
    pub cors_origins: Vec<String>,

    /// Maximum request body size in bytes.
    pub max_body_bytes: usize,

    /// Request timeout in seconds.
    pub request_timeout_seconds: u64,

    /// How long a payment may sit pending before the sweep expires it.
    pub pending_window_minutes: i64,
}

impl ServiceConfig {
    /// Load configuration from environment variables, with defaults for
    /// everything except provider credentials.
    ///
    /// # Errors
    ///
    /// `ConfigError::InvalidValue` when a numeric variable does not
    /// parse.
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            listen_addr: env::var("VEILPAY_LISTEN_ADDR")
                .unwrap_or_else(|_| "0.0.0.0:8080".to_string()),
            nowpayments_api_key: env::var("NOWPAYMENTS_API_KEY").ok(),
            nowpayments_ipn_secret: env::var("NOWPAYMENTS_IPN_SECRET").ok(),
            nowpayments_base_url: env::var("NOWPAYMENTS_BASE_URL").unwrap_or_else(|_| {
                crate::gateway::NowPaymentsGateway::DEFAULT_BASE_URL.to_string()
            }),
            ipn_callback_url: env::var("VEILPAY_IPN_CALLBACK_URL")
                .unwrap_or_else(|_| "http://localhost:8080/webhooks/nowpayments".to_string()),
            success_url: env::var("VEILPAY_SUCCESS_URL")
                .unwrap_or_else(|_| "https://t.me".to_string()),
            cancel_url: env::var("VEILPAY_CANCEL_URL")
                .unwrap_or_else(|_| "https://t.me".to_string()),
            cors_origins: env::var("VEILPAY_CORS_ORIGINS")
                .map(|v| v.split(',').map(|s| s.trim().to_string()).collect())
                .unwrap_or_else(|_| vec!["*".to_string()]),
            max_body_bytes: parse_var("VEILPAY_MAX_BODY_BYTES", 256 * 1024)?,
            request_timeout_seconds: parse_var("VEILPAY_REQUEST_TIMEOUT_SECONDS", 30)?,
            pending_window_minutes: parse_var(
                "VEILPAY_PENDING_WINDOW_MINUTES",
                veilpay_core::DEFAULT_PENDING_WINDOW_MINUTES,
            )?,
        })
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:8080".to_string(),
            nowpayments_api_key: None,
            nowpayments_ipn_secret: None,
            nowpayments_base_url: crate::gateway::NowPaymentsGateway::DEFAULT_BASE_URL.to_string(),
            ipn_callback_url: "http://localhost:8080/webhooks/nowpayments".to_string(),
            success_url: "https://t.me".to_string(),
            cancel_url: "https://t.me".to_string(),
            cors_origins: vec!["*".to_string()],
            max_body_bytes: 256 * 1024,
            request_timeout_seconds: 30,
            pending_window_minutes: veilpay_core::DEFAULT_PENDING_WINDOW_MINUTES,
        }
    }
}

fn parse_var<T: std::str::FromStr>(var: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(var) {
        Ok(value) => value
            .parse()
            .map_err(|_| ConfigError::InvalidValue { var, value }),
        Err(_) => Ok(default),
    }
}
