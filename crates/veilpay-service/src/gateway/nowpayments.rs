//! NowPayments gateway adapter.
//!
//! Covers the subset of the NowPayments API the platform uses: payment
//! creation, status snapshots, and IPN callback verification. IPN
//! signatures are HMAC-SHA512 over the JSON body with sorted keys,
//! delivered in the `x-nowpayments-sig` header.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::{Deserialize, Serialize};

use veilpay_core::{Money, PayError, PaymentStatus, Result};

use super::{CreateGatewayPayment, GatewayPayment, IpnEvent, PaymentGateway};
use crate::crypto::{canonical_json, constant_time_eq, hmac_sha512_hex};

/// NowPayments API client and IPN verifier.
pub struct NowPaymentsGateway {
    client: Client,
    base_url: String,
    api_key: String,
    ipn_secret: String,
    /// Processing fee in basis points.
    fee_bps: u32,
    /// currency code -> (min, max) provider limits, minor units.
    limits: HashMap<String, (i64, i64)>,
}

#[derive(Debug, Serialize)]
struct NpCreatePayment<'a> {
    price_amount: f64,
    price_currency: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pay_currency: Option<&'a str>,
    order_id: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    order_description: Option<&'a str>,
    ipn_callback_url: &'a str,
    success_url: &'a str,
    cancel_url: &'a str,
}

#[derive(Debug, Deserialize)]
struct NpPayment {
    /// NowPayments returns this as a number on create and a string on
    /// status reads.
    payment_id: serde_json::Value,
    #[serde(default)]
    payment_status: Option<String>,
    #[serde(default)]
    pay_address: Option<String>,
    #[serde(default)]
    invoice_url: Option<String>,
    #[serde(default)]
    expiration_estimate_date: Option<String>,
}

#[derive(Debug, Deserialize)]
struct NpError {
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct NpIpnPayload {
    #[serde(default)]
    payment_id: Option<serde_json::Value>,
    #[serde(default)]
    payment_status: Option<String>,
    #[serde(default)]
    order_id: Option<String>,
}

fn id_to_string(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn external(message: impl Into<String>) -> PayError {
    PayError::ExternalService {
        service: "nowpayments".to_string(),
        message: message.into(),
    }
}

impl NowPaymentsGateway {
    /// Production API base URL.
    pub const DEFAULT_BASE_URL: &'static str = "https://api.nowpayments.io";

    /// Default processing fee, 0.5%.
    pub const DEFAULT_FEE_BPS: u32 = 50;

    /// Create the adapter.
    ///
    /// # Panics
    ///
    /// Panics if the HTTP client cannot be built, which does not happen
    /// with default TLS settings.
    #[must_use]
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        ipn_secret: impl Into<String>,
    ) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .expect("failed to build HTTP client");

        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            ipn_secret: ipn_secret.into(),
            fee_bps: Self::DEFAULT_FEE_BPS,
            limits: HashMap::new(),
        }
    }

    /// Override the processing fee, in basis points.
    #[must_use]
    pub fn with_fee_bps(mut self, fee_bps: u32) -> Self {
        self.fee_bps = fee_bps;
        self
    }

    /// Attach per-currency provider amount limits (minor units).
    #[must_use]
    pub fn with_limits(mut self, limits: HashMap<String, (i64, i64)>) -> Self {
        self.limits = limits;
        self
    }

    async fn handle_response<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T> {
        let status = response.status();
        if status.is_success() {
            return response
                .json()
                .await
                .map_err(|e| external(format!("invalid response body: {e}")));
        }

        let message = match response.json::<NpError>().await {
            Ok(NpError { message: Some(m) }) => m,
            _ => format!("HTTP {status}"),
        };
        Err(external(message))
    }
}

#[async_trait]
impl PaymentGateway for NowPaymentsGateway {
    fn name(&self) -> &'static str {
        "nowpayments"
    }

    async fn create_payment(&self, req: &CreateGatewayPayment) -> Result<GatewayPayment> {
        let price_amount: f64 = req
            .amount_decimal
            .parse()
            .map_err(|_| PayError::validation("amount not representable as decimal"))?;

        let body = NpCreatePayment {
            price_amount,
            price_currency: req.amount.currency.as_str().to_lowercase(),
            pay_currency: req.pay_currency.as_deref(),
            order_id: &req.order_id,
            order_description: req.description.as_deref(),
            ipn_callback_url: &req.ipn_callback_url,
            success_url: &req.success_url,
            cancel_url: &req.cancel_url,
        };

        let response = self
            .client
            .post(format!("{}/v1/payment", self.base_url))
            .header("x-api-key", &self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| external(format!("request failed: {e}")))?;

        let payment: NpPayment = Self::handle_response(response).await?;
        let expiration_estimate = payment
            .expiration_estimate_date
            .as_deref()
            .and_then(|s| s.parse::<DateTime<Utc>>().ok());

        Ok(GatewayPayment {
            provider_payment_id: id_to_string(&payment.payment_id),
            payment_url: payment.invoice_url,
            pay_address: payment.pay_address,
            expiration_estimate,
        })
    }

    async fn get_payment_status(&self, provider_payment_id: &str) -> Result<PaymentStatus> {
        let response = self
            .client
            .get(format!("{}/v1/payment/{provider_payment_id}", self.base_url))
            .header("x-api-key", &self.api_key)
            .send()
            .await
            .map_err(|e| external(format!("request failed: {e}")))?;

        let payment: NpPayment = Self::handle_response(response).await?;
        let status = payment
            .payment_status
            .ok_or_else(|| external("status response missing payment_status"))?;
        Ok(self.map_status(&status))
    }

    fn verify_ipn(&self, raw_body: &str, signature: &str) -> Result<IpnEvent> {
        let canonical = canonical_json(raw_body)
            .map_err(|_| PayError::Authentication("IPN body is not valid JSON".to_string()))?;
        let expected = hmac_sha512_hex(&self.ipn_secret, &canonical);

        if !constant_time_eq(&expected, signature) {
            return Err(PayError::Authentication(
                "IPN signature mismatch".to_string(),
            ));
        }

        // The body already parsed once for canonicalization.
        let payload: serde_json::Value =
            serde_json::from_str(raw_body).map_err(|_| {
                PayError::Authentication("IPN body is not valid JSON".to_string())
            })?;
        let ipn: NpIpnPayload = serde_json::from_value(payload.clone())
            .map_err(|e| PayError::validation(format!("malformed IPN payload: {e}")))?;

        let order_id = ipn
            .order_id
            .ok_or_else(|| PayError::validation("IPN payload missing order_id"))?;
        let provider_payment_id = ipn
            .payment_id
            .as_ref()
            .map(id_to_string)
            .ok_or_else(|| PayError::validation("IPN payload missing payment_id"))?;
        let provider_status = ipn
            .payment_status
            .ok_or_else(|| PayError::validation("IPN payload missing payment_status"))?;

        Ok(IpnEvent {
            order_id,
            provider_payment_id,
            provider_status,
            payload,
        })
    }

    fn map_status(&self, provider_status: &str) -> PaymentStatus {
        match provider_status {
            "waiting" => PaymentStatus::Pending,
            "confirming" | "confirmed" | "sending" | "partially_paid" => PaymentStatus::Processing,
            "finished" => PaymentStatus::Completed,
            "failed" => PaymentStatus::Failed,
            "refunded" => PaymentStatus::Refunded,
            "expired" => PaymentStatus::Expired,
            _ => PaymentStatus::Unknown,
        }
    }

    // NowPayments has no refund API for most assets; the default
    // `refund` implementation reports Unsupported.

    fn fee(&self, amount: &Money) -> Result<Money> {
        amount.percent_bps(self.fee_bps)
    }

    fn minimum_amount(&self, currency: &str) -> Option<i64> {
        self.limits.get(currency).map(|&(min, _)| min)
    }

    fn maximum_amount(&self, currency: &str) -> Option<i64> {
        self.limits.get(currency).map(|&(_, max)| max)
    }
}

impl std::fmt::Debug for NowPaymentsGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Secrets are deliberately not printed.
        f.debug_struct("NowPaymentsGateway")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}
