//! Payment gateway abstraction.
//!
//! Each provider implements [`PaymentGateway`]; the service selects an
//! adapter at runtime through [`GatewayRegistry`]. Adapters normalize
//! every transport failure to `PayError::ExternalService` so the domain
//! layer never sees HTTP codes or connection errors, and map the
//! provider's status vocabulary to [`PaymentStatus`] as a total
//! function with [`PaymentStatus::Unknown`] as the catch-all.

pub mod nowpayments;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use veilpay_core::{Money, PayError, PaymentStatus, Result};

pub use nowpayments::NowPaymentsGateway;

/// Outbound payment-creation request, gateway-agnostic.
#[derive(Debug, Clone)]
pub struct CreateGatewayPayment {
    /// Our order id (the payment aggregate id).
    pub order_id: String,
    /// The priced amount.
    pub amount: Money,
    /// Decimal rendering of `amount` for providers that take strings.
    pub amount_decimal: String,
    /// Currency the customer pays in, if different from the price
    /// currency (crypto gateways).
    pub pay_currency: Option<String>,
    /// Checkout description.
    pub description: Option<String>,
    /// Where the provider posts IPN callbacks.
    pub ipn_callback_url: String,
    /// Redirect after successful checkout.
    pub success_url: String,
    /// Redirect after cancelled checkout.
    pub cancel_url: String,
}

/// Provider-side payment handle returned by creation.
#[derive(Debug, Clone)]
pub struct GatewayPayment {
    /// Provider payment id.
    pub provider_payment_id: String,
    /// Hosted checkout URL, if the provider has one.
    pub payment_url: Option<String>,
    /// Deposit address for crypto providers.
    pub pay_address: Option<String>,
    /// Provider's estimate of when the payment window closes.
    pub expiration_estimate: Option<DateTime<Utc>>,
}

/// A verified inbound IPN callback.
#[derive(Debug, Clone)]
pub struct IpnEvent {
    /// Our order id as echoed by the provider.
    pub order_id: String,
    /// Provider payment id.
    pub provider_payment_id: String,
    /// Provider status string, unmapped.
    pub provider_status: String,
    /// The full verified payload, retained for audit.
    pub payload: serde_json::Value,
}

/// The per-provider adapter contract.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Gateway name as used in the allow-list and routes.
    fn name(&self) -> &'static str;

    /// Create a payment at the provider.
    async fn create_payment(&self, req: &CreateGatewayPayment) -> Result<GatewayPayment>;

    /// Fetch the provider's current status for a payment.
    async fn get_payment_status(&self, provider_payment_id: &str) -> Result<PaymentStatus>;

    /// Verify an inbound IPN callback's signature and parse it.
    /// Verification is local (shared-secret HMAC); no network I/O.
    fn verify_ipn(&self, raw_body: &str, signature: &str) -> Result<IpnEvent>;

    /// Map a provider status string to the internal vocabulary.
    /// Total: unknown strings map to [`PaymentStatus::Unknown`].
    fn map_status(&self, provider_status: &str) -> PaymentStatus;

    /// Issue a provider-side refund. Most crypto gateways cannot.
    async fn refund(&self, provider_payment_id: &str, amount: &Money) -> Result<String> {
        let _ = (provider_payment_id, amount);
        Err(PayError::Unsupported {
            gateway: self.name().to_string(),
            operation: "refund",
        })
    }

    /// The provider's processing fee for an amount.
    ///
    /// # Errors
    ///
    /// `PayError::Validation` when the fee computation overflows.
    fn fee(&self, amount: &Money) -> Result<Money>;

    /// Smallest amount the provider accepts, minor units, if known.
    fn minimum_amount(&self, currency: &str) -> Option<i64>;

    /// Largest amount the provider accepts, minor units, if known.
    fn maximum_amount(&self, currency: &str) -> Option<i64>;
}

/// The configured gateway adapters, keyed by name.
#[derive(Clone, Default)]
pub struct GatewayRegistry {
    gateways: HashMap<&'static str, Arc<dyn PaymentGateway>>,
}

impl GatewayRegistry {
    /// An empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an adapter under its own name.
    #[must_use]
    pub fn with(mut self, gateway: Arc<dyn PaymentGateway>) -> Self {
        self.gateways.insert(gateway.name(), gateway);
        self
    }

    /// Look up an adapter by name.
    ///
    /// # Errors
    ///
    /// `PayError::UnknownGateway` when no adapter is registered under
    /// the name.
    pub fn get(&self, name: &str) -> Result<&Arc<dyn PaymentGateway>> {
        self.gateways
            .get(name)
            .ok_or_else(|| PayError::UnknownGateway(name.to_string()))
    }

    /// Whether any adapter is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.gateways.is_empty()
    }
}
