//! Application state.

use std::sync::Arc;

use veilpay_core::{
    Clock, CurrencyTable, Effect, PaymentPolicy, PaymentService, SubscriptionService, SystemClock,
};
use veilpay_store::{MemoryStore, Store};

use crate::config::ServiceConfig;
use crate::gateway::{GatewayRegistry, NowPaymentsGateway};
use crate::notify::{Notifier, TracingNotifier};

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    /// The storage backend.
    pub store: Arc<MemoryStore>,

    /// Service configuration.
    pub config: ServiceConfig,

    /// Payment rule layer.
    pub payments: Arc<PaymentService>,

    /// Subscription rule layer.
    pub subscriptions: Arc<SubscriptionService>,

    /// Configured gateway adapters.
    pub gateways: GatewayRegistry,

    /// Notification transport.
    pub notifier: Arc<dyn Notifier>,

    /// Currency precision table for major/minor conversions.
    pub currencies: CurrencyTable,
}

impl AppState {
    /// Create application state with the system clock and whatever
    /// gateways the configuration enables.
    #[must_use]
    pub fn new(store: Arc<MemoryStore>, config: ServiceConfig) -> Self {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);

        let gateways = config
            .nowpayments_api_key
            .as_ref()
            .zip(config.nowpayments_ipn_secret.as_ref())
            .map_or_else(GatewayRegistry::new, |(api_key, ipn_secret)| {
                tracing::info!(base_url = %config.nowpayments_base_url, "NowPayments integration enabled");
                GatewayRegistry::new().with(Arc::new(NowPaymentsGateway::new(
                    &config.nowpayments_base_url,
                    api_key,
                    ipn_secret,
                )))
            });

        if gateways.is_empty() {
            tracing::warn!("No payment gateway configured - payment creation will be rejected");
        }

        Self::with_parts(
            store,
            config,
            clock,
            gateways,
            Arc::new(TracingNotifier),
        )
    }

    /// Create application state from explicit parts. Tests inject a
    /// fixed clock, a stub gateway, or a recording notifier here.
    #[must_use]
    pub fn with_parts(
        store: Arc<MemoryStore>,
        config: ServiceConfig,
        clock: Arc<dyn Clock>,
        gateways: GatewayRegistry,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        let policy = PaymentPolicy::default().with_pending_window(config.pending_window_minutes);
        Self {
            store,
            payments: Arc::new(PaymentService::new(policy, Arc::clone(&clock))),
            subscriptions: Arc::new(SubscriptionService::new(clock)),
            config,
            gateways,
            notifier,
            currencies: CurrencyTable::default(),
        }
    }

    /// Apply the effects a domain transition emitted. Balance credits
    /// are idempotent on the payment id, so replaying the same effect
    /// list is harmless. Panel provisioning is delegated to the panel
    /// worker, which polls subscription status; here it is logged.
    ///
    /// # Errors
    ///
    /// Returns the store error if a balance credit fails.
    pub fn apply_effects(&self, effects: &[Effect]) -> Result<(), veilpay_store::StoreError> {
        for effect in effects {
            match effect {
                Effect::CreditBalance {
                    user_id,
                    amount,
                    source_payment,
                } => {
                    let balance = self.store.credit_balance(user_id, amount, source_payment)?;
                    tracing::info!(
                        user_id = %user_id,
                        payment_id = %source_payment,
                        amount = amount.minor_units,
                        currency = %amount.currency,
                        new_balance = balance,
                        "Balance credited"
                    );
                }
                Effect::Notify { user_id, event } => {
                    self.notifier.notify(*user_id, event);
                }
                Effect::ProvisionPanel { subscription_id } => {
                    tracing::info!(subscription_id = %subscription_id, "Panel provisioning requested");
                }
                Effect::RevokePanel { subscription_id } => {
                    tracing::info!(subscription_id = %subscription_id, "Panel revocation requested");
                }
            }
        }
        Ok(())
    }
}
