//! Domain services: the stateless rule layer over the aggregates.
//!
//! `PaymentService` and `SubscriptionService` are the only mutation
//! entry points the rest of the system uses. They validate inputs
//! against the configured policy, then delegate to the aggregate's own
//! transition methods, which guard the state machine.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use chrono::Duration;

use crate::clock::Clock;
use crate::effect::Effect;
use crate::error::{PayError, Result};
use crate::ids::{PaymentId, SubscriptionId, UserId};
use crate::money::Money;
use crate::payment::{Payment, PaymentStatus};
use crate::subscription::{NewSubscription, Subscription};

/// Default pending-payment expiry window, minutes.
pub const DEFAULT_PENDING_WINDOW_MINUTES: i64 = 30;

/// Fee schedule for one gateway.
///
/// `fixed_minor` is interpreted in the payment's own currency, so a
/// schedule of `{ 50 bps, 30 }` charges 0.5% plus 30 cents on USD and
/// 0.5% plus 30 satoshi on BTC. Per-currency fixed components would go
/// in per-currency schedules.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeeSchedule {
    /// Percentage component, basis points (100 bps = 1%).
    pub percent_bps: u32,
    /// Fixed component, minor units of the payment currency.
    pub fixed_minor: i64,
}

/// Process-wide payment policy: gateway allow-list, fee schedules, and
/// per-currency amount bounds. Built once at startup, never mutated.
#[derive(Debug, Clone)]
pub struct PaymentPolicy {
    allowed_gateways: BTreeSet<String>,
    fees: HashMap<String, FeeSchedule>,
    /// currency code -> (min, max) in minor units
    bounds: HashMap<String, (i64, i64)>,
    pending_window: Duration,
}

impl PaymentPolicy {
    /// Build a policy from configuration data.
    #[must_use]
    pub fn new(
        allowed_gateways: BTreeSet<String>,
        fees: HashMap<String, FeeSchedule>,
        bounds: HashMap<String, (i64, i64)>,
        pending_window_minutes: i64,
    ) -> Self {
        Self {
            allowed_gateways,
            fees,
            bounds,
            pending_window: Duration::minutes(pending_window_minutes),
        }
    }

    /// Whether the gateway is allow-listed.
    #[must_use]
    pub fn allows_gateway(&self, gateway: &str) -> bool {
        self.allowed_gateways.contains(gateway)
    }

    /// Fee schedule for a gateway, if configured.
    #[must_use]
    pub fn fee_schedule(&self, gateway: &str) -> Option<FeeSchedule> {
        self.fees.get(gateway).copied()
    }

    /// How long a payment may sit pending before it expires.
    #[must_use]
    pub const fn pending_window(&self) -> Duration {
        self.pending_window
    }

    /// Replace the pending window, keeping the rest of the policy.
    #[must_use]
    pub fn with_pending_window(mut self, minutes: i64) -> Self {
        self.pending_window = Duration::minutes(minutes);
        self
    }
}

impl Default for PaymentPolicy {
    /// The platform's stock policy: `nowpayments` only, 0.5% fee,
    /// 1.00-1000.00 in the fiat currencies.
    fn default() -> Self {
        let fiat_bounds = (100, 100_000);
        Self::new(
            BTreeSet::from(["nowpayments".to_string()]),
            HashMap::from([(
                "nowpayments".to_string(),
                FeeSchedule {
                    percent_bps: 50,
                    fixed_minor: 0,
                },
            )]),
            HashMap::from([
                ("USD".to_string(), fiat_bounds),
                ("EUR".to_string(), fiat_bounds),
                ("RUB".to_string(), (10_000, 10_000_000)),
            ]),
            DEFAULT_PENDING_WINDOW_MINUTES,
        )
    }
}

/// Rule layer for payment mutations.
pub struct PaymentService {
    policy: PaymentPolicy,
    clock: Arc<dyn Clock>,
}

impl PaymentService {
    /// Create the service with a policy and clock.
    #[must_use]
    pub fn new(policy: PaymentPolicy, clock: Arc<dyn Clock>) -> Self {
        Self { policy, clock }
    }

    /// The configured policy.
    #[must_use]
    pub const fn policy(&self) -> &PaymentPolicy {
        &self.policy
    }

    /// Create a new pending payment.
    ///
    /// # Errors
    ///
    /// `PayError::UnknownGateway` for gateways outside the allow-list,
    /// `PayError::Validation` for non-positive amounts,
    /// `PayError::AmountOutOfRange` outside the currency's bounds.
    pub fn create_payment(
        &self,
        user_id: UserId,
        amount: Money,
        gateway: &str,
        description: Option<String>,
        metadata: BTreeMap<String, serde_json::Value>,
    ) -> Result<Payment> {
        if !self.policy.allows_gateway(gateway) {
            return Err(PayError::UnknownGateway(gateway.to_string()));
        }
        if !amount.is_positive() {
            return Err(PayError::validation("payment amount must be positive"));
        }
        let Some(&(min, max)) = self.policy.bounds.get(amount.currency.as_str()) else {
            return Err(PayError::UnknownCurrency(amount.currency.to_string()));
        };
        if amount.minor_units < min || amount.minor_units > max {
            return Err(PayError::AmountOutOfRange {
                currency: amount.currency.to_string(),
                amount: amount.minor_units,
                min,
                max,
            });
        }

        Payment::new(
            PaymentId::generate(),
            user_id,
            amount,
            gateway,
            description,
            metadata,
            self.clock.now(),
        )
    }

    /// Complete a payment (idempotent from `completed`).
    ///
    /// # Errors
    ///
    /// `PayError::InvalidTransition` unless pending or processing.
    pub fn complete_payment(
        &self,
        payment: &mut Payment,
        gateway_transaction_id: &str,
        gateway_response: Option<serde_json::Value>,
    ) -> Result<Vec<Effect>> {
        payment.complete(gateway_transaction_id, gateway_response, self.clock.now())
    }

    /// Fail a payment (no-op from a final failure state).
    ///
    /// # Errors
    ///
    /// `PayError::InvalidTransition` unless pending or processing.
    pub fn fail_payment(
        &self,
        payment: &mut Payment,
        reason: &str,
        gateway_response: Option<serde_json::Value>,
    ) -> Result<Vec<Effect>> {
        payment.fail(reason, gateway_response, self.clock.now())
    }

    /// Mark a payment as in flight at the gateway.
    ///
    /// # Errors
    ///
    /// `PayError::InvalidTransition` unless pending or processing.
    pub fn begin_processing(&self, payment: &mut Payment) -> Result<Vec<Effect>> {
        payment.begin_processing(self.clock.now())
    }

    /// Cancel a pending payment.
    ///
    /// # Errors
    ///
    /// `PayError::InvalidTransition` unless pending.
    pub fn cancel_payment(&self, payment: &mut Payment, reason: &str) -> Result<Vec<Effect>> {
        payment.cancel(reason, self.clock.now())
    }

    /// Refund a completed payment, fully or partially.
    ///
    /// # Errors
    ///
    /// See [`Payment::refund`].
    pub fn refund_payment(
        &self,
        payment: &mut Payment,
        refund_amount: Money,
        reason: &str,
        refund_transaction_id: Option<String>,
    ) -> Result<Vec<Effect>> {
        payment.refund(refund_amount, reason, refund_transaction_id, self.clock.now())
    }

    /// Expire a payment whose pending window elapsed.
    ///
    /// # Errors
    ///
    /// `PayError::InvalidTransition` unless pending.
    pub fn expire_payment(&self, payment: &mut Payment) -> Result<Vec<Effect>> {
        payment.expire(self.clock.now())
    }

    /// Mark a settled payment as under dispute.
    ///
    /// # Errors
    ///
    /// See [`Payment::mark_disputed`].
    pub fn dispute_payment(&self, payment: &mut Payment, reason: &str) -> Result<Vec<Effect>> {
        payment.mark_disputed(reason, self.clock.now())
    }

    /// Record a provider-confirmed chargeback.
    ///
    /// # Errors
    ///
    /// See [`Payment::chargeback`].
    pub fn chargeback_payment(
        &self,
        payment: &mut Payment,
        reason: &str,
        gateway_transaction_id: Option<String>,
    ) -> Result<Vec<Effect>> {
        payment.chargeback(reason, gateway_transaction_id, self.clock.now())
    }

    /// Whether the payment has outlived its pending window.
    #[must_use]
    pub fn is_payment_expired(&self, payment: &Payment) -> bool {
        payment.status == PaymentStatus::Pending
            && self.clock.now() > payment.created_at + self.policy.pending_window
    }

    /// Gateway fee for an amount: percentage plus fixed component,
    /// rounded to the currency's minor unit.
    ///
    /// # Errors
    ///
    /// `PayError::UnknownGateway` when no schedule is configured,
    /// `PayError::Validation` on overflow.
    pub fn calculate_fee(&self, amount: &Money, gateway: &str) -> Result<Money> {
        let Some(schedule) = self.policy.fee_schedule(gateway) else {
            return Err(PayError::UnknownGateway(gateway.to_string()));
        };
        let percent = amount.percent_bps(schedule.percent_bps)?;
        percent.checked_add(&Money::new(
            schedule.fixed_minor,
            amount.currency.clone(),
        ))
    }
}

/// Rule layer for subscription mutations.
pub struct SubscriptionService {
    clock: Arc<dyn Clock>,
}

impl SubscriptionService {
    /// Create the service with a clock.
    #[must_use]
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self { clock }
    }

    /// Create a new pending subscription.
    ///
    /// # Errors
    ///
    /// See [`Subscription::new`].
    pub fn create_subscription(&self, params: NewSubscription) -> Result<Subscription> {
        Subscription::new(SubscriptionId::generate(), params, self.clock.now())
    }

    /// Activate or reinstate a subscription.
    ///
    /// # Errors
    ///
    /// See [`Subscription::activate`].
    pub fn activate_subscription(&self, sub: &mut Subscription) -> Result<Vec<Effect>> {
        sub.activate(self.clock.now())
    }

    /// Suspend an active subscription.
    ///
    /// # Errors
    ///
    /// See [`Subscription::suspend`].
    pub fn suspend_subscription(&self, sub: &mut Subscription, reason: &str) -> Result<Vec<Effect>> {
        sub.suspend(reason, self.clock.now())
    }

    /// Cancel a subscription.
    ///
    /// # Errors
    ///
    /// See [`Subscription::cancel`].
    pub fn cancel_subscription(&self, sub: &mut Subscription, reason: &str) -> Result<Vec<Effect>> {
        sub.cancel(reason, self.clock.now())
    }

    /// Expire a subscription.
    ///
    /// # Errors
    ///
    /// See [`Subscription::expire`].
    pub fn expire_subscription(&self, sub: &mut Subscription) -> Result<Vec<Effect>> {
        sub.expire(self.clock.now())
    }

    /// Put a subscription into its grace period.
    ///
    /// # Errors
    ///
    /// See [`Subscription::enter_grace`].
    pub fn put_in_grace_period(
        &self,
        sub: &mut Subscription,
        grace_ends: chrono::DateTime<chrono::Utc>,
    ) -> Result<Vec<Effect>> {
        sub.enter_grace(grace_ends, self.clock.now())
    }

    /// Renew a subscription.
    ///
    /// # Errors
    ///
    /// See [`Subscription::renew`].
    pub fn renew_subscription(
        &self,
        sub: &mut Subscription,
        new_expires_at: chrono::DateTime<chrono::Utc>,
        renewal_price: Option<Money>,
    ) -> Result<Vec<Effect>> {
        sub.renew(new_expires_at, renewal_price, self.clock.now())
    }

    /// Record transferred bytes; may auto-suspend on limit breach.
    ///
    /// # Errors
    ///
    /// See [`Subscription::record_data_usage`].
    pub fn record_data_usage(
        &self,
        sub: &mut Subscription,
        bytes: u64,
        source: &str,
        source_id: Option<String>,
        metadata: serde_json::Value,
    ) -> Result<Vec<Effect>> {
        sub.record_data_usage(bytes, source, source_id, metadata, self.clock.now())
    }

    /// Record connected minutes.
    ///
    /// # Errors
    ///
    /// See [`Subscription::record_time_usage`].
    pub fn record_time_usage(
        &self,
        sub: &mut Subscription,
        minutes: u64,
        source: &str,
        source_id: Option<String>,
        metadata: serde_json::Value,
    ) -> Result<Vec<Effect>> {
        sub.record_time_usage(minutes, source, source_id, metadata, self.clock.now())
    }

    /// Record one use of a named feature.
    ///
    /// # Errors
    ///
    /// See [`Subscription::record_feature_usage`].
    pub fn record_feature_usage(
        &self,
        sub: &mut Subscription,
        source: &str,
        feature: &str,
        metadata: serde_json::Value,
    ) -> Result<Vec<Effect>> {
        sub.record_feature_usage(source, feature, metadata, self.clock.now())
    }

    /// Whether the expiry sweep should expire this subscription now:
    /// the window has closed, or the grace deadline has passed.
    #[must_use]
    pub fn should_expire(&self, sub: &Subscription) -> bool {
        let now = self.clock.now();
        match sub.status {
            crate::subscription::SubscriptionStatus::Active => now > sub.expires_at,
            crate::subscription::SubscriptionStatus::GracePeriod => {
                sub.grace_period_ends.is_some_and(|ends| now > ends)
            }
            _ => false,
        }
    }

    /// Whether the subscription expires within `days`.
    #[must_use]
    pub fn is_subscription_expiring_soon(&self, sub: &Subscription, days: i64) -> bool {
        sub.is_expiring_soon(days, self.clock.now())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::money::Currency;
    use crate::subscription::{DataLimit, SubscriptionStatus, SubscriptionType};
    use chrono::Utc;

    fn usd(minor: i64) -> Money {
        Money::new(minor, Currency::new("USD").unwrap())
    }

    fn payment_service(clock: Arc<FixedClock>) -> PaymentService {
        PaymentService::new(PaymentPolicy::default(), clock)
    }

    #[test]
    fn create_payment_happy_path() {
        let clock = Arc::new(FixedClock::at(Utc::now()));
        let svc = payment_service(clock);
        let p = svc
            .create_payment(UserId::generate(), usd(1000), "nowpayments", None, BTreeMap::new())
            .unwrap();
        assert_eq!(p.status, PaymentStatus::Pending);
        assert_eq!(p.gateway, "nowpayments");
    }

    #[test]
    fn create_payment_rejects_unlisted_gateway() {
        let clock = Arc::new(FixedClock::at(Utc::now()));
        let svc = payment_service(clock);
        let err = svc
            .create_payment(UserId::generate(), usd(1000), "paypal", None, BTreeMap::new())
            .unwrap_err();
        assert_eq!(err, PayError::UnknownGateway("paypal".into()));
    }

    #[test]
    fn create_payment_enforces_amount_bounds() {
        let clock = Arc::new(FixedClock::at(Utc::now()));
        let svc = payment_service(clock);

        // Below the USD minimum of 1.00.
        assert!(matches!(
            svc.create_payment(UserId::generate(), usd(99), "nowpayments", None, BTreeMap::new()),
            Err(PayError::AmountOutOfRange { .. })
        ));
        // Above the USD maximum of 1000.00.
        assert!(matches!(
            svc.create_payment(
                UserId::generate(),
                usd(100_001),
                "nowpayments",
                None,
                BTreeMap::new()
            ),
            Err(PayError::AmountOutOfRange { .. })
        ));
        // Currency with no configured bounds.
        let btc = Money::new(100, Currency::new("BTC").unwrap());
        assert!(matches!(
            svc.create_payment(UserId::generate(), btc, "nowpayments", None, BTreeMap::new()),
            Err(PayError::UnknownCurrency(_))
        ));
    }

    #[test]
    fn pending_window_drives_expiry_check() {
        let clock = Arc::new(FixedClock::at(Utc::now()));
        let svc = payment_service(Arc::clone(&clock));
        let p = svc
            .create_payment(UserId::generate(), usd(1000), "nowpayments", None, BTreeMap::new())
            .unwrap();

        assert!(!svc.is_payment_expired(&p));
        clock.advance(Duration::minutes(29));
        assert!(!svc.is_payment_expired(&p));
        clock.advance(Duration::minutes(2));
        assert!(svc.is_payment_expired(&p));

        // Completed payments never count as expired.
        let mut done = p.clone();
        done.complete("np_1", None, clock.now()).unwrap();
        assert!(!svc.is_payment_expired(&done));
    }

    #[test]
    fn fee_is_percent_plus_fixed() {
        let clock = Arc::new(FixedClock::at(Utc::now()));
        let policy = PaymentPolicy::new(
            BTreeSet::from(["nowpayments".to_string()]),
            HashMap::from([(
                "nowpayments".to_string(),
                FeeSchedule {
                    percent_bps: 250,
                    fixed_minor: 30,
                },
            )]),
            HashMap::from([("USD".to_string(), (100, 100_000))]),
            30,
        );
        let svc = PaymentService::new(policy, clock);

        // 2.5% of 10.00 + 0.30 = 0.55
        assert_eq!(svc.calculate_fee(&usd(1000), "nowpayments").unwrap(), usd(55));
        assert!(matches!(
            svc.calculate_fee(&usd(1000), "paypal"),
            Err(PayError::UnknownGateway(_))
        ));
    }

    #[test]
    fn expiry_sweep_predicate() {
        let now = Utc::now();
        let clock = Arc::new(FixedClock::at(now));
        let svc = SubscriptionService::new(Arc::clone(&clock) as Arc<dyn Clock>);

        let mut sub = svc
            .create_subscription(NewSubscription {
                user_id: UserId::generate(),
                panel_id: crate::ids::PanelId::generate(),
                kind: SubscriptionType::Premium,
                price: usd(999),
                starts_at: now,
                expires_at: now + Duration::days(30),
                data_limit: DataLimit::Unlimited,
                device_limit: Some(5),
                features: BTreeSet::new(),
            })
            .unwrap();
        svc.activate_subscription(&mut sub).unwrap();

        assert!(!svc.should_expire(&sub));
        clock.advance(Duration::days(31));
        assert!(svc.should_expire(&sub));

        // Grace deadline governs expiry while in grace.
        let mut graced = sub.clone();
        graced.expires_at = clock.now() + Duration::days(1);
        svc.put_in_grace_period(&mut graced, clock.now() + Duration::days(3))
            .unwrap();
        assert!(!svc.should_expire(&graced));
        clock.advance(Duration::days(4));
        assert!(svc.should_expire(&graced));

        svc.expire_subscription(&mut graced).unwrap();
        assert_eq!(graced.status, SubscriptionStatus::Expired);
        assert!(!svc.should_expire(&graced));
    }
}
