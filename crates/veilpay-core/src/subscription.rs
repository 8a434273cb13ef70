//! Subscription aggregate: plan, validity window, data/device limits,
//! status state machine, and append-only usage records.
//!
//! A `Subscription` owns its ordered list of `Usage` records. Usage is
//! only accepted while the subscription is usable (active or in grace
//! period); crossing the data limit during recording auto-suspends the
//! subscription in the same call.

use std::collections::BTreeSet;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::effect::{Effect, NotifyEvent};
use crate::error::{PayError, Result};
use crate::ids::{PanelId, SubscriptionId, UsageId, UserId};
use crate::money::Money;

/// Minimum subscription duration, days.
pub const MIN_DURATION_DAYS: i64 = 1;

/// Maximum subscription duration, days. Also caps how far a single
/// renewal may extend past the current expiry.
pub const MAX_DURATION_DAYS: i64 = 5 * 365;

/// Subscription lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    /// Created, payment not yet settled.
    Pending,
    /// Service is on; the panel layer has provisioned access.
    Active,
    /// Service paused (limit breach, manual action).
    Suspended,
    /// Payment lapsed but service continues until the grace deadline.
    GracePeriod,
    /// Validity window elapsed.
    Expired,
    /// Terminated by the user or an operator.
    Cancelled,
}

impl SubscriptionStatus {
    /// Wire name of the status.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Active => "active",
            Self::Suspended => "suspended",
            Self::GracePeriod => "grace_period",
            Self::Expired => "expired",
            Self::Cancelled => "cancelled",
        }
    }

    /// Whether activation (initial or reinstatement) is legal.
    #[must_use]
    pub const fn can_be_activated(self) -> bool {
        matches!(self, Self::Pending | Self::Suspended)
    }

    /// Whether suspension is legal.
    #[must_use]
    pub const fn can_be_suspended(self) -> bool {
        matches!(self, Self::Active)
    }

    /// Whether cancellation is legal.
    #[must_use]
    pub const fn can_be_cancelled(self) -> bool {
        matches!(self, Self::Active | Self::Suspended | Self::GracePeriod)
    }

    /// Whether renewal is legal.
    #[must_use]
    pub const fn can_be_renewed(self) -> bool {
        matches!(self, Self::Active | Self::GracePeriod)
    }

    /// Whether the subscription may enter the grace period.
    #[must_use]
    pub const fn can_enter_grace(self) -> bool {
        matches!(self, Self::Active)
    }

    /// Whether expiry is legal.
    #[must_use]
    pub const fn can_be_expired(self) -> bool {
        matches!(self, Self::Active | Self::GracePeriod)
    }

    /// Whether the subscription accepts usage recording.
    #[must_use]
    pub const fn is_usable(self) -> bool {
        matches!(self, Self::Active | Self::GracePeriod)
    }
}

impl std::fmt::Display for SubscriptionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The plan tier a subscription was sold under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionType {
    /// Free tier, one device.
    Free,
    /// Time-boxed trial.
    Trial,
    /// Entry paid tier.
    Basic,
    /// Full paid tier.
    Premium,
    /// Paid tier without data caps.
    Unlimited,
}

impl SubscriptionType {
    /// Whether the tier must carry a zero price.
    #[must_use]
    pub const fn is_free(self) -> bool {
        matches!(self, Self::Free | Self::Trial)
    }

    /// Per-tier cap on the device limit.
    #[must_use]
    pub const fn max_devices(self) -> u32 {
        match self {
            Self::Free => 1,
            Self::Trial => 2,
            Self::Basic => 3,
            Self::Premium => 5,
            Self::Unlimited => 10,
        }
    }
}

/// A data allowance in bytes, with a distinguished unlimited sentinel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataLimit {
    /// No cap.
    Unlimited,
    /// Cap in bytes.
    Bytes(u64),
}

impl DataLimit {
    /// Whether `consumed` bytes meet or exceed the limit. Unlimited
    /// never exceeds.
    #[must_use]
    pub const fn is_exceeded_by(self, consumed: u64) -> bool {
        match self {
            Self::Unlimited => false,
            Self::Bytes(limit) => consumed >= limit,
        }
    }

    /// Remaining allowance after `consumed` bytes, clamped at zero.
    /// `None` means unlimited.
    #[must_use]
    pub const fn remaining(self, consumed: u64) -> Option<u64> {
        match self {
            Self::Unlimited => None,
            Self::Bytes(limit) => Some(limit.saturating_sub(consumed)),
        }
    }
}

/// What a usage record measures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UsageKind {
    /// Transferred data, bytes.
    Bytes,
    /// Connected time, minutes.
    Minutes,
    /// One use of a named feature.
    Feature,
}

/// A child record of a subscription. Append-only, never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Usage {
    /// Record id; ULID, so ids sort in insertion order.
    pub id: UsageId,
    /// Owning subscription.
    pub subscription_id: SubscriptionId,
    /// What was measured.
    pub kind: UsageKind,
    /// Measured quantity (bytes, minutes, or uses).
    pub amount: u64,
    /// Which collaborator reported the usage (panel name, job name).
    pub source: String,
    /// Collaborator-side record id, if any.
    pub source_id: Option<String>,
    /// Additional context.
    pub metadata: serde_json::Value,
    /// When the usage was recorded.
    pub recorded_at: DateTime<Utc>,
}

/// The subscription aggregate root.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subscription {
    /// Aggregate id.
    pub id: SubscriptionId,
    /// The subscribed user (weak reference, lookup only).
    pub user_id: UserId,
    /// The VPN panel serving this subscription.
    pub panel_id: PanelId,
    /// Plan tier.
    pub kind: SubscriptionType,
    /// Current lifecycle status.
    pub status: SubscriptionStatus,
    /// Price paid for the current period.
    pub price: Money,
    /// Start of the validity window.
    pub starts_at: DateTime<Utc>,
    /// End of the validity window.
    pub expires_at: DateTime<Utc>,
    /// Data allowance for the period.
    pub data_limit: DataLimit,
    /// Simultaneous device cap, if any.
    pub device_limit: Option<u32>,
    /// Feature flags sold with the plan.
    pub features: BTreeSet<String>,
    /// End of the grace period, while in `grace_period`.
    pub grace_period_ends: Option<DateTime<Utc>>,
    /// Why the subscription was suspended or cancelled.
    pub status_reason: Option<String>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last mutation time.
    pub updated_at: DateTime<Utc>,
    /// Ordered, append-only usage records.
    pub usages: Vec<Usage>,
}

/// Creation parameters for a subscription.
#[derive(Debug, Clone)]
pub struct NewSubscription {
    /// The subscribed user.
    pub user_id: UserId,
    /// The serving panel.
    pub panel_id: PanelId,
    /// Plan tier.
    pub kind: SubscriptionType,
    /// Price for the first period.
    pub price: Money,
    /// Start of the validity window.
    pub starts_at: DateTime<Utc>,
    /// End of the validity window.
    pub expires_at: DateTime<Utc>,
    /// Data allowance.
    pub data_limit: DataLimit,
    /// Device cap, if any.
    pub device_limit: Option<u32>,
    /// Feature flags.
    pub features: BTreeSet<String>,
}

impl Subscription {
    /// Create a new pending subscription.
    ///
    /// # Errors
    ///
    /// `PayError::Validation` when the validity window is inverted or
    /// outside [1 day, 5 years], the price contradicts the tier, or the
    /// device limit is out of bounds.
    pub fn new(id: SubscriptionId, params: NewSubscription, now: DateTime<Utc>) -> Result<Self> {
        if params.starts_at >= params.expires_at {
            return Err(PayError::validation("starts_at must be before expires_at"));
        }
        let duration = params.expires_at - params.starts_at;
        if duration < Duration::days(MIN_DURATION_DAYS) {
            return Err(PayError::validation("subscription must last at least one day"));
        }
        if duration > Duration::days(MAX_DURATION_DAYS) {
            return Err(PayError::validation("subscription may not exceed five years"));
        }
        if params.kind.is_free() && !params.price.is_zero() {
            return Err(PayError::validation("free tiers require a zero price"));
        }
        if !params.kind.is_free() && !params.price.is_positive() {
            return Err(PayError::validation("paid tiers require a positive price"));
        }
        if let Some(devices) = params.device_limit {
            if !(1..=100).contains(&devices) {
                return Err(PayError::validation("device limit must be within [1, 100]"));
            }
            if devices > params.kind.max_devices() {
                return Err(PayError::validation(format!(
                    "device limit {devices} exceeds the {} cap of {}",
                    serde_json::to_string(&params.kind).unwrap_or_default(),
                    params.kind.max_devices()
                )));
            }
        }

        Ok(Self {
            id,
            user_id: params.user_id,
            panel_id: params.panel_id,
            kind: params.kind,
            status: SubscriptionStatus::Pending,
            price: params.price,
            starts_at: params.starts_at,
            expires_at: params.expires_at,
            data_limit: params.data_limit,
            device_limit: params.device_limit,
            features: params.features,
            grace_period_ends: None,
            status_reason: None,
            created_at: now,
            updated_at: now,
            usages: Vec::new(),
        })
    }

    fn invalid(&self, attempted: &'static str) -> PayError {
        PayError::InvalidTransition {
            entity: "subscription",
            current: self.status.as_str().to_string(),
            attempted,
        }
    }

    /// Activate a pending subscription or reinstate a suspended one.
    /// No-op when already active.
    ///
    /// # Errors
    ///
    /// `PayError::InvalidTransition` from any other state.
    pub fn activate(&mut self, now: DateTime<Utc>) -> Result<Vec<Effect>> {
        if self.status == SubscriptionStatus::Active {
            return Ok(Vec::new());
        }
        if !self.status.can_be_activated() {
            return Err(self.invalid("activate"));
        }
        self.status = SubscriptionStatus::Active;
        self.status_reason = None;
        self.updated_at = now;
        Ok(vec![
            Effect::ProvisionPanel {
                subscription_id: self.id,
            },
            Effect::Notify {
                user_id: self.user_id,
                event: NotifyEvent::SubscriptionActivated {
                    subscription_id: self.id,
                },
            },
        ])
    }

    /// Suspend an active subscription.
    ///
    /// # Errors
    ///
    /// `PayError::InvalidTransition` unless active.
    pub fn suspend(&mut self, reason: impl Into<String>, now: DateTime<Utc>) -> Result<Vec<Effect>> {
        if !self.status.can_be_suspended() {
            return Err(self.invalid("suspend"));
        }
        let reason = reason.into();
        self.status = SubscriptionStatus::Suspended;
        self.status_reason = Some(reason.clone());
        self.updated_at = now;
        Ok(vec![
            Effect::RevokePanel {
                subscription_id: self.id,
            },
            Effect::Notify {
                user_id: self.user_id,
                event: NotifyEvent::SubscriptionSuspended {
                    subscription_id: self.id,
                    reason,
                },
            },
        ])
    }

    /// Cancel the subscription.
    ///
    /// # Errors
    ///
    /// `PayError::InvalidTransition` unless active, suspended, or in
    /// grace period.
    pub fn cancel(&mut self, reason: impl Into<String>, now: DateTime<Utc>) -> Result<Vec<Effect>> {
        if !self.status.can_be_cancelled() {
            return Err(self.invalid("cancel"));
        }
        self.status = SubscriptionStatus::Cancelled;
        self.status_reason = Some(reason.into());
        self.grace_period_ends = None;
        self.updated_at = now;
        Ok(vec![Effect::RevokePanel {
            subscription_id: self.id,
        }])
    }

    /// Expire the subscription at the end of its window or grace.
    ///
    /// # Errors
    ///
    /// `PayError::InvalidTransition` unless active or in grace period.
    pub fn expire(&mut self, now: DateTime<Utc>) -> Result<Vec<Effect>> {
        if self.status == SubscriptionStatus::Expired {
            return Ok(Vec::new());
        }
        if !self.status.can_be_expired() {
            return Err(self.invalid("expire"));
        }
        self.status = SubscriptionStatus::Expired;
        self.grace_period_ends = None;
        self.updated_at = now;
        Ok(vec![
            Effect::RevokePanel {
                subscription_id: self.id,
            },
            Effect::Notify {
                user_id: self.user_id,
                event: NotifyEvent::SubscriptionExpired {
                    subscription_id: self.id,
                },
            },
        ])
    }

    /// Put an active subscription into the grace period. Service
    /// continues until `grace_ends`.
    ///
    /// # Errors
    ///
    /// `PayError::InvalidTransition` unless active;
    /// `PayError::Validation` when the deadline is not in the future.
    pub fn enter_grace(&mut self, grace_ends: DateTime<Utc>, now: DateTime<Utc>) -> Result<Vec<Effect>> {
        if !self.status.can_enter_grace() {
            return Err(self.invalid("enter_grace"));
        }
        if grace_ends <= now {
            return Err(PayError::validation("grace period must end in the future"));
        }
        self.status = SubscriptionStatus::GracePeriod;
        self.grace_period_ends = Some(grace_ends);
        self.updated_at = now;
        Ok(Vec::new())
    }

    /// Renew the subscription, extending its validity window and
    /// optionally re-pricing it. Renewal out of the grace period
    /// reactivates the subscription; panel access was never revoked in
    /// grace, so no provisioning effect is needed.
    ///
    /// # Errors
    ///
    /// `PayError::InvalidTransition` unless active or in grace period;
    /// `PayError::Validation` when the new expiry is not strictly after
    /// the current one, extends more than five years past it, or the
    /// new price contradicts the tier.
    pub fn renew(
        &mut self,
        new_expires_at: DateTime<Utc>,
        renewal_price: Option<Money>,
        now: DateTime<Utc>,
    ) -> Result<Vec<Effect>> {
        if !self.status.can_be_renewed() {
            return Err(self.invalid("renew"));
        }
        if new_expires_at <= self.expires_at {
            return Err(PayError::validation(
                "renewal date must be after current expiration",
            ));
        }
        if new_expires_at - self.expires_at > Duration::days(MAX_DURATION_DAYS) {
            return Err(PayError::validation(
                "renewal may not extend more than five years past current expiration",
            ));
        }
        if let Some(price) = &renewal_price {
            if self.kind.is_free() && !price.is_zero() {
                return Err(PayError::validation("free tiers require a zero price"));
            }
            if !self.kind.is_free() && !price.is_positive() {
                return Err(PayError::validation("paid tiers require a positive price"));
            }
        }

        self.expires_at = new_expires_at;
        if let Some(price) = renewal_price {
            self.price = price;
        }
        if self.status == SubscriptionStatus::GracePeriod {
            self.status = SubscriptionStatus::Active;
            self.grace_period_ends = None;
            self.status_reason = None;
        }
        self.updated_at = now;
        Ok(Vec::new())
    }

    fn record_usage(
        &mut self,
        kind: UsageKind,
        amount: u64,
        source: String,
        source_id: Option<String>,
        metadata: serde_json::Value,
        now: DateTime<Utc>,
    ) -> Result<()> {
        if !self.status.is_usable() {
            return Err(self.invalid("record_usage"));
        }
        self.usages.push(Usage {
            id: UsageId::generate(),
            subscription_id: self.id,
            kind,
            amount,
            source,
            source_id,
            metadata,
            recorded_at: now,
        });
        self.updated_at = now;
        Ok(())
    }

    /// Record transferred bytes. If the cumulative total crosses the
    /// data limit the subscription is suspended in the same call; the
    /// usage record persists either way.
    ///
    /// # Errors
    ///
    /// `PayError::InvalidTransition` unless the subscription is usable.
    pub fn record_data_usage(
        &mut self,
        bytes: u64,
        source: impl Into<String>,
        source_id: Option<String>,
        metadata: serde_json::Value,
        now: DateTime<Utc>,
    ) -> Result<Vec<Effect>> {
        self.record_usage(UsageKind::Bytes, bytes, source.into(), source_id, metadata, now)?;
        if self.has_exceeded_data_limit() && self.status.can_be_suspended() {
            return self.suspend("Data limit exceeded", now);
        }
        Ok(Vec::new())
    }

    /// Record connected minutes.
    ///
    /// # Errors
    ///
    /// `PayError::InvalidTransition` unless the subscription is usable.
    pub fn record_time_usage(
        &mut self,
        minutes: u64,
        source: impl Into<String>,
        source_id: Option<String>,
        metadata: serde_json::Value,
        now: DateTime<Utc>,
    ) -> Result<Vec<Effect>> {
        self.record_usage(UsageKind::Minutes, minutes, source.into(), source_id, metadata, now)?;
        Ok(Vec::new())
    }

    /// Record one use of a named feature (the feature name goes in
    /// `source_id`).
    ///
    /// # Errors
    ///
    /// `PayError::InvalidTransition` unless the subscription is usable.
    pub fn record_feature_usage(
        &mut self,
        source: impl Into<String>,
        feature: impl Into<String>,
        metadata: serde_json::Value,
        now: DateTime<Utc>,
    ) -> Result<Vec<Effect>> {
        self.record_usage(
            UsageKind::Feature,
            1,
            source.into(),
            Some(feature.into()),
            metadata,
            now,
        )?;
        Ok(Vec::new())
    }

    /// Total bytes consumed this period.
    #[must_use]
    pub fn consumed_bytes(&self) -> u64 {
        self.usages
            .iter()
            .filter(|u| u.kind == UsageKind::Bytes)
            .map(|u| u.amount)
            .sum()
    }

    /// Total minutes consumed this period.
    #[must_use]
    pub fn consumed_minutes(&self) -> u64 {
        self.usages
            .iter()
            .filter(|u| u.kind == UsageKind::Minutes)
            .map(|u| u.amount)
            .sum()
    }

    /// Whether consumed data meets or exceeds the limit.
    #[must_use]
    pub fn has_exceeded_data_limit(&self) -> bool {
        self.data_limit.is_exceeded_by(self.consumed_bytes())
    }

    /// Remaining data allowance; `None` means unlimited.
    #[must_use]
    pub fn remaining_data(&self) -> Option<u64> {
        self.data_limit.remaining(self.consumed_bytes())
    }

    /// Time left in the validity window, clamped at zero.
    #[must_use]
    pub fn remaining_time(&self, now: DateTime<Utc>) -> Duration {
        (self.expires_at - now).max(Duration::zero())
    }

    /// Whether the subscription expires within the given number of days.
    #[must_use]
    pub fn is_expiring_soon(&self, days: i64, now: DateTime<Utc>) -> bool {
        self.status.is_usable() && self.remaining_time(now) <= Duration::days(days)
    }
}
