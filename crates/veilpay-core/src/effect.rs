//! Effects returned by mutating aggregate operations.
//!
//! Instead of buffering domain events inside the entity, every mutating
//! call returns the list of effects the orchestration layer must apply
//! together with the persistence write. Balance credits commit in the
//! same store write as the aggregate; the remaining effects follow after
//! it, and duplicate transitions return no effects, so none of them can
//! fire twice.

use serde::{Deserialize, Serialize};

use crate::ids::{PaymentId, SubscriptionId, UserId};
use crate::money::Money;

/// A side effect to apply alongside persisting the aggregate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum Effect {
    /// Credit the user's balance; idempotent on `source_payment`.
    CreditBalance {
        /// The user to credit.
        user_id: UserId,
        /// The amount to credit.
        amount: Money,
        /// The payment funding the credit; replays of the same payment
        /// must not credit twice.
        source_payment: PaymentId,
    },

    /// Enqueue a user-facing notification.
    Notify {
        /// The recipient.
        user_id: UserId,
        /// What happened.
        event: NotifyEvent,
    },

    /// The panel layer should provision VPN access for this subscription.
    ProvisionPanel {
        /// The subscription that became active.
        subscription_id: SubscriptionId,
    },

    /// The panel layer should revoke VPN access for this subscription.
    RevokePanel {
        /// The subscription that lost service.
        subscription_id: SubscriptionId,
    },
}

/// User-facing notification events.
///
/// The Telegram transport turns these into localized messages; the core
/// only names what happened.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "event")]
pub enum NotifyEvent {
    /// A payment finished successfully.
    PaymentCompleted {
        /// The completed payment.
        payment_id: PaymentId,
    },
    /// A payment failed.
    PaymentFailed {
        /// The failed payment.
        payment_id: PaymentId,
        /// Failure reason, safe for display.
        reason: String,
    },
    /// A payment was refunded, fully or partially.
    PaymentRefunded {
        /// The refunded payment.
        payment_id: PaymentId,
    },
    /// A subscription became active.
    SubscriptionActivated {
        /// The activated subscription.
        subscription_id: SubscriptionId,
    },
    /// A subscription was suspended.
    SubscriptionSuspended {
        /// The suspended subscription.
        subscription_id: SubscriptionId,
        /// Why, safe for display.
        reason: String,
    },
    /// A subscription expired.
    SubscriptionExpired {
        /// The expired subscription.
        subscription_id: SubscriptionId,
    },
}
