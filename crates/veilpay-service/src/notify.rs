//! User notification dispatch.
//!
//! The core emits [`NotifyEvent`]s as effects; this module carries them
//! to whatever transport fronts the service. The bot process consumes
//! these through its own adapter; the service ships with a
//! tracing-backed implementation so every notification is at least
//! visible in the logs.

use veilpay_core::{NotifyEvent, UserId};

/// Notification transport.
pub trait Notifier: Send + Sync {
    /// Deliver one event to one user. Must not block on slow
    /// transports; queue internally if delivery is expensive.
    fn notify(&self, user_id: UserId, event: &NotifyEvent);
}

/// Logs every notification at info level.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    fn notify(&self, user_id: UserId, event: &NotifyEvent) {
        match event {
            NotifyEvent::PaymentCompleted { payment_id } => {
                tracing::info!(user_id = %user_id, payment_id = %payment_id, "notify: payment completed");
            }
            NotifyEvent::PaymentFailed { payment_id, reason } => {
                tracing::info!(user_id = %user_id, payment_id = %payment_id, reason = %reason, "notify: payment failed");
            }
            NotifyEvent::PaymentRefunded { payment_id } => {
                tracing::info!(user_id = %user_id, payment_id = %payment_id, "notify: payment refunded");
            }
            NotifyEvent::SubscriptionActivated { subscription_id } => {
                tracing::info!(user_id = %user_id, subscription_id = %subscription_id, "notify: subscription activated");
            }
            NotifyEvent::SubscriptionSuspended {
                subscription_id,
                reason,
            } => {
                tracing::info!(user_id = %user_id, subscription_id = %subscription_id, reason = %reason, "notify: subscription suspended");
            }
            NotifyEvent::SubscriptionExpired { subscription_id } => {
                tracing::info!(user_id = %user_id, subscription_id = %subscription_id, "notify: subscription expired");
            }
        }
    }
}

/// Records every notification it receives; the tests' stand-in for the
/// bot transport.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    events: std::sync::Mutex<Vec<(UserId, NotifyEvent)>>,
}

impl RecordingNotifier {
    /// Snapshot of the recorded events.
    ///
    /// # Panics
    ///
    /// Panics if a previous caller panicked while holding the lock.
    #[must_use]
    pub fn events(&self) -> Vec<(UserId, NotifyEvent)> {
        self.events
            .lock()
            .expect("notifier lock poisoned")
            .clone()
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, user_id: UserId, event: &NotifyEvent) {
        self.events
            .lock()
            .expect("notifier lock poisoned")
            .push((user_id, event.clone()));
    }
}
