//! Storage layer for veilpay.
//!
//! The [`Store`] trait abstracts aggregate persistence and the user
//! balance ledger. The in-memory implementation, [`MemoryStore`],
//! additionally provides per-aggregate locked updates
//! ([`MemoryStore::update_payment`] / [`MemoryStore::update_subscription`])
//! so that concurrent units of work for the same aggregate id serialize
//! around the whole load-validate-mutate-persist cycle. A database
//! backend would satisfy the same contract with row locks.
//!
//! # Example
//!
//! ```
//! use veilpay_store::{MemoryStore, Store};
//! use veilpay_core::{Payment, PaymentId, UserId, Money, Currency};
//! use std::collections::BTreeMap;
//!
//! let store = MemoryStore::new();
//! let payment = Payment::new(
//!     PaymentId::generate(),
//!     UserId::generate(),
//!     Money::new(1000, Currency::new("USD").unwrap()),
//!     "nowpayments",
//!     None,
//!     BTreeMap::new(),
//!     chrono::Utc::now(),
//! )
//! .unwrap();
//! store.put_payment(&payment).unwrap();
//!
//! let effects = store
//!     .update_payment(payment.id, |p| p.complete("np_1", None, chrono::Utc::now()))
//!     .unwrap();
//! assert!(!effects.is_empty());
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod error;
pub mod memory;

pub use error::{Result, StoreError};
pub use memory::MemoryStore;

use veilpay_core::{Money, Payment, PaymentId, Subscription, SubscriptionId, UserId};

/// The storage trait defining aggregate and balance operations.
///
/// Dyn-safe so handlers can hold it behind `Arc<dyn Store>` where the
/// per-id locked update helpers of a concrete backend are not needed.
pub trait Store: Send + Sync {
    // =========================================================================
    // Payment Operations
    // =========================================================================

    /// Insert or replace a payment aggregate.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend fails.
    fn put_payment(&self, payment: &Payment) -> Result<()>;

    /// Get a payment by id.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend fails.
    fn get_payment(&self, id: &PaymentId) -> Result<Option<Payment>>;

    /// List a user's payments in creation order.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend fails.
    fn list_payments_by_user(&self, user_id: &UserId) -> Result<Vec<Payment>>;

    // =========================================================================
    // Subscription Operations
    // =========================================================================

    /// Insert or replace a subscription aggregate.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend fails.
    fn put_subscription(&self, sub: &Subscription) -> Result<()>;

    /// Get a subscription by id.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend fails.
    fn get_subscription(&self, id: &SubscriptionId) -> Result<Option<Subscription>>;

    /// List a user's subscriptions in creation order.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend fails.
    fn list_subscriptions_by_user(&self, user_id: &UserId) -> Result<Vec<Subscription>>;

    // =========================================================================
    // Balance Ledger
    // =========================================================================

    /// Current balance for a user in one currency, minor units.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend fails.
    fn get_balance(&self, user_id: &UserId, currency: &str) -> Result<i64>;

    /// Credit a user's balance from a completed payment. Idempotent on
    /// the payment id: a replayed credit for the same payment is a
    /// no-op returning the current balance.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend fails.
    fn credit_balance(
        &self,
        user_id: &UserId,
        amount: &Money,
        source_payment: &PaymentId,
    ) -> Result<i64>;
}
