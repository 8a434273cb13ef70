//! In-memory aggregate store with per-aggregate locking.
//!
//! Each aggregate id owns its own mutex, taken for the whole
//! load-validate-mutate-persist cycle of [`MemoryStore::update_payment`]
//! and [`MemoryStore::update_subscription`]. Concurrent webhooks for
//! the same payment therefore serialize, which is what makes the
//! aggregate-level idempotency safe. Updates run on a copy and write
//! back only on success, so a rejected transition never leaves a
//! partial write behind. Balance credits emitted by a payment
//! transition commit together with the aggregate via
//! [`MemoryStore::update_payment_and_credit`].

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use veilpay_core::{Effect, Money, Payment, PaymentId, Subscription, SubscriptionId, UserId};

use crate::error::{Result, StoreError};
use crate::Store;

type BalanceKey = (UserId, String);

#[derive(Default)]
struct Inner {
    payments: HashMap<PaymentId, Payment>,
    subscriptions: HashMap<SubscriptionId, Subscription>,
    /// (user, currency code) -> balance in minor units.
    balances: HashMap<BalanceKey, i64>,
    /// Payments whose completion already credited a balance.
    credited_payments: HashSet<PaymentId>,
}

/// Per-id lock registry. Locks are created lazily and never removed;
/// the set of aggregates a process touches is bounded by its traffic.
struct LockRegistry<K> {
    locks: Mutex<HashMap<K, Arc<Mutex<()>>>>,
}

// Derived Default would bound `K: Default`, which id newtypes do not
// (and should not) implement.
impl<K> Default for LockRegistry<K> {
    fn default() -> Self {
        Self {
            locks: Mutex::new(HashMap::new()),
        }
    }
}

impl<K: std::hash::Hash + Eq + Clone> LockRegistry<K> {
    fn lock_for(&self, key: &K) -> Result<Arc<Mutex<()>>> {
        let mut locks = self.locks.lock().map_err(|_| StoreError::Poisoned)?;
        Ok(Arc::clone(
            locks.entry(key.clone()).or_insert_with(Arc::default),
        ))
    }
}

/// The in-memory store.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
    payment_locks: LockRegistry<PaymentId>,
    subscription_locks: LockRegistry<SubscriptionId>,
}

impl MemoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn inner(&self) -> Result<MutexGuard<'_, Inner>> {
        self.inner.lock().map_err(|_| StoreError::Poisoned)
    }

    /// Run a closure against a payment under that payment's own lock.
    ///
    /// The closure gets a copy; the copy replaces the stored aggregate
    /// only when the closure returns `Ok`, so domain-rule rejections
    /// leave the store untouched.
    ///
    /// # Errors
    ///
    /// `StoreError::NotFound` when the payment does not exist;
    /// `StoreError::Domain` when the closure rejects the update.
    pub fn update_payment<T>(
        &self,
        id: PaymentId,
        f: impl FnOnce(&mut Payment) -> veilpay_core::Result<T>,
    ) -> Result<T> {
        let lock = self.payment_locks.lock_for(&id)?;
        let _guard = lock.lock().map_err(|_| StoreError::Poisoned)?;

        let mut payment = self
            .inner()?
            .payments
            .get(&id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound {
                entity: "payment",
                id: id.to_string(),
            })?;

        let out = f(&mut payment)?;
        self.inner()?.payments.insert(id, payment);
        Ok(out)
    }

    /// Like [`Self::update_payment`], but commits any balance credits
    /// the transition emits in the same write as the aggregate.
    ///
    /// A credit that cannot land aborts the write-back, so the stored
    /// payment stays in its prior state and a provider redelivery
    /// repeats the whole transition instead of finding it already
    /// persisted with the money missing.
    ///
    /// # Errors
    ///
    /// `StoreError::NotFound` when the payment does not exist;
    /// `StoreError::Domain` when the closure rejects the update.
    pub fn update_payment_and_credit<T>(
        &self,
        id: PaymentId,
        f: impl FnOnce(&mut Payment) -> veilpay_core::Result<(T, Vec<Effect>)>,
    ) -> Result<(T, Vec<Effect>)> {
        let lock = self.payment_locks.lock_for(&id)?;
        let _guard = lock.lock().map_err(|_| StoreError::Poisoned)?;

        let mut payment = self
            .inner()?
            .payments
            .get(&id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound {
                entity: "payment",
                id: id.to_string(),
            })?;

        let (out, effects) = f(&mut payment)?;

        let mut inner = self.inner()?;
        for effect in &effects {
            if let Effect::CreditBalance {
                user_id,
                amount,
                source_payment,
            } = effect
            {
                let new_balance = Self::credit(&mut inner, user_id, amount, source_payment);
                tracing::info!(
                    user_id = %user_id,
                    payment_id = %source_payment,
                    amount = %amount,
                    new_balance,
                    "Balance credited"
                );
            }
        }
        inner.payments.insert(id, payment);
        Ok((out, effects))
    }

    fn credit(
        inner: &mut Inner,
        user_id: &UserId,
        amount: &Money,
        source_payment: &PaymentId,
    ) -> i64 {
        let key = (*user_id, amount.currency.to_string());
        if !inner.credited_payments.insert(*source_payment) {
            tracing::debug!(
                payment_id = %source_payment,
                "balance already credited for payment, skipping"
            );
            return inner.balances.get(&key).copied().unwrap_or(0);
        }
        let balance = inner.balances.entry(key).or_insert(0);
        *balance += amount.minor_units;
        *balance
    }

    /// Run a closure against a subscription under that subscription's
    /// own lock. Same copy-in/copy-out contract as
    /// [`Self::update_payment`].
    ///
    /// # Errors
    ///
    /// `StoreError::NotFound` when the subscription does not exist;
    /// `StoreError::Domain` when the closure rejects the update.
    pub fn update_subscription<T>(
        &self,
        id: SubscriptionId,
        f: impl FnOnce(&mut Subscription) -> veilpay_core::Result<T>,
    ) -> Result<T> {
        let lock = self.subscription_locks.lock_for(&id)?;
        let _guard = lock.lock().map_err(|_| StoreError::Poisoned)?;

        let mut sub = self
            .inner()?
            .subscriptions
            .get(&id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound {
                entity: "subscription",
                id: id.to_string(),
            })?;

        let out = f(&mut sub)?;
        self.inner()?.subscriptions.insert(id, sub);
        Ok(out)
    }
}

impl Store for MemoryStore {
    fn put_payment(&self, payment: &Payment) -> Result<()> {
        self.inner()?.payments.insert(payment.id, payment.clone());
        Ok(())
    }

    fn get_payment(&self, id: &PaymentId) -> Result<Option<Payment>> {
        Ok(self.inner()?.payments.get(id).cloned())
    }

    fn list_payments_by_user(&self, user_id: &UserId) -> Result<Vec<Payment>> {
        let mut payments: Vec<_> = self
            .inner()?
            .payments
            .values()
            .filter(|p| p.user_id == *user_id)
            .cloned()
            .collect();
        payments.sort_by_key(|p| p.created_at);
        Ok(payments)
    }

    fn put_subscription(&self, sub: &Subscription) -> Result<()> {
        self.inner()?.subscriptions.insert(sub.id, sub.clone());
        Ok(())
    }

    fn get_subscription(&self, id: &SubscriptionId) -> Result<Option<Subscription>> {
        Ok(self.inner()?.subscriptions.get(id).cloned())
    }

    fn list_subscriptions_by_user(&self, user_id: &UserId) -> Result<Vec<Subscription>> {
        let mut subs: Vec<_> = self
            .inner()?
            .subscriptions
            .values()
            .filter(|s| s.user_id == *user_id)
            .cloned()
            .collect();
        subs.sort_by_key(|s| s.created_at);
        Ok(subs)
    }

    fn get_balance(&self, user_id: &UserId, currency: &str) -> Result<i64> {
        Ok(self
            .inner()?
            .balances
            .get(&(*user_id, currency.to_string()))
            .copied()
            .unwrap_or(0))
    }

    fn credit_balance(
        &self,
        user_id: &UserId,
        amount: &Money,
        source_payment: &PaymentId,
    ) -> Result<i64> {
        let mut inner = self.inner()?;
        Ok(Self::credit(&mut inner, user_id, amount, source_payment))
    }
}
