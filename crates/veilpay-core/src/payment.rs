//! Payment aggregate: status state machine, transaction children,
//! and the transition methods that guard them.
//!
//! A `Payment` owns its ordered list of `Transaction` records. The list
//! is append-only; records transition `pending -> completed | failed`
//! exactly once and are never removed. Status transitions go through
//! the methods here, which validate against the transition table and
//! return the effects the caller must apply alongside persistence.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::effect::{Effect, NotifyEvent};
use crate::error::{PayError, Result};
use crate::ids::{PaymentId, TxId, UserId};
use crate::money::Money;

/// Payment lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    /// Created locally, gateway not yet settled.
    Pending,
    /// The gateway reports the payment is in flight (confirming, sending).
    Processing,
    /// Settled successfully.
    Completed,
    /// The gateway reported failure.
    Failed,
    /// Cancelled before reaching the gateway.
    Cancelled,
    /// Fully refunded after completion.
    Refunded,
    /// Partially refunded after completion.
    PartiallyRefunded,
    /// Under dispute with the provider.
    Disputed,
    /// Reversed by a chargeback.
    Chargeback,
    /// The pending window elapsed without settlement.
    Expired,
    /// Sentinel for provider statuses we cannot map. Never a stored
    /// status; reconciliation logs and skips it.
    Unknown,
}

impl PaymentStatus {
    /// Wire name of the status.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
            Self::Refunded => "refunded",
            Self::PartiallyRefunded => "partially_refunded",
            Self::Disputed => "disputed",
            Self::Chargeback => "chargeback",
            Self::Expired => "expired",
            Self::Unknown => "unknown",
        }
    }

    /// Whether the payment may still be completed.
    #[must_use]
    pub const fn can_be_completed(self) -> bool {
        matches!(self, Self::Pending | Self::Processing)
    }

    /// Whether the payment may still be failed.
    #[must_use]
    pub const fn can_be_failed(self) -> bool {
        matches!(self, Self::Pending | Self::Processing)
    }

    /// Whether the payment may be cancelled by the user.
    #[must_use]
    pub const fn can_be_cancelled(self) -> bool {
        matches!(self, Self::Pending)
    }

    /// Whether refunds may be issued against the payment.
    #[must_use]
    pub const fn can_be_refunded(self) -> bool {
        matches!(self, Self::Completed | Self::PartiallyRefunded)
    }

    /// Whether the pending window may expire the payment.
    #[must_use]
    pub const fn can_be_expired(self) -> bool {
        matches!(self, Self::Pending)
    }

    /// Whether the payment may be marked disputed. Only settled money
    /// can be contested.
    #[must_use]
    pub const fn can_be_disputed(self) -> bool {
        matches!(self, Self::Completed | Self::PartiallyRefunded)
    }

    /// Whether a chargeback may be recorded against the payment.
    #[must_use]
    pub const fn can_be_charged_back(self) -> bool {
        matches!(self, Self::Completed | Self::PartiallyRefunded | Self::Disputed)
    }

    /// Whether the status field accepts no further transitions.
    ///
    /// Transactions may still append (partial refunds) but the status
    /// itself is settled for audit.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Completed
                | Self::Failed
                | Self::Cancelled
                | Self::Refunded
                | Self::Expired
                | Self::Chargeback
        )
    }

    /// Whether the payment already sits in a failure-equivalent end
    /// state, making a `fail` call a safe no-op.
    #[must_use]
    pub const fn is_final_failure(self) -> bool {
        matches!(self, Self::Failed | Self::Cancelled | Self::Expired)
    }
}

impl std::fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind of a transaction record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionKind {
    /// The original charge.
    Charge,
    /// A full refund.
    Refund,
    /// A partial refund.
    PartialRefund,
    /// A provider-initiated chargeback.
    Chargeback,
}

/// Settlement status of a transaction record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    /// Awaiting settlement.
    Pending,
    /// Settled.
    Completed,
    /// Did not settle.
    Failed,
}

/// A child record of a payment. Append-only; transitions
/// `pending -> completed | failed` once and is then immutable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    /// Record id; ULID, so ids sort in insertion order.
    pub id: TxId,
    /// Owning payment.
    pub payment_id: PaymentId,
    /// What this record represents.
    pub kind: TransactionKind,
    /// Amount moved by this record.
    pub amount: Money,
    /// Settlement status.
    pub status: TransactionStatus,
    /// Gateway-side transaction id, once known.
    pub gateway_transaction_id: Option<String>,
    /// Raw provider response retained for audit.
    pub gateway_response: Option<serde_json::Value>,
    /// When the record settled or failed.
    pub processed_at: Option<DateTime<Utc>>,
    /// When the record was appended.
    pub created_at: DateTime<Utc>,
}

/// The payment aggregate root.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Payment {
    /// Aggregate id; doubles as the gateway-facing order id.
    pub id: PaymentId,
    /// The paying user (weak reference, lookup only).
    pub user_id: UserId,
    /// The charged amount.
    pub amount: Money,
    /// Gateway name from the configured allow-list.
    pub gateway: String,
    /// Current lifecycle status.
    pub status: PaymentStatus,
    /// Provider payment id, once the gateway has acknowledged.
    pub gateway_transaction_id: Option<String>,
    /// Provider-side reference (payment URL, address, ...).
    pub gateway_reference: Option<String>,
    /// Human-readable description shown at checkout.
    pub description: Option<String>,
    /// Free-form metadata; keys are unique, last write wins.
    pub metadata: BTreeMap<String, serde_json::Value>,
    /// Set exactly once, on entering `completed`.
    pub paid_at: Option<DateTime<Utc>>,
    /// Set exactly once, on entering a failure state.
    pub failed_at: Option<DateTime<Utc>>,
    /// Why the payment failed or was cancelled.
    pub failure_reason: Option<String>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last mutation time.
    pub updated_at: DateTime<Utc>,
    /// Ordered, append-only child records.
    pub transactions: Vec<Transaction>,
}

impl Payment {
    /// Create a new pending payment with its initial charge record.
    ///
    /// # Errors
    ///
    /// Returns `PayError::Validation` when the amount is not strictly
    /// positive. Gateway allow-list and amount-bound checks live in the
    /// domain service.
    pub fn new(
        id: PaymentId,
        user_id: UserId,
        amount: Money,
        gateway: impl Into<String>,
        description: Option<String>,
        metadata: BTreeMap<String, serde_json::Value>,
        now: DateTime<Utc>,
    ) -> Result<Self> {
        if !amount.is_positive() {
            return Err(PayError::validation("payment amount must be positive"));
        }
        let charge = Transaction {
            id: TxId::generate(),
            payment_id: id,
            kind: TransactionKind::Charge,
            amount: amount.clone(),
            status: TransactionStatus::Pending,
            gateway_transaction_id: None,
            gateway_response: None,
            processed_at: None,
            created_at: now,
        };
        Ok(Self {
            id,
            user_id,
            amount,
            gateway: gateway.into(),
            status: PaymentStatus::Pending,
            gateway_transaction_id: None,
            gateway_reference: None,
            description,
            metadata,
            paid_at: None,
            failed_at: None,
            failure_reason: None,
            created_at: now,
            updated_at: now,
            transactions: vec![charge],
        })
    }

    fn invalid(&self, attempted: &'static str) -> PayError {
        PayError::InvalidTransition {
            entity: "payment",
            current: self.status.as_str().to_string(),
            attempted,
        }
    }

    /// Record a metadata entry; an existing key is overwritten.
    pub fn set_metadata(&mut self, key: impl Into<String>, value: serde_json::Value) {
        self.metadata.insert(key.into(), value);
    }

    /// Move the payment to `processing` when the gateway reports the
    /// charge is in flight. No-op if already processing.
    ///
    /// # Errors
    ///
    /// `PayError::InvalidTransition` unless the payment is pending.
    pub fn begin_processing(&mut self, now: DateTime<Utc>) -> Result<Vec<Effect>> {
        if self.status == PaymentStatus::Processing {
            return Ok(Vec::new());
        }
        if self.status != PaymentStatus::Pending {
            return Err(self.invalid("begin_processing"));
        }
        self.status = PaymentStatus::Processing;
        self.updated_at = now;
        Ok(Vec::new())
    }

    /// Complete the payment. Idempotent: completing an already
    /// completed payment is a no-op returning no effects, so the
    /// balance credit happens exactly once.
    ///
    /// # Errors
    ///
    /// `PayError::InvalidTransition` unless pending or processing.
    pub fn complete(
        &mut self,
        gateway_transaction_id: impl Into<String>,
        gateway_response: Option<serde_json::Value>,
        now: DateTime<Utc>,
    ) -> Result<Vec<Effect>> {
        if self.status == PaymentStatus::Completed {
            return Ok(Vec::new());
        }
        if !self.status.can_be_completed() {
            return Err(self.invalid("complete"));
        }

        self.status = PaymentStatus::Completed;
        self.paid_at = Some(now);
        self.updated_at = now;
        let gateway_transaction_id = gateway_transaction_id.into();
        self.gateway_transaction_id = Some(gateway_transaction_id.clone());

        if let Some(charge) = self.pending_charge_mut() {
            charge.status = TransactionStatus::Completed;
            charge.gateway_transaction_id = Some(gateway_transaction_id);
            charge.gateway_response = gateway_response;
            charge.processed_at = Some(now);
        }

        Ok(vec![
            Effect::CreditBalance {
                user_id: self.user_id,
                amount: self.amount.clone(),
                source_payment: self.id,
            },
            Effect::Notify {
                user_id: self.user_id,
                event: NotifyEvent::PaymentCompleted {
                    payment_id: self.id,
                },
            },
        ])
    }

    /// Fail the payment. No-op when already in a final failure state.
    ///
    /// # Errors
    ///
    /// `PayError::InvalidTransition` unless pending or processing.
    pub fn fail(
        &mut self,
        reason: impl Into<String>,
        gateway_response: Option<serde_json::Value>,
        now: DateTime<Utc>,
    ) -> Result<Vec<Effect>> {
        if self.status.is_final_failure() {
            return Ok(Vec::new());
        }
        if !self.status.can_be_failed() {
            return Err(self.invalid("fail"));
        }

        let reason = reason.into();
        self.status = PaymentStatus::Failed;
        self.failed_at = Some(now);
        self.failure_reason = Some(reason.clone());
        self.updated_at = now;

        if let Some(charge) = self.pending_charge_mut() {
            charge.status = TransactionStatus::Failed;
            charge.gateway_response = gateway_response;
            charge.processed_at = Some(now);
        }

        Ok(vec![Effect::Notify {
            user_id: self.user_id,
            event: NotifyEvent::PaymentFailed {
                payment_id: self.id,
                reason,
            },
        }])
    }

    /// Cancel the payment before it reached the gateway.
    ///
    /// # Errors
    ///
    /// `PayError::InvalidTransition` unless pending.
    pub fn cancel(&mut self, reason: impl Into<String>, now: DateTime<Utc>) -> Result<Vec<Effect>> {
        if !self.status.can_be_cancelled() {
            return Err(self.invalid("cancel"));
        }
        self.status = PaymentStatus::Cancelled;
        self.failed_at = Some(now);
        self.failure_reason = Some(reason.into());
        self.updated_at = now;

        if let Some(charge) = self.pending_charge_mut() {
            charge.status = TransactionStatus::Failed;
            charge.processed_at = Some(now);
        }
        Ok(Vec::new())
    }

    /// Expire a payment whose pending window elapsed.
    ///
    /// # Errors
    ///
    /// `PayError::InvalidTransition` unless pending.
    pub fn expire(&mut self, now: DateTime<Utc>) -> Result<Vec<Effect>> {
        if self.status == PaymentStatus::Expired {
            return Ok(Vec::new());
        }
        if !self.status.can_be_expired() {
            return Err(self.invalid("expire"));
        }
        self.status = PaymentStatus::Expired;
        self.failed_at = Some(now);
        self.failure_reason = Some("payment window expired".to_string());
        self.updated_at = now;

        if let Some(charge) = self.pending_charge_mut() {
            charge.status = TransactionStatus::Failed;
            charge.processed_at = Some(now);
        }
        Ok(Vec::new())
    }

    /// Issue a refund against a completed payment.
    ///
    /// A refund equal to the remaining refundable amount settles the
    /// status at `refunded`; anything smaller leaves it
    /// `partially_refunded`. Cumulative refunds never exceed the
    /// original amount.
    ///
    /// # Errors
    ///
    /// `PayError::Validation` when the amount is non-positive or would
    /// overdraw the payment, `PayError::CurrencyMismatch` across
    /// currencies, `PayError::InvalidTransition` from any state other
    /// than completed or partially refunded.
    pub fn refund(
        &mut self,
        refund_amount: Money,
        reason: impl Into<String>,
        refund_transaction_id: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<Vec<Effect>> {
        if !self.status.can_be_refunded() {
            return Err(self.invalid("refund"));
        }
        if !refund_amount.is_positive() {
            return Err(PayError::validation("refund amount must be positive"));
        }
        let refunded = self.refunded_total()?;
        let after = refunded.checked_add(&refund_amount)?;
        if after.checked_cmp(&self.amount)? == std::cmp::Ordering::Greater {
            return Err(PayError::validation(format!(
                "refund exceeds payment amount: {} refundable, {} requested",
                self.amount.checked_sub(&refunded)?.minor_units,
                refund_amount.minor_units
            )));
        }

        let full = after == self.amount;
        let kind = if full {
            TransactionKind::Refund
        } else {
            TransactionKind::PartialRefund
        };
        self.transactions.push(Transaction {
            id: TxId::generate(),
            payment_id: self.id,
            kind,
            amount: refund_amount,
            status: TransactionStatus::Completed,
            gateway_transaction_id: refund_transaction_id,
            gateway_response: None,
            processed_at: Some(now),
            created_at: now,
        });
        self.status = if full {
            PaymentStatus::Refunded
        } else {
            PaymentStatus::PartiallyRefunded
        };
        self.failure_reason = Some(reason.into());
        self.updated_at = now;

        Ok(vec![Effect::Notify {
            user_id: self.user_id,
            event: NotifyEvent::PaymentRefunded {
                payment_id: self.id,
            },
        }])
    }

    /// Mark the payment disputed while the provider investigates.
    /// No-op when already disputed.
    ///
    /// # Errors
    ///
    /// `PayError::InvalidTransition` unless completed or partially
    /// refunded.
    pub fn mark_disputed(
        &mut self,
        reason: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Result<Vec<Effect>> {
        if self.status == PaymentStatus::Disputed {
            return Ok(Vec::new());
        }
        if !self.status.can_be_disputed() {
            return Err(self.invalid("dispute"));
        }
        self.status = PaymentStatus::Disputed;
        self.failure_reason = Some(reason.into());
        self.updated_at = now;
        Ok(Vec::new())
    }

    /// Record a provider-confirmed chargeback: the full charge is
    /// reversed and the payment settles at `chargeback`, terminal.
    ///
    /// The reversal is recorded as a child transaction; clawing the
    /// amount back out of the user's balance is an operator action, not
    /// an automatic effect.
    ///
    /// # Errors
    ///
    /// `PayError::InvalidTransition` unless completed, partially
    /// refunded, or disputed.
    pub fn chargeback(
        &mut self,
        reason: impl Into<String>,
        gateway_transaction_id: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<Vec<Effect>> {
        if !self.status.can_be_charged_back() {
            return Err(self.invalid("chargeback"));
        }
        self.transactions.push(Transaction {
            id: TxId::generate(),
            payment_id: self.id,
            kind: TransactionKind::Chargeback,
            amount: self.amount.clone(),
            status: TransactionStatus::Completed,
            gateway_transaction_id,
            gateway_response: None,
            processed_at: Some(now),
            created_at: now,
        });
        self.status = PaymentStatus::Chargeback;
        self.failure_reason = Some(reason.into());
        self.updated_at = now;
        Ok(Vec::new())
    }

    /// Sum of settled refund transactions, in the payment currency.
    ///
    /// # Errors
    ///
    /// `PayError::CurrencyMismatch` if a stored refund record carries a
    /// different currency, which would indicate corrupted data.
    pub fn refunded_total(&self) -> Result<Money> {
        let mut total = Money::zero(self.amount.currency.clone());
        for tx in &self.transactions {
            if matches!(
                tx.kind,
                TransactionKind::Refund | TransactionKind::PartialRefund
            ) && tx.status == TransactionStatus::Completed
            {
                total = total.checked_add(&tx.amount)?;
            }
        }
        Ok(total)
    }

    fn pending_charge_mut(&mut self) -> Option<&mut Transaction> {
        self.transactions.iter_mut().find(|t| {
            t.kind == TransactionKind::Charge && t.status == TransactionStatus::Pending
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::money::Currency;

    fn usd(minor: i64) -> Money {
        Money::new(minor, Currency::new("USD").unwrap())
    }

    fn payment(amount: i64) -> Payment {
        Payment::new(
            PaymentId::generate(),
            UserId::generate(),
            usd(amount),
            "nowpayments",
            Some("1 month premium".into()),
            BTreeMap::new(),
            Utc::now(),
        )
        .unwrap()
    }

    #[test]
    fn new_payment_is_pending_with_charge_record() {
        let p = payment(1000);
        assert_eq!(p.status, PaymentStatus::Pending);
        assert_eq!(p.transactions.len(), 1);
        assert_eq!(p.transactions[0].kind, TransactionKind::Charge);
        assert_eq!(p.transactions[0].status, TransactionStatus::Pending);
        assert!(p.paid_at.is_none());
    }

    #[test]
    fn zero_amount_rejected() {
        let err = Payment::new(
            PaymentId::generate(),
            UserId::generate(),
            usd(0),
            "nowpayments",
            None,
            BTreeMap::new(),
            Utc::now(),
        )
        .unwrap_err();
        assert!(matches!(err, PayError::Validation(_)));
    }

    #[test]
    fn complete_from_pending_sets_paid_at_and_credits_once() {
        let mut p = payment(1000);
        let now = Utc::now();
        let effects = p.complete("np_1", None, now).unwrap();

        assert_eq!(p.status, PaymentStatus::Completed);
        assert_eq!(p.paid_at, Some(now));
        assert_eq!(p.transactions[0].status, TransactionStatus::Completed);
        assert!(matches!(effects[0], Effect::CreditBalance { .. }));

        // Replaying the completion is a no-op with no effects.
        let replay = p.complete("np_1", None, Utc::now()).unwrap();
        assert!(replay.is_empty());
        assert_eq!(p.paid_at, Some(now));
    }

    #[test]
    fn complete_from_processing_is_legal() {
        let mut p = payment(1000);
        p.begin_processing(Utc::now()).unwrap();
        assert_eq!(p.status, PaymentStatus::Processing);
        p.complete("np_1", None, Utc::now()).unwrap();
        assert_eq!(p.status, PaymentStatus::Completed);
    }

    #[test]
    fn illegal_transitions_leave_payment_unchanged() {
        let mut p = payment(1000);
        p.complete("np_1", None, Utc::now()).unwrap();
        let before = p.clone();

        assert!(p.cancel("changed my mind", Utc::now()).is_err());
        assert!(p.expire(Utc::now()).is_err());
        assert!(p.begin_processing(Utc::now()).is_err());
        assert_eq!(p, before);
    }

    #[test]
    fn fail_after_final_failure_is_noop() {
        let mut p = payment(1000);
        let first = Utc::now();
        p.fail("card declined", None, first).unwrap();
        assert_eq!(p.status, PaymentStatus::Failed);
        assert_eq!(p.failed_at, Some(first));

        let effects = p.fail("second report", None, Utc::now()).unwrap();
        assert!(effects.is_empty());
        assert_eq!(p.failure_reason.as_deref(), Some("card declined"));
        assert_eq!(p.failed_at, Some(first));
    }

    #[test]
    fn cancel_only_from_pending() {
        let mut p = payment(1000);
        p.begin_processing(Utc::now()).unwrap();
        assert!(matches!(
            p.cancel("late", Utc::now()),
            Err(PayError::InvalidTransition { .. })
        ));
    }

    #[test]
    fn full_refund_moves_to_refunded() {
        let mut p = payment(1000);
        p.complete("np_1", None, Utc::now()).unwrap();
        p.refund(usd(1000), "requested", None, Utc::now()).unwrap();

        assert_eq!(p.status, PaymentStatus::Refunded);
        assert_eq!(p.refunded_total().unwrap(), usd(1000));
        assert_eq!(p.transactions.last().unwrap().kind, TransactionKind::Refund);
    }

    #[test]
    fn partial_refunds_accumulate_to_refunded() {
        let mut p = payment(1000);
        p.complete("np_1", None, Utc::now()).unwrap();

        p.refund(usd(300), "partial", None, Utc::now()).unwrap();
        assert_eq!(p.status, PaymentStatus::PartiallyRefunded);
        assert_eq!(
            p.transactions.last().unwrap().kind,
            TransactionKind::PartialRefund
        );

        p.refund(usd(700), "rest", None, Utc::now()).unwrap();
        assert_eq!(p.status, PaymentStatus::Refunded);
        assert_eq!(p.refunded_total().unwrap(), usd(1000));
    }

    #[test]
    fn refund_over_amount_rejected() {
        let mut p = payment(1000);
        p.complete("np_1", None, Utc::now()).unwrap();
        let before = p.clone();

        let err = p.refund(usd(1001), "too much", None, Utc::now()).unwrap_err();
        assert!(matches!(err, PayError::Validation(_)));
        assert_eq!(p, before);

        // Overdraw across multiple refunds is also rejected.
        p.refund(usd(900), "most", None, Utc::now()).unwrap();
        assert!(p.refund(usd(200), "overdraw", None, Utc::now()).is_err());
        assert_eq!(p.refunded_total().unwrap(), usd(900));
    }

    #[test]
    fn refund_before_completion_rejected() {
        let mut p = payment(1000);
        assert!(matches!(
            p.refund(usd(100), "early", None, Utc::now()),
            Err(PayError::InvalidTransition { .. })
        ));
    }

    #[test]
    fn refund_currency_mismatch_rejected() {
        let mut p = payment(1000);
        p.complete("np_1", None, Utc::now()).unwrap();
        let btc = Money::new(100, Currency::new("BTC").unwrap());
        assert!(matches!(
            p.refund(btc, "wrong currency", None, Utc::now()),
            Err(PayError::CurrencyMismatch { .. })
        ));
    }

    #[test]
    fn dispute_then_chargeback_settles_terminal() {
        let mut p = payment(1000);
        p.complete("np_1", None, Utc::now()).unwrap();

        p.mark_disputed("customer claims non-delivery", Utc::now())
            .unwrap();
        assert_eq!(p.status, PaymentStatus::Disputed);
        // A second dispute report is a no-op.
        assert!(p.mark_disputed("again", Utc::now()).unwrap().is_empty());

        p.chargeback("provider ruled for customer", Some("cb_1".into()), Utc::now())
            .unwrap();
        assert_eq!(p.status, PaymentStatus::Chargeback);
        assert!(p.status.is_terminal());
        let reversal = p.transactions.last().unwrap();
        assert_eq!(reversal.kind, TransactionKind::Chargeback);
        assert_eq!(reversal.amount, usd(1000));

        // Nothing moves after a chargeback.
        assert!(p.refund(usd(100), "late", None, Utc::now()).is_err());
        assert!(p.chargeback("twice", None, Utc::now()).is_err());
    }

    #[test]
    fn chargeback_requires_settled_payment() {
        let mut p = payment(1000);
        assert!(matches!(
            p.mark_disputed("early", Utc::now()),
            Err(PayError::InvalidTransition { .. })
        ));
        assert!(matches!(
            p.chargeback("early", None, Utc::now()),
            Err(PayError::InvalidTransition { .. })
        ));

        // A partially refunded payment can still be charged back in
        // full; providers reverse the original charge, not the net.
        p.complete("np_1", None, Utc::now()).unwrap();
        p.refund(usd(300), "partial", None, Utc::now()).unwrap();
        p.chargeback("contested", None, Utc::now()).unwrap();
        assert_eq!(p.status, PaymentStatus::Chargeback);
        assert_eq!(p.transactions.last().unwrap().amount, usd(1000));
    }

    #[test]
    fn expire_only_from_pending() {
        let mut p = payment(1000);
        p.expire(Utc::now()).unwrap();
        assert_eq!(p.status, PaymentStatus::Expired);

        let mut q = payment(1000);
        q.begin_processing(Utc::now()).unwrap();
        assert!(q.expire(Utc::now()).is_err());
    }

    #[test]
    fn metadata_last_write_wins() {
        let mut p = payment(1000);
        p.set_metadata("plan", serde_json::json!("basic"));
        p.set_metadata("plan", serde_json::json!("premium"));
        assert_eq!(p.metadata["plan"], serde_json::json!("premium"));
        assert_eq!(p.metadata.len(), 1);
    }
}
