//! Core domain types for veilpay.
//!
//! This crate holds the payment and subscription engine of the veilpay
//! platform, free of any I/O:
//!
//! - **Money**: exact fixed-point amounts with a currency tag and an
//!   injected precision table
//! - **Identifiers**: `UserId`, `PaymentId`, `SubscriptionId`, plus
//!   ULID-based child-record ids
//! - **Payment**: aggregate root owning append-only `Transaction`
//!   records, with the payment status state machine
//! - **Subscription**: aggregate root owning append-only `Usage`
//!   records, with the subscription status state machine and data/device
//!   limits
//! - **Services**: `PaymentService` / `SubscriptionService`, the
//!   stateless rule layer that is the only mutation entry point
//! - **Effects**: the side effects a mutating call asks the caller to
//!   apply alongside persistence
//!
//! # Amount representation
//!
//! Amounts are integer minor units (`i64`) tagged with a currency; how
//! many minor units make a major unit comes from a [`CurrencyTable`]
//! built once at startup. No floating point touches money.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod clock;
pub mod effect;
pub mod error;
pub mod ids;
pub mod money;
pub mod payment;
pub mod service;
pub mod subscription;

pub use clock::{Clock, FixedClock, SystemClock};
pub use effect::{Effect, NotifyEvent};
pub use error::{PayError, Result};
pub use ids::{IdError, PanelId, PaymentId, SubscriptionId, TxId, UsageId, UserId};
pub use money::{Currency, CurrencyTable, Money};
pub use payment::{Payment, PaymentStatus, Transaction, TransactionKind, TransactionStatus};
pub use service::{
    FeeSchedule, PaymentPolicy, PaymentService, SubscriptionService,
    DEFAULT_PENDING_WINDOW_MINUTES,
};
pub use subscription::{
    DataLimit, NewSubscription, Subscription, SubscriptionStatus, SubscriptionType, Usage,
    UsageKind, MAX_DURATION_DAYS, MIN_DURATION_DAYS,
};
