//! Veilpay HTTP API Service.
//!
//! This crate provides the HTTP API for the veilpay engine, including:
//!
//! - Payment creation, cancellation, and refunds
//! - User balance reads
//! - Subscription lifecycle and usage ingestion
//! - NowPayments IPN webhooks
//!
//! The Telegram bot and the panel workers are separate processes that
//! talk to this API; the service itself holds the domain rules and the
//! ledger.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
// Allow some pedantic lints that are noisy for Axum handler functions
#![allow(clippy::missing_errors_doc)] // Axum handlers all return Result
#![allow(clippy::unused_async)] // Some handlers need async for consistency

pub mod config;
pub mod crypto;
pub mod error;
pub mod gateway;
pub mod handlers;
pub mod notify;
pub mod reconcile;
pub mod routes;
pub mod state;

pub use config::ServiceConfig;
pub use error::ApiError;
pub use gateway::{GatewayRegistry, NowPaymentsGateway, PaymentGateway};
pub use notify::{Notifier, TracingNotifier};
pub use reconcile::ReconcileOutcome;
pub use routes::create_router;
pub use state::AppState;
