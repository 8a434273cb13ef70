//! HTTP request handlers.

pub mod health;
pub mod payments;
pub mod subscriptions;
pub mod webhooks;
