//! Router configuration.
//!
//! This module sets up the Axum router with all routes and middleware.

use std::sync::Arc;
use std::time::Duration;

use axum::routing::{get, post};
use axum::Router;
use tower::limit::ConcurrencyLimitLayer;
use tower_http::cors::{Any, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use crate::handlers::{health, payments, subscriptions, webhooks};
use crate::state::AppState;

/// Maximum concurrent requests for usage ingestion.
/// Panel nodes report in bursts; cap them without rejecting.
const USAGE_MAX_CONCURRENT_REQUESTS: usize = 100;

/// Maximum concurrent requests for general API endpoints.
const API_MAX_CONCURRENT_REQUESTS: usize = 50;

/// Create the service router with all routes and middleware.
///
/// # Routes
///
/// ## Public
/// - `GET /health` - Health check
///
/// ## Payments
/// - `POST /v1/payments` - Create a payment
/// - `GET /v1/payments/:id` - Get a payment
/// - `GET /v1/payments` - List a user's payments
/// - `POST /v1/payments/:id/cancel` - Cancel a pending payment
/// - `POST /v1/payments/:id/refund` - Refund a completed payment
/// - `POST /v1/payments/:id/expire` - Expire (sweep)
/// - `POST /v1/payments/:id/dispute` - Mark disputed
/// - `POST /v1/payments/:id/chargeback` - Record a chargeback
/// - `GET /v1/balance` - Get a user's balance
///
/// ## Subscriptions
/// - `POST /v1/subscriptions` - Create a subscription
/// - `GET /v1/subscriptions/:id` - Get a subscription
/// - `GET /v1/subscriptions` - List a user's subscriptions
/// - `POST /v1/subscriptions/:id/activate` - Activate
/// - `POST /v1/subscriptions/:id/suspend` - Suspend
/// - `POST /v1/subscriptions/:id/cancel` - Cancel
/// - `POST /v1/subscriptions/:id/renew` - Renew
/// - `POST /v1/subscriptions/:id/grace` - Enter grace period
/// - `POST /v1/subscriptions/:id/expire` - Expire (sweep)
/// - `POST /v1/subscriptions/:id/usage` - Record usage (rate-limited)
///
/// ## Webhooks (signature verification)
/// - `POST /webhooks/nowpayments` - NowPayments IPN
pub fn create_router(state: AppState) -> Router {
    let cors = build_cors_layer(&state.config.cors_origins);
    let max_body_bytes = state.config.max_body_bytes;
    let request_timeout_seconds = state.config.request_timeout_seconds;

    let state = Arc::new(state);

    // Usage ingestion gets its own, higher concurrency limit.
    let usage_routes = Router::new()
        .route("/", post(subscriptions::record_usage))
        .layer(ConcurrencyLimitLayer::new(USAGE_MAX_CONCURRENT_REQUESTS));

    let api_routes = Router::new()
        // Payments
        .route("/payments", post(payments::create_payment))
        .route("/payments", get(payments::list_payments))
        .route("/payments/:id", get(payments::get_payment))
        .route("/payments/:id/cancel", post(payments::cancel_payment))
        .route("/payments/:id/refund", post(payments::refund_payment))
        .route("/payments/:id/expire", post(payments::expire_payment))
        .route("/payments/:id/dispute", post(payments::dispute_payment))
        .route(
            "/payments/:id/chargeback",
            post(payments::chargeback_payment),
        )
        .route("/balance", get(payments::get_balance))
        // Subscriptions
        .route("/subscriptions", post(subscriptions::create_subscription))
        .route("/subscriptions", get(subscriptions::list_subscriptions))
        .route("/subscriptions/:id", get(subscriptions::get_subscription))
        .route(
            "/subscriptions/:id/activate",
            post(subscriptions::activate_subscription),
        )
        .route(
            "/subscriptions/:id/suspend",
            post(subscriptions::suspend_subscription),
        )
        .route(
            "/subscriptions/:id/cancel",
            post(subscriptions::cancel_subscription),
        )
        .route(
            "/subscriptions/:id/renew",
            post(subscriptions::renew_subscription),
        )
        .route(
            "/subscriptions/:id/grace",
            post(subscriptions::grace_subscription),
        )
        .route(
            "/subscriptions/:id/expire",
            post(subscriptions::expire_subscription),
        )
        .nest("/subscriptions/:id/usage", usage_routes)
        .layer(ConcurrencyLimitLayer::new(API_MAX_CONCURRENT_REQUESTS));

    Router::new()
        // Health (public, no rate limit)
        .route("/health", get(health::health))
        // API v1 routes (rate limited)
        .nest("/v1", api_routes)
        // Webhooks (no rate limit - retry cadence is the provider's)
        .route("/webhooks/nowpayments", post(webhooks::nowpayments_webhook))
        // Global middleware
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .layer(RequestBodyLimitLayer::new(max_body_bytes))
        .layer(TimeoutLayer::new(Duration::from_secs(
            request_timeout_seconds,
        )))
        .with_state(state)
}

/// Build the CORS layer from configured origins.
fn build_cors_layer(origins: &[String]) -> CorsLayer {
    if origins.iter().any(|o| o == "*") {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
    } else {
        let origins: Vec<_> = origins.iter().filter_map(|o| o.parse().ok()).collect();

        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods(Any)
            .allow_headers(Any)
    }
}
