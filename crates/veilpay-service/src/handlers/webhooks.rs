//! Gateway webhook handlers.

use std::sync::Arc;

use axum::extract::State;
use axum::http::HeaderMap;
use axum::Json;
use serde::Serialize;

use crate::error::ApiError;
use crate::reconcile::{self, ReconcileOutcome};
use crate::state::AppState;

/// Webhook response.
#[derive(Debug, Serialize)]
pub struct WebhookResponse {
    /// Whether the callback was accepted.
    pub received: bool,
    /// What reconciliation did with it.
    pub outcome: &'static str,
}

/// Handle NowPayments IPN callbacks.
///
/// The raw body is taken as a string so the signature is verified over
/// exactly the bytes the provider signed. Unknown provider statuses are
/// acknowledged with 200 so the provider stops retrying; everything
/// actionable goes through reconciliation.
pub async fn nowpayments_webhook(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: String,
) -> Result<Json<WebhookResponse>, ApiError> {
    let signature = headers
        .get("x-nowpayments-sig")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ApiError::Unauthorized("missing x-nowpayments-sig header".to_string()))?;

    let outcome = reconcile::process_ipn(&state, "nowpayments", &body, signature)?;

    let outcome = match outcome {
        ReconcileOutcome::Applied { status } => {
            tracing::info!(status = %status, "NowPayments IPN applied");
            "applied"
        }
        ReconcileOutcome::AlreadyApplied => "already_applied",
        ReconcileOutcome::Skipped { reason } => {
            tracing::info!(reason = %reason, "NowPayments IPN skipped");
            "skipped"
        }
    };

    Ok(Json(WebhookResponse {
        received: true,
        outcome,
    }))
}
