//! Webhook reconciliation.
//!
//! Turns a verified gateway IPN callback into a payment state
//! transition. The whole load-transition-persist cycle runs under the
//! payment's own lock, so concurrent deliveries of the same callback
//! serialize; the transition itself is idempotent, so the loser of the
//! race observes a no-op. Balance credits commit together with the
//! aggregate write, so a crash after the update never strands a
//! completed payment without its credit. Notifications and panel
//! signals follow after the lock; a replayed transition emits no
//! effects, so they fire at most once per transition.

use veilpay_core::{Effect, PaymentStatus};

use crate::error::ApiError;
use crate::state::AppState;

/// What reconciling one IPN callback did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// The payment transitioned to a new status.
    Applied {
        /// The status after the transition.
        status: PaymentStatus,
    },
    /// A duplicate or stale callback; the payment was left alone.
    AlreadyApplied,
    /// The callback carried nothing actionable (unknown provider
    /// status, or a status with no local transition).
    Skipped {
        /// Why it was skipped, for the logs.
        reason: String,
    },
}

enum Action {
    Transitioned(PaymentStatus),
    Stale,
}

/// Verify an IPN callback and apply the resulting transition.
///
/// # Errors
///
/// `ApiError::Unauthorized` on signature failure, `ApiError::NotFound`
/// when the order id resolves to no payment, `ApiError::BadRequest` on
/// malformed payloads.
pub fn process_ipn(
    state: &AppState,
    gateway_name: &str,
    raw_body: &str,
    signature: &str,
) -> Result<ReconcileOutcome, ApiError> {
    let gateway = state.gateways.get(gateway_name)?;
    let event = gateway.verify_ipn(raw_body, signature)?;

    let payment_id = event
        .order_id
        .parse()
        .map_err(|_| ApiError::BadRequest(format!("unrecognized order id: {}", event.order_id)))?;

    let mapped = gateway.map_status(&event.provider_status);
    if mapped == PaymentStatus::Unknown {
        tracing::warn!(
            gateway = gateway_name,
            payment_id = %payment_id,
            provider_status = %event.provider_status,
            "Unknown provider status, skipping"
        );
        return Ok(ReconcileOutcome::Skipped {
            reason: format!("unknown provider status: {}", event.provider_status),
        });
    }
    if mapped == PaymentStatus::Pending {
        return Ok(ReconcileOutcome::Skipped {
            reason: "provider still waiting for funds".to_string(),
        });
    }

    let provider_payment_id = event.provider_payment_id.clone();
    let payload = event.payload.clone();
    let payments = &state.payments;

    let (action, effects) = state.store.update_payment_and_credit(payment_id, |p| {
        p.gateway_reference = Some(provider_payment_id.clone());

        match mapped {
            PaymentStatus::Processing => {
                // begin_processing is only legal from pending; anything
                // later means this delivery arrived out of order.
                if p.status != PaymentStatus::Pending {
                    return Ok((Action::Stale, Vec::new()));
                }
                let effects = payments.begin_processing(p)?;
                Ok((Action::Transitioned(p.status), effects))
            }
            PaymentStatus::Completed => {
                // paid_at survives refunds, so a redelivered `finished`
                // after a refund is recognized as stale rather than
                // rejected as an illegal transition.
                if p.paid_at.is_some() {
                    return Ok((Action::Stale, Vec::new()));
                }
                let effects =
                    payments.complete_payment(p, &provider_payment_id, Some(payload.clone()))?;
                Ok((Action::Transitioned(p.status), effects))
            }
            PaymentStatus::Failed => {
                if p.status.is_terminal() {
                    return Ok((Action::Stale, Vec::new()));
                }
                let effects =
                    payments.fail_payment(p, "gateway reported failure", Some(payload.clone()))?;
                Ok((Action::Transitioned(p.status), effects))
            }
            PaymentStatus::Expired => {
                if p.status == PaymentStatus::Pending {
                    let effects = payments.expire_payment(p)?;
                    Ok((Action::Transitioned(p.status), effects))
                } else {
                    Ok((Action::Stale, Vec::new()))
                }
            }
            PaymentStatus::Refunded => {
                if p.status.can_be_refunded() {
                    let remaining = p.amount.checked_sub(&p.refunded_total()?)?;
                    let effects = payments.refund_payment(
                        p,
                        remaining,
                        "gateway reported refund",
                        Some(provider_payment_id.clone()),
                    )?;
                    Ok((Action::Transitioned(p.status), effects))
                } else {
                    Ok((Action::Stale, Vec::new()))
                }
            }
            // Pending and Unknown returned early above; the remaining
            // statuses never come out of a gateway status map.
            _ => Ok((Action::Stale, Vec::new())),
        }
    })?;

    match action {
        Action::Transitioned(status) => {
            // Credits already committed with the aggregate; only the
            // notification and panel effects remain.
            let followups: Vec<Effect> = effects
                .into_iter()
                .filter(|e| !matches!(e, Effect::CreditBalance { .. }))
                .collect();
            state.apply_effects(&followups)?;
            tracing::info!(
                gateway = gateway_name,
                payment_id = %payment_id,
                status = %status,
                "Payment reconciled from IPN"
            );
            Ok(ReconcileOutcome::Applied { status })
        }
        Action::Stale => {
            tracing::debug!(
                gateway = gateway_name,
                payment_id = %payment_id,
                provider_status = %event.provider_status,
                "Stale or duplicate IPN, nothing to apply"
            );
            Ok(ReconcileOutcome::AlreadyApplied)
        }
    }
}
