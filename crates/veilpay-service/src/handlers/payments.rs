//! Payment handlers.

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};

use veilpay_core::{Currency, Money, PayError, Payment, PaymentId, PaymentStatus, UserId};
use veilpay_store::Store;

use crate::error::ApiError;
use crate::gateway::CreateGatewayPayment;
use crate::state::AppState;

/// Payment representation returned by the API.
#[derive(Debug, Serialize)]
pub struct PaymentResponse {
    /// Payment id, which doubles as the gateway order id.
    pub id: String,
    /// Owning user.
    pub user_id: String,
    /// Amount in minor units.
    pub amount_minor: i64,
    /// Amount as a decimal string.
    pub amount: String,
    /// Currency code.
    pub currency: String,
    /// Gateway name.
    pub gateway: String,
    /// Current status.
    pub status: String,
    /// Hosted checkout URL, when the gateway returned one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payment_url: Option<String>,
    /// Provider-side payment id.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gateway_reference: Option<String>,
    /// Checkout description.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Failure reason, if failed, cancelled, or expired.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
    /// When the payment settled.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub paid_at: Option<String>,
    /// Creation timestamp.
    pub created_at: String,
    /// Last update timestamp.
    pub updated_at: String,
}

impl PaymentResponse {
    fn from_payment(payment: &Payment, state: &AppState) -> Result<Self, ApiError> {
        let amount = payment.amount.to_major_string(&state.currencies)?;
        let payment_url = payment
            .metadata
            .get("payment_url")
            .and_then(|v| v.as_str())
            .map(String::from);

        Ok(Self {
            id: payment.id.to_string(),
            user_id: payment.user_id.to_string(),
            amount_minor: payment.amount.minor_units,
            amount,
            currency: payment.amount.currency.to_string(),
            gateway: payment.gateway.clone(),
            status: payment.status.as_str().to_string(),
            payment_url,
            gateway_reference: payment.gateway_reference.clone(),
            description: payment.description.clone(),
            failure_reason: payment.failure_reason.clone(),
            paid_at: payment.paid_at.map(|t| t.to_rfc3339()),
            created_at: payment.created_at.to_rfc3339(),
            updated_at: payment.updated_at.to_rfc3339(),
        })
    }
}

/// Create payment request.
#[derive(Debug, Deserialize)]
pub struct CreatePaymentRequest {
    /// Owning user.
    pub user_id: String,
    /// Amount in minor units of `currency`.
    pub amount_minor: i64,
    /// Currency code.
    pub currency: String,
    /// Gateway name; must be allow-listed.
    pub gateway: String,
    /// Crypto currency the customer pays in, if different.
    pub pay_currency: Option<String>,
    /// Checkout description.
    pub description: Option<String>,
}

/// Create a payment: persist it locally first, then register it at the
/// gateway. A gateway failure marks the local payment failed instead of
/// leaving it orphaned at the provider.
pub async fn create_payment(
    State(state): State<Arc<AppState>>,
    Json(body): Json<CreatePaymentRequest>,
) -> Result<Json<PaymentResponse>, ApiError> {
    let user_id: UserId = body
        .user_id
        .parse()
        .map_err(|_| ApiError::BadRequest(format!("invalid user_id: {}", body.user_id)))?;
    let currency = Currency::new(&body.currency)?;
    let amount = Money::new(body.amount_minor, currency);

    let gateway = state.gateways.get(&body.gateway)?;

    let payment = state.payments.create_payment(
        user_id,
        amount.clone(),
        &body.gateway,
        body.description.clone(),
        BTreeMap::new(),
    )?;
    state.store.put_payment(&payment)?;

    tracing::info!(
        payment_id = %payment.id,
        user_id = %user_id,
        amount = amount.minor_units,
        currency = %amount.currency,
        gateway = %body.gateway,
        "Payment created, registering at gateway"
    );

    let request = CreateGatewayPayment {
        order_id: payment.id.to_string(),
        amount_decimal: amount.to_major_string(&state.currencies)?,
        amount,
        pay_currency: body.pay_currency,
        description: body.description,
        ipn_callback_url: state.config.ipn_callback_url.clone(),
        success_url: state.config.success_url.clone(),
        cancel_url: state.config.cancel_url.clone(),
    };

    match gateway.create_payment(&request).await {
        Ok(created) => {
            let updated = state.store.update_payment(payment.id, |p| {
                p.gateway_reference = Some(created.provider_payment_id.clone());
                if let Some(url) = &created.payment_url {
                    p.set_metadata("payment_url", serde_json::Value::String(url.clone()));
                }
                if let Some(address) = &created.pay_address {
                    p.set_metadata("pay_address", serde_json::Value::String(address.clone()));
                }
                Ok(p.clone())
            })?;
            Ok(Json(PaymentResponse::from_payment(&updated, &state)?))
        }
        Err(e) => {
            tracing::warn!(payment_id = %payment.id, error = %e, "Gateway rejected payment creation");
            let effects = state
                .store
                .update_payment(payment.id, |p| {
                    state.payments.fail_payment(p, &e.to_string(), None)
                })?;
            state.apply_effects(&effects)?;
            Err(e.into())
        }
    }
}

/// Get a payment by id.
pub async fn get_payment(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<PaymentResponse>, ApiError> {
    let id: PaymentId = id
        .parse()
        .map_err(|_| ApiError::BadRequest(format!("invalid payment id: {id}")))?;
    let payment = state
        .store
        .get_payment(&id)?
        .ok_or_else(|| ApiError::NotFound(format!("payment: {id}")))?;

    Ok(Json(PaymentResponse::from_payment(&payment, &state)?))
}

/// Query parameters for listing payments.
#[derive(Debug, Deserialize)]
pub struct ListPaymentsQuery {
    /// The user whose payments to list.
    pub user_id: String,
}

/// List a user's payments in creation order.
pub async fn list_payments(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListPaymentsQuery>,
) -> Result<Json<Vec<PaymentResponse>>, ApiError> {
    let user_id: UserId = query
        .user_id
        .parse()
        .map_err(|_| ApiError::BadRequest(format!("invalid user_id: {}", query.user_id)))?;

    let payments = state.store.list_payments_by_user(&user_id)?;
    let responses = payments
        .iter()
        .map(|p| PaymentResponse::from_payment(p, &state))
        .collect::<Result<Vec<_>, _>>()?;

    Ok(Json(responses))
}

/// Cancel request body.
#[derive(Debug, Deserialize, Default)]
pub struct CancelPaymentRequest {
    /// Why the payment is cancelled.
    pub reason: Option<String>,
}

/// Cancel a pending payment.
pub async fn cancel_payment(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    body: Option<Json<CancelPaymentRequest>>,
) -> Result<Json<PaymentResponse>, ApiError> {
    let id: PaymentId = id
        .parse()
        .map_err(|_| ApiError::BadRequest(format!("invalid payment id: {id}")))?;
    let reason = body
        .and_then(|Json(b)| b.reason)
        .unwrap_or_else(|| "cancelled by user".to_string());

    let (payment, effects) = state.store.update_payment(id, |p| {
        let effects = state.payments.cancel_payment(p, &reason)?;
        Ok((p.clone(), effects))
    })?;
    state.apply_effects(&effects)?;

    tracing::info!(payment_id = %id, reason = %reason, "Payment cancelled");
    Ok(Json(PaymentResponse::from_payment(&payment, &state)?))
}

/// Refund request body.
#[derive(Debug, Deserialize)]
pub struct RefundPaymentRequest {
    /// Amount to refund, minor units. Omit for a full refund of the
    /// remaining refundable amount.
    pub amount_minor: Option<i64>,
    /// Why the refund is issued.
    pub reason: String,
}

/// Refund a completed payment, fully or partially.
///
/// The refund is a local ledger operation; the operator settles the
/// funds with the customer out of band, since crypto gateways have no
/// refund API.
pub async fn refund_payment(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(body): Json<RefundPaymentRequest>,
) -> Result<Json<PaymentResponse>, ApiError> {
    let id: PaymentId = id
        .parse()
        .map_err(|_| ApiError::BadRequest(format!("invalid payment id: {id}")))?;

    let (payment, effects) = state.store.update_payment(id, |p| {
        let refund_amount = match body.amount_minor {
            Some(minor) => Money::new(minor, p.amount.currency.clone()),
            None => p.amount.checked_sub(&p.refunded_total()?)?,
        };
        let effects = state
            .payments
            .refund_payment(p, refund_amount, &body.reason, None)?;
        Ok((p.clone(), effects))
    })?;
    state.apply_effects(&effects)?;

    tracing::info!(payment_id = %id, reason = %body.reason, "Payment refunded");
    Ok(Json(PaymentResponse::from_payment(&payment, &state)?))
}

/// Expire a pending payment whose window has elapsed.
///
/// Invoked by the operator's expiry sweep alongside the subscription
/// sweep. Rejected while the window is still open, so a mistimed sweep
/// cannot kill a payment the customer is still paying.
pub async fn expire_payment(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<PaymentResponse>, ApiError> {
    let id: PaymentId = id
        .parse()
        .map_err(|_| ApiError::BadRequest(format!("invalid payment id: {id}")))?;

    let (payment, effects) = state.store.update_payment(id, |p| {
        if p.status == PaymentStatus::Pending && !state.payments.is_payment_expired(p) {
            return Err(PayError::validation("pending window has not elapsed"));
        }
        let effects = state.payments.expire_payment(p)?;
        Ok((p.clone(), effects))
    })?;
    state.apply_effects(&effects)?;

    tracing::info!(payment_id = %id, "Payment expired by sweep");
    Ok(Json(PaymentResponse::from_payment(&payment, &state)?))
}

/// Dispute request body.
#[derive(Debug, Deserialize)]
pub struct DisputePaymentRequest {
    /// Why the payment is contested.
    pub reason: String,
}

/// Mark a settled payment as under dispute.
pub async fn dispute_payment(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(body): Json<DisputePaymentRequest>,
) -> Result<Json<PaymentResponse>, ApiError> {
    let id: PaymentId = id
        .parse()
        .map_err(|_| ApiError::BadRequest(format!("invalid payment id: {id}")))?;

    let (payment, effects) = state.store.update_payment(id, |p| {
        let effects = state.payments.dispute_payment(p, &body.reason)?;
        Ok((p.clone(), effects))
    })?;
    state.apply_effects(&effects)?;

    tracing::warn!(payment_id = %id, reason = %body.reason, "Payment disputed");
    Ok(Json(PaymentResponse::from_payment(&payment, &state)?))
}

/// Chargeback request body.
#[derive(Debug, Deserialize)]
pub struct ChargebackPaymentRequest {
    /// The provider's ruling or case reference.
    pub reason: String,
    /// Provider-side id of the reversal, if known.
    pub provider_transaction_id: Option<String>,
}

/// Record a provider-confirmed chargeback.
///
/// The reversal lands as a transaction on the payment; recovering the
/// credited balance from the user is an operator follow-up.
pub async fn chargeback_payment(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(body): Json<ChargebackPaymentRequest>,
) -> Result<Json<PaymentResponse>, ApiError> {
    let id: PaymentId = id
        .parse()
        .map_err(|_| ApiError::BadRequest(format!("invalid payment id: {id}")))?;

    let (payment, effects) = state.store.update_payment(id, |p| {
        let effects = state.payments.chargeback_payment(
            p,
            &body.reason,
            body.provider_transaction_id.clone(),
        )?;
        Ok((p.clone(), effects))
    })?;
    state.apply_effects(&effects)?;

    tracing::warn!(payment_id = %id, reason = %body.reason, "Chargeback recorded");
    Ok(Json(PaymentResponse::from_payment(&payment, &state)?))
}

/// Query parameters for a balance read.
#[derive(Debug, Deserialize)]
pub struct BalanceQuery {
    /// The user whose balance to read.
    pub user_id: String,
    /// Currency code.
    pub currency: String,
}

/// Balance response.
#[derive(Debug, Serialize)]
pub struct BalanceResponse {
    /// The user.
    pub user_id: String,
    /// Currency code.
    pub currency: String,
    /// Balance in minor units.
    pub balance_minor: i64,
}

/// Get a user's balance in one currency.
pub async fn get_balance(
    State(state): State<Arc<AppState>>,
    Query(query): Query<BalanceQuery>,
) -> Result<Json<BalanceResponse>, ApiError> {
    let user_id: UserId = query
        .user_id
        .parse()
        .map_err(|_| ApiError::BadRequest(format!("invalid user_id: {}", query.user_id)))?;

    let balance_minor = state.store.get_balance(&user_id, &query.currency)?;
    Ok(Json(BalanceResponse {
        user_id: query.user_id,
        currency: query.currency,
        balance_minor,
    }))
}
