//! Subscription handlers.

use std::collections::BTreeSet;
use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use veilpay_core::{
    Currency, DataLimit, Money, NewSubscription, PanelId, Subscription, SubscriptionId,
    SubscriptionType, UserId,
};
use veilpay_store::Store;

use crate::error::ApiError;
use crate::state::AppState;

/// Subscription representation returned by the API.
#[derive(Debug, Serialize)]
pub struct SubscriptionResponse {
    /// Subscription id.
    pub id: String,
    /// Owning user.
    pub user_id: String,
    /// VPN panel the subscription is provisioned on.
    pub panel_id: String,
    /// Plan tier.
    pub kind: SubscriptionType,
    /// Current status.
    pub status: String,
    /// Price in minor units.
    pub price_minor: i64,
    /// Currency code.
    pub currency: String,
    /// Validity window start.
    pub starts_at: String,
    /// Validity window end.
    pub expires_at: String,
    /// Data allowance.
    pub data_limit: DataLimit,
    /// Bytes consumed so far.
    pub consumed_bytes: u64,
    /// Remaining data allowance; absent means unlimited.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remaining_bytes: Option<u64>,
    /// Device cap, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_limit: Option<u32>,
    /// Grace deadline, while in the grace period.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub grace_period_ends: Option<String>,
    /// Why the subscription is in its current status.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_reason: Option<String>,
    /// Creation timestamp.
    pub created_at: String,
}

impl From<&Subscription> for SubscriptionResponse {
    fn from(sub: &Subscription) -> Self {
        Self {
            id: sub.id.to_string(),
            user_id: sub.user_id.to_string(),
            panel_id: sub.panel_id.to_string(),
            kind: sub.kind,
            status: sub.status.as_str().to_string(),
            price_minor: sub.price.minor_units,
            currency: sub.price.currency.to_string(),
            starts_at: sub.starts_at.to_rfc3339(),
            expires_at: sub.expires_at.to_rfc3339(),
            data_limit: sub.data_limit,
            consumed_bytes: sub.consumed_bytes(),
            remaining_bytes: sub.remaining_data(),
            device_limit: sub.device_limit,
            grace_period_ends: sub.grace_period_ends.map(|t| t.to_rfc3339()),
            status_reason: sub.status_reason.clone(),
            created_at: sub.created_at.to_rfc3339(),
        }
    }
}

/// Create subscription request.
#[derive(Debug, Deserialize)]
pub struct CreateSubscriptionRequest {
    /// Owning user.
    pub user_id: String,
    /// Target VPN panel.
    pub panel_id: String,
    /// Plan tier.
    pub kind: SubscriptionType,
    /// Price in minor units. Must be zero for free tiers.
    pub price_minor: i64,
    /// Currency code.
    pub currency: String,
    /// Validity window start; defaults to now.
    pub starts_at: Option<DateTime<Utc>>,
    /// Validity window end.
    pub expires_at: DateTime<Utc>,
    /// Data allowance; defaults to unlimited.
    pub data_limit: Option<DataLimit>,
    /// Device cap; defaults to the tier's maximum.
    pub device_limit: Option<u32>,
    /// Enabled feature flags.
    #[serde(default)]
    pub features: BTreeSet<String>,
}

fn parse_sub_id(id: &str) -> Result<SubscriptionId, ApiError> {
    id.parse()
        .map_err(|_| ApiError::BadRequest(format!("invalid subscription id: {id}")))
}

/// Create a pending subscription.
pub async fn create_subscription(
    State(state): State<Arc<AppState>>,
    Json(body): Json<CreateSubscriptionRequest>,
) -> Result<Json<SubscriptionResponse>, ApiError> {
    let user_id: UserId = body
        .user_id
        .parse()
        .map_err(|_| ApiError::BadRequest(format!("invalid user_id: {}", body.user_id)))?;
    let panel_id: PanelId = body
        .panel_id
        .parse()
        .map_err(|_| ApiError::BadRequest(format!("invalid panel_id: {}", body.panel_id)))?;
    let currency = Currency::new(&body.currency)?;

    let sub = state.subscriptions.create_subscription(NewSubscription {
        user_id,
        panel_id,
        kind: body.kind,
        price: Money::new(body.price_minor, currency),
        starts_at: body.starts_at.unwrap_or_else(Utc::now),
        expires_at: body.expires_at,
        data_limit: body.data_limit.unwrap_or(DataLimit::Unlimited),
        device_limit: body.device_limit,
        features: body.features,
    })?;
    state.store.put_subscription(&sub)?;

    tracing::info!(
        subscription_id = %sub.id,
        user_id = %user_id,
        kind = ?sub.kind,
        expires_at = %sub.expires_at,
        "Subscription created"
    );

    Ok(Json(SubscriptionResponse::from(&sub)))
}

/// Get a subscription by id.
pub async fn get_subscription(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<SubscriptionResponse>, ApiError> {
    let id = parse_sub_id(&id)?;
    let sub = state
        .store
        .get_subscription(&id)?
        .ok_or_else(|| ApiError::NotFound(format!("subscription: {id}")))?;

    Ok(Json(SubscriptionResponse::from(&sub)))
}

/// Query parameters for listing subscriptions.
#[derive(Debug, Deserialize)]
pub struct ListSubscriptionsQuery {
    /// The user whose subscriptions to list.
    pub user_id: String,
}

/// List a user's subscriptions in creation order.
pub async fn list_subscriptions(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListSubscriptionsQuery>,
) -> Result<Json<Vec<SubscriptionResponse>>, ApiError> {
    let user_id: UserId = query
        .user_id
        .parse()
        .map_err(|_| ApiError::BadRequest(format!("invalid user_id: {}", query.user_id)))?;

    let subs = state.store.list_subscriptions_by_user(&user_id)?;
    Ok(Json(subs.iter().map(SubscriptionResponse::from).collect()))
}

/// Activate a pending or suspended subscription.
pub async fn activate_subscription(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<SubscriptionResponse>, ApiError> {
    let id = parse_sub_id(&id)?;
    let (sub, effects) = state.store.update_subscription(id, |s| {
        let effects = state.subscriptions.activate_subscription(s)?;
        Ok((s.clone(), effects))
    })?;
    state.apply_effects(&effects)?;

    tracing::info!(subscription_id = %id, "Subscription activated");
    Ok(Json(SubscriptionResponse::from(&sub)))
}

/// Request body carrying a reason.
#[derive(Debug, Deserialize)]
pub struct ReasonRequest {
    /// Why the transition is performed.
    pub reason: String,
}

/// Suspend an active subscription.
pub async fn suspend_subscription(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(body): Json<ReasonRequest>,
) -> Result<Json<SubscriptionResponse>, ApiError> {
    let id = parse_sub_id(&id)?;
    let (sub, effects) = state.store.update_subscription(id, |s| {
        let effects = state.subscriptions.suspend_subscription(s, &body.reason)?;
        Ok((s.clone(), effects))
    })?;
    state.apply_effects(&effects)?;

    tracing::info!(subscription_id = %id, reason = %body.reason, "Subscription suspended");
    Ok(Json(SubscriptionResponse::from(&sub)))
}

/// Cancel a subscription.
pub async fn cancel_subscription(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(body): Json<ReasonRequest>,
) -> Result<Json<SubscriptionResponse>, ApiError> {
    let id = parse_sub_id(&id)?;
    let (sub, effects) = state.store.update_subscription(id, |s| {
        let effects = state.subscriptions.cancel_subscription(s, &body.reason)?;
        Ok((s.clone(), effects))
    })?;
    state.apply_effects(&effects)?;

    tracing::info!(subscription_id = %id, reason = %body.reason, "Subscription cancelled");
    Ok(Json(SubscriptionResponse::from(&sub)))
}

/// Renewal request.
#[derive(Debug, Deserialize)]
pub struct RenewSubscriptionRequest {
    /// New expiry; must be strictly after the current one.
    pub new_expires_at: DateTime<Utc>,
    /// New price in minor units, if the plan was repriced.
    pub renewal_price_minor: Option<i64>,
}

/// Renew an active or grace-period subscription.
pub async fn renew_subscription(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(body): Json<RenewSubscriptionRequest>,
) -> Result<Json<SubscriptionResponse>, ApiError> {
    let id = parse_sub_id(&id)?;
    let (sub, effects) = state.store.update_subscription(id, |s| {
        let renewal_price = body
            .renewal_price_minor
            .map(|minor| Money::new(minor, s.price.currency.clone()));
        let effects =
            state
                .subscriptions
                .renew_subscription(s, body.new_expires_at, renewal_price)?;
        Ok((s.clone(), effects))
    })?;
    state.apply_effects(&effects)?;

    tracing::info!(subscription_id = %id, new_expires_at = %body.new_expires_at, "Subscription renewed");
    Ok(Json(SubscriptionResponse::from(&sub)))
}

/// Grace period request.
#[derive(Debug, Deserialize)]
pub struct GracePeriodRequest {
    /// When the grace period ends; must be in the future.
    pub grace_ends: DateTime<Utc>,
}

/// Put an active subscription into its grace period.
pub async fn grace_subscription(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(body): Json<GracePeriodRequest>,
) -> Result<Json<SubscriptionResponse>, ApiError> {
    let id = parse_sub_id(&id)?;
    let (sub, effects) = state.store.update_subscription(id, |s| {
        let effects = state
            .subscriptions
            .put_in_grace_period(s, body.grace_ends)?;
        Ok((s.clone(), effects))
    })?;
    state.apply_effects(&effects)?;

    tracing::info!(subscription_id = %id, grace_ends = %body.grace_ends, "Subscription entered grace period");
    Ok(Json(SubscriptionResponse::from(&sub)))
}

/// Expire a subscription whose validity window or grace deadline has
/// passed. Invoked by the operator's expiry sweep.
pub async fn expire_subscription(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<SubscriptionResponse>, ApiError> {
    let id = parse_sub_id(&id)?;
    let (sub, effects) = state.store.update_subscription(id, |s| {
        let effects = state.subscriptions.expire_subscription(s)?;
        Ok((s.clone(), effects))
    })?;
    state.apply_effects(&effects)?;

    tracing::info!(subscription_id = %id, "Subscription expired");
    Ok(Json(SubscriptionResponse::from(&sub)))
}

/// Usage report.
#[derive(Debug, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum UsageReport {
    /// Transferred data.
    Bytes {
        /// Byte count.
        amount: u64,
    },
    /// Connected time.
    Minutes {
        /// Minute count.
        amount: u64,
    },
    /// One use of a named feature.
    Feature {
        /// Feature name.
        feature: String,
    },
}

/// Usage ingestion request.
#[derive(Debug, Deserialize)]
pub struct RecordUsageRequest {
    /// What was consumed.
    #[serde(flatten)]
    pub usage: UsageReport,
    /// Reporting system, e.g. a panel node name.
    pub source: String,
    /// Source-side record id, if the reporter has one.
    pub source_id: Option<String>,
    /// Free-form context.
    #[serde(default)]
    pub metadata: serde_json::Value,
}

/// Usage ingestion response.
#[derive(Debug, Serialize)]
pub struct RecordUsageResponse {
    /// Subscription after the report was applied.
    #[serde(flatten)]
    pub subscription: SubscriptionResponse,
    /// Whether this report pushed the subscription over its data limit
    /// and suspended it.
    pub suspended: bool,
}

/// Record a usage report against a subscription. A data report that
/// crosses the data limit suspends the subscription in the same update.
pub async fn record_usage(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(body): Json<RecordUsageRequest>,
) -> Result<Json<RecordUsageResponse>, ApiError> {
    let id = parse_sub_id(&id)?;
    let (sub, effects) = state.store.update_subscription(id, |s| {
        let effects = match &body.usage {
            UsageReport::Bytes { amount } => state.subscriptions.record_data_usage(
                s,
                *amount,
                &body.source,
                body.source_id.clone(),
                body.metadata.clone(),
            )?,
            UsageReport::Minutes { amount } => state.subscriptions.record_time_usage(
                s,
                *amount,
                &body.source,
                body.source_id.clone(),
                body.metadata.clone(),
            )?,
            UsageReport::Feature { feature } => state.subscriptions.record_feature_usage(
                s,
                &body.source,
                feature,
                body.metadata.clone(),
            )?,
        };
        Ok((s.clone(), effects))
    })?;
    state.apply_effects(&effects)?;

    let suspended = sub.status == veilpay_core::SubscriptionStatus::Suspended;
    if suspended {
        tracing::info!(subscription_id = %id, "Usage report crossed the data limit, subscription suspended");
    }

    Ok(Json(RecordUsageResponse {
        subscription: SubscriptionResponse::from(&sub),
        suspended,
    }))
}
