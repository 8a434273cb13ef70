//! Subscription API tests.

mod common;

use axum::http::StatusCode;
use chrono::{Duration, Utc};
use serde_json::json;

use veilpay_core::{PanelId, SubscriptionStatus, UserId};
use veilpay_store::Store;

use common::harness;

const GIB_2: u64 = 2 * 1024 * 1024 * 1024;
const GIB_5: u64 = 5 * 1024 * 1024 * 1024;

async fn create_premium(
    h: &common::TestHarness,
    user_id: UserId,
    data_limit: serde_json::Value,
) -> serde_json::Value {
    let response = h
        .server
        .post("/v1/subscriptions")
        .json(&json!({
            "user_id": user_id.to_string(),
            "panel_id": PanelId::generate().to_string(),
            "kind": "premium",
            "price_minor": 999,
            "currency": "USD",
            "expires_at": Utc::now() + Duration::days(30),
            "data_limit": data_limit,
            "device_limit": 5,
        }))
        .await;
    response.assert_status_ok();
    response.json()
}

#[tokio::test]
async fn create_and_activate_subscription() {
    let h = harness();
    let user_id = UserId::generate();
    let sub = create_premium(&h, user_id, json!({ "bytes": GIB_5 })).await;

    assert_eq!(sub["status"], "pending");
    assert_eq!(sub["kind"], "premium");
    assert_eq!(sub["remaining_bytes"], GIB_5);

    let id = sub["id"].as_str().unwrap();
    let response = h
        .server
        .post(&format!("/v1/subscriptions/{id}/activate"))
        .await;
    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    assert_eq!(body["status"], "active");
}

#[tokio::test]
async fn free_tier_rejects_nonzero_price() {
    let h = harness();
    let response = h
        .server
        .post("/v1/subscriptions")
        .json(&json!({
            "user_id": UserId::generate().to_string(),
            "panel_id": PanelId::generate().to_string(),
            "kind": "trial",
            "price_minor": 500,
            "currency": "USD",
            "expires_at": Utc::now() + Duration::days(7),
        }))
        .await;
    response.assert_status_bad_request();
}

#[tokio::test]
async fn data_usage_over_limit_suspends_subscription() {
    let h = harness();
    let user_id = UserId::generate();
    let sub = create_premium(&h, user_id, json!({ "bytes": GIB_5 })).await;
    let id = sub["id"].as_str().unwrap().to_string();

    h.server
        .post(&format!("/v1/subscriptions/{id}/activate"))
        .await
        .assert_status_ok();

    // Two 2 GiB reports stay under the 5 GiB cap.
    for _ in 0..2 {
        let response = h
            .server
            .post(&format!("/v1/subscriptions/{id}/usage"))
            .json(&json!({
                "kind": "bytes",
                "amount": GIB_2,
                "source": "panel-node-1",
            }))
            .await;
        response.assert_status_ok();
        let body: serde_json::Value = response.json();
        assert_eq!(body["suspended"], false);
        assert_eq!(body["status"], "active");
    }

    // The third crosses the cap and suspends in the same update.
    let response = h
        .server
        .post(&format!("/v1/subscriptions/{id}/usage"))
        .json(&json!({
            "kind": "bytes",
            "amount": GIB_2,
            "source": "panel-node-1",
        }))
        .await;
    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    assert_eq!(body["suspended"], true);
    assert_eq!(body["status"], "suspended");
    assert_eq!(body["consumed_bytes"], 3 * GIB_2);
    assert_eq!(body["remaining_bytes"], 0);

    // A suspended subscription rejects further usage.
    let response = h
        .server
        .post(&format!("/v1/subscriptions/{id}/usage"))
        .json(&json!({
            "kind": "bytes",
            "amount": 1,
            "source": "panel-node-1",
        }))
        .await;
    response.assert_status(StatusCode::CONFLICT);

    // Reinstating from suspension is allowed.
    let response = h
        .server
        .post(&format!("/v1/subscriptions/{id}/activate"))
        .await;
    response.assert_status_ok();
}

#[tokio::test]
async fn renewal_must_extend_past_current_expiry() {
    let h = harness();
    let user_id = UserId::generate();
    let sub = create_premium(&h, user_id, json!("unlimited")).await;
    let id = sub["id"].as_str().unwrap().to_string();

    h.server
        .post(&format!("/v1/subscriptions/{id}/activate"))
        .await
        .assert_status_ok();

    // Renewing to a date inside the current window is rejected.
    let response = h
        .server
        .post(&format!("/v1/subscriptions/{id}/renew"))
        .json(&json!({ "new_expires_at": Utc::now() + Duration::days(10) }))
        .await;
    response.assert_status_bad_request();

    let response = h
        .server
        .post(&format!("/v1/subscriptions/{id}/renew"))
        .json(&json!({
            "new_expires_at": Utc::now() + Duration::days(60),
            "renewal_price_minor": 899,
        }))
        .await;
    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    assert_eq!(body["status"], "active");
    assert_eq!(body["price_minor"], 899);
}

#[tokio::test]
async fn grace_period_then_expiry() {
    let h = harness();
    let user_id = UserId::generate();
    let sub = create_premium(&h, user_id, json!("unlimited")).await;
    let id = sub["id"].as_str().unwrap().to_string();

    h.server
        .post(&format!("/v1/subscriptions/{id}/activate"))
        .await
        .assert_status_ok();

    let response = h
        .server
        .post(&format!("/v1/subscriptions/{id}/grace"))
        .json(&json!({ "grace_ends": Utc::now() + Duration::days(3) }))
        .await;
    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    assert_eq!(body["status"], "grace_period");
    assert!(body["grace_period_ends"].is_string());

    let response = h
        .server
        .post(&format!("/v1/subscriptions/{id}/expire"))
        .await;
    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    assert_eq!(body["status"], "expired");

    // Expired subscriptions are terminal.
    let response = h
        .server
        .post(&format!("/v1/subscriptions/{id}/activate"))
        .await;
    response.assert_status(StatusCode::CONFLICT);
}

#[tokio::test]
async fn minutes_and_feature_usage_accumulate() {
    let h = harness();
    let user_id = UserId::generate();
    let sub = create_premium(&h, user_id, json!("unlimited")).await;
    let id = sub["id"].as_str().unwrap().to_string();
    let sub_id = id.parse().unwrap();

    h.server
        .post(&format!("/v1/subscriptions/{id}/activate"))
        .await
        .assert_status_ok();

    h.server
        .post(&format!("/v1/subscriptions/{id}/usage"))
        .json(&json!({
            "kind": "minutes",
            "amount": 45,
            "source": "panel-node-2",
        }))
        .await
        .assert_status_ok();

    h.server
        .post(&format!("/v1/subscriptions/{id}/usage"))
        .json(&json!({
            "kind": "feature",
            "feature": "port_forwarding",
            "source": "panel-node-2",
        }))
        .await
        .assert_status_ok();

    let stored = h.store.get_subscription(&sub_id).unwrap().unwrap();
    assert_eq!(stored.consumed_minutes(), 45);
    assert_eq!(stored.usages.len(), 2);
    assert_eq!(stored.status, SubscriptionStatus::Active);
}

#[tokio::test]
async fn list_subscriptions_by_user() {
    let h = harness();
    let user_id = UserId::generate();
    create_premium(&h, user_id, json!("unlimited")).await;
    create_premium(&h, user_id, json!({ "bytes": GIB_5 })).await;

    let response = h
        .server
        .get("/v1/subscriptions")
        .add_query_param("user_id", user_id.to_string())
        .await;
    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    assert_eq!(body.as_array().unwrap().len(), 2);
}
