//! Payment API tests against a mocked NowPayments server.

mod common;

use serde_json::json;

use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use veilpay_core::{PaymentId, PaymentStatus, UserId};
use veilpay_store::Store;

use common::{harness, harness_with_base_url, API_KEY};

async fn mock_nowpayments_create(mock: &MockServer, response: ResponseTemplate) {
    Mock::given(method("POST"))
        .and(path("/v1/payment"))
        .and(header("x-api-key", API_KEY))
        .respond_with(response)
        .mount(mock)
        .await;
}

#[tokio::test]
async fn create_payment_registers_at_gateway() {
    let mock = MockServer::start().await;
    mock_nowpayments_create(
        &mock,
        ResponseTemplate::new(200).set_body_json(json!({
            "payment_id": 4_945_313,
            "payment_status": "waiting",
            "pay_address": "TTestDepositAddress",
            "invoice_url": "https://nowpayments.io/payment/?iid=123",
        })),
    )
    .await;

    let h = harness_with_base_url(&mock.uri());
    let user_id = UserId::generate();

    let response = h
        .server
        .post("/v1/payments")
        .json(&json!({
            "user_id": user_id.to_string(),
            "amount_minor": 1000,
            "currency": "USD",
            "gateway": "nowpayments",
            "pay_currency": "usdttrc20",
            "description": "Premium 30 days",
        }))
        .await;
    response.assert_status_ok();

    let body: serde_json::Value = response.json();
    assert_eq!(body["status"], "pending");
    assert_eq!(body["amount_minor"], 1000);
    assert_eq!(body["amount"], "10.00");
    assert_eq!(body["gateway_reference"], "4945313");
    assert_eq!(body["payment_url"], "https://nowpayments.io/payment/?iid=123");

    // The stored aggregate carries the provider handle too.
    let id: PaymentId = body["id"].as_str().unwrap().parse().unwrap();
    let stored = h.store.get_payment(&id).unwrap().unwrap();
    assert_eq!(stored.gateway_reference.as_deref(), Some("4945313"));
    assert_eq!(
        stored.metadata.get("pay_address").and_then(|v| v.as_str()),
        Some("TTestDepositAddress")
    );
}

#[tokio::test]
async fn gateway_rejection_marks_payment_failed() {
    let mock = MockServer::start().await;
    mock_nowpayments_create(
        &mock,
        ResponseTemplate::new(500).set_body_json(json!({
            "message": "ESTIMATED_AMOUNT_ERROR",
        })),
    )
    .await;

    let h = harness_with_base_url(&mock.uri());
    let user_id = UserId::generate();

    let response = h
        .server
        .post("/v1/payments")
        .json(&json!({
            "user_id": user_id.to_string(),
            "amount_minor": 1000,
            "currency": "USD",
            "gateway": "nowpayments",
        }))
        .await;
    response.assert_status(axum::http::StatusCode::BAD_GATEWAY);

    // The local payment exists and is failed, not orphaned pending.
    let payments = h.store.list_payments_by_user(&user_id).unwrap();
    assert_eq!(payments.len(), 1);
    assert_eq!(payments[0].status, PaymentStatus::Failed);
    assert!(payments[0]
        .failure_reason
        .as_deref()
        .is_some_and(|r| r.contains("ESTIMATED_AMOUNT_ERROR")));
}

#[tokio::test]
async fn create_payment_rejects_unlisted_gateway() {
    let h = harness();
    let response = h
        .server
        .post("/v1/payments")
        .json(&json!({
            "user_id": UserId::generate().to_string(),
            "amount_minor": 1000,
            "currency": "USD",
            "gateway": "paypal",
        }))
        .await;
    response.assert_status_bad_request();
}

#[tokio::test]
async fn create_payment_enforces_amount_bounds() {
    let h = harness();
    let response = h
        .server
        .post("/v1/payments")
        .json(&json!({
            "user_id": UserId::generate().to_string(),
            "amount_minor": 99,
            "currency": "USD",
            "gateway": "nowpayments",
        }))
        .await;
    response.assert_status_bad_request();

    let body: serde_json::Value = response.json();
    assert_eq!(body["error"]["code"], "bad_request");
}

#[tokio::test]
async fn cancel_pending_payment() {
    let h = harness();
    let payment = common::seed_pending_payment(&h.store, UserId::generate());

    let response = h
        .server
        .post(&format!("/v1/payments/{}/cancel", payment.id))
        .json(&json!({ "reason": "user backed out" }))
        .await;
    response.assert_status_ok();

    let body: serde_json::Value = response.json();
    assert_eq!(body["status"], "cancelled");
    assert_eq!(body["failure_reason"], "user backed out");

    // Cancelling again conflicts.
    let response = h
        .server
        .post(&format!("/v1/payments/{}/cancel", payment.id))
        .json(&json!({ "reason": "again" }))
        .await;
    response.assert_status(axum::http::StatusCode::CONFLICT);
}

#[tokio::test]
async fn refund_completed_payment_partially_then_fully() {
    let h = harness();
    let user_id = UserId::generate();
    let payment = common::seed_pending_payment(&h.store, user_id);
    h.store
        .update_payment(payment.id, |p| p.complete("np_1", None, chrono::Utc::now()))
        .unwrap();

    let response = h
        .server
        .post(&format!("/v1/payments/{}/refund", payment.id))
        .json(&json!({ "amount_minor": 400, "reason": "partial goodwill" }))
        .await;
    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    assert_eq!(body["status"], "partially_refunded");

    // Omitting the amount refunds the remainder.
    let response = h
        .server
        .post(&format!("/v1/payments/{}/refund", payment.id))
        .json(&json!({ "reason": "full refund" }))
        .await;
    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    assert_eq!(body["status"], "refunded");

    // Overdrawing is rejected.
    let response = h
        .server
        .post(&format!("/v1/payments/{}/refund", payment.id))
        .json(&json!({ "amount_minor": 1, "reason": "too much" }))
        .await;
    response.assert_status(axum::http::StatusCode::CONFLICT);
}

#[tokio::test]
async fn expiry_sweep_expires_stale_pending_payment() {
    let h = harness();
    let payment = common::seed_pending_payment(&h.store, UserId::generate());

    // Inside the pending window the sweep is rejected.
    let response = h
        .server
        .post(&format!("/v1/payments/{}/expire", payment.id))
        .await;
    response.assert_status_bad_request();

    h.clock.advance(chrono::Duration::minutes(31));
    let response = h
        .server
        .post(&format!("/v1/payments/{}/expire", payment.id))
        .await;
    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    assert_eq!(body["status"], "expired");

    // A settled payment never expires, no matter how old.
    let paid = common::seed_pending_payment(&h.store, UserId::generate());
    h.store
        .update_payment(paid.id, |p| p.complete("np_1", None, chrono::Utc::now()))
        .unwrap();
    h.clock.advance(chrono::Duration::hours(24));
    let response = h
        .server
        .post(&format!("/v1/payments/{}/expire", paid.id))
        .await;
    response.assert_status(axum::http::StatusCode::CONFLICT);
}

#[tokio::test]
async fn dispute_then_chargeback_flow() {
    let h = harness();
    let payment = common::seed_pending_payment(&h.store, UserId::generate());
    h.store
        .update_payment(payment.id, |p| p.complete("np_1", None, chrono::Utc::now()))
        .unwrap();

    let response = h
        .server
        .post(&format!("/v1/payments/{}/dispute", payment.id))
        .json(&json!({ "reason": "customer claims non-delivery" }))
        .await;
    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    assert_eq!(body["status"], "disputed");

    let response = h
        .server
        .post(&format!("/v1/payments/{}/chargeback", payment.id))
        .json(&json!({
            "reason": "provider ruled for customer",
            "provider_transaction_id": "cb_1",
        }))
        .await;
    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    assert_eq!(body["status"], "chargeback");

    // No refunds against a charged-back payment.
    let response = h
        .server
        .post(&format!("/v1/payments/{}/refund", payment.id))
        .json(&json!({ "amount_minor": 100, "reason": "late" }))
        .await;
    response.assert_status(axum::http::StatusCode::CONFLICT);

    // Disputing an unsettled payment conflicts.
    let pending = common::seed_pending_payment(&h.store, UserId::generate());
    let response = h
        .server
        .post(&format!("/v1/payments/{}/dispute", pending.id))
        .json(&json!({ "reason": "too early" }))
        .await;
    response.assert_status(axum::http::StatusCode::CONFLICT);
}

#[tokio::test]
async fn list_payments_and_balance() {
    let h = harness();
    let user_id = UserId::generate();
    let first = common::seed_pending_payment(&h.store, user_id);
    let second = common::seed_pending_payment(&h.store, user_id);

    h.store
        .update_payment(first.id, |p| p.complete("np_1", None, chrono::Utc::now()))
        .unwrap();
    h.store
        .credit_balance(&user_id, &first.amount, &first.id)
        .unwrap();

    let response = h
        .server
        .get("/v1/payments")
        .add_query_param("user_id", user_id.to_string())
        .await;
    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    assert_eq!(body.as_array().unwrap().len(), 2);

    let response = h
        .server
        .get("/v1/balance")
        .add_query_param("user_id", user_id.to_string())
        .add_query_param("currency", "USD")
        .await;
    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    assert_eq!(body["balance_minor"], 1000);

    let _ = second;
}

#[tokio::test]
async fn get_unknown_payment_is_not_found() {
    let h = harness();
    let response = h
        .server
        .get(&format!("/v1/payments/{}", PaymentId::generate()))
        .await;
    response.assert_status_not_found();
}
