#![allow(dead_code)]

//! Shared test harness: an in-process server over a fresh store, with
//! a NowPayments adapter pointed wherever the test needs.

use std::collections::BTreeMap;
use std::sync::Arc;

use axum_test::TestServer;
use chrono::Utc;

use veilpay_core::{Clock, Currency, FixedClock, Money, Payment, PaymentId, UserId};
use veilpay_service::crypto::{canonical_json, hmac_sha512_hex};
use veilpay_service::gateway::{GatewayRegistry, NowPaymentsGateway};
use veilpay_service::notify::RecordingNotifier;
use veilpay_service::{create_router, AppState, ServiceConfig};
use veilpay_store::{MemoryStore, Store};

/// IPN secret the test gateway is configured with.
pub const IPN_SECRET: &str = "test_secret";

/// API key the test gateway is configured with.
pub const API_KEY: &str = "test_api_key";

pub struct TestHarness {
    pub server: TestServer,
    pub store: Arc<MemoryStore>,
    pub clock: Arc<FixedClock>,
    pub notifier: Arc<RecordingNotifier>,
}

/// Harness with the gateway pointed at the production URL; fine for
/// tests that never reach the network.
pub fn harness() -> TestHarness {
    harness_with_base_url(NowPaymentsGateway::DEFAULT_BASE_URL)
}

pub fn harness_with_base_url(base_url: &str) -> TestHarness {
    let store = Arc::new(MemoryStore::new());
    let clock = Arc::new(FixedClock::at(Utc::now()));
    let gateways = GatewayRegistry::new().with(Arc::new(NowPaymentsGateway::new(
        base_url, API_KEY, IPN_SECRET,
    )));

    let notifier = Arc::new(RecordingNotifier::default());

    let state = AppState::with_parts(
        Arc::clone(&store),
        ServiceConfig::default(),
        Arc::clone(&clock) as Arc<dyn Clock>,
        gateways,
        Arc::clone(&notifier) as _,
    );

    let server = TestServer::new(create_router(state)).unwrap();
    TestHarness {
        server,
        store,
        clock,
        notifier,
    }
}

/// Sign an IPN body the way NowPayments does: HMAC-SHA512 over the
/// JSON re-serialized with sorted keys.
pub fn sign_ipn(body: &str) -> String {
    hmac_sha512_hex(IPN_SECRET, &canonical_json(body).unwrap())
}

pub fn usd(minor: i64) -> Money {
    Money::new(minor, Currency::new("USD").unwrap())
}

/// Seed a pending 10.00 USD payment directly into the store.
pub fn seed_pending_payment(store: &MemoryStore, user_id: UserId) -> Payment {
    let payment = Payment::new(
        PaymentId::generate(),
        user_id,
        usd(1000),
        "nowpayments",
        None,
        BTreeMap::new(),
        Utc::now(),
    )
    .unwrap();
    store.put_payment(&payment).unwrap();
    payment
}
