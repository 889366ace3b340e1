//! Login, reconciliation, and failure-mode scenarios.

#![allow(clippy::unwrap_used)]

use std::sync::Arc;
use std::time::Duration;

use basket_core::{CartItem, CartSnapshot, ProductId, SyncStatus};
use basket_integration_tests::{
    MockBackend, StubCatalog, TEST_TOKEN, signed_in_engine, test_config, wait_until,
};
use basket_sync::{FetchOutcome, Identity, SyncEngine};
use rust_decimal::Decimal;

fn item(id: &str, qty: u32, unit_price: Decimal) -> CartItem {
    CartItem::new(id, format!("Product {id}"), unit_price, "", qty)
}

#[tokio::test]
async fn login_with_remote_cart_replaces_local_state() {
    let backend = MockBackend::start().await;
    backend.insert_cart(
        "user-1",
        CartSnapshot::empty().with_added(item("A", 2, Decimal::from(10))),
    );

    let dir = tempfile::tempdir().unwrap();
    let engine = signed_in_engine(&backend, dir.path(), "user-1").await;

    {
        let engine = engine.clone();
        wait_until(Duration::from_secs(5), "login fetch to apply", move || {
            !engine.snapshot().is_empty()
        })
        .await;
    }

    let snapshot = engine.snapshot();
    assert_eq!(snapshot.len(), 1);
    let line = snapshot.get(&ProductId::new("A")).unwrap();
    assert_eq!(line.quantity, 2);
    assert_eq!(engine.total_items(), 2);
    assert_eq!(snapshot.subtotal(), Decimal::from(20));

    engine.shutdown().await;
}

#[tokio::test]
async fn login_with_empty_remote_adopts_guest_cart() {
    let backend = MockBackend::start().await;
    let dir = tempfile::tempdir().unwrap();

    // Guest session: no identity yet, purely local.
    let engine = SyncEngine::new(test_config(&backend, dir.path()), Arc::new(StubCatalog)).await;
    let guest_cart = engine.add_item(item("A", 1, Decimal::from(5)));
    assert_eq!(engine.status(), SyncStatus::Offline);

    // Sign in; the remote store has nothing for this user, so the local
    // cart is pushed up rather than cleared.
    engine
        .set_identity(Some(Identity::new("user-1", TEST_TOKEN)))
        .await;

    {
        let backend_ref = &backend;
        wait_until(Duration::from_secs(5), "guest cart adoption", move || {
            backend_ref.cart("user-1").is_some()
        })
        .await;
    }

    assert!(backend.cart("user-1").unwrap().items_equal(&guest_cart));
    assert!(
        engine.snapshot().items_equal(&guest_cart),
        "local cart survives the empty-remote fetch"
    );

    engine.shutdown().await;
}

#[tokio::test]
async fn failed_fetch_leaves_local_snapshot_untouched() {
    let backend = MockBackend::start().await;
    let dir = tempfile::tempdir().unwrap();
    let engine = signed_in_engine(&backend, dir.path(), "user-1").await;

    engine.add_item(item("A", 3, Decimal::from(7)));
    tokio::time::sleep(Duration::from_millis(400)).await;
    let before = serde_json::to_vec(&engine.snapshot()).unwrap();

    backend.set_fail_fetch(true);
    let outcome = engine.fetch_authoritative_cart().await;
    assert_eq!(outcome, FetchOutcome::Failed);

    let after = serde_json::to_vec(&engine.snapshot()).unwrap();
    assert_eq!(before, after, "failed fetch must not touch the cart");
    assert_eq!(engine.status(), SyncStatus::Degraded);

    engine.shutdown().await;
}

#[tokio::test]
async fn rejected_credential_degrades_to_local_only() {
    let backend = MockBackend::start().await;
    backend.set_reject_auth(true);

    let dir = tempfile::tempdir().unwrap();
    let engine = signed_in_engine(&backend, dir.path(), "user-1").await;

    {
        let engine = engine.clone();
        wait_until(Duration::from_secs(5), "auth-required status", move || {
            engine.status() == SyncStatus::AuthRequired
        })
        .await;
    }

    // Mutations keep working locally but produce no remote traffic.
    let writes_before = backend.write_count();
    engine.add_item(item("A", 1, Decimal::from(5)));
    tokio::time::sleep(Duration::from_millis(400)).await;

    assert_eq!(engine.total_items(), 1);
    assert_eq!(
        backend.write_count(),
        writes_before,
        "local-only session must not attempt remote calls"
    );

    engine.shutdown().await;
}

#[tokio::test]
async fn exhausted_channel_degrades_but_rest_still_works() {
    let backend = MockBackend::start().await;
    let dir = tempfile::tempdir().unwrap();

    // Dead channel port: connects fail, backoff runs out of attempts.
    let mut config = test_config(&backend, dir.path());
    config.channel_url = url::Url::parse("ws://127.0.0.1:9/channel").unwrap();
    let engine = SyncEngine::new(config, Arc::new(StubCatalog)).await;
    engine
        .set_identity(Some(Identity::new("user-1", TEST_TOKEN)))
        .await;

    {
        let engine = engine.clone();
        wait_until(Duration::from_secs(5), "degraded status", move || {
            engine.status() == SyncStatus::Degraded
        })
        .await;
    }

    // The REST path keeps the cart flowing regardless.
    engine.add_item(item("A", 2, Decimal::from(3)));
    {
        let backend_ref = &backend;
        wait_until(Duration::from_secs(5), "REST push to land", move || {
            backend_ref.cart("user-1").is_some()
        })
        .await;
    }

    engine.shutdown().await;
}

#[tokio::test]
async fn switching_users_clears_the_cart() {
    let backend = MockBackend::start().await;
    backend.insert_cart(
        "user-1",
        CartSnapshot::empty().with_added(item("A", 2, Decimal::from(10))),
    );

    let dir = tempfile::tempdir().unwrap();
    let engine = signed_in_engine(&backend, dir.path(), "user-1").await;
    {
        let engine = engine.clone();
        wait_until(Duration::from_secs(5), "user-1 cart to load", move || {
            !engine.snapshot().is_empty()
        })
        .await;
    }

    engine
        .set_identity(Some(Identity::new("user-2", TEST_TOKEN)))
        .await;
    tokio::time::sleep(Duration::from_millis(400)).await;

    assert!(
        engine.snapshot().is_empty(),
        "user-2 must not inherit user-1's cart"
    );
    assert!(
        backend.cart("user-2").is_none(),
        "nothing was pushed for user-2"
    );
    assert!(
        !backend.cart("user-1").unwrap().is_empty(),
        "user-1's stored cart is untouched by the switch"
    );

    engine.shutdown().await;
}

#[tokio::test]
async fn fetch_throttle_skips_rapid_calls() {
    let backend = MockBackend::start().await;
    let dir = tempfile::tempdir().unwrap();

    let mut config = test_config(&backend, dir.path());
    config.min_fetch_interval = Duration::from_secs(60);
    let engine = SyncEngine::new(config, Arc::new(StubCatalog)).await;
    engine
        .set_identity(Some(Identity::new("user-1", TEST_TOKEN)))
        .await;

    // The login fetch consumed the throttle window.
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(
        engine.fetch_authoritative_cart().await,
        FetchOutcome::Skipped
    );

    engine.shutdown().await;
}
