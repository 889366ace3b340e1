//! Core synchronization properties, driven end-to-end against the mock
//! backend: idempotent pushes, batching, echo suppression, convergence.

#![allow(clippy::unwrap_used)]

use std::time::Duration;

use basket_core::{CartItem, CartSnapshot, ChannelState, ProductId};
use basket_integration_tests::{
    MockBackend, TEST_TOKEN, signed_in_engine, test_config, wait_until,
};
use basket_sync::remote::RemoteSyncClient;
use basket_sync::{Identity, SyncEngine};
use rust_decimal::Decimal;

fn item(id: &str, qty: u32) -> CartItem {
    CartItem::new(id, format!("Product {id}"), Decimal::new(1000, 2), "", qty)
}

async fn wait_for_channel(engine: &SyncEngine) {
    let engine = engine.clone();
    wait_until(Duration::from_secs(5), "channel to connect", move || {
        engine.channel_state() == ChannelState::Connected
    })
    .await;
}

// =============================================================================
// Idempotence
// =============================================================================

#[tokio::test]
async fn pushing_same_snapshot_twice_is_idempotent() {
    let backend = MockBackend::start().await;
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(&backend, dir.path());
    let client = RemoteSyncClient::new(&config, &Identity::new("user-1", TEST_TOKEN));

    let snapshot = CartSnapshot::empty()
        .with_added(item("A", 2))
        .with_added(item("B", 1));

    client.push_update(&snapshot).await.unwrap();
    let after_first = backend.cart("user-1").unwrap();

    client.push_update(&snapshot).await.unwrap();
    let after_second = backend.cart("user-1").unwrap();

    assert_eq!(after_first, after_second);
    assert_eq!(after_second, snapshot);
}

// =============================================================================
// Batching
// =============================================================================

#[tokio::test]
async fn rapid_quantity_changes_produce_one_push_with_final_state() {
    let backend = MockBackend::start().await;
    let dir = tempfile::tempdir().unwrap();
    let engine = signed_in_engine(&backend, dir.path(), "user-1").await;
    wait_for_channel(&engine).await;

    // Ten rapid changes well inside the 100ms test debounce window.
    engine.add_item(item("A", 1));
    for qty in 2..=10 {
        engine.set_quantity(&ProductId::new("A"), qty);
    }

    // Let the debounce fire and everything settle.
    tokio::time::sleep(Duration::from_millis(600)).await;

    let stored = backend.cart("user-1").unwrap();
    assert_eq!(stored.get(&ProductId::new("A")).unwrap().quantity, 10);

    // The immediate dual-path emits are individual frames, but the batched
    // flush itself must be exactly one: never ten.
    // With the channel live, every mutation emits once (10 frames) and the
    // debounced flush adds exactly one more.
    assert_eq!(backend.update_count(), 11, "10 immediate emits + 1 flush");
    assert_eq!(backend.push_count(), 0, "channel live, no REST fallback");

    engine.shutdown().await;
}

#[tokio::test]
async fn batched_flush_is_single_when_channel_down() {
    let backend = MockBackend::start().await;
    let dir = tempfile::tempdir().unwrap();

    // Point the channel at a dead port so only REST is available.
    let mut config = test_config(&backend, dir.path());
    config.channel_url = url::Url::parse("ws://127.0.0.1:9/channel").unwrap();
    let engine = basket_sync::SyncEngine::new(
        config,
        std::sync::Arc::new(basket_integration_tests::StubCatalog),
    )
    .await;
    engine
        .set_identity(Some(Identity::new("user-1", TEST_TOKEN)))
        .await;

    // Let the login fetch settle (empty remote + empty local = no write).
    tokio::time::sleep(Duration::from_millis(200)).await;
    let baseline = backend.push_count();

    engine.add_item(item("A", 1));
    for qty in 2..=10 {
        engine.set_quantity(&ProductId::new("A"), qty);
    }
    tokio::time::sleep(Duration::from_millis(600)).await;

    assert_eq!(
        backend.push_count() - baseline,
        1,
        "ten rapid mutations collapse into one REST push"
    );
    let stored = backend.cart("user-1").unwrap();
    assert_eq!(stored.get(&ProductId::new("A")).unwrap().quantity, 10);

    engine.shutdown().await;
}

// =============================================================================
// Echo suppression
// =============================================================================

#[tokio::test]
async fn inbound_updates_are_not_rebroadcast() {
    let backend = MockBackend::start().await;
    let dir_a = tempfile::tempdir().unwrap();
    let dir_b = tempfile::tempdir().unwrap();

    let alice_tab = signed_in_engine(&backend, dir_a.path(), "user-1").await;
    let alice_phone = signed_in_engine(&backend, dir_b.path(), "user-1").await;
    wait_for_channel(&alice_tab).await;
    wait_for_channel(&alice_phone).await;

    alice_tab.add_item(item("A", 2));

    // Wait until the other device has applied the update.
    {
        let phone = alice_phone.clone();
        wait_until(Duration::from_secs(5), "phone to receive the update", move || {
            phone.snapshot().get(&ProductId::new("A")).is_some()
        })
        .await;
    }

    // Settle past debounce and echo windows, then ensure the write count is
    // stable: the phone applying the broadcast must not push it back out.
    tokio::time::sleep(Duration::from_millis(500)).await;
    let settled = backend.write_count();
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(
        backend.write_count(),
        settled,
        "no echo loop: applying a broadcast triggered another outbound write"
    );

    alice_tab.shutdown().await;
    alice_phone.shutdown().await;
}

// =============================================================================
// Convergence
// =============================================================================

#[tokio::test]
async fn two_devices_converge_to_the_last_pushed_snapshot() {
    let backend = MockBackend::start().await;
    let dir_a = tempfile::tempdir().unwrap();
    let dir_b = tempfile::tempdir().unwrap();

    let laptop = signed_in_engine(&backend, dir_a.path(), "user-1").await;
    let phone = signed_in_engine(&backend, dir_b.path(), "user-1").await;
    wait_for_channel(&laptop).await;
    wait_for_channel(&phone).await;

    // Disjoint mutations, one device at a time, channels live throughout.
    laptop.add_item(item("A", 1));
    {
        let phone = phone.clone();
        wait_until(Duration::from_secs(5), "phone to see item A", move || {
            phone.snapshot().get(&ProductId::new("A")).is_some()
        })
        .await;
    }

    phone.add_item(item("B", 3));
    {
        let laptop = laptop.clone();
        wait_until(Duration::from_secs(5), "laptop to see item B", move || {
            laptop.snapshot().get(&ProductId::new("B")).is_some()
        })
        .await;
    }

    // Let both batch flushes land.
    tokio::time::sleep(Duration::from_millis(500)).await;

    let a = laptop.snapshot();
    let b = phone.snapshot();
    assert!(a.items_equal(&b), "devices diverged: {a:?} vs {b:?}");
    assert!(
        a.items_equal(&backend.cart("user-1").unwrap()),
        "devices diverged from the authoritative store"
    );
    assert_eq!(a.total_quantity(), 4);

    laptop.shutdown().await;
    phone.shutdown().await;
}
