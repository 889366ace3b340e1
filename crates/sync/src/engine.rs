//! The engine façade tying the layers together.
//!
//! [`SyncEngine`] is a cheaply-cloneable handle (`Arc` inner) the host
//! application holds for the lifetime of the cart UI. It owns the local
//! layer (store + device cache) directly and one optional per-login
//! synchronizer session (remote client, channel, batching queue, pump
//! tasks) that is rebuilt from scratch whenever the identity changes.
//!
//! Mutations are synchronous and optimistic: the returned snapshot is
//! already the store's current state before any network activity starts.

use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use basket_core::{
    CartItem, CartSnapshot, ChannelMessage, ChannelState, PaymentMethod, ProductId,
    ShippingAddress, SyncStatus,
};

use crate::batch::{BatchQueue, UpdateSink};
use crate::cache::{CacheEntry, DeviceCache};
use crate::catalog::ProductCatalog;
use crate::channel::{self, ChannelEvent, ChannelHandle, ChannelSender};
use crate::config::SyncConfig;
use crate::remote::{FetchOutcome, RemoteSyncClient};
use crate::session::{Identity, LifecycleGuard, SyncSessionContext};
use crate::store::CartStore;

/// Checkout selections persisted alongside the cart (local only, never
/// synced).
#[derive(Debug, Default, Clone)]
struct CheckoutSelections {
    shipping_address: Option<ShippingAddress>,
    payment_method: Option<PaymentMethod>,
}

/// Everything that exists only while an identity is signed in.
struct ActiveSession {
    ctx: Arc<SyncSessionContext>,
    remote: Arc<RemoteSyncClient>,
    channel: ChannelHandle,
    batch: BatchQueue,
    tasks: Vec<JoinHandle<()>>,
}

struct EngineInner {
    config: SyncConfig,
    catalog: Arc<dyn ProductCatalog>,
    cache: DeviceCache,
    store: CartStore,
    status_tx: watch::Sender<SyncStatus>,
    /// Engine-lifetime guard; covers work that runs outside any session
    /// (cache writes, catalog backfill for a guest cart).
    lifecycle: LifecycleGuard,
    session: Mutex<Option<ActiveSession>>,
    checkout: Mutex<CheckoutSelections>,
}

/// The cart synchronization engine.
#[derive(Clone)]
pub struct SyncEngine {
    inner: Arc<EngineInner>,
}

impl SyncEngine {
    /// Create an engine seeded from the device cache.
    ///
    /// No identity is attached yet; the cart operates locally until
    /// [`Self::set_identity`] supplies one.
    pub async fn new(config: SyncConfig, catalog: Arc<dyn ProductCatalog>) -> Self {
        let cache = DeviceCache::new(&config.cache_dir);
        let entry = cache.load().await;
        let (status_tx, _) = watch::channel(SyncStatus::Offline);

        Self {
            inner: Arc::new(EngineInner {
                config,
                catalog,
                cache,
                store: CartStore::new(entry.cart),
                status_tx,
                lifecycle: LifecycleGuard::new(),
                session: Mutex::new(None),
                checkout: Mutex::new(CheckoutSelections {
                    shipping_address: entry.shipping_address,
                    payment_method: entry.payment_method,
                }),
            }),
        }
    }

    // =========================================================================
    // Read surface (for the UI layer)
    // =========================================================================

    /// The current snapshot.
    #[must_use]
    pub fn snapshot(&self) -> CartSnapshot {
        self.inner.store.current()
    }

    /// Total unit count across the cart (the badge number).
    #[must_use]
    pub fn total_items(&self) -> u32 {
        self.snapshot().total_quantity()
    }

    /// Watch snapshot replacements.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<CartSnapshot> {
        self.inner.store.subscribe()
    }

    /// Current sync status.
    #[must_use]
    pub fn status(&self) -> SyncStatus {
        *self.inner.status_tx.borrow()
    }

    /// Watch status changes ("degraded, using local cache" vs
    /// "authentication required").
    #[must_use]
    pub fn status_receiver(&self) -> watch::Receiver<SyncStatus> {
        self.inner.status_tx.subscribe()
    }

    /// Current channel state, `Disconnected` when no session is active.
    #[must_use]
    pub fn channel_state(&self) -> ChannelState {
        lock(&self.inner.session)
            .as_ref()
            .map_or(ChannelState::Disconnected, |s| s.channel.state())
    }

    // =========================================================================
    // Mutations (optimistic, synchronous, infallible)
    // =========================================================================

    /// Add a cart line. An existing line for the same product has the
    /// quantities summed; a placeholder candidate triggers an async catalog
    /// backfill that fills in the details later, in place.
    pub fn add_item(&self, candidate: CartItem) -> CartSnapshot {
        if candidate.quantity == 0 {
            return self.snapshot();
        }
        let product_id = candidate.product_id.clone();
        let snapshot = self.inner.store.apply(|s| s.with_added(candidate));
        self.after_local_mutation(&snapshot);
        if snapshot
            .get(&product_id)
            .is_some_and(CartItem::is_placeholder)
        {
            self.spawn_backfill(product_id);
        }
        snapshot
    }

    /// Add by product id alone; details arrive via catalog backfill.
    pub fn add_product(&self, product_id: impl Into<ProductId>, quantity: u32) -> CartSnapshot {
        self.add_item(CartItem::placeholder(product_id.into(), quantity))
    }

    /// Remove a line.
    pub fn remove_item(&self, product_id: &ProductId) -> CartSnapshot {
        let snapshot = self.inner.store.apply(|s| s.without(product_id));
        self.after_local_mutation(&snapshot);
        snapshot
    }

    /// Set a line's quantity; zero removes it.
    pub fn set_quantity(&self, product_id: &ProductId, quantity: u32) -> CartSnapshot {
        let snapshot = self
            .inner
            .store
            .apply(|s| s.with_quantity(product_id, quantity));
        self.after_local_mutation(&snapshot);
        snapshot
    }

    /// Empty the cart.
    pub fn clear(&self) -> CartSnapshot {
        let snapshot = self.inner.store.apply(|_| CartSnapshot::empty());
        self.after_local_mutation(&snapshot);
        snapshot
    }

    /// Remember the shipping address (device-local, never synced).
    pub fn set_shipping_address(&self, address: Option<ShippingAddress>) {
        lock(&self.inner.checkout).shipping_address = address;
        self.persist(self.snapshot());
    }

    /// Remember the payment method (device-local, never synced).
    pub fn set_payment_method(&self, method: Option<PaymentMethod>) {
        lock(&self.inner.checkout).payment_method = method;
        self.persist(self.snapshot());
    }

    // =========================================================================
    // Identity lifecycle
    // =========================================================================

    /// Attach, switch, or drop the authenticated identity.
    ///
    /// The full initialization sequence re-runs on every change: the old
    /// session is torn down (channel closed, timers cancelled, lifecycle
    /// retired), then a fresh session spins up for the new identity and the
    /// authoritative fetch kicks off in the background.
    ///
    /// A guest cart survives the guest -> signed-in transition so the first
    /// fetch can adopt it; switching between two signed-in users clears the
    /// cart, as does logging out.
    pub async fn set_identity(&self, identity: Option<Identity>) {
        let had_session = self.teardown_session().await;
        if had_session {
            self.inner.store.replace(CartSnapshot::empty());
            self.persist(CartSnapshot::empty());
        }

        match identity {
            None => self.set_status(SyncStatus::Offline),
            Some(identity) => self.start_session(identity),
        }
    }

    /// Tear everything down. The in-memory cart empties; the device cache
    /// keeps its last entry so a reload can reseed from it.
    pub async fn shutdown(&self) {
        self.teardown_session().await;
        self.inner.lifecycle.retire();
        self.inner.store.replace(CartSnapshot::empty());
        self.set_status(SyncStatus::Offline);
    }

    /// Reconcile with the authoritative store now, subject to the throttle.
    ///
    /// Returns `Skipped` when throttled, already in flight, or no session is
    /// active. A failed fetch leaves the local snapshot untouched.
    pub async fn fetch_authoritative_cart(&self) -> FetchOutcome {
        let Some((ctx, remote)) = lock(&self.inner.session)
            .as_ref()
            .map(|s| (Arc::clone(&s.ctx), Arc::clone(&s.remote)))
        else {
            return FetchOutcome::Skipped;
        };

        if !ctx.try_begin_fetch(self.inner.config.min_fetch_interval) {
            return FetchOutcome::Skipped;
        }
        let result = remote.fetch_cart().await;
        ctx.finish_fetch();

        if !ctx.lifecycle.is_active() {
            return FetchOutcome::Skipped;
        }

        match result {
            Ok(remote_snapshot) if !remote_snapshot.is_empty() => {
                // Server wins at cold start: full replace, applied like an
                // inbound push so it is not re-broadcast.
                ctx.echo.suppress_for(self.inner.config.echo_window);
                self.inner.store.replace(remote_snapshot.clone());
                self.persist(remote_snapshot.clone());
                self.set_status(SyncStatus::Live);
                FetchOutcome::Replaced(remote_snapshot)
            }
            Ok(_empty_remote) => {
                let local = self.inner.store.current();
                if local.is_empty() {
                    self.set_status(SyncStatus::Live);
                    return FetchOutcome::Unchanged;
                }
                // Local wins when the server has nothing: adopt the guest
                // cart upstream rather than clearing it.
                match remote.push_update(&local).await {
                    Ok(()) => {
                        ctx.note_update_sent();
                        self.set_status(SyncStatus::Live);
                        FetchOutcome::PushedLocal
                    }
                    Err(e) if e.is_auth() => {
                        tracing::warn!(error = %e, "cart adoption rejected, going local-only");
                        ctx.mark_local_only();
                        self.set_status(SyncStatus::AuthRequired);
                        FetchOutcome::Failed
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "cart adoption failed, keeping local cart");
                        self.set_status(SyncStatus::Degraded);
                        FetchOutcome::Failed
                    }
                }
            }
            Err(e) if e.is_auth() => {
                tracing::warn!(error = %e, "authoritative fetch unauthorized, going local-only");
                ctx.mark_local_only();
                self.set_status(SyncStatus::AuthRequired);
                FetchOutcome::Failed
            }
            Err(e) => {
                // The cart is never cleared by a failed fetch.
                tracing::warn!(error = %e, "authoritative fetch failed, serving local cache");
                self.set_status(SyncStatus::Degraded);
                FetchOutcome::Failed
            }
        }
    }

    // =========================================================================
    // Internals
    // =========================================================================

    fn start_session(&self, identity: Identity) {
        let ctx = Arc::new(SyncSessionContext::new(&identity));
        let remote = Arc::new(RemoteSyncClient::new(&self.inner.config, &identity));

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let channel = channel::spawn(&self.inner.config, &ctx, events_tx);

        let sink = Arc::new(SessionSink {
            ctx: Arc::clone(&ctx),
            remote: Arc::clone(&remote),
            channel_state: channel.state_receiver(),
            channel_sender: channel.sender(),
            status_tx: self.inner.status_tx.clone(),
        });
        let (batch, batch_task) = BatchQueue::spawn(
            self.inner.config.debounce,
            sink,
            ctx.lifecycle.clone(),
        );

        let pump = tokio::spawn(run_event_pump(
            self.clone(),
            Arc::clone(&ctx),
            events_rx,
        ));
        let reconcile = tokio::spawn(run_reconcile_loop(self.clone(), Arc::clone(&ctx)));

        *lock(&self.inner.session) = Some(ActiveSession {
            ctx,
            remote,
            channel,
            batch,
            tasks: vec![batch_task, pump, reconcile],
        });
        self.set_status(SyncStatus::Live);

        // Authoritative fetch-on-login, off the caller's critical path.
        let engine = self.clone();
        tokio::spawn(async move {
            let _ = engine.fetch_authoritative_cart().await;
        });
    }

    /// Returns whether a session existed. Teardown order is deliberate:
    /// retire the guard (stale completions become no-ops), close the channel
    /// and its timers, then stop the helper tasks.
    async fn teardown_session(&self) -> bool {
        let session = lock(&self.inner.session).take();
        let Some(session) = session else {
            return false;
        };

        session.ctx.lifecycle.retire();
        session.channel.shutdown().await;
        for task in session.tasks {
            task.abort();
        }
        true
    }

    /// The common tail of every optimistic mutation: mirror to the cache,
    /// queue the batched push, and emit immediately when the channel is
    /// live. Writes made while the echo guard is raised skip the outbound
    /// paths - they are applications of someone else's update, and looping
    /// them back out is how two devices end up in an update storm.
    fn after_local_mutation(&self, snapshot: &CartSnapshot) {
        self.persist(snapshot.clone());

        let guard = lock(&self.inner.session);
        let Some(session) = guard.as_ref() else {
            return;
        };
        if session.ctx.echo.is_suppressed() {
            return;
        }

        session.batch.enqueue(snapshot.clone());
        if session.channel.is_ready() {
            session.channel.send(ChannelMessage::CartUpdate {
                snapshot: snapshot.clone(),
            });
        }
    }

    /// Overwrite the device cache entry, best-effort.
    fn persist(&self, cart: CartSnapshot) {
        let entry = {
            let checkout = lock(&self.inner.checkout);
            CacheEntry {
                cart,
                shipping_address: checkout.shipping_address.clone(),
                payment_method: checkout.payment_method.clone(),
                saved_at: Some(Utc::now()),
            }
        };

        let cache = self.inner.cache.clone();
        let lifecycle = self.inner.lifecycle.clone();
        tokio::spawn(async move {
            if !lifecycle.is_active() {
                return;
            }
            if let Err(e) = cache.store(&entry).await {
                tracing::warn!(error = %e, "device cache write failed (ignored)");
            }
        });
    }

    fn spawn_backfill(&self, product_id: ProductId) {
        let engine = self.clone();
        tokio::spawn(async move {
            match engine
                .inner
                .catalog
                .fetch_product_summary(&product_id)
                .await
            {
                Ok(summary) => {
                    if !engine.inner.lifecycle.is_active() {
                        return;
                    }
                    let snapshot = engine
                        .inner
                        .store
                        .apply(|s| s.with_details(&product_id, &summary));
                    engine.after_local_mutation(&snapshot);
                }
                Err(e) => {
                    tracing::warn!(%product_id, error = %e, "product detail backfill failed");
                }
            }
        });
    }

    fn set_status(&self, status: SyncStatus) {
        let changed = self.inner.status_tx.send_if_modified(|current| {
            if *current == status {
                false
            } else {
                *current = status;
                true
            }
        });
        if changed {
            tracing::info!(?status, "sync status");
        }
    }
}

/// Flush target for the batching queue: channel when live, REST otherwise.
struct SessionSink {
    ctx: Arc<SyncSessionContext>,
    remote: Arc<RemoteSyncClient>,
    channel_state: watch::Receiver<ChannelState>,
    channel_sender: ChannelSender,
    status_tx: watch::Sender<SyncStatus>,
}

#[async_trait]
impl UpdateSink for SessionSink {
    async fn deliver(&self, snapshot: CartSnapshot) {
        if !self.ctx.lifecycle.is_active() || self.ctx.is_local_only() {
            return;
        }

        if self.channel_state.borrow().is_ready() {
            self.channel_sender
                .send(ChannelMessage::CartUpdate { snapshot });
            self.ctx.note_update_sent();
            set_status(&self.status_tx, SyncStatus::Live);
            return;
        }

        match self.remote.push_update(&snapshot).await {
            Ok(()) => {
                self.ctx.note_update_sent();
                set_status(&self.status_tx, SyncStatus::Live);
            }
            Err(e) if e.is_auth() => {
                tracing::warn!(error = %e, "push unauthorized, going local-only");
                self.ctx.mark_local_only();
                set_status(&self.status_tx, SyncStatus::AuthRequired);
            }
            Err(e) => {
                tracing::warn!(error = %e, "push failed, cart retained locally");
                set_status(&self.status_tx, SyncStatus::Degraded);
            }
        }
    }
}

/// Applies channel events to the local layer for one session.
async fn run_event_pump(
    engine: SyncEngine,
    ctx: Arc<SyncSessionContext>,
    mut events_rx: mpsc::UnboundedReceiver<ChannelEvent>,
) {
    while let Some(event) = events_rx.recv().await {
        if !ctx.lifecycle.is_active() {
            break;
        }
        match event {
            ChannelEvent::RemoteUpdate(snapshot) => {
                // Raise the echo guard before applying, so the mutation path
                // does not rebroadcast this change as a fresh local edit.
                ctx.echo.suppress_for(engine.inner.config.echo_window);
                engine.inner.store.replace(snapshot.clone());
                engine.persist(snapshot);
                engine.set_status(SyncStatus::Live);
            }
            ChannelEvent::AuthRejected { reason } => {
                tracing::warn!(%reason, "channel authentication rejected");
                ctx.mark_local_only();
                engine.set_status(SyncStatus::AuthRequired);
            }
            ChannelEvent::Exhausted { attempts } => {
                tracing::warn!(
                    attempts,
                    "real-time channel gave up; periodic fetch continues"
                );
                engine.set_status(SyncStatus::Degraded);
            }
        }
    }
}

/// Periodic reconciliation against the authoritative store.
async fn run_reconcile_loop(engine: SyncEngine, ctx: Arc<SyncSessionContext>) {
    // tokio::time::interval panics on a zero period.
    let period = engine
        .inner
        .config
        .min_fetch_interval
        .max(std::time::Duration::from_secs(1));
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // The first tick fires immediately; login already fetched.
    ticker.tick().await;

    loop {
        ticker.tick().await;
        if !ctx.lifecycle.is_active() {
            break;
        }
        let _ = engine.fetch_authoritative_cart().await;
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}

fn set_status(status_tx: &watch::Sender<SyncStatus>, status: SyncStatus) {
    status_tx.send_if_modified(|current| {
        if *current == status {
            false
        } else {
            *current = status;
            true
        }
    });
}
