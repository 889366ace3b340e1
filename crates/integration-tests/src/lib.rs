//! End-to-end test support for Basket.
//!
//! Provides an in-process mock backend speaking the engine's two protocols:
//!
//! - REST: `GET`/`PUT /api/carts/{user_id}` plus `GET /api/products/{id}`
//! - WebSocket: `/channel` with the authenticate handshake and per-user
//!   `cart_updated` broadcast fan-out (echoed to the originator too, which
//!   is exactly what the engine's echo suppression must survive)
//!
//! The backend records push and update counters so tests can assert on
//! network chatter, and has failure toggles for auth and fetch paths.
//!
//! # Running Tests
//!
//! ```bash
//! cargo test -p basket-integration-tests
//! ```

#![cfg_attr(not(test), forbid(unsafe_code))]
// Test support: panicking on a poisoned lock or a closed socket is fine here.
#![allow(clippy::unwrap_used)]
#![allow(clippy::missing_panics_doc)]

use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path as AxumPath, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use url::Url;

use basket_core::{CartSnapshot, ChannelMessage, ClientId, ProductSummary, UserId};
use basket_sync::{Identity, SyncConfig, SyncEngine};
use basket_sync::catalog::ProductCatalog;

/// The only credential the mock backend accepts.
pub const TEST_TOKEN: &str = "test-token";

/// A cart change fanned out to every channel connection of the same user.
#[derive(Debug, Clone)]
struct Broadcast {
    user_id: UserId,
    snapshot: CartSnapshot,
    source_id: ClientId,
}

/// Shared state behind the mock backend routes.
pub struct BackendState {
    carts: Mutex<HashMap<String, CartSnapshot>>,
    products: Mutex<HashMap<String, ProductSummary>>,
    /// REST snapshot PUTs received.
    push_count: AtomicUsize,
    /// `cart_update` frames received over the channel.
    update_count: AtomicUsize,
    /// Reject all credentials (REST 401, channel `auth_error`).
    reject_auth: AtomicBool,
    /// Fail cart GETs with a 500 (transient-server-error simulation).
    fail_fetch: AtomicBool,
    broadcast: broadcast::Sender<Broadcast>,
    /// Source id attached to broadcasts triggered by REST PUTs.
    rest_source: ClientId,
}

/// An in-process backend bound to an ephemeral local port.
pub struct MockBackend {
    addr: SocketAddr,
    state: Arc<BackendState>,
    _task: JoinHandle<()>,
}

impl MockBackend {
    /// Bind and serve on `127.0.0.1:0`.
    pub async fn start() -> Self {
        let (broadcast_tx, _) = broadcast::channel(64);
        let state = Arc::new(BackendState {
            carts: Mutex::new(HashMap::new()),
            products: Mutex::new(HashMap::new()),
            push_count: AtomicUsize::new(0),
            update_count: AtomicUsize::new(0),
            reject_auth: AtomicBool::new(false),
            fail_fetch: AtomicBool::new(false),
            broadcast: broadcast_tx,
            rest_source: ClientId::random(),
        });

        let app = Router::new()
            .route("/api/carts/{user_id}", get(get_cart).put(put_cart))
            .route("/api/products/{product_id}", get(get_product))
            .route("/channel", get(channel_upgrade))
            .with_state(Arc::clone(&state));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let task = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            addr,
            state,
            _task: task,
        }
    }

    /// REST base URL.
    pub fn api_base(&self) -> Url {
        Url::parse(&format!("http://{}", self.addr)).unwrap()
    }

    /// Channel URL.
    pub fn channel_url(&self) -> Url {
        Url::parse(&format!("ws://{}/channel", self.addr)).unwrap()
    }

    /// Seed the stored cart for a user.
    pub fn insert_cart(&self, user_id: &str, snapshot: CartSnapshot) {
        self.state
            .carts
            .lock()
            .unwrap()
            .insert(user_id.to_string(), snapshot);
    }

    /// The stored cart for a user, if any.
    pub fn cart(&self, user_id: &str) -> Option<CartSnapshot> {
        self.state.carts.lock().unwrap().get(user_id).cloned()
    }

    /// Seed a product summary for the catalog route.
    pub fn insert_product(&self, product_id: &str, summary: ProductSummary) {
        self.state
            .products
            .lock()
            .unwrap()
            .insert(product_id.to_string(), summary);
    }

    /// REST snapshot PUTs received so far.
    pub fn push_count(&self) -> usize {
        self.state.push_count.load(Ordering::SeqCst)
    }

    /// `cart_update` frames received over the channel so far.
    pub fn update_count(&self) -> usize {
        self.state.update_count.load(Ordering::SeqCst)
    }

    /// Total cart writes seen, over either protocol.
    pub fn write_count(&self) -> usize {
        self.push_count() + self.update_count()
    }

    /// Reject every credential from now on.
    pub fn set_reject_auth(&self, reject: bool) {
        self.state.reject_auth.store(reject, Ordering::SeqCst);
    }

    /// Fail cart GETs with a 500 from now on.
    pub fn set_fail_fetch(&self, fail: bool) {
        self.state.fail_fetch.store(fail, Ordering::SeqCst);
    }
}

// =============================================================================
// Engine helpers
// =============================================================================

/// Engine configuration pointed at the mock backend, with test-friendly
/// timing (fast debounce and backoff, zero fetch throttle).
pub fn test_config(backend: &MockBackend, cache_dir: &Path) -> SyncConfig {
    let mut config = SyncConfig::new(backend.api_base(), backend.channel_url());
    config.cache_dir = cache_dir.to_path_buf();
    config.debounce = Duration::from_millis(100);
    config.min_fetch_interval = Duration::ZERO;
    config.connect_timeout = Duration::from_secs(2);
    config.backoff_base = Duration::from_millis(50);
    config.backoff_ceiling = Duration::from_millis(200);
    config.max_reconnect_attempts = 3;
    config.echo_window = Duration::from_millis(100);
    config
}

/// A catalog that answers from the backend's product map via HTTP is not
/// needed for most tests; this stub serves fixed details immediately.
pub struct StubCatalog;

#[async_trait::async_trait]
impl ProductCatalog for StubCatalog {
    async fn fetch_product_summary(
        &self,
        product_id: &basket_core::ProductId,
    ) -> Result<ProductSummary, basket_sync::catalog::CatalogError> {
        Ok(ProductSummary {
            display_name: format!("Product {product_id}"),
            unit_price: rust_decimal::Decimal::new(1000, 2),
            image_ref: String::new(),
        })
    }
}

/// Build an engine against the backend and sign it in as `user_id`.
pub async fn signed_in_engine(
    backend: &MockBackend,
    cache_dir: &Path,
    user_id: &str,
) -> SyncEngine {
    let engine = SyncEngine::new(test_config(backend, cache_dir), Arc::new(StubCatalog)).await;
    engine
        .set_identity(Some(Identity::new(user_id, TEST_TOKEN)))
        .await;
    engine
}

/// Poll `predicate` until it holds or `timeout` elapses. Panics on timeout.
pub async fn wait_until(timeout: Duration, what: &str, predicate: impl Fn() -> bool) {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if predicate() {
            return;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "timed out waiting for: {what}"
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

// =============================================================================
// Routes
// =============================================================================

fn authorized(state: &BackendState, headers: &HeaderMap) -> bool {
    if state.reject_auth.load(Ordering::SeqCst) {
        return false;
    }
    headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value == format!("Bearer {TEST_TOKEN}"))
}

async fn get_cart(
    State(state): State<Arc<BackendState>>,
    AxumPath(user_id): AxumPath<String>,
    headers: HeaderMap,
) -> Response {
    if !authorized(&state, &headers) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    if state.fail_fetch.load(Ordering::SeqCst) {
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    }
    match state.carts.lock().unwrap().get(&user_id) {
        Some(snapshot) => Json(snapshot.clone()).into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

async fn put_cart(
    State(state): State<Arc<BackendState>>,
    AxumPath(user_id): AxumPath<String>,
    headers: HeaderMap,
    Json(snapshot): Json<CartSnapshot>,
) -> Response {
    if !authorized(&state, &headers) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    state
        .carts
        .lock()
        .unwrap()
        .insert(user_id.clone(), snapshot.clone());
    state.push_count.fetch_add(1, Ordering::SeqCst);
    let _ = state.broadcast.send(Broadcast {
        user_id: UserId::new(user_id),
        snapshot,
        source_id: state.rest_source,
    });
    StatusCode::NO_CONTENT.into_response()
}

async fn get_product(
    State(state): State<Arc<BackendState>>,
    AxumPath(product_id): AxumPath<String>,
) -> Response {
    match state.products.lock().unwrap().get(&product_id) {
        Some(summary) => Json(summary.clone()).into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

async fn channel_upgrade(
    State(state): State<Arc<BackendState>>,
    ws: WebSocketUpgrade,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(mut socket: WebSocket, state: Arc<BackendState>) {
    // Handshake: the first frame must be `authenticate`.
    let (user_id, client_id) = loop {
        match socket.recv().await {
            Some(Ok(Message::Text(text))) => match ChannelMessage::parse(&text) {
                Ok(ChannelMessage::Authenticate { user_id, client_id }) => {
                    if state.reject_auth.load(Ordering::SeqCst) {
                        send_frame(
                            &mut socket,
                            &ChannelMessage::AuthError {
                                reason: "credential rejected".to_string(),
                            },
                        )
                        .await;
                        return;
                    }
                    send_frame(&mut socket, &ChannelMessage::Authenticated).await;
                    break (user_id, client_id);
                }
                _ => return,
            },
            Some(Ok(_)) => {}
            Some(Err(_)) | None => return,
        }
    };

    let mut updates = state.broadcast.subscribe();
    loop {
        tokio::select! {
            frame = socket.recv() => match frame {
                Some(Ok(Message::Text(text))) => {
                    if let Ok(ChannelMessage::CartUpdate { snapshot }) = ChannelMessage::parse(&text) {
                        state
                            .carts
                            .lock()
                            .unwrap()
                            .insert(user_id.as_str().to_string(), snapshot.clone());
                        state.update_count.fetch_add(1, Ordering::SeqCst);
                        // Fan out to every connection of this user, the
                        // originator included.
                        let _ = state.broadcast.send(Broadcast {
                            user_id: user_id.clone(),
                            snapshot,
                            source_id: client_id,
                        });
                    }
                }
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => return,
                Some(Ok(_)) => {}
            },
            update = updates.recv() => match update {
                Ok(update) if update.user_id == user_id => {
                    send_frame(
                        &mut socket,
                        &ChannelMessage::CartUpdated {
                            snapshot: update.snapshot,
                            source_id: update.source_id,
                        },
                    )
                    .await;
                }
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(broadcast::error::RecvError::Closed) => return,
            }
        }
    }
}

async fn send_frame(socket: &mut WebSocket, message: &ChannelMessage) {
    let text = message.encode().unwrap();
    let _ = socket.send(Message::Text(text.into())).await;
}
