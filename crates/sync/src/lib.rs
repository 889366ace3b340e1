//! Basket Sync - The cart synchronization engine.
//!
//! Keeps one authenticated user's shopping cart consistent across multiple
//! concurrent client sessions (tabs, devices) while tolerating intermittent
//! connectivity and out-of-order updates.
//!
//! # Architecture
//!
//! Two explicit layers:
//!
//! - an **always-correct local layer**: the in-memory [`store::CartStore`]
//!   mutated optimistically and mirrored to a [`cache::DeviceCache`] file;
//! - a **best-effort synchronizer**: the [`batch::BatchQueue`] coalesces
//!   bursts of mutations, the [`remote::RemoteSyncClient`] talks to the
//!   authoritative REST store, and the [`channel`] module maintains the
//!   real-time WebSocket to pick up changes from the user's other devices.
//!
//! Convergence is last-write-wins over full snapshots: every push carries
//! the complete cart, so a missed or duplicated message heals itself.
//!
//! # Example
//!
//! ```rust,ignore
//! use basket_sync::{SyncConfig, SyncEngine, Identity, catalog::HttpCatalog};
//!
//! let config = SyncConfig::from_env()?;
//! let catalog = std::sync::Arc::new(HttpCatalog::new(&config));
//! let engine = SyncEngine::new(config, catalog).await;
//!
//! engine.set_identity(Some(Identity::new("user-1", token))).await;
//! engine.add_item("prod-42", 2);
//! let cart = engine.snapshot();
//! ```

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod batch;
pub mod cache;
pub mod catalog;
pub mod channel;
pub mod config;
pub mod engine;
pub mod remote;
pub mod session;
pub mod store;

pub use config::{ConfigError, SyncConfig};
pub use engine::SyncEngine;
pub use remote::FetchOutcome;
pub use session::Identity;
