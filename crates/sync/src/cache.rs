//! Persistent device cache: the durable fallback copy of the cart.
//!
//! One JSON file per device holding the last known cart plus the checkout
//! selections. The entry is overwritten whole on every snapshot change
//! (never merged) and is the source of truth when the remote store is
//! unreachable. Writes are best-effort: the engine logs and swallows cache
//! failures, because local mutation is defined to never fail.
//!
//! Tabs on the same device share this file with no lock; last writer wins.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use basket_core::{CartSnapshot, PaymentMethod, ShippingAddress};

/// The file name inside the cache directory.
const CACHE_FILE: &str = "cart.json";

/// Errors from cache I/O. Callers treat these as diagnostics, not failures.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("cache serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// What the device remembers between sessions.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub cart: CartSnapshot,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shipping_address: Option<ShippingAddress>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payment_method: Option<PaymentMethod>,
    /// When this entry was written; informational only.
    #[serde(default)]
    pub saved_at: Option<DateTime<Utc>>,
}

/// Handle to the per-device cache file.
#[derive(Debug, Clone)]
pub struct DeviceCache {
    path: PathBuf,
}

impl DeviceCache {
    /// Cache rooted at `dir` (created on first write if missing).
    #[must_use]
    pub fn new(dir: &Path) -> Self {
        Self {
            path: dir.join(CACHE_FILE),
        }
    }

    /// Path of the underlying file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the cached entry.
    ///
    /// A missing file is a normal first run; a corrupt file is logged and
    /// treated as empty. Neither is an error for the caller.
    pub async fn load(&self) -> CacheEntry {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return CacheEntry::default();
            }
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "failed to read device cache");
                return CacheEntry::default();
            }
        };

        match serde_json::from_slice(&bytes) {
            Ok(entry) => entry,
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "corrupt device cache, starting empty");
                CacheEntry::default()
            }
        }
    }

    /// Overwrite the entry atomically (write temp file, then rename).
    ///
    /// # Errors
    ///
    /// Returns `CacheError` on I/O or serialization failure; the engine logs
    /// and swallows it.
    pub async fn store(&self, entry: &CacheEntry) -> Result<(), CacheError> {
        if let Some(dir) = self.path.parent() {
            tokio::fs::create_dir_all(dir).await?;
        }

        let json = serde_json::to_vec_pretty(entry)?;
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, &json).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}
