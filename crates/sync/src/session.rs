//! Per-login session state: identity, lifecycle guard, echo suppression.
//!
//! Every coordination flag the engine needs (fetch throttle, in-flight
//! markers, echo suppression, the lifecycle bit) lives on one
//! [`SyncSessionContext`] whose lifetime is exactly the authenticated
//! session. Nothing here is process-global, so independent engines (and
//! tests) never share state.

use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use secrecy::SecretString;

use basket_core::{ClientId, UserId};

/// An authenticated identity supplied by the host application.
#[derive(Clone)]
pub struct Identity {
    pub user_id: UserId,
    /// Opaque credential used to authorize REST calls and the channel.
    pub auth_token: SecretString,
}

impl Identity {
    #[must_use]
    pub fn new(user_id: impl Into<UserId>, auth_token: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            auth_token: SecretString::from(auth_token.into()),
        }
    }
}

impl std::fmt::Debug for Identity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Identity")
            .field("user_id", &self.user_id)
            .field("auth_token", &"[REDACTED]")
            .finish()
    }
}

/// True while the owning scope (engine or session) is alive.
///
/// Async completions check this before mutating state; once retired it stays
/// retired, so stale fetches, timers, and channel events become no-ops
/// instead of zombie updates.
#[derive(Debug, Clone, Default)]
pub struct LifecycleGuard {
    active: std::sync::Arc<AtomicBool>,
}

impl LifecycleGuard {
    #[must_use]
    pub fn new() -> Self {
        Self {
            active: std::sync::Arc::new(AtomicBool::new(true)),
        }
    }

    /// Whether the owning scope is still alive.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// Permanently deactivate. There is no way back.
    pub fn retire(&self) {
        self.active.store(false, Ordering::SeqCst);
    }
}

/// Suppresses re-broadcast of changes that arrived from the channel.
///
/// The flag is raised before an inbound snapshot is applied and lowered by a
/// deferred reset after a short window, covering the span in which the
/// store's mutation path would otherwise treat the applied change as a fresh
/// local edit and loop it back out. A generation counter keeps an earlier
/// reset from cutting a later window short.
#[derive(Debug, Clone, Default)]
pub struct EchoGuard {
    inner: std::sync::Arc<EchoGuardInner>,
}

#[derive(Debug, Default)]
struct EchoGuardInner {
    suppressed: AtomicBool,
    generation: AtomicU64,
}

impl EchoGuard {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether outbound emission is currently suppressed.
    #[must_use]
    pub fn is_suppressed(&self) -> bool {
        self.inner.suppressed.load(Ordering::SeqCst)
    }

    /// Raise the flag now; lower it `window` from now unless a newer
    /// suppression has started since.
    pub fn suppress_for(&self, window: Duration) {
        let generation = self.inner.generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.inner.suppressed.store(true, Ordering::SeqCst);

        let inner = std::sync::Arc::clone(&self.inner);
        tokio::spawn(async move {
            tokio::time::sleep(window).await;
            if inner.generation.load(Ordering::SeqCst) == generation {
                inner.suppressed.store(false, Ordering::SeqCst);
            }
        });
    }
}

/// All coordination state for one authenticated sync session.
pub struct SyncSessionContext {
    pub user_id: UserId,
    pub auth_token: SecretString,
    /// Identifies this connection in channel broadcasts.
    pub client_id: ClientId,
    pub lifecycle: LifecycleGuard,
    pub echo: EchoGuard,
    /// Set after an authorization failure: no further remote calls until the
    /// host supplies a fresh identity.
    local_only: AtomicBool,
    fetch_in_flight: AtomicBool,
    last_fetch_at: Mutex<Option<Instant>>,
    last_update_sent_at: Mutex<Option<Instant>>,
}

impl SyncSessionContext {
    #[must_use]
    pub fn new(identity: &Identity) -> Self {
        Self {
            user_id: identity.user_id.clone(),
            auth_token: identity.auth_token.clone(),
            client_id: ClientId::random(),
            lifecycle: LifecycleGuard::new(),
            echo: EchoGuard::new(),
            local_only: AtomicBool::new(false),
            fetch_in_flight: AtomicBool::new(false),
            last_fetch_at: Mutex::new(None),
            last_update_sent_at: Mutex::new(None),
        }
    }

    /// Whether the session has degraded to local-only after an auth failure.
    #[must_use]
    pub fn is_local_only(&self) -> bool {
        self.local_only.load(Ordering::SeqCst)
    }

    /// Degrade to local-only; remote traffic stops until re-authentication.
    pub fn mark_local_only(&self) {
        self.local_only.store(true, Ordering::SeqCst);
    }

    /// Try to claim the authoritative-fetch slot.
    ///
    /// Returns `false` (caller reports "skipped") when the session is
    /// local-only, a fetch is already outstanding, or the last fetch was
    /// within `min_interval`. On success the throttle window is stamped
    /// immediately, so a failed fetch also waits out the window.
    pub fn try_begin_fetch(&self, min_interval: Duration) -> bool {
        if self.is_local_only() || !self.lifecycle.is_active() {
            return false;
        }
        if self
            .fetch_in_flight
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return false;
        }

        let mut last = match self.last_fetch_at.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(at) = *last {
            if at.elapsed() < min_interval {
                self.fetch_in_flight.store(false, Ordering::SeqCst);
                return false;
            }
        }
        *last = Some(Instant::now());
        true
    }

    /// Release the fetch slot claimed by [`Self::try_begin_fetch`].
    pub fn finish_fetch(&self) {
        self.fetch_in_flight.store(false, Ordering::SeqCst);
    }

    /// Record that an update left for the authoritative store.
    pub fn note_update_sent(&self) {
        if let Ok(mut guard) = self.last_update_sent_at.lock() {
            *guard = Some(Instant::now());
        }
    }

    /// When the last update left, if any.
    #[must_use]
    pub fn last_update_sent_at(&self) -> Option<Instant> {
        self.last_update_sent_at.lock().map(|g| *g).ok().flatten()
    }
}

impl std::fmt::Debug for SyncSessionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncSessionContext")
            .field("user_id", &self.user_id)
            .field("client_id", &self.client_id)
            .field("local_only", &self.is_local_only())
            .field("active", &self.lifecycle.is_active())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_session() -> SyncSessionContext {
        SyncSessionContext::new(&Identity::new("user-1", "tok"))
    }

    #[test]
    fn test_lifecycle_guard_is_one_way() {
        let guard = LifecycleGuard::new();
        assert!(guard.is_active());
        guard.retire();
        assert!(!guard.is_active());
        // A clone sees the same retirement.
        assert!(!guard.clone().is_active());
    }

    #[test]
    fn test_fetch_slot_is_exclusive() {
        let session = test_session();
        assert!(session.try_begin_fetch(Duration::ZERO));
        assert!(
            !session.try_begin_fetch(Duration::ZERO),
            "second claim while in flight must be skipped"
        );
        session.finish_fetch();
        assert!(session.try_begin_fetch(Duration::ZERO));
    }

    #[test]
    fn test_fetch_throttle_window() {
        let session = test_session();
        assert!(session.try_begin_fetch(Duration::from_secs(60)));
        session.finish_fetch();
        assert!(
            !session.try_begin_fetch(Duration::from_secs(60)),
            "window not yet elapsed"
        );
    }

    #[test]
    fn test_local_only_blocks_fetches() {
        let session = test_session();
        session.mark_local_only();
        assert!(!session.try_begin_fetch(Duration::ZERO));
    }

    #[test]
    fn test_retired_session_blocks_fetches() {
        let session = test_session();
        session.lifecycle.retire();
        assert!(!session.try_begin_fetch(Duration::ZERO));
    }

    #[test]
    fn test_identity_debug_redacts_token() {
        let identity = Identity::new("user-1", "super-secret-token");
        let debug = format!("{identity:?}");
        assert!(debug.contains("[REDACTED]"));
        assert!(!debug.contains("super-secret-token"));
    }

    #[tokio::test]
    async fn test_echo_guard_deferred_reset() {
        let guard = EchoGuard::new();
        assert!(!guard.is_suppressed());

        guard.suppress_for(Duration::from_millis(20));
        assert!(guard.is_suppressed(), "raised immediately");

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(!guard.is_suppressed(), "lowered after the window");
    }

    #[tokio::test]
    async fn test_echo_guard_newer_window_wins() {
        let guard = EchoGuard::new();
        guard.suppress_for(Duration::from_millis(20));
        tokio::time::sleep(Duration::from_millis(10)).await;

        // A second suppression starts before the first expires; its longer
        // window must not be cut short by the first reset.
        guard.suppress_for(Duration::from_millis(50));
        tokio::time::sleep(Duration::from_millis(25)).await;
        assert!(guard.is_suppressed(), "second window still open");

        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(!guard.is_suppressed());
    }
}
