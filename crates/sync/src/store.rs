//! In-memory cart store: the source of truth for the current session.
//!
//! Holds the current [`CartSnapshot`] behind a short mutex and publishes
//! every replacement on a `tokio::sync::watch` channel for the UI layer.
//! Mutations are synchronous and infallible; all networking hangs off the
//! published snapshots, never the other way around. The lock is only ever
//! held for the duration of a pure snapshot transformation.

use std::sync::Mutex;

use tokio::sync::watch;

use basket_core::CartSnapshot;

/// The session-local cart state.
#[derive(Debug)]
pub struct CartStore {
    snapshot: Mutex<CartSnapshot>,
    watch_tx: watch::Sender<CartSnapshot>,
}

impl CartStore {
    /// Create a store seeded with `initial` (usually the cached cart).
    #[must_use]
    pub fn new(initial: CartSnapshot) -> Self {
        let (watch_tx, _) = watch::channel(initial.clone());
        Self {
            snapshot: Mutex::new(initial),
            watch_tx,
        }
    }

    /// The current snapshot.
    #[must_use]
    pub fn current(&self) -> CartSnapshot {
        match self.snapshot.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Subscribe to snapshot replacements. The receiver immediately sees the
    /// current value.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<CartSnapshot> {
        self.watch_tx.subscribe()
    }

    /// Atomically replace the snapshot with `f(current)` and publish the
    /// result. Returns the new snapshot.
    pub fn apply(&self, f: impl FnOnce(&CartSnapshot) -> CartSnapshot) -> CartSnapshot {
        let next = {
            let mut guard = match self.snapshot.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            let next = f(&guard);
            *guard = next.clone();
            next
        };
        // Publish outside the lock; watch only fails with zero receivers,
        // which is fine (nobody is looking).
        let _ = self.watch_tx.send(next.clone());
        next
    }

    /// Atomically replace the snapshot wholesale (inbound pushes, fetch
    /// reconciliation). Returns the snapshot that was replaced.
    pub fn replace(&self, next: CartSnapshot) -> CartSnapshot {
        let previous = {
            let mut guard = match self.snapshot.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            std::mem::replace(&mut *guard, next.clone())
        };
        let _ = self.watch_tx.send(next);
        previous
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use basket_core::{CartItem, ProductId};
    use rust_decimal::Decimal;

    fn item(id: &str, qty: u32) -> CartItem {
        CartItem::new(id, format!("Product {id}"), Decimal::new(999, 2), "", qty)
    }

    #[test]
    fn test_apply_returns_and_stores_new_snapshot() {
        let store = CartStore::new(CartSnapshot::empty());
        let snap = store.apply(|s| s.with_added(item("A", 2)));
        assert_eq!(snap.total_quantity(), 2);
        assert_eq!(store.current(), snap);
    }

    #[test]
    fn test_replace_returns_previous() {
        let store = CartStore::new(CartSnapshot::empty());
        store.apply(|s| s.with_added(item("A", 1)));

        let incoming = CartSnapshot::empty().with_added(item("B", 3));
        let previous = store.replace(incoming.clone());

        assert!(previous.get(&ProductId::new("A")).is_some());
        assert_eq!(store.current(), incoming);
    }

    #[tokio::test]
    async fn test_watch_publishes_every_replacement() {
        let store = CartStore::new(CartSnapshot::empty());
        let mut rx = store.subscribe();
        assert!(rx.borrow().is_empty());

        store.apply(|s| s.with_added(item("A", 1)));
        rx.changed().await.unwrap();
        assert_eq!(rx.borrow_and_update().total_quantity(), 1);

        store.replace(CartSnapshot::empty());
        rx.changed().await.unwrap();
        assert!(rx.borrow_and_update().is_empty());
    }
}
