//! Cart items and immutable cart snapshots.
//!
//! A [`CartSnapshot`] is a complete representation of the cart at one
//! instant. Mutation never happens in place: every operation returns a brand
//! new snapshot that the owning store swaps in atomically. This keeps the
//! algebra pure and trivially testable, and guarantees a snapshot observed
//! by one task is never half-mutated by another.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::id::ProductId;

/// A single line in the cart.
///
/// Invariant: `quantity >= 1`. A quantity of zero means the item is removed
/// from the snapshot, never stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartItem {
    /// Product this line refers to; unique within a snapshot.
    pub product_id: ProductId,
    /// Human-readable product name. Empty while the line is a placeholder
    /// awaiting catalog details.
    pub display_name: String,
    /// Unit price in the store currency. Zero while a placeholder.
    pub unit_price: Decimal,
    /// Reference to the product image (URL or asset key). Empty while a
    /// placeholder.
    pub image_ref: String,
    /// Number of units, always >= 1.
    pub quantity: u32,
}

impl CartItem {
    /// Create a fully-described cart line.
    #[must_use]
    pub fn new(
        product_id: impl Into<ProductId>,
        display_name: impl Into<String>,
        unit_price: Decimal,
        image_ref: impl Into<String>,
        quantity: u32,
    ) -> Self {
        Self {
            product_id: product_id.into(),
            display_name: display_name.into(),
            unit_price,
            image_ref: image_ref.into(),
            quantity,
        }
    }

    /// Create a placeholder line for a product whose details are not known
    /// yet. The catalog backfill replaces the empty fields later, in place.
    #[must_use]
    pub fn placeholder(product_id: impl Into<ProductId>, quantity: u32) -> Self {
        Self {
            product_id: product_id.into(),
            display_name: String::new(),
            unit_price: Decimal::ZERO,
            image_ref: String::new(),
            quantity,
        }
    }

    /// Whether this line still awaits catalog details.
    #[must_use]
    pub fn is_placeholder(&self) -> bool {
        self.display_name.is_empty()
    }

    /// Price of the whole line (`unit_price * quantity`).
    #[must_use]
    pub fn line_total(&self) -> Decimal {
        self.unit_price * Decimal::from(self.quantity)
    }
}

/// Catalog details used to backfill a placeholder line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductSummary {
    /// Human-readable product name.
    pub display_name: String,
    /// Unit price in the store currency.
    pub unit_price: Decimal,
    /// Reference to the product image.
    pub image_ref: String,
}

/// A complete, immutable view of the cart's contents at one instant.
///
/// Serializes transparently as a JSON array of items, which is also the
/// shape the remote store and the channel exchange.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CartSnapshot {
    items: Vec<CartItem>,
}

impl CartSnapshot {
    /// The empty cart.
    #[must_use]
    pub const fn empty() -> Self {
        Self { items: Vec::new() }
    }

    /// Build a snapshot from items. Callers are responsible for the
    /// one-line-per-product invariant; use the `with_*` constructors for
    /// anything user-driven.
    #[must_use]
    pub fn from_items(items: Vec<CartItem>) -> Self {
        Self { items }
    }

    /// The lines, in insertion order.
    #[must_use]
    pub fn items(&self) -> &[CartItem] {
        &self.items
    }

    /// Look up a line by product.
    #[must_use]
    pub fn get(&self, product_id: &ProductId) -> Option<&CartItem> {
        self.items.iter().find(|i| &i.product_id == product_id)
    }

    /// Whether the cart holds no lines.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Number of distinct lines.
    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Total unit count across all lines (the UI badge number).
    #[must_use]
    pub fn total_quantity(&self) -> u32 {
        self.items.iter().map(|i| i.quantity).sum()
    }

    /// Sum of all line totals.
    #[must_use]
    pub fn subtotal(&self) -> Decimal {
        self.items.iter().map(CartItem::line_total).sum()
    }

    /// Add `quantity` units of a product.
    ///
    /// If the product is already in the cart its quantity is summed with the
    /// existing line (details kept); otherwise `candidate` is appended as a
    /// new line.
    #[must_use]
    pub fn with_added(&self, candidate: CartItem) -> Self {
        let mut items = self.items.clone();
        if let Some(existing) = items
            .iter_mut()
            .find(|i| i.product_id == candidate.product_id)
        {
            existing.quantity += candidate.quantity;
        } else {
            items.push(candidate);
        }
        Self { items }
    }

    /// Set the quantity of a line. Zero removes the line; a product not in
    /// the cart is left alone.
    #[must_use]
    pub fn with_quantity(&self, product_id: &ProductId, quantity: u32) -> Self {
        if quantity == 0 {
            return self.without(product_id);
        }
        let mut items = self.items.clone();
        if let Some(existing) = items.iter_mut().find(|i| &i.product_id == product_id) {
            existing.quantity = quantity;
        }
        Self { items }
    }

    /// Remove a line.
    #[must_use]
    pub fn without(&self, product_id: &ProductId) -> Self {
        Self {
            items: self
                .items
                .iter()
                .filter(|i| &i.product_id != product_id)
                .cloned()
                .collect(),
        }
    }

    /// Replace a placeholder line's details in place: same product, same
    /// position, quantity untouched.
    #[must_use]
    pub fn with_details(&self, product_id: &ProductId, summary: &ProductSummary) -> Self {
        let mut items = self.items.clone();
        if let Some(existing) = items.iter_mut().find(|i| &i.product_id == product_id) {
            existing.display_name = summary.display_name.clone();
            existing.unit_price = summary.unit_price;
            existing.image_ref = summary.image_ref.clone();
        }
        Self { items }
    }

    /// Deep equality of item sets, ignoring line order.
    ///
    /// This is the comparison sync decisions use; `PartialEq` stays ordered
    /// because insertion order is still meaningful for display.
    #[must_use]
    pub fn items_equal(&self, other: &Self) -> bool {
        if self.items.len() != other.items.len() {
            return false;
        }
        let mut a: Vec<&CartItem> = self.items.iter().collect();
        let mut b: Vec<&CartItem> = other.items.iter().collect();
        a.sort_by(|x, y| x.product_id.cmp(&y.product_id));
        b.sort_by(|x, y| x.product_id.cmp(&y.product_id));
        a == b
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn item(id: &str, qty: u32, price: i64) -> CartItem {
        CartItem::new(id, format!("Product {id}"), Decimal::new(price, 2), "", qty)
    }

    #[test]
    fn test_add_new_product_appends() {
        let snap = CartSnapshot::empty().with_added(item("A", 2, 1000));
        assert_eq!(snap.len(), 1);
        assert_eq!(snap.get(&ProductId::new("A")).unwrap().quantity, 2);
    }

    #[test]
    fn test_add_existing_product_sums_quantity() {
        let snap = CartSnapshot::empty()
            .with_added(item("B", 1, 500))
            .with_added(item("B", 1, 500));
        assert_eq!(snap.len(), 1, "one line per product, not two entries");
        assert_eq!(snap.get(&ProductId::new("B")).unwrap().quantity, 2);
    }

    #[test]
    fn test_add_keeps_existing_details() {
        let described = CartItem::new("C", "Citrus Soap", Decimal::new(450, 2), "img/c.jpg", 1);
        let snap = CartSnapshot::empty()
            .with_added(described)
            .with_added(CartItem::placeholder("C", 3));
        let line = snap.get(&ProductId::new("C")).unwrap();
        assert_eq!(line.quantity, 4);
        assert_eq!(line.display_name, "Citrus Soap");
    }

    #[test]
    fn test_set_quantity_zero_removes() {
        let id = ProductId::new("A");
        let snap = CartSnapshot::empty()
            .with_added(item("A", 2, 1000))
            .with_quantity(&id, 0);
        assert!(snap.is_empty());
        assert!(snap.get(&id).is_none());
    }

    #[test]
    fn test_set_quantity_replaces_not_sums() {
        let id = ProductId::new("A");
        let snap = CartSnapshot::empty()
            .with_added(item("A", 2, 1000))
            .with_quantity(&id, 7);
        assert_eq!(snap.get(&id).unwrap().quantity, 7);
    }

    #[test]
    fn test_set_quantity_absent_product_is_noop() {
        let snap = CartSnapshot::empty()
            .with_added(item("A", 1, 100))
            .with_quantity(&ProductId::new("Z"), 5);
        assert_eq!(snap.len(), 1);
        assert!(snap.get(&ProductId::new("Z")).is_none());
    }

    #[test]
    fn test_without_preserves_other_lines() {
        let snap = CartSnapshot::empty()
            .with_added(item("A", 1, 100))
            .with_added(item("B", 2, 200))
            .without(&ProductId::new("A"));
        assert_eq!(snap.len(), 1);
        assert!(snap.get(&ProductId::new("B")).is_some());
    }

    #[test]
    fn test_totals() {
        let snap = CartSnapshot::empty()
            .with_added(item("A", 2, 1000)) // 2 x 10.00
            .with_added(item("B", 1, 550)); // 1 x 5.50
        assert_eq!(snap.total_quantity(), 3);
        assert_eq!(snap.subtotal(), Decimal::new(2550, 2));
    }

    #[test]
    fn test_backfill_replaces_placeholder_in_place() {
        let snap = CartSnapshot::empty()
            .with_added(item("A", 1, 100))
            .with_added(CartItem::placeholder("B", 2))
            .with_added(item("C", 1, 300));

        let summary = ProductSummary {
            display_name: "Beeswax Candle".to_string(),
            unit_price: Decimal::new(1250, 2),
            image_ref: "img/b.jpg".to_string(),
        };
        let filled = snap.with_details(&ProductId::new("B"), &summary);

        // Same position, same quantity, details filled in.
        assert_eq!(filled.items()[1].product_id, ProductId::new("B"));
        assert_eq!(filled.items()[1].quantity, 2);
        assert_eq!(filled.items()[1].display_name, "Beeswax Candle");
        assert!(!filled.items()[1].is_placeholder());
    }

    #[test]
    fn test_items_equal_ignores_order() {
        let a = CartSnapshot::empty()
            .with_added(item("A", 1, 100))
            .with_added(item("B", 2, 200));
        let b = CartSnapshot::empty()
            .with_added(item("B", 2, 200))
            .with_added(item("A", 1, 100));
        assert!(a.items_equal(&b));
        assert_ne!(a, b, "ordered equality still distinguishes them");
    }

    #[test]
    fn test_items_equal_detects_quantity_difference() {
        let a = CartSnapshot::empty().with_added(item("A", 1, 100));
        let b = CartSnapshot::empty().with_added(item("A", 2, 100));
        assert!(!a.items_equal(&b));
    }

    #[test]
    fn test_snapshot_serializes_as_array() {
        let snap = CartSnapshot::empty().with_added(item("A", 2, 1000));
        let json = serde_json::to_value(&snap).unwrap();
        assert!(json.is_array());

        let back: CartSnapshot = serde_json::from_value(json).unwrap();
        assert_eq!(back, snap);
    }
}
