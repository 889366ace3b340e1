//! Checkout value objects persisted alongside the cart.
//!
//! Shipping address and payment method ride along in the device cache only.
//! They are never pushed over the real-time channel: checkout context is
//! single-device by design, so there is nothing to reconcile.

use serde::{Deserialize, Serialize};

/// Where an order ships. Opaque to the sync engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShippingAddress {
    pub recipient: String,
    pub line1: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line2: Option<String>,
    pub city: String,
    pub region: String,
    pub postal_code: String,
    /// ISO 3166-1 alpha-2 country code.
    pub country: String,
}

/// The payment method the user selected for checkout. Opaque to the sync
/// engine; `method_id` is a token issued by the payment collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentMethod {
    pub method_id: String,
    /// Display label, e.g. "Visa ending 4242".
    pub label: String,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_shipping_address_roundtrip() {
        let addr = ShippingAddress {
            recipient: "Sam Field".to_string(),
            line1: "12 Orchard Way".to_string(),
            line2: None,
            city: "Portland".to_string(),
            region: "OR".to_string(),
            postal_code: "97201".to_string(),
            country: "US".to_string(),
        };

        let json = serde_json::to_string(&addr).unwrap();
        assert!(!json.contains("line2"), "absent line2 is omitted");

        let back: ShippingAddress = serde_json::from_str(&json).unwrap();
        assert_eq!(back, addr);
    }

    #[test]
    fn test_payment_method_roundtrip() {
        let method = PaymentMethod {
            method_id: "pm_9f8a7".to_string(),
            label: "Visa ending 4242".to_string(),
        };
        let json = serde_json::to_string(&method).unwrap();
        let back: PaymentMethod = serde_json::from_str(&json).unwrap();
        assert_eq!(back, method);
    }
}
