//! Core types for Basket.
//!
//! This module provides type-safe wrappers for the cart domain.

pub mod checkout;
pub mod id;
pub mod item;
pub mod status;
pub mod wire;

pub use checkout::{PaymentMethod, ShippingAddress};
pub use id::{ClientId, ProductId, UserId};
pub use item::{CartItem, CartSnapshot, ProductSummary};
pub use status::{ChannelState, SyncStatus};
pub use wire::ChannelMessage;
