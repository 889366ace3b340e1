//! Basket Core - Shared cart domain types.
//!
//! This crate provides the common types used across all Basket components:
//! - `sync` - The cart synchronization engine
//! - `cli` - Command-line tool for driving an engine against a backend
//!
//! # Architecture
//!
//! The core crate contains only types - no I/O, no HTTP clients, no timers.
//! Everything here is pure data plus pure transformations, which keeps the
//! snapshot algebra unit-testable without a runtime.
//!
//! # Modules
//!
//! - [`types`] - Cart items and snapshots, checkout value objects, channel
//!   wire messages, and the status signals exposed to a UI layer

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod types;

pub use types::*;
