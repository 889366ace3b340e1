//! Basket CLI - drive a cart sync engine from a terminal.
//!
//! # Usage
//!
//! ```bash
//! # Show the cart currently known to this device (offline, cache only)
//! bk-cli show
//!
//! # Add two units of a product (engine pushes to the backend)
//! bk-cli add prod-42 -q 2
//!
//! # Change a quantity / remove a line / empty the cart
//! bk-cli set-qty prod-42 5
//! bk-cli remove prod-42
//! bk-cli clear
//!
//! # Force a reconciliation fetch and print the outcome
//! bk-cli fetch
//!
//! # Watch live updates from other devices until Ctrl+C
//! bk-cli watch
//! ```
//!
//! # Environment Variables
//!
//! - `BASKET_API_BASE`, `BASKET_CHANNEL_URL` - backend endpoints
//! - `BASKET_USER_ID`, `BASKET_AUTH_TOKEN` - identity for networked commands
//! - `BASKET_CACHE_DIR` - device cache location (default `.basket`)

#![cfg_attr(not(test), forbid(unsafe_code))]
// A CLI talks on stdout; the workspace-wide restriction targets services.
#![allow(clippy::print_stdout)]

use clap::{Parser, Subcommand};

mod commands;

use commands::cart;

#[derive(Parser)]
#[command(name = "bk-cli")]
#[command(author, version, about = "Basket cart sync CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the cart from the device cache (no network)
    Show,
    /// Add units of a product to the cart
    Add {
        /// Product ID
        product_id: String,

        /// Quantity to add
        #[arg(short, long, default_value_t = 1)]
        quantity: u32,
    },
    /// Set the quantity of a cart line (0 removes it)
    SetQty {
        /// Product ID
        product_id: String,

        /// New quantity
        quantity: u32,
    },
    /// Remove a cart line
    Remove {
        /// Product ID
        product_id: String,
    },
    /// Empty the cart
    Clear,
    /// Force an authoritative fetch and print the outcome
    Fetch,
    /// Run the engine and print updates as they arrive (Ctrl+C to stop)
    Watch,
}

#[tokio::main]
async fn main() {
    // Default to info level for our crates if RUST_LOG is not set
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "basket_sync=info,basket_cli=info".into());
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Show => cart::show().await,
        Commands::Add {
            product_id,
            quantity,
        } => cart::add(&product_id, quantity).await,
        Commands::SetQty {
            product_id,
            quantity,
        } => cart::set_qty(&product_id, quantity).await,
        Commands::Remove { product_id } => cart::remove(&product_id).await,
        Commands::Clear => cart::clear().await,
        Commands::Fetch => cart::fetch().await,
        Commands::Watch => cart::watch().await,
    };

    if let Err(e) = result {
        tracing::error!("{e}");
        std::process::exit(1);
    }
}
