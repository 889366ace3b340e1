//! Cart commands: run an engine against the configured backend.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use basket_core::{CartSnapshot, ProductId, SyncStatus};
use basket_sync::catalog::HttpCatalog;
use basket_sync::{ConfigError, FetchOutcome, Identity, SyncConfig, SyncEngine};

/// Give the debounced push time to leave before the process exits.
const FLUSH_GRACE: Duration = Duration::from_millis(1_500);

/// Errors that can occur running cart commands.
#[derive(Debug, Error)]
pub enum CartCliError {
    /// Engine configuration is incomplete or invalid.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Identity variables are missing for a networked command.
    #[error("missing environment variable: {0}")]
    MissingEnvVar(&'static str),
}

fn identity_from_env() -> Result<Identity, CartCliError> {
    let user_id = std::env::var("BASKET_USER_ID")
        .map_err(|_| CartCliError::MissingEnvVar("BASKET_USER_ID"))?;
    let auth_token = std::env::var("BASKET_AUTH_TOKEN")
        .map_err(|_| CartCliError::MissingEnvVar("BASKET_AUTH_TOKEN"))?;
    Ok(Identity::new(user_id, auth_token))
}

async fn signed_in_engine(config: SyncConfig) -> Result<SyncEngine, CartCliError> {
    let identity = identity_from_env()?;
    let catalog = Arc::new(HttpCatalog::new(&config));
    let engine = SyncEngine::new(config, catalog).await;
    engine.set_identity(Some(identity)).await;
    Ok(engine)
}

fn print_snapshot(snapshot: &CartSnapshot) {
    if snapshot.is_empty() {
        println!("(cart is empty)");
        return;
    }
    for item in snapshot.items() {
        let name = if item.is_placeholder() {
            "(details pending)"
        } else {
            item.display_name.as_str()
        };
        println!(
            "{:>4} x {:<12} {:<30} ${}",
            item.quantity,
            item.product_id,
            name,
            item.line_total()
        );
    }
    println!(
        "---- {} items, subtotal ${}",
        snapshot.total_quantity(),
        snapshot.subtotal()
    );
}

/// Print the cart from the device cache, no network.
pub async fn show() -> Result<(), CartCliError> {
    let config = SyncConfig::from_env()?;
    let catalog = Arc::new(HttpCatalog::new(&config));
    let engine = SyncEngine::new(config, catalog).await;
    print_snapshot(&engine.snapshot());
    Ok(())
}

/// Add units of a product, then let the push flush.
pub async fn add(product_id: &str, quantity: u32) -> Result<(), CartCliError> {
    let engine = signed_in_engine(SyncConfig::from_env()?).await?;
    let snapshot = engine.add_product(product_id, quantity);
    print_snapshot(&snapshot);
    settle_and_shutdown(engine).await;
    Ok(())
}

/// Set a line's quantity (0 removes it).
pub async fn set_qty(product_id: &str, quantity: u32) -> Result<(), CartCliError> {
    let engine = signed_in_engine(SyncConfig::from_env()?).await?;
    let snapshot = engine.set_quantity(&ProductId::new(product_id), quantity);
    print_snapshot(&snapshot);
    settle_and_shutdown(engine).await;
    Ok(())
}

/// Remove a line.
pub async fn remove(product_id: &str) -> Result<(), CartCliError> {
    let engine = signed_in_engine(SyncConfig::from_env()?).await?;
    let snapshot = engine.remove_item(&ProductId::new(product_id));
    print_snapshot(&snapshot);
    settle_and_shutdown(engine).await;
    Ok(())
}

/// Empty the cart.
pub async fn clear() -> Result<(), CartCliError> {
    let engine = signed_in_engine(SyncConfig::from_env()?).await?;
    let snapshot = engine.clear();
    print_snapshot(&snapshot);
    settle_and_shutdown(engine).await;
    Ok(())
}

/// Force an authoritative fetch and report what happened.
pub async fn fetch() -> Result<(), CartCliError> {
    // Drop the fetch throttle so this command's own call reports its
    // outcome instead of "skipped" after the login-time fetch.
    let mut config = SyncConfig::from_env()?;
    config.min_fetch_interval = Duration::ZERO;

    let engine = signed_in_engine(config).await?;
    // Let the login-time fetch finish first.
    tokio::time::sleep(Duration::from_millis(300)).await;

    match engine.fetch_authoritative_cart().await {
        FetchOutcome::Skipped => println!("skipped (throttled or already in flight)"),
        FetchOutcome::Replaced(snapshot) => {
            println!("replaced local cart from the authoritative store:");
            print_snapshot(&snapshot);
        }
        FetchOutcome::PushedLocal => println!("remote was empty; pushed the local cart up"),
        FetchOutcome::Unchanged => println!("both sides empty; nothing to reconcile"),
        FetchOutcome::Failed => println!("fetch failed; local cart untouched"),
    }
    engine.shutdown().await;
    Ok(())
}

/// Run until Ctrl+C, printing every snapshot and status change.
pub async fn watch() -> Result<(), CartCliError> {
    let engine = signed_in_engine(SyncConfig::from_env()?).await?;
    let mut snapshots = engine.subscribe();
    let mut statuses = engine.status_receiver();

    println!("watching cart updates (Ctrl+C to stop)");
    loop {
        tokio::select! {
            changed = snapshots.changed() => {
                if changed.is_err() {
                    break;
                }
                let snapshot = snapshots.borrow_and_update().clone();
                println!();
                print_snapshot(&snapshot);
            }
            changed = statuses.changed() => {
                if changed.is_err() {
                    break;
                }
                let status = *statuses.borrow_and_update();
                match status {
                    SyncStatus::Degraded => println!("! network degraded, operating from local cache"),
                    SyncStatus::AuthRequired => println!("! authentication required"),
                    SyncStatus::Live => println!("* live"),
                    SyncStatus::Offline => println!("* offline"),
                }
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    engine.shutdown().await;
    Ok(())
}

async fn settle_and_shutdown(engine: SyncEngine) {
    tokio::time::sleep(FLUSH_GRACE).await;
    engine.shutdown().await;
}
