//! Product catalog collaborator.
//!
//! The engine only needs one thing from the catalog: enough detail to turn a
//! placeholder cart line (product id and quantity, added optimistically)
//! into a displayable one. Summaries are cached with `moka` (5-minute TTL)
//! since the same product is looked up from every device and tab.

use std::time::Duration;

use async_trait::async_trait;
use moka::future::Cache;
use thiserror::Error;
use tracing::{debug, instrument};

use basket_core::{ProductId, ProductSummary};

use crate::config::SyncConfig;

/// Errors from catalog lookups. Backfill treats all of them as "try again
/// on the next add"; the placeholder line stays usable meanwhile.
#[derive(Debug, Error)]
pub enum CatalogError {
    /// HTTP request failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// API returned an error response.
    #[error("API error: {status} - {message}")]
    Api { status: u16, message: String },

    /// Product does not exist.
    #[error("product not found: {0}")]
    NotFound(ProductId),

    /// Failed to parse response.
    #[error("parse error: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Source of product summaries for placeholder backfill.
#[async_trait]
pub trait ProductCatalog: Send + Sync {
    /// Look up display name, unit price, and image for one product.
    async fn fetch_product_summary(
        &self,
        product_id: &ProductId,
    ) -> Result<ProductSummary, CatalogError>;
}

/// HTTP catalog client: `GET /api/products/{product_id}`.
#[derive(Clone)]
pub struct HttpCatalog {
    client: reqwest::Client,
    api_base: String,
    cache: Cache<ProductId, ProductSummary>,
}

impl HttpCatalog {
    /// Create a catalog client for the configured API base.
    #[must_use]
    pub fn new(config: &SyncConfig) -> Self {
        let cache = Cache::builder()
            .max_capacity(1000)
            .time_to_live(Duration::from_secs(300)) // 5 minutes
            .build();

        Self {
            client: reqwest::Client::new(),
            api_base: config.api_base.as_str().trim_end_matches('/').to_string(),
            cache,
        }
    }
}

#[async_trait]
impl ProductCatalog for HttpCatalog {
    #[instrument(skip(self), fields(product_id = %product_id))]
    async fn fetch_product_summary(
        &self,
        product_id: &ProductId,
    ) -> Result<ProductSummary, CatalogError> {
        // Check cache
        if let Some(summary) = self.cache.get(product_id).await {
            debug!("cache hit for product summary");
            return Ok(summary);
        }

        let url = format!("{}/api/products/{}", self.api_base, product_id);
        let response = self.client.get(&url).send().await?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(CatalogError::NotFound(product_id.clone()));
        }
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(CatalogError::Api {
                status: status.as_u16(),
                message: message.chars().take(200).collect(),
            });
        }

        let body = response.text().await?;
        let summary: ProductSummary = serde_json::from_str(&body)?;

        // Cache the result
        self.cache
            .insert(product_id.clone(), summary.clone())
            .await;

        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_catalog_error_display() {
        let err = CatalogError::NotFound(ProductId::new("prod-9"));
        assert_eq!(err.to_string(), "product not found: prod-9");

        let err = CatalogError::Api {
            status: 503,
            message: "maintenance".to_string(),
        };
        assert_eq!(err.to_string(), "API error: 503 - maintenance");
    }
}
