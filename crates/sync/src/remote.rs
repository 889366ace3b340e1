//! Remote sync client for the authoritative cart store.
//!
//! Plain JSON REST: `GET /api/carts/{user_id}` returns the stored snapshot,
//! `PUT /api/carts/{user_id}` replaces it. Pushes always carry the full
//! snapshot rather than a diff - full snapshots are idempotent and
//! self-healing, so a missed or duplicated push converges to the same end
//! state.

use reqwest::StatusCode;
use secrecy::{ExposeSecret, SecretString};
use thiserror::Error;
use tracing::instrument;

use basket_core::CartSnapshot;

use crate::config::SyncConfig;
use crate::session::Identity;

/// Errors from the authoritative store.
#[derive(Debug, Error)]
pub enum RemoteError {
    /// HTTP transport failed (connection refused, timeout, DNS).
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The store rejected our credential. Never retried automatically.
    #[error("authorization rejected (HTTP {status})")]
    Auth { status: u16 },

    /// The store answered with a non-success status.
    #[error("API error: {status} - {message}")]
    Api { status: u16, message: String },

    /// The response body was not a well-formed snapshot.
    #[error("parse error: {0}")]
    Parse(#[from] serde_json::Error),
}

impl RemoteError {
    /// Whether this failure means the session must degrade to local-only.
    #[must_use]
    pub const fn is_auth(&self) -> bool {
        matches!(self, Self::Auth { .. })
    }
}

/// Result of one authoritative fetch cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    /// Throttled, already in flight, or session is local-only / torn down.
    Skipped,
    /// Remote had a cart; the local snapshot was fully replaced by it.
    Replaced(CartSnapshot),
    /// Remote was empty while we had items; the local cart was pushed up
    /// instead (guest-cart adoption at first login).
    PushedLocal,
    /// Both sides empty; nothing to reconcile.
    Unchanged,
    /// The fetch failed; the local snapshot is untouched.
    Failed,
}

/// Client for the authoritative cart store, bound to one user's cart.
#[derive(Debug, Clone)]
pub struct RemoteSyncClient {
    client: reqwest::Client,
    cart_endpoint: String,
    auth_token: SecretString,
}

impl RemoteSyncClient {
    #[must_use]
    pub fn new(config: &SyncConfig, identity: &Identity) -> Self {
        let cart_endpoint = format!(
            "{}/api/carts/{}",
            config.api_base.as_str().trim_end_matches('/'),
            identity.user_id
        );
        Self {
            client: reqwest::Client::new(),
            cart_endpoint,
            auth_token: identity.auth_token.clone(),
        }
    }

    /// Fetch the stored snapshot. A 404 is a user with no cart yet and comes
    /// back as the empty snapshot.
    ///
    /// # Errors
    ///
    /// Returns `RemoteError` on transport failure, auth rejection, server
    /// error, or a malformed body.
    #[instrument(skip(self))]
    pub async fn fetch_cart(&self) -> Result<CartSnapshot, RemoteError> {
        let response = self
            .client
            .get(&self.cart_endpoint)
            .bearer_auth(self.auth_token.expose_secret())
            .send()
            .await?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(CartSnapshot::empty());
        }
        if !status.is_success() {
            return Err(status_error(status, response).await);
        }

        // Read as text first for better diagnostics on malformed bodies.
        let body = response.text().await?;
        match serde_json::from_str(&body) {
            Ok(snapshot) => Ok(snapshot),
            Err(e) => {
                tracing::error!(
                    error = %e,
                    body = %body.chars().take(200).collect::<String>(),
                    "authoritative store returned a malformed snapshot"
                );
                Err(RemoteError::Parse(e))
            }
        }
    }

    /// Replace the stored snapshot with `snapshot` (full state, never a
    /// diff).
    ///
    /// # Errors
    ///
    /// Returns `RemoteError` on transport failure, auth rejection, or a
    /// server error.
    #[instrument(skip(self, snapshot), fields(items = snapshot.len()))]
    pub async fn push_update(&self, snapshot: &CartSnapshot) -> Result<(), RemoteError> {
        let response = self
            .client
            .put(&self.cart_endpoint)
            .bearer_auth(self.auth_token.expose_secret())
            .json(snapshot)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(status_error(status, response).await)
        }
    }
}

async fn status_error(status: StatusCode, response: reqwest::Response) -> RemoteError {
    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        return RemoteError::Auth {
            status: status.as_u16(),
        };
    }
    let message = response.text().await.unwrap_or_default();
    RemoteError::Api {
        status: status.as_u16(),
        message: message.chars().take(200).collect(),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use url::Url;

    fn client_for(base: &str) -> RemoteSyncClient {
        let config = SyncConfig::new(
            Url::parse(base).unwrap(),
            Url::parse("ws://localhost/channel").unwrap(),
        );
        RemoteSyncClient::new(&config, &Identity::new("user-1", "tok"))
    }

    #[test]
    fn test_cart_endpoint_shape() {
        let client = client_for("http://localhost:8080");
        assert_eq!(
            client.cart_endpoint,
            "http://localhost:8080/api/carts/user-1"
        );
    }

    #[test]
    fn test_cart_endpoint_tolerates_trailing_slash() {
        let client = client_for("http://localhost:8080/");
        assert_eq!(
            client.cart_endpoint,
            "http://localhost:8080/api/carts/user-1"
        );
    }

    #[test]
    fn test_auth_errors_are_distinguished() {
        let auth = RemoteError::Auth { status: 401 };
        let api = RemoteError::Api {
            status: 500,
            message: "boom".to_string(),
        };
        assert!(auth.is_auth());
        assert!(!api.is_auth());
        assert_eq!(auth.to_string(), "authorization rejected (HTTP 401)");
        assert_eq!(api.to_string(), "API error: 500 - boom");
    }
}
