//! Wire messages exchanged on the real-time channel.
//!
//! Frames are JSON, tagged by a `type` field. The same enum covers both
//! directions; which variants a side actually sends is a protocol matter,
//! not a type-level one (`cart_update` goes client-to-server, `cart_updated`
//! is the server broadcast fanned out to the user's other connections).

use serde::{Deserialize, Serialize};

use super::id::{ClientId, UserId};
use super::item::CartSnapshot;

/// One frame on the channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChannelMessage {
    /// First frame after the socket opens. `client_id` is generated by the
    /// client so the server can tag broadcasts with their origin.
    Authenticate {
        user_id: UserId,
        client_id: ClientId,
    },
    /// Server acknowledgment; the channel is ready after this.
    Authenticated,
    /// Server rejection of the credential or user id.
    AuthError { reason: String },
    /// Client-originated full-cart update.
    CartUpdate { snapshot: CartSnapshot },
    /// Server broadcast of a cart change made by `source_id`. A receiver
    /// whose own client id equals `source_id` is hearing its own echo.
    CartUpdated {
        snapshot: CartSnapshot,
        source_id: ClientId,
    },
}

impl ChannelMessage {
    /// Parse a frame from JSON text. Malformed frames are an error, never a
    /// panic; the channel manager logs and drops them.
    ///
    /// # Errors
    ///
    /// Returns the underlying `serde_json` error for anything that is not a
    /// well-formed frame.
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    /// Encode a frame as JSON text.
    ///
    /// # Errors
    ///
    /// Returns the underlying `serde_json` error; in practice encoding these
    /// types cannot fail.
    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}
