//! Status signals the engine exposes to its host.

use serde::{Deserialize, Serialize};

/// Connection state of the real-time channel.
///
/// `Closed` is terminal: it is entered only on explicit teardown and nothing
/// transitions out of it. Every other state may fall into `Reconnecting` on
/// error, which returns to `Connecting` after the backoff delay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ChannelState {
    #[default]
    Disconnected,
    Connecting,
    Authenticating,
    Connected,
    Reconnecting,
    Closed,
}

impl ChannelState {
    /// Whether the channel accepts outbound cart updates right now.
    #[must_use]
    pub const fn is_ready(self) -> bool {
        matches!(self, Self::Connected)
    }

    /// Whether this state can never be left.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Closed)
    }
}

impl std::fmt::Display for ChannelState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Authenticating => "authenticating",
            Self::Connected => "connected",
            Self::Reconnecting => "reconnecting",
            Self::Closed => "closed",
        };
        write!(f, "{name}")
    }
}

/// Overall health of the sync session, for the UI to display.
///
/// The important distinction is `Degraded` (network trouble; the engine
/// keeps operating from the local cache and will reconcile later) versus
/// `AuthRequired` (the backend rejected our credential; nothing remote will
/// be attempted until the host supplies a fresh identity).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    /// No authenticated identity; the cart is purely local.
    #[default]
    Offline,
    /// Remote store and/or channel reachable; changes are flowing.
    Live,
    /// Network degraded; operating from the local cache until it recovers.
    Degraded,
    /// The credential was rejected; re-authentication is needed.
    AuthRequired,
}

impl SyncStatus {
    /// Whether remote calls are currently worth attempting.
    #[must_use]
    pub const fn allows_remote(self) -> bool {
        matches!(self, Self::Live | Self::Degraded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_state_readiness() {
        assert!(ChannelState::Connected.is_ready());
        assert!(!ChannelState::Authenticating.is_ready());
        assert!(!ChannelState::Reconnecting.is_ready());
    }

    #[test]
    fn test_only_closed_is_terminal() {
        for state in [
            ChannelState::Disconnected,
            ChannelState::Connecting,
            ChannelState::Authenticating,
            ChannelState::Connected,
            ChannelState::Reconnecting,
        ] {
            assert!(!state.is_terminal(), "{state} must not be terminal");
        }
        assert!(ChannelState::Closed.is_terminal());
    }

    #[test]
    fn test_auth_required_blocks_remote() {
        assert!(!SyncStatus::AuthRequired.allows_remote());
        assert!(!SyncStatus::Offline.allows_remote());
        assert!(SyncStatus::Degraded.allows_remote());
        assert!(SyncStatus::Live.allows_remote());
    }
}
