//! Real-time channel manager - thin client over `tokio-tungstenite`.
//!
//! Maintains the persistent, authenticated WebSocket to the backend and
//! drives an explicit state machine:
//!
//! ```text
//! Disconnected -> Connecting -> Authenticating -> Connected
//!       ^             |                |             |
//!       |             +----------------+-------------+--> Reconnecting
//!       +--(attempts exhausted)--------|                      |
//!                                      +---(backoff delay)----+
//! Closed: terminal, explicit teardown only.
//! ```
//!
//! The manager is a single task owning the socket; callers talk to it
//! through a command mpsc and observe it through a `watch` of
//! [`ChannelState`] plus an event mpsc. Messages submitted before the
//! authentication ack are buffered and drained on ack, not dropped.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use secrecy::{ExposeSecret, SecretString};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::AUTHORIZATION;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use url::Url;

use basket_core::{CartSnapshot, ChannelMessage, ChannelState, ClientId, UserId};

use crate::config::SyncConfig;
use crate::session::{LifecycleGuard, SyncSessionContext};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;

/// How long a graceful shutdown waits before aborting the task.
const SHUTDOWN_GRACE: Duration = Duration::from_millis(500);

/// Something the channel wants the engine to act on.
#[derive(Debug)]
pub enum ChannelEvent {
    /// A validated, non-echo cart update from another device.
    RemoteUpdate(CartSnapshot),
    /// The backend rejected our credential; not retried.
    AuthRejected { reason: String },
    /// Reconnection attempts are exhausted for this session.
    Exhausted { attempts: u32 },
}

#[derive(Debug)]
enum ChannelCommand {
    Send(ChannelMessage),
    Close,
}

/// Caller-side handle to a running channel task.
#[derive(Debug)]
pub struct ChannelHandle {
    cmd_tx: mpsc::UnboundedSender<ChannelCommand>,
    state_rx: watch::Receiver<ChannelState>,
    task: JoinHandle<()>,
}

impl ChannelHandle {
    /// Current state of the channel.
    #[must_use]
    pub fn state(&self) -> ChannelState {
        *self.state_rx.borrow()
    }

    /// Whether outbound updates go out immediately (authenticated ack seen).
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.state().is_ready()
    }

    /// Watch the state machine.
    #[must_use]
    pub fn state_receiver(&self) -> watch::Receiver<ChannelState> {
        self.state_rx.clone()
    }

    /// Submit a message. Buffered if the channel is not ready yet; silently
    /// dropped only when the task is already gone.
    pub fn send(&self, message: ChannelMessage) {
        if self.cmd_tx.send(ChannelCommand::Send(message)).is_err() {
            tracing::debug!("channel task gone, dropping outbound message");
        }
    }

    /// A clonable submitter detached from the handle's lifetime.
    #[must_use]
    pub fn sender(&self) -> ChannelSender {
        ChannelSender {
            cmd_tx: self.cmd_tx.clone(),
        }
    }

    /// Tear the channel down: close the socket, cancel pending reconnect
    /// timers, and stop the task. The state machine ends in `Closed`; a
    /// torn-down channel never reconnects.
    pub async fn shutdown(mut self) {
        let _ = self.cmd_tx.send(ChannelCommand::Close);
        if tokio::time::timeout(SHUTDOWN_GRACE, &mut self.task)
            .await
            .is_err()
        {
            self.task.abort();
        }
    }
}

/// Clonable message submitter; see [`ChannelHandle::sender`].
#[derive(Debug, Clone)]
pub struct ChannelSender {
    cmd_tx: mpsc::UnboundedSender<ChannelCommand>,
}

impl ChannelSender {
    /// Submit a message, exactly like [`ChannelHandle::send`].
    pub fn send(&self, message: ChannelMessage) {
        if self.cmd_tx.send(ChannelCommand::Send(message)).is_err() {
            tracing::debug!("channel task gone, dropping outbound message");
        }
    }
}

/// Spawn the channel task for one session.
#[must_use]
pub fn spawn(
    config: &SyncConfig,
    session: &Arc<SyncSessionContext>,
    events_tx: mpsc::UnboundedSender<ChannelEvent>,
) -> ChannelHandle {
    let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
    let (state_tx, state_rx) = watch::channel(ChannelState::Disconnected);

    let manager = ChannelManager {
        url: config.channel_url.clone(),
        auth_token: session.auth_token.clone(),
        user_id: session.user_id.clone(),
        client_id: session.client_id,
        connect_timeout: config.connect_timeout,
        backoff_base: config.backoff_base,
        backoff_ceiling: config.backoff_ceiling,
        max_attempts: config.max_reconnect_attempts,
        lifecycle: session.lifecycle.clone(),
        cmd_rx,
        state_tx,
        events_tx,
        pending: VecDeque::new(),
        attempt: 0,
    };

    let task = tokio::spawn(manager.run());
    ChannelHandle {
        cmd_tx,
        state_rx,
        task,
    }
}

enum ConnectResult {
    Connected(WsStream),
    Failed,
    Closed,
}

enum DriveEnd {
    /// Socket dropped or errored; reconnection logic applies.
    Lost,
    /// Explicit teardown.
    Closed,
    /// Credential rejected; no automatic retry.
    AuthRejected,
}

struct ChannelManager {
    url: Url,
    auth_token: SecretString,
    user_id: UserId,
    client_id: ClientId,
    connect_timeout: Duration,
    backoff_base: Duration,
    backoff_ceiling: Duration,
    max_attempts: u32,
    lifecycle: LifecycleGuard,
    cmd_rx: mpsc::UnboundedReceiver<ChannelCommand>,
    state_tx: watch::Sender<ChannelState>,
    events_tx: mpsc::UnboundedSender<ChannelEvent>,
    /// Outbound messages awaiting the authenticated ack.
    pending: VecDeque<ChannelMessage>,
    /// Consecutive failed connection attempts; reset on authenticated ack.
    attempt: u32,
}

impl ChannelManager {
    fn set_state(&self, state: ChannelState) {
        if self.state_tx.send_if_modified(|current| {
            if *current == state {
                false
            } else {
                *current = state;
                true
            }
        }) {
            tracing::debug!(%state, "channel state");
        }
    }

    async fn run(mut self) {
        loop {
            if !self.lifecycle.is_active() {
                self.set_state(ChannelState::Closed);
                return;
            }
            self.set_state(ChannelState::Connecting);

            match self.connect().await {
                ConnectResult::Closed => {
                    self.set_state(ChannelState::Closed);
                    return;
                }
                ConnectResult::Failed => {
                    if !self.backoff().await {
                        return;
                    }
                }
                ConnectResult::Connected(ws) => match self.drive(ws).await {
                    DriveEnd::Closed => {
                        self.set_state(ChannelState::Closed);
                        return;
                    }
                    DriveEnd::AuthRejected => {
                        // Auth failures are not retried; the engine degrades
                        // to local-only and waits for a fresh identity.
                        self.set_state(ChannelState::Disconnected);
                        return;
                    }
                    DriveEnd::Lost => {
                        if !self.lifecycle.is_active() {
                            self.set_state(ChannelState::Closed);
                            return;
                        }
                        if !self.backoff().await {
                            return;
                        }
                    }
                },
            }
        }
    }

    /// One connection attempt, bounded by the connect timeout. Commands
    /// arriving mid-attempt are buffered (`Send`) or honored (`Close`).
    async fn connect(&mut self) -> ConnectResult {
        let Some(request) = self.client_request() else {
            return ConnectResult::Failed;
        };

        let connect_fut = tokio::time::timeout(self.connect_timeout, connect_async(request));
        tokio::pin!(connect_fut);

        loop {
            tokio::select! {
                result = &mut connect_fut => {
                    return match result {
                        Ok(Ok((ws, _response))) => ConnectResult::Connected(ws),
                        Ok(Err(e)) => {
                            tracing::warn!(error = %e, "channel connect failed");
                            ConnectResult::Failed
                        }
                        Err(_elapsed) => {
                            tracing::warn!(timeout = ?self.connect_timeout, "channel connect timed out");
                            ConnectResult::Failed
                        }
                    };
                }
                cmd = self.cmd_rx.recv() => match cmd {
                    Some(ChannelCommand::Send(msg)) => self.pending.push_back(msg),
                    Some(ChannelCommand::Close) | None => return ConnectResult::Closed,
                }
            }
        }
    }

    fn client_request(
        &self,
    ) -> Option<tokio_tungstenite::tungstenite::handshake::client::Request> {
        let mut request = match self.url.as_str().into_client_request() {
            Ok(request) => request,
            Err(e) => {
                tracing::error!(error = %e, url = %self.url, "invalid channel URL");
                return None;
            }
        };
        let bearer = format!("Bearer {}", self.auth_token.expose_secret());
        match HeaderValue::from_str(&bearer) {
            Ok(value) => {
                request.headers_mut().insert(AUTHORIZATION, value);
            }
            Err(e) => {
                tracing::warn!(error = %e, "credential not header-safe, connecting without it");
            }
        }
        Some(request)
    }

    /// Drive an open socket: handshake, then route frames and commands until
    /// the connection ends.
    async fn drive(&mut self, ws: WsStream) -> DriveEnd {
        self.set_state(ChannelState::Authenticating);

        let (mut tx, mut rx) = ws.split();
        let hello = ChannelMessage::Authenticate {
            user_id: self.user_id.clone(),
            client_id: self.client_id,
        };
        if send_frame(&mut tx, &hello).await.is_err() {
            return DriveEnd::Lost;
        }

        let auth_deadline = tokio::time::Instant::now() + self.connect_timeout;
        let mut ready = false;

        loop {
            tokio::select! {
                cmd = self.cmd_rx.recv() => match cmd {
                    Some(ChannelCommand::Send(msg)) => {
                        if ready {
                            if send_frame(&mut tx, &msg).await.is_err() {
                                // Keep it; the next connection drains pending.
                                self.pending.push_back(msg);
                                return DriveEnd::Lost;
                            }
                        } else {
                            self.pending.push_back(msg);
                        }
                    }
                    Some(ChannelCommand::Close) | None => {
                        let _ = tx.send(Message::Close(None)).await;
                        return DriveEnd::Closed;
                    }
                },
                () = tokio::time::sleep_until(auth_deadline), if !ready => {
                    tracing::warn!("authentication ack timed out");
                    return DriveEnd::Lost;
                }
                frame = rx.next() => match frame {
                    Some(Ok(Message::Text(text))) => {
                        if let Some(end) = self.handle_frame(&text, &mut tx, &mut ready).await {
                            return end;
                        }
                    }
                    Some(Ok(Message::Ping(_) | Message::Pong(_) | Message::Binary(_) | Message::Frame(_))) => {}
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => return DriveEnd::Lost,
                }
            }
        }
    }

    /// Route one inbound text frame. Returns `Some` when the connection must
    /// end.
    async fn handle_frame(
        &mut self,
        text: &str,
        tx: &mut WsSink,
        ready: &mut bool,
    ) -> Option<DriveEnd> {
        let message = match ChannelMessage::parse(text) {
            Ok(message) => message,
            Err(e) => {
                // Malformed events are logged and ignored, never applied.
                tracing::warn!(error = %e, "malformed channel frame, ignoring");
                return None;
            }
        };

        match message {
            ChannelMessage::Authenticated => {
                *ready = true;
                self.attempt = 0;
                self.set_state(ChannelState::Connected);
                // Drain everything buffered while we waited for the ack.
                while let Some(msg) = self.pending.pop_front() {
                    if send_frame(tx, &msg).await.is_err() {
                        self.pending.push_front(msg);
                        return Some(DriveEnd::Lost);
                    }
                }
                None
            }
            ChannelMessage::AuthError { reason } => {
                tracing::warn!(%reason, "channel authentication rejected");
                let _ = self
                    .events_tx
                    .send(ChannelEvent::AuthRejected { reason });
                Some(DriveEnd::AuthRejected)
            }
            ChannelMessage::CartUpdated {
                snapshot,
                source_id,
            } => {
                if !*ready {
                    tracing::debug!("cart update before authentication ack, ignoring");
                } else if source_id == self.client_id {
                    tracing::debug!("own echo, ignoring");
                } else {
                    let _ = self.events_tx.send(ChannelEvent::RemoteUpdate(snapshot));
                }
                None
            }
            ChannelMessage::Authenticate { .. } | ChannelMessage::CartUpdate { .. } => {
                tracing::debug!("unexpected client-bound frame, ignoring");
                None
            }
        }
    }

    /// Wait out the next backoff delay. Returns `false` when the manager
    /// must stop (closed, or attempts exhausted).
    async fn backoff(&mut self) -> bool {
        self.attempt += 1;
        if self.attempt > self.max_attempts {
            tracing::warn!(
                attempts = self.max_attempts,
                "reconnection attempts exhausted"
            );
            let _ = self.events_tx.send(ChannelEvent::Exhausted {
                attempts: self.max_attempts,
            });
            self.set_state(ChannelState::Disconnected);
            return false;
        }

        self.set_state(ChannelState::Reconnecting);
        let delay = backoff_delay(self.attempt, self.backoff_base, self.backoff_ceiling);
        tracing::debug!(attempt = self.attempt, ?delay, "reconnect backoff");

        let sleep = tokio::time::sleep(delay);
        tokio::pin!(sleep);
        loop {
            tokio::select! {
                () = &mut sleep => return true,
                cmd = self.cmd_rx.recv() => match cmd {
                    Some(ChannelCommand::Send(msg)) => self.pending.push_back(msg),
                    Some(ChannelCommand::Close) | None => {
                        self.set_state(ChannelState::Closed);
                        return false;
                    }
                }
            }
        }
    }
}

async fn send_frame(
    tx: &mut WsSink,
    message: &ChannelMessage,
) -> Result<(), tokio_tungstenite::tungstenite::Error> {
    let text = match message.encode() {
        Ok(text) => text,
        Err(e) => {
            tracing::error!(error = %e, "failed to encode channel frame");
            return Ok(());
        }
    };
    tx.send(Message::Text(text.into())).await
}

/// Exponential backoff: base doubling per attempt, capped at the ceiling.
fn backoff_delay(attempt: u32, base: Duration, ceiling: Duration) -> Duration {
    let exponent = attempt.saturating_sub(1).min(16);
    base.saturating_mul(2_u32.saturating_pow(exponent)).min(ceiling)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_schedule_doubles_to_ceiling() {
        let base = Duration::from_secs(1);
        let ceiling = Duration::from_secs(10);

        let delays: Vec<u64> = (1..=6)
            .map(|attempt| backoff_delay(attempt, base, ceiling).as_secs())
            .collect();
        assert_eq!(delays, vec![1, 2, 4, 8, 10, 10]);
    }

    #[test]
    fn test_backoff_huge_attempt_does_not_overflow() {
        let delay = backoff_delay(
            u32::MAX,
            Duration::from_secs(1),
            Duration::from_secs(10),
        );
        assert_eq!(delay, Duration::from_secs(10));
    }

    #[test]
    fn test_backoff_first_attempt_is_base() {
        assert_eq!(
            backoff_delay(1, Duration::from_millis(250), Duration::from_secs(10)),
            Duration::from_millis(250)
        );
    }
}
