//! Chat hub — the shared push connection.
//!
//! ARCHITECTURE
//! ============
//! One physical websocket multiplexes every open conversation. The hub is
//! constructed once at application start and injected into sessions; only the
//! hub mutates connection state, everyone else observes notifications.
//!
//! A driver task owns the socket: it forwards inbound frames to subscribers
//! and, when the socket drops, runs the reconnect loop (exponential backoff
//! with jitter, unbounded attempts) until the link resumes or `disconnect`
//! supersedes its epoch. The credential is re-acquired from the injected
//! [`TokenProvider`] on every attempt and never cached here.
//!
//! CONTRACTS
//! =========
//! - `connect` is idempotent and only fails on the first handshake.
//! - `join`/`leave`/`send_typing` are best-effort; their absence degrades to
//!   "no push delivery", never to corrupted state.
//! - `send_message` errors when not connected; the caller owns the REST
//!   fallback and any retry/rollback decision.
//! - Handlers run in registration order; a panicking handler is isolated and
//!   the rest still run. Consecutive duplicate state notifications are
//!   allowed; subscribers must be idempotent.

use std::collections::HashSet;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use rand::Rng;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tracing::{debug, info, warn};

use crate::config::ChatConfig;
use crate::error::{ConnectError, SendError};
use crate::lock_unpoisoned;
use crate::model::{ChatId, ConnectionState, TypingEvent};
use crate::wire::{self, HubEvent};

// =============================================================================
// SEAMS
// =============================================================================

/// Credential provider shared with the REST client. Evaluated fresh on every
/// connect and reconnect attempt.
#[async_trait]
pub trait TokenProvider: Send + Sync {
    /// Current access token, or `None` when signed out.
    async fn access_token(&self) -> Option<String>;
}

/// A live socket as a pair of text-frame channels. The inbound receiver
/// closing signals a dropped connection.
pub struct HubSocket {
    pub outbound: mpsc::Sender<String>,
    pub inbound: mpsc::Receiver<String>,
}

/// Opens sockets for the hub. Split out so tests drive the hub without a
/// network.
#[async_trait]
pub trait HubConnector: Send + Sync {
    async fn open(&self, url: &str, token: &str) -> Result<HubSocket, ConnectError>;
}

/// Production connector speaking websocket via tungstenite.
pub struct WsConnector;

#[async_trait]
impl HubConnector for WsConnector {
    async fn open(&self, url: &str, token: &str) -> Result<HubSocket, ConnectError> {
        let separator = if url.contains('?') { '&' } else { '?' };
        let request = format!("{url}{separator}access_token={token}");
        let (stream, _) = tokio_tungstenite::connect_async(request)
            .await
            .map_err(|e| ConnectError::Handshake(e.to_string()))?;

        let (mut sink, mut source) = stream.split();
        let (outbound_tx, mut outbound_rx) = mpsc::channel::<String>(64);
        let (inbound_tx, inbound_rx) = mpsc::channel::<String>(256);

        tokio::spawn(async move {
            while let Some(text) = outbound_rx.recv().await {
                if sink.send(WsMessage::Text(text.into())).await.is_err() {
                    break;
                }
            }
        });

        tokio::spawn(async move {
            while let Some(frame) = source.next().await {
                match frame {
                    Ok(WsMessage::Text(text)) => {
                        if inbound_tx.send(text.as_str().to_owned()).await.is_err() {
                            break;
                        }
                    }
                    Ok(WsMessage::Close(_)) | Err(_) => break,
                    Ok(_) => {}
                }
            }
            // inbound_tx drops here; the driver sees the channel close.
        });

        Ok(HubSocket { outbound: outbound_tx, inbound: inbound_rx })
    }
}

// =============================================================================
// HUB
// =============================================================================

type MessageHandler = Box<dyn Fn(&Value) + Send + Sync>;
type TypingHandler = Box<dyn Fn(&TypingEvent) + Send + Sync>;
type StateHandler = Box<dyn Fn(ConnectionState) + Send + Sync>;

#[derive(Default)]
struct Subscribers {
    next_id: u64,
    message: Vec<(u64, MessageHandler)>,
    typing: Vec<(u64, TypingHandler)>,
    state: Vec<(u64, StateHandler)>,
}

struct Link {
    state: ConnectionState,
    outbound: Option<mpsc::Sender<String>>,
    /// Rooms to (re)join whenever a connection is established.
    rooms: HashSet<ChatId>,
    /// Bumped by `connect`/`disconnect`; a driver whose epoch is stale exits.
    epoch: u64,
}

struct HubShared {
    url: String,
    tokens: Arc<dyn TokenProvider>,
    connector: Arc<dyn HubConnector>,
    backoff_base_ms: u64,
    backoff_cap_ms: u64,
    link: Mutex<Link>,
    subs: Mutex<Subscribers>,
}

/// The shared push channel. Cheap to clone; all clones observe one physical
/// connection.
#[derive(Clone)]
pub struct ChatHub {
    shared: Arc<HubShared>,
}

impl ChatHub {
    /// Hub with the production websocket connector.
    #[must_use]
    pub fn new(config: &ChatConfig, tokens: Arc<dyn TokenProvider>) -> Self {
        Self::with_connector(config, tokens, Arc::new(WsConnector))
    }

    /// Hub with an injected connector. Used by tests and alternate transports.
    #[must_use]
    pub fn with_connector(
        config: &ChatConfig,
        tokens: Arc<dyn TokenProvider>,
        connector: Arc<dyn HubConnector>,
    ) -> Self {
        Self {
            shared: Arc::new(HubShared {
                url: config.hub_url.clone(),
                tokens,
                connector,
                backoff_base_ms: config.reconnect_base_ms,
                backoff_cap_ms: config.reconnect_cap_ms,
                link: Mutex::new(Link {
                    state: ConnectionState::Disconnected,
                    outbound: None,
                    rooms: HashSet::new(),
                    epoch: 0,
                }),
                subs: Mutex::new(Subscribers::default()),
            }),
        }
    }

    #[must_use]
    pub fn state(&self) -> ConnectionState {
        lock_unpoisoned(&self.shared.link).state
    }

    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Establish the connection. No-op if already connected or connecting.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectError`] when the first handshake cannot complete; the
    /// caller decides whether to call again. Once connected, drops are
    /// recovered by the hub's own reconnect loop.
    pub async fn connect(&self) -> Result<(), ConnectError> {
        let epoch = {
            let mut link = lock_unpoisoned(&self.shared.link);
            if link.state != ConnectionState::Disconnected {
                return Ok(());
            }
            link.epoch += 1;
            link.state = ConnectionState::Connecting;
            link.epoch
        };
        self.shared.notify_state(ConnectionState::Connecting);

        match self.shared.open_socket().await {
            Ok(socket) => {
                let Some(inbound) = self.shared.install(epoch, socket).await else {
                    // A disconnect raced the handshake; treat as stopped.
                    return Ok(());
                };
                info!(url = %self.shared.url, "hub: connected");
                let shared = Arc::clone(&self.shared);
                tokio::spawn(drive(shared, epoch, inbound));
                Ok(())
            }
            Err(e) => {
                {
                    let mut link = lock_unpoisoned(&self.shared.link);
                    if link.epoch == epoch {
                        link.state = ConnectionState::Disconnected;
                        link.outbound = None;
                    }
                }
                self.shared.notify_state(ConnectionState::Disconnected);
                warn!(error = %e, "hub: connect failed");
                Err(e)
            }
        }
    }

    /// Explicit stop. Supersedes any driver or reconnect loop in flight.
    pub fn disconnect(&self) {
        {
            let mut link = lock_unpoisoned(&self.shared.link);
            link.epoch += 1;
            link.outbound = None;
            link.state = ConnectionState::Disconnected;
        }
        self.shared.notify_state(ConnectionState::Disconnected);
        info!("hub: disconnected");
    }

    /// Join a conversation room. Best-effort: failure degrades to "no push
    /// delivery for this conversation" — the REST fallback still works. The
    /// room is remembered and re-joined after every (re)connect.
    pub async fn join_conversation(&self, conversation: &ChatId) {
        let outbound = {
            let mut link = lock_unpoisoned(&self.shared.link);
            link.rooms.insert(conversation.clone());
            link.outbound.clone()
        };
        match outbound {
            Some(tx) => {
                if tx.send(wire::invoke_join(conversation)).await.is_err() {
                    warn!(%conversation, "hub: join send failed; push delivery degraded");
                }
            }
            None => {
                warn!(%conversation, "hub: join requested while offline; will join on connect");
            }
        }
    }

    /// Leave a conversation room. Best-effort, always attempted on cleanup.
    pub async fn leave_conversation(&self, conversation: &ChatId) {
        let outbound = {
            let mut link = lock_unpoisoned(&self.shared.link);
            link.rooms.remove(conversation);
            link.outbound.clone()
        };
        if let Some(tx) = outbound {
            if tx.send(wire::invoke_leave(conversation)).await.is_err() {
                debug!(%conversation, "hub: leave send failed");
            }
        }
    }

    /// Push-send a message. Only valid while connected.
    ///
    /// # Errors
    ///
    /// [`SendError::NotConnected`] when the hub is not connected; the caller
    /// falls back to the REST transport.
    pub async fn send_message(&self, conversation: &ChatId, content: &str) -> Result<(), SendError> {
        let outbound = {
            let link = lock_unpoisoned(&self.shared.link);
            if link.state != ConnectionState::Connected {
                return Err(SendError::NotConnected);
            }
            link.outbound.clone()
        };
        let Some(tx) = outbound else {
            return Err(SendError::NotConnected);
        };
        tx.send(wire::invoke_send_message(conversation, content))
            .await
            .map_err(|_| SendError::NotConnected)
    }

    /// Fire-and-forget typing signal. Failures are swallowed: a lost typing
    /// indicator is not worth surfacing.
    pub fn send_typing(&self, conversation: &ChatId, is_typing: bool) {
        let outbound = lock_unpoisoned(&self.shared.link).outbound.clone();
        if let Some(tx) = outbound {
            let _ = tx.try_send(wire::invoke_typing(conversation, is_typing));
        }
    }

    /// Subscribe to raw message payloads. Handlers run in registration order.
    pub fn on_message(&self, handler: impl Fn(&Value) + Send + Sync + 'static) -> Subscription {
        let mut subs = lock_unpoisoned(&self.shared.subs);
        subs.next_id += 1;
        let id = subs.next_id;
        subs.message.push((id, Box::new(handler)));
        Subscription { shared: Arc::downgrade(&self.shared), kind: SubKind::Message, id }
    }

    /// Subscribe to typing events.
    pub fn on_typing(&self, handler: impl Fn(&TypingEvent) + Send + Sync + 'static) -> Subscription {
        let mut subs = lock_unpoisoned(&self.shared.subs);
        subs.next_id += 1;
        let id = subs.next_id;
        subs.typing.push((id, Box::new(handler)));
        Subscription { shared: Arc::downgrade(&self.shared), kind: SubKind::Typing, id }
    }

    /// Subscribe to connection-state changes.
    pub fn on_state(&self, handler: impl Fn(ConnectionState) + Send + Sync + 'static) -> Subscription {
        let mut subs = lock_unpoisoned(&self.shared.subs);
        subs.next_id += 1;
        let id = subs.next_id;
        subs.state.push((id, Box::new(handler)));
        Subscription { shared: Arc::downgrade(&self.shared), kind: SubKind::State, id }
    }
}

// =============================================================================
// SUBSCRIPTIONS
// =============================================================================

#[derive(Clone, Copy)]
enum SubKind {
    Message,
    Typing,
    State,
}

/// Handle for a registered handler. Unregisters on drop or [`cancel`].
///
/// [`cancel`]: Subscription::cancel
pub struct Subscription {
    shared: Weak<HubShared>,
    kind: SubKind,
    id: u64,
}

impl Subscription {
    /// Explicit unsubscribe; equivalent to dropping.
    pub fn cancel(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(shared) = self.shared.upgrade() {
            let mut subs = lock_unpoisoned(&shared.subs);
            match self.kind {
                SubKind::Message => subs.message.retain(|(id, _)| *id != self.id),
                SubKind::Typing => subs.typing.retain(|(id, _)| *id != self.id),
                SubKind::State => subs.state.retain(|(id, _)| *id != self.id),
            }
        }
    }
}

// =============================================================================
// DRIVER
// =============================================================================

impl HubShared {
    async fn open_socket(&self) -> Result<HubSocket, ConnectError> {
        let Some(token) = self.tokens.access_token().await else {
            return Err(ConnectError::NoToken);
        };
        self.connector.open(&self.url, &token).await
    }

    fn still_current(&self, epoch: u64) -> bool {
        lock_unpoisoned(&self.link).epoch == epoch
    }

    /// Install a fresh socket, notify, and re-join known rooms. Returns the
    /// inbound half, or `None` when the epoch was superseded meanwhile.
    async fn install(&self, epoch: u64, socket: HubSocket) -> Option<mpsc::Receiver<String>> {
        let rooms = {
            let mut link = lock_unpoisoned(&self.link);
            if link.epoch != epoch {
                return None;
            }
            link.state = ConnectionState::Connected;
            link.outbound = Some(socket.outbound.clone());
            link.rooms.iter().cloned().collect::<Vec<_>>()
        };
        self.notify_state(ConnectionState::Connected);

        for room in rooms {
            if socket.outbound.send(wire::invoke_join(&room)).await.is_err() {
                warn!(conversation = %room, "hub: room re-join failed");
            }
        }
        Some(socket.inbound)
    }

    fn backoff_delay(&self, attempt: u32) -> Duration {
        let exp = self.backoff_base_ms.saturating_mul(1_u64 << attempt.min(16));
        let jitter = rand::rng().random_range(0..=self.backoff_base_ms / 2);
        Duration::from_millis(exp.min(self.backoff_cap_ms) + jitter)
    }

    /// Retry the handshake until it succeeds or the epoch is superseded.
    async fn reconnect_loop(&self, epoch: u64) -> Option<mpsc::Receiver<String>> {
        let mut attempt: u32 = 0;
        loop {
            if !self.still_current(epoch) {
                return None;
            }
            tokio::time::sleep(self.backoff_delay(attempt)).await;
            if !self.still_current(epoch) {
                return None;
            }
            match self.open_socket().await {
                Ok(socket) => match self.install(epoch, socket).await {
                    Some(inbound) => {
                        info!(attempt, "hub: reconnected");
                        return Some(inbound);
                    }
                    None => return None,
                },
                Err(e) => {
                    warn!(error = %e, attempt, "hub: reconnect attempt failed");
                    attempt = attempt.saturating_add(1);
                }
            }
        }
    }

    fn dispatch(&self, text: &str) {
        match wire::decode_event(text) {
            Ok(HubEvent::Message(payload)) => {
                let subs = lock_unpoisoned(&self.subs);
                for (id, handler) in &subs.message {
                    if catch_unwind(AssertUnwindSafe(|| handler(&payload))).is_err() {
                        warn!(handler = id, "hub: message handler panicked");
                    }
                }
            }
            Ok(HubEvent::Typing(event)) => {
                let subs = lock_unpoisoned(&self.subs);
                for (id, handler) in &subs.typing {
                    if catch_unwind(AssertUnwindSafe(|| handler(&event))).is_err() {
                        warn!(handler = id, "hub: typing handler panicked");
                    }
                }
            }
            Ok(HubEvent::Unknown { target }) => {
                debug!(%target, "hub: ignoring unknown event");
            }
            Err(e) => {
                warn!(error = %e, "hub: invalid inbound frame");
            }
        }
    }

    fn notify_state(&self, state: ConnectionState) {
        let subs = lock_unpoisoned(&self.subs);
        for (id, handler) in &subs.state {
            if catch_unwind(AssertUnwindSafe(|| handler(state))).is_err() {
                warn!(handler = id, "hub: state handler panicked");
            }
        }
    }

    fn transition(&self, epoch: u64, state: ConnectionState) {
        {
            let mut link = lock_unpoisoned(&self.link);
            if link.epoch != epoch {
                return;
            }
            link.state = state;
            if state != ConnectionState::Connected {
                link.outbound = None;
            }
        }
        self.notify_state(state);
    }
}

/// Socket loop: forward inbound frames, recover drops, exit when superseded.
async fn drive(shared: Arc<HubShared>, epoch: u64, mut inbound: mpsc::Receiver<String>) {
    loop {
        while let Some(text) = inbound.recv().await {
            // An explicit disconnect may race frames still in the socket
            // buffer; nothing from a superseded epoch may be delivered.
            if !shared.still_current(epoch) {
                return;
            }
            shared.dispatch(&text);
        }

        if !shared.still_current(epoch) {
            return;
        }
        warn!("hub: connection dropped; reconnecting");
        shared.transition(epoch, ConnectionState::Reconnecting);

        match shared.reconnect_loop(epoch).await {
            Some(next_inbound) => inbound = next_inbound,
            None => return,
        }
    }
}

#[cfg(test)]
#[path = "transport_test.rs"]
mod tests;
