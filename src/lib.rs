//! jobchat — realtime chat synchronization core.
//!
//! ARCHITECTURE
//! ============
//! The backend exposes chat over two independent channels: a REST API for
//! history, pagination, and writes, and a push hub for live delivery. Both
//! feed the same conversation state, so everything inbound is canonicalized
//! by one normalizer and deduplicated by a stable identity at the point of
//! insertion — arrival order is never trusted.
//!
//! Components, leaves first:
//! - [`normalize`] — raw payloads → canonical [`model`] shapes
//! - [`wire`] — hub wire protocol (JSON text frames)
//! - [`transport`] — [`transport::ChatHub`], the shared push connection
//! - [`rest`] — [`rest::ChatBackend`] boundary and its reqwest client
//! - [`session`] — per-conversation controller (optimistic sends, dedup)
//! - [`roster`] — conversation list aggregation
//!
//! The hub is constructed once at application start and handed to sessions
//! explicitly; nothing in this crate holds module-level global state.

pub mod config;
pub mod error;
pub mod model;
pub mod normalize;
pub mod rest;
pub mod roster;
pub mod session;
pub mod transport;
pub mod wire;

pub use config::ChatConfig;
pub use error::{ConfigError, ConnectError, FetchError, SendError};
pub use model::{ChatId, ConnectionState, Conversation, JobRef, Message, MessageEntry, PendingSend, TypingEvent};
pub use rest::{ChatApi, ChatBackend};
pub use roster::ConversationRoster;
pub use session::{ConversationSession, SessionPhase};
pub use transport::{ChatHub, HubConnector, HubSocket, Subscription, TokenProvider};

/// Lock a mutex, recovering the guard if a panicking handler poisoned it.
pub(crate) fn lock_unpoisoned<T>(mutex: &std::sync::Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}
