//! Conversation session — the controller for one open conversation.
//!
//! ARCHITECTURE
//! ============
//! The most concurrency-sensitive piece of the crate. Two transports feed the
//! same message list: REST for history pages and writes, the push hub for
//! live delivery. Their relative order is not guaranteed — the push echo of a
//! message the user just sent may land before or after the REST response —
//! so every insertion dedups by identity and both orders converge to one
//! final entry per logical send.
//!
//! Phases: `Loading → Ready ⇄ LoadingMore → Closed`. `Closed` is terminal;
//! a fresh mount builds a fresh session. [`ConversationSession::close`] is
//! the explicit cancellation point: REST responses and push events arriving
//! afterwards are discarded by a closed check, never by dead references.
//!
//! OPTIMISTIC SENDS
//! ================
//! `send_message` inserts a [`MessageEntry::Pending`] placeholder, clears the
//! input, and writes via REST (push-send exists but writes standardize on
//! REST so exactly one confirmation path races the echo). On success the
//! placeholder is replaced in place — unless the push echo already delivered
//! the confirmed id, in which case the placeholder is simply removed. On
//! failure the placeholder is removed and the as-typed input is restored
//! verbatim for retry.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::Value;
use time::OffsetDateTime;
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::config::ChatConfig;
use crate::error::{FetchError, SendError};
use crate::lock_unpoisoned;
use crate::model::{ChatId, Message, MessageEntry, PendingSend};
use crate::normalize::normalize_message;
use crate::rest::ChatBackend;
use crate::transport::{ChatHub, Subscription};

/// Lifecycle phase of a mounted session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    /// Initial history fetch in flight (or failed and awaiting retry).
    Loading,
    /// History loaded, live channel joined.
    Ready,
    /// A pagination fetch is appending to `Ready`.
    LoadingMore,
    /// Unmounted. Terminal.
    Closed,
}

struct SessionState {
    phase: SessionPhase,
    /// Chronological order, oldest first. Pending entries live at the tail.
    entries: Vec<MessageEntry>,
    input: String,
    has_more: bool,
    /// Highest history page loaded so far.
    page: u32,
    sending: bool,
    partner_typing: bool,
    /// True while a local "is typing" signal is outstanding.
    typing_emitted: bool,
    last_error: Option<String>,
}

struct SessionInner {
    conversation: ChatId,
    /// The current user; filters typing self-echo.
    self_id: ChatId,
    backend: Arc<dyn ChatBackend>,
    hub: ChatHub,
    page_size: u32,
    typing_idle: Duration,
    state: Mutex<SessionState>,
    closed: AtomicBool,
    /// Bumped per keystroke; the idle task only fires if still current.
    typing_epoch: AtomicU64,
    revision: watch::Sender<u64>,
    subscriptions: Mutex<Vec<Subscription>>,
}

/// Controller for a single open conversation. Cheap to clone; all clones
/// share one state.
#[derive(Clone)]
pub struct ConversationSession {
    inner: Arc<SessionInner>,
}

impl ConversationSession {
    #[must_use]
    pub fn new(
        config: &ChatConfig,
        conversation: ChatId,
        self_id: ChatId,
        backend: Arc<dyn ChatBackend>,
        hub: ChatHub,
    ) -> Self {
        let (revision, _) = watch::channel(0);
        Self {
            inner: Arc::new(SessionInner {
                conversation,
                self_id,
                backend,
                hub,
                page_size: config.page_size,
                typing_idle: Duration::from_millis(config.typing_idle_ms),
                state: Mutex::new(SessionState {
                    phase: SessionPhase::Loading,
                    entries: Vec::new(),
                    input: String::new(),
                    has_more: false,
                    page: 0,
                    sending: false,
                    partner_typing: false,
                    typing_emitted: false,
                    last_error: None,
                }),
                closed: AtomicBool::new(false),
                typing_epoch: AtomicU64::new(0),
                revision,
                subscriptions: Mutex::new(Vec::new()),
            }),
        }
    }

    // =========================================================================
    // LIFECYCLE
    // =========================================================================

    /// Mount the session: subscribe to push events, join the room
    /// (best-effort), fetch history page 1, and fire the once-per-mount
    /// read receipt.
    ///
    /// # Errors
    ///
    /// [`FetchError`] when the initial history fetch fails. The session stays
    /// in `Loading`; [`reload`](Self::reload) retries.
    pub async fn open(&self) -> Result<(), FetchError> {
        let inner = &self.inner;

        let message_sub = {
            let weak = Arc::downgrade(inner);
            inner.hub.on_message(move |payload| {
                if let Some(inner) = weak.upgrade() {
                    inner.intake_message(payload);
                }
            })
        };
        let typing_sub = {
            let weak = Arc::downgrade(inner);
            inner.hub.on_typing(move |event| {
                if let Some(inner) = weak.upgrade() {
                    if event.user_id != inner.self_id {
                        inner.mutate(|state| state.partner_typing = event.is_typing);
                    }
                }
            })
        };
        lock_unpoisoned(&inner.subscriptions).extend([message_sub, typing_sub]);

        inner.hub.join_conversation(&inner.conversation).await;

        // Fire-and-forget read receipt, once per mount, never retried.
        {
            let inner = Arc::clone(inner);
            tokio::spawn(async move {
                if let Err(e) = inner.backend.mark_read(&inner.conversation).await {
                    debug!(conversation = %inner.conversation, error = %e, "session: mark-read failed");
                }
            });
        }

        self.reload().await
    }

    /// Fetch history page 1, replacing the confirmed list. Pending sends at
    /// the tail survive.
    ///
    /// # Errors
    ///
    /// [`FetchError`] when the fetch fails; previously loaded data is left
    /// intact.
    pub async fn reload(&self) -> Result<(), FetchError> {
        let inner = &self.inner;
        let raw = match inner.backend.fetch_messages(&inner.conversation, 1, inner.page_size).await {
            Ok(raw) => raw,
            Err(e) => {
                inner.mutate(|state| state.last_error = Some(e.to_string()));
                return Err(e);
            }
        };
        if inner.is_closed() {
            return Ok(());
        }

        let page = chronological(&raw);
        let full = raw.len() >= inner.page_size as usize;
        inner.mutate(|state| {
            let pending: Vec<MessageEntry> =
                state.entries.iter().filter(|e| e.is_pending()).cloned().collect();
            state.entries = page.into_iter().map(MessageEntry::Confirmed).collect();
            state.entries.extend(pending);
            state.page = 1;
            state.has_more = full;
            state.last_error = None;
            if state.phase != SessionPhase::Closed {
                state.phase = SessionPhase::Ready;
            }
        });
        Ok(())
    }

    /// Fetch the next (older) history page and prepend it. No-op unless the
    /// session is `Ready` and a previous page came back full.
    ///
    /// # Errors
    ///
    /// [`FetchError`] when the fetch fails; already-loaded pages are left
    /// intact and the session returns to `Ready`.
    pub async fn load_more(&self) -> Result<(), FetchError> {
        let inner = &self.inner;
        let next_page = {
            let mut state = lock_unpoisoned(&inner.state);
            if state.phase != SessionPhase::Ready || !state.has_more {
                return Ok(());
            }
            state.phase = SessionPhase::LoadingMore;
            state.page + 1
        };
        inner.touch();

        let outcome = inner
            .backend
            .fetch_messages(&inner.conversation, next_page, inner.page_size)
            .await;
        if inner.is_closed() {
            return Ok(());
        }

        match outcome {
            Ok(raw) => {
                let older = chronological(&raw);
                let full = raw.len() >= inner.page_size as usize;
                inner.mutate(|state| {
                    let fresh: Vec<MessageEntry> = older
                        .into_iter()
                        .filter(|m| !contains_message(&state.entries, m))
                        .map(MessageEntry::Confirmed)
                        .collect();
                    state.entries.splice(0..0, fresh);
                    state.page = next_page;
                    state.has_more = full;
                    state.phase = SessionPhase::Ready;
                });
                Ok(())
            }
            Err(e) => {
                inner.mutate(|state| {
                    state.phase = SessionPhase::Ready;
                    state.last_error = Some(e.to_string());
                });
                Err(e)
            }
        }
    }

    /// Unmount. Terminal: releases subscriptions, leaves the room, and makes
    /// every late response or event a no-op.
    pub fn close(&self) {
        let inner = &self.inner;
        inner.closed.store(true, Ordering::SeqCst);
        inner.typing_epoch.fetch_add(1, Ordering::SeqCst);
        let was_typing = {
            let mut state = lock_unpoisoned(&inner.state);
            state.phase = SessionPhase::Closed;
            std::mem::take(&mut state.typing_emitted)
        };
        if was_typing {
            inner.hub.send_typing(&inner.conversation, false);
        }
        lock_unpoisoned(&inner.subscriptions).clear();

        let hub = inner.hub.clone();
        let conversation = inner.conversation.clone();
        tokio::spawn(async move {
            hub.leave_conversation(&conversation).await;
        });
        inner.touch();
    }

    // =========================================================================
    // SENDING
    // =========================================================================

    /// Send the current input. Silent no-op when the trimmed input is empty
    /// or a send is already in flight.
    ///
    /// # Errors
    ///
    /// [`SendError`] when the write fails. The placeholder is rolled back and
    /// the input restored exactly as typed.
    pub async fn send_message(&self) -> Result<(), SendError> {
        let inner = &self.inner;
        if inner.is_closed() {
            return Ok(());
        }

        let Some(pending) = ({
            let mut state = lock_unpoisoned(&inner.state);
            let content = state.input.trim().to_string();
            if content.is_empty() || state.sending {
                None
            } else {
                let pending = PendingSend {
                    temp_id: ChatId::temp(),
                    content,
                    raw_input: std::mem::take(&mut state.input),
                    queued_at: OffsetDateTime::now_utc(),
                };
                state.sending = true;
                state.entries.push(MessageEntry::Pending(pending.clone()));
                Some(pending)
            }
        }) else {
            return Ok(());
        };
        inner.touch();
        self.settle_typing();

        let outcome = inner
            .backend
            .send_message(&inner.conversation, &pending.content)
            .await;
        if inner.is_closed() {
            return Ok(());
        }

        match outcome {
            Ok(payload) => {
                let confirmed = normalize_message(&payload)
                    .unwrap_or_else(|| inner.synthesize_confirmed(&pending));
                inner.mutate(|state| resolve_pending(state, &pending.temp_id, confirmed));
                Ok(())
            }
            Err(e) => {
                warn!(conversation = %inner.conversation, error = %e, "session: send failed; rolling back");
                inner.mutate(|state| {
                    state.sending = false;
                    state.entries.retain(|entry| entry.id() != &pending.temp_id);
                    state.input = pending.raw_input.clone();
                    state.last_error = Some(e.to_string());
                });
                Err(e)
            }
        }
    }

    // =========================================================================
    // INPUT & TYPING
    // =========================================================================

    /// Record the input box contents. A non-empty update counts as a
    /// keystroke for the typing debounce: the first one emits "started
    /// typing", each one resets the idle timer, and only after the idle
    /// window passes with no further keystrokes is "stopped typing" emitted.
    pub fn set_input(&self, text: impl Into<String>) {
        let inner = &self.inner;
        if inner.is_closed() {
            return;
        }
        let text = text.into();
        let keystroke = !text.is_empty();
        inner.mutate(|state| state.input = text);
        if keystroke {
            self.note_keystroke();
        }
    }

    fn note_keystroke(&self) {
        let inner = &self.inner;
        let first = {
            let mut state = lock_unpoisoned(&inner.state);
            !std::mem::replace(&mut state.typing_emitted, true)
        };
        if first {
            inner.hub.send_typing(&inner.conversation, true);
        }

        let epoch = inner.typing_epoch.fetch_add(1, Ordering::SeqCst) + 1;
        let weak = Arc::downgrade(inner);
        let idle = inner.typing_idle;
        tokio::spawn(async move {
            tokio::time::sleep(idle).await;
            let Some(inner) = weak.upgrade() else { return };
            if inner.typing_epoch.load(Ordering::SeqCst) != epoch || inner.is_closed() {
                return;
            }
            let was_typing = {
                let mut state = lock_unpoisoned(&inner.state);
                std::mem::take(&mut state.typing_emitted)
            };
            if was_typing {
                inner.hub.send_typing(&inner.conversation, false);
            }
        });
    }

    /// Emit "stopped typing" immediately if a started signal is outstanding.
    fn settle_typing(&self) {
        let inner = &self.inner;
        inner.typing_epoch.fetch_add(1, Ordering::SeqCst);
        let was_typing = {
            let mut state = lock_unpoisoned(&inner.state);
            std::mem::take(&mut state.typing_emitted)
        };
        if was_typing {
            inner.hub.send_typing(&inner.conversation, false);
        }
    }

    // =========================================================================
    // SNAPSHOTS
    // =========================================================================

    #[must_use]
    pub fn phase(&self) -> SessionPhase {
        lock_unpoisoned(&self.inner.state).phase
    }

    #[must_use]
    pub fn entries(&self) -> Vec<MessageEntry> {
        lock_unpoisoned(&self.inner.state).entries.clone()
    }

    #[must_use]
    pub fn input(&self) -> String {
        lock_unpoisoned(&self.inner.state).input.clone()
    }

    #[must_use]
    pub fn has_more(&self) -> bool {
        lock_unpoisoned(&self.inner.state).has_more
    }

    #[must_use]
    pub fn partner_typing(&self) -> bool {
        lock_unpoisoned(&self.inner.state).partner_typing
    }

    #[must_use]
    pub fn is_sending(&self) -> bool {
        lock_unpoisoned(&self.inner.state).sending
    }

    #[must_use]
    pub fn last_error(&self) -> Option<String> {
        lock_unpoisoned(&self.inner.state).last_error.clone()
    }

    /// Revision counter bumped on every state change; UI awaits it and pulls
    /// fresh snapshots.
    #[must_use]
    pub fn changes(&self) -> watch::Receiver<u64> {
        self.inner.revision.subscribe()
    }
}

impl SessionInner {
    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn touch(&self) {
        self.revision.send_modify(|rev| *rev += 1);
    }

    fn mutate(&self, f: impl FnOnce(&mut SessionState)) {
        {
            let mut state = lock_unpoisoned(&self.state);
            f(&mut state);
        }
        self.touch();
    }

    /// Live push intake: normalize, membership-filter, dedup, append.
    fn intake_message(&self, payload: &Value) {
        if self.is_closed() {
            return;
        }
        let Some(message) = normalize_message(payload) else {
            return;
        };
        // Membership is exact under loose identity; payloads without a
        // conversation id are not routable and are dropped.
        if message.conversation_id.as_ref() != Some(&self.conversation) {
            return;
        }

        self.mutate(|state| {
            if message.synthetic_id {
                // No authoritative id; only the secondary key can dedup.
                if contains_message(&state.entries, &message) {
                    return;
                }
                state.entries.push(MessageEntry::Confirmed(message));
                return;
            }

            if state.entries.iter().any(|entry| {
                matches!(entry, MessageEntry::Confirmed(m) if !m.synthetic_id && m.id == message.id)
            }) {
                return;
            }
            // A true server id arriving for a message previously held under
            // a synthetic identity upgrades it in place. A locally
            // synthesized confirmation carries the local queue time, never
            // the server timestamp, so this match ignores timestamps.
            if let Some(existing) = state.entries.iter_mut().find(|entry| {
                matches!(entry, MessageEntry::Confirmed(m) if m.synthetic_id && same_send(m, &message))
            }) {
                *existing = MessageEntry::Confirmed(message);
                return;
            }
            state.entries.push(MessageEntry::Confirmed(message));
        });
    }

    /// Fallback confirmation when the server's send response is not a
    /// recognizable message payload. The send did succeed; never roll back.
    fn synthesize_confirmed(&self, pending: &PendingSend) -> Message {
        Message {
            id: ChatId::synthetic(),
            synthetic_id: true,
            conversation_id: Some(self.conversation.clone()),
            sender_id: Some(self.self_id.clone()),
            content: pending.content.clone(),
            sent_at: pending.queued_at,
            read: false,
            extra: serde_json::Map::new(),
        }
    }
}

// =============================================================================
// LIST MERGING
// =============================================================================

/// Normalize a raw history page (newest first) into chronological order.
fn chronological(raw: &[Value]) -> Vec<Message> {
    raw.iter().rev().filter_map(normalize_message).collect()
}

/// Sender + conversation + content. Reconciles a locally synthesized
/// confirmation with the server's view of the same send — the server assigns
/// its own timestamp, so that comparison must leave time out.
fn same_send(a: &Message, b: &Message) -> bool {
    a.sender_id == b.sender_id
        && a.conversation_id == b.conversation_id
        && a.content == b.content
}

/// Secondary dedup key for payloads without an authoritative id.
fn same_logical_message(a: &Message, b: &Message) -> bool {
    same_send(a, b) && a.sent_at == b.sent_at
}

fn contains_message(entries: &[MessageEntry], message: &Message) -> bool {
    entries.iter().any(|entry| match entry {
        MessageEntry::Confirmed(existing) => {
            if !message.synthetic_id && !existing.synthetic_id {
                existing.id == message.id
            } else {
                // At least one side has no server identity; fall back to the
                // secondary key.
                existing.id == message.id || same_logical_message(existing, message)
            }
        }
        MessageEntry::Pending(_) => false,
    })
}

/// Terminal transition of an optimistic send: replace the placeholder in
/// place, or drop it when the push echo delivered the confirmed id first.
fn resolve_pending(state: &mut SessionState, temp_id: &ChatId, confirmed: Message) {
    state.sending = false;
    // A synthesized confirmation (empty send response) never shares an id or
    // a timestamp with the push echo; only the send key can spot it.
    let echoed = state.entries.iter().any(|entry| match entry {
        MessageEntry::Confirmed(existing) => {
            existing.id == confirmed.id || (confirmed.synthetic_id && same_send(existing, &confirmed))
        }
        MessageEntry::Pending(_) => false,
    });
    if echoed {
        state.entries.retain(|entry| entry.id() != temp_id);
        return;
    }
    match state.entries.iter_mut().find(|entry| entry.id() == temp_id) {
        Some(slot) => *slot = MessageEntry::Confirmed(confirmed),
        // Placeholder already evicted (e.g. by a reload); append instead.
        None => state.entries.push(MessageEntry::Confirmed(confirmed)),
    }
}

#[cfg(test)]
#[path = "session_test.rs"]
mod tests;
