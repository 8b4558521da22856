//! Conversation roster — the aggregated conversation list.
//!
//! DESIGN
//! ======
//! A full reload, never an incremental merge: `load` replaces the list with
//! the normalized, deduplicated fetch result. The backend has been observed
//! to emit the same conversation twice in one response, so dedup is
//! first-occurrence-wins by identity. The text filter is pure and
//! synchronous — it narrows the visible slice without refetching.
//!
//! Live message events update preview fields in place so the list stays
//! current between reloads without a second fetch path.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use serde_json::Value;
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::error::FetchError;
use crate::lock_unpoisoned;
use crate::model::{ChatId, Conversation, Message};
use crate::normalize::normalize_conversation;
use crate::rest::ChatBackend;

struct RosterState {
    conversations: Vec<Conversation>,
    filter: String,
    loading: bool,
    last_error: Option<String>,
}

struct RosterInner {
    backend: Arc<dyn ChatBackend>,
    /// The current user; their own sends never bump unread counters.
    self_id: ChatId,
    state: Mutex<RosterState>,
    revision: watch::Sender<u64>,
}

/// Aggregated conversation list for the current user. Cheap to clone.
#[derive(Clone)]
pub struct ConversationRoster {
    inner: Arc<RosterInner>,
}

impl ConversationRoster {
    #[must_use]
    pub fn new(self_id: ChatId, backend: Arc<dyn ChatBackend>) -> Self {
        let (revision, _) = watch::channel(0);
        Self {
            inner: Arc::new(RosterInner {
                backend,
                self_id,
                state: Mutex::new(RosterState {
                    conversations: Vec::new(),
                    filter: String::new(),
                    loading: false,
                    last_error: None,
                }),
                revision,
            }),
        }
    }

    /// Fetch and replace the list. A call while one is already in flight is
    /// a no-op — refresh and initial load share the loading flag.
    ///
    /// # Errors
    ///
    /// [`FetchError`] when the fetch fails; the previous list stays intact.
    pub async fn load(&self) -> Result<(), FetchError> {
        let inner = &self.inner;
        {
            let mut state = lock_unpoisoned(&inner.state);
            if state.loading {
                return Ok(());
            }
            state.loading = true;
        }
        inner.touch();

        let outcome = inner.backend.list_conversations().await;
        match outcome {
            Ok(raw) => {
                let conversations = dedup_first_wins(&raw);
                debug!(count = conversations.len(), "roster: loaded");
                inner.mutate(|state| {
                    state.conversations = conversations;
                    state.loading = false;
                    state.last_error = None;
                });
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "roster: load failed");
                inner.mutate(|state| {
                    state.loading = false;
                    state.last_error = Some(e.to_string());
                });
                Err(e)
            }
        }
    }

    /// Start a conversation with a recipient, optionally tied to a job post.
    /// The created conversation joins the list unless its identity is
    /// already present.
    ///
    /// # Errors
    ///
    /// [`FetchError`] on request failure, [`FetchError::Decode`] when the
    /// response is not a recognizable conversation.
    pub async fn create(
        &self,
        recipient: &ChatId,
        job_post: Option<&ChatId>,
    ) -> Result<Conversation, FetchError> {
        let raw = self.inner.backend.create_conversation(recipient, job_post).await?;
        let conversation = normalize_conversation(&raw)
            .ok_or_else(|| FetchError::Decode("created conversation has no identity".to_string()))?;

        self.inner.mutate(|state| {
            if !state.conversations.iter().any(|c| c.id == conversation.id) {
                state.conversations.insert(0, conversation.clone());
            }
        });
        Ok(conversation)
    }

    /// Total unread messages across all conversations.
    ///
    /// # Errors
    ///
    /// [`FetchError`] when the summary fetch fails.
    pub async fn total_unread(&self) -> Result<u32, FetchError> {
        self.inner.backend.unread_count().await
    }

    /// Fold an observed message event into the matching conversation's
    /// preview fields. Messages for unknown conversations are ignored — the
    /// next reload brings them in.
    pub fn observe_message(&self, message: &Message) {
        let Some(conversation_id) = message.conversation_id.as_ref() else {
            return;
        };
        let from_self = message.sender_id.as_ref() == Some(&self.inner.self_id);
        let inner = &self.inner;
        inner.mutate(|state| {
            let Some(conversation) =
                state.conversations.iter_mut().find(|c| &c.id == conversation_id)
            else {
                return;
            };
            conversation.last_message = Some(message.content.clone());
            conversation.last_message_at = Some(message.sent_at);
            if !from_self {
                conversation.unread = conversation.unread.saturating_add(1);
            }
        });
    }

    /// Clear the unread counter locally, mirroring a mark-read call.
    pub fn clear_unread(&self, conversation_id: &ChatId) {
        self.inner.mutate(|state| {
            if let Some(conversation) =
                state.conversations.iter_mut().find(|c| &c.id == conversation_id)
            {
                conversation.unread = 0;
            }
        });
    }

    /// Case-insensitive substring filter over counterpart names. Pure and
    /// synchronous; does not refetch.
    pub fn set_filter(&self, text: impl Into<String>) {
        self.inner.mutate(|state| state.filter = text.into());
    }

    /// The conversations matching the current filter, in fetch order.
    #[must_use]
    pub fn visible(&self) -> Vec<Conversation> {
        let state = lock_unpoisoned(&self.inner.state);
        let needle = state.filter.to_lowercase();
        state
            .conversations
            .iter()
            .filter(|c| needle.is_empty() || c.partner_name.to_lowercase().contains(&needle))
            .cloned()
            .collect()
    }

    /// Every loaded conversation, ignoring the filter.
    #[must_use]
    pub fn conversations(&self) -> Vec<Conversation> {
        lock_unpoisoned(&self.inner.state).conversations.clone()
    }

    #[must_use]
    pub fn is_loading(&self) -> bool {
        lock_unpoisoned(&self.inner.state).loading
    }

    #[must_use]
    pub fn last_error(&self) -> Option<String> {
        lock_unpoisoned(&self.inner.state).last_error.clone()
    }

    /// Revision counter bumped on every state change.
    #[must_use]
    pub fn changes(&self) -> watch::Receiver<u64> {
        self.inner.revision.subscribe()
    }
}

impl RosterInner {
    fn touch(&self) {
        self.revision.send_modify(|rev| *rev += 1);
    }

    fn mutate(&self, f: impl FnOnce(&mut RosterState)) {
        {
            let mut state = lock_unpoisoned(&self.state);
            f(&mut state);
        }
        self.touch();
    }
}

/// Normalize raw summaries, dropping entries without identity and keeping
/// only the first occurrence of each id.
fn dedup_first_wins(raw: &[Value]) -> Vec<Conversation> {
    let mut seen: HashSet<ChatId> = HashSet::new();
    raw.iter()
        .filter_map(normalize_conversation)
        .filter(|conversation| seen.insert(conversation.id.clone()))
        .collect()
}

#[cfg(test)]
#[path = "roster_test.rs"]
mod tests;
