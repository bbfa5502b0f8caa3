//! Chat session manager — the auth-gated live message feed.
//!
//! DESIGN
//! ======
//! Two states, driven by the auth provider's signed-in flag:
//!
//! ```text
//!   Unsubscribed --(signed in)--> Subscribed     action: open live query
//!   Subscribed  --(signed out)--> Unsubscribed   action: release query, clear list
//! ```
//!
//! [`ChatSessionManager::sync`] is the only transition entry point. Callers
//! invoke it whenever the auth session may have changed; with no change it
//! does nothing.
//!
//! The live query asks the store for the newest 100 messages, newest first,
//! and the feed reverses each delivery so the list reads oldest to newest.
//!
//! INVARIANTS
//! ==========
//! - At most one live query is open per manager, and it is open exactly
//!   while the session is authenticated.
//! - Every opened query is tagged with a generation. Deliveries carrying an
//!   older generation than the feed's current one are dropped, so nothing
//!   lands in the list after a sign-out even if the store still delivers.
//! - `send` never touches the local list; new messages arrive through the
//!   live query.
//! - `send` screens the text first and writes nothing when any screening
//!   rule matches.

use std::sync::{Arc, Mutex, PoisonError};

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::auth::{AuthSessionProvider, Session};
use crate::backend::{
    BackendError, DocumentSnapshot, DocumentStore, FieldValue, Fields, ListenerHandle, Query, Snapshot,
};
use crate::screening::{self, Alert};

/// Collection holding chat messages.
pub const MESSAGES_COLLECTION: &str = "messages";

/// Field the store stamps with the server time on insert.
pub const CREATED_AT_FIELD: &str = "createdAt";

/// Number of most recent messages kept in the feed.
pub const FEED_LIMIT: usize = 100;

// =============================================================================
// MESSAGE
// =============================================================================

/// A persisted chat message as shown in a view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    #[serde(default)]
    pub user_name: Option<String>,
    #[serde(default)]
    pub user_id: String,
    #[serde(default, rename = "userPhotoURL")]
    pub user_photo_url: Option<String>,
    pub text: String,
    /// Server time in ms since epoch. `None` while the stamp is pending.
    #[serde(default)]
    pub created_at: Option<i64>,
}

impl Message {
    /// Project a stored document into a message. The document id wins over
    /// any `id` field in the data. Documents without `text` are skipped.
    #[must_use]
    pub fn from_document(doc: &DocumentSnapshot) -> Option<Self> {
        let mut data = doc.data.clone();
        data.insert("id".into(), serde_json::Value::String(doc.id.clone()));
        match serde_json::from_value(serde_json::Value::Object(data)) {
            Ok(message) => Some(message),
            Err(e) => {
                debug!(id = %doc.id, error = %e, "chat: skipping malformed message document");
                None
            }
        }
    }
}

/// Fields written for a new message by `session`.
#[must_use]
pub fn new_message_fields(session: &Session, text: &str) -> Fields {
    let mut fields = Fields::new();
    fields.insert("userName".into(), FieldValue::Value(serde_json::json!(session.display_name)));
    fields.insert("userId".into(), FieldValue::Value(serde_json::json!(session.uid)));
    fields.insert("userPhotoURL".into(), FieldValue::Value(serde_json::json!(session.photo_url)));
    fields.insert("text".into(), FieldValue::Value(serde_json::json!(text)));
    fields.insert(CREATED_AT_FIELD.into(), FieldValue::ServerTimestamp);
    fields
}

/// The live query backing the feed.
#[must_use]
pub fn feed_query() -> Query {
    Query::collection(MESSAGES_COLLECTION)
        .order_by(CREATED_AT_FIELD)
        .descending()
        .limit(FEED_LIMIT)
}

// =============================================================================
// FEED
// =============================================================================

/// The observable message list plus the generation guarding it.
struct Feed {
    messages: watch::Sender<Vec<Message>>,
    generation: Mutex<u64>,
}

impl Feed {
    fn new() -> Self {
        let (messages, _rx) = watch::channel(Vec::new());
        Self { messages, generation: Mutex::new(0) }
    }

    /// Start a new generation and return it.
    fn advance(&self) -> u64 {
        let mut generation = self.generation.lock().unwrap_or_else(PoisonError::into_inner);
        *generation += 1;
        *generation
    }

    /// Start a new generation and empty the list in one step.
    fn reset(&self) {
        let mut generation = self.generation.lock().unwrap_or_else(PoisonError::into_inner);
        *generation += 1;
        self.messages.send_if_modified(|messages| {
            if messages.is_empty() {
                return false;
            }
            messages.clear();
            true
        });
    }

    /// Apply a delivery from the query opened at `generation`.
    fn accept(&self, generation: u64, snapshot: &Snapshot) {
        let current = self.generation.lock().unwrap_or_else(PoisonError::into_inner);
        if *current != generation {
            debug!(generation, current = *current, "chat: dropping stale snapshot");
            return;
        }

        let mut messages: Vec<Message> = snapshot
            .docs
            .iter()
            .filter_map(Message::from_document)
            .collect();
        messages.reverse();
        self.messages.send_replace(messages);
    }
}

// =============================================================================
// MANAGER
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatPhase {
    Unsubscribed,
    Subscribed,
}

/// What became of one [`ChatSessionManager::send`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    /// No session; nothing was written.
    SignedOut,
    Sent { id: String },
    /// Screening matched; nothing was written.
    Blocked { alerts: Vec<Alert> },
}

/// Keeps the live message feed in step with the auth session.
pub struct ChatSessionManager {
    auth: Arc<AuthSessionProvider>,
    store: Arc<dyn DocumentStore>,
    feed: Arc<Feed>,
    subscription: Option<ListenerHandle>,
}

impl ChatSessionManager {
    /// Create a manager and apply the provider's current state.
    pub fn new(auth: Arc<AuthSessionProvider>, store: Arc<dyn DocumentStore>) -> Self {
        let mut manager = Self { auth, store, feed: Arc::new(Feed::new()), subscription: None };
        manager.sync();
        manager
    }

    #[must_use]
    pub fn phase(&self) -> ChatPhase {
        if self.subscription.is_some() { ChatPhase::Subscribed } else { ChatPhase::Unsubscribed }
    }

    /// Current list, oldest first.
    #[must_use]
    pub fn messages(&self) -> Vec<Message> {
        self.feed.messages.borrow().clone()
    }

    /// Receiver that observes every list change.
    #[must_use]
    pub fn watch(&self) -> watch::Receiver<Vec<Message>> {
        self.feed.messages.subscribe()
    }

    /// Bring the subscription in line with the auth session.
    pub fn sync(&mut self) -> ChatPhase {
        match (self.auth.is_authenticated(), self.phase()) {
            (true, ChatPhase::Unsubscribed) => self.open(),
            (false, ChatPhase::Subscribed) => self.close(),
            (false, ChatPhase::Unsubscribed) => self.feed.reset(),
            (true, ChatPhase::Subscribed) => {}
        }
        self.phase()
    }

    /// Release the live query and clear the list, regardless of auth state.
    pub fn shutdown(&mut self) {
        self.close();
    }

    fn open(&mut self) {
        if let Some(previous) = self.subscription.take() {
            previous.release();
        }

        let generation = self.feed.advance();
        let feed = Arc::clone(&self.feed);
        let handle = self.store.on_snapshot(
            feed_query(),
            Arc::new(move |delivery: Result<Snapshot, BackendError>| match delivery {
                Ok(snapshot) => feed.accept(generation, &snapshot),
                Err(e) => warn!(generation, error = %e, "chat: live query error"),
            }),
        );
        self.subscription = Some(handle);
        info!(generation, "chat: subscribed to message feed");
    }

    fn close(&mut self) {
        let was_open = match self.subscription.take() {
            Some(handle) => {
                handle.release();
                true
            }
            None => false,
        };
        self.feed.reset();
        if was_open {
            info!("chat: unsubscribed, feed cleared");
        }
    }

    /// Post `text` as the signed-in user.
    ///
    /// Nothing is written when signed out or when screening raises an
    /// alert. The local list is not touched either way.
    ///
    /// # Errors
    ///
    /// Returns the store's error if the insert is rejected.
    pub async fn send(&self, text: &str) -> Result<SendOutcome, BackendError> {
        let Some(session) = self.auth.session() else {
            debug!("chat: send ignored while signed out");
            return Ok(SendOutcome::SignedOut);
        };

        let alerts = screening::screen(text);
        if !alerts.is_empty() {
            warn!(uid = %session.uid, alerts = alerts.len(), "chat: message blocked by screening");
            return Ok(SendOutcome::Blocked { alerts });
        }

        let id = self
            .store
            .add_document(MESSAGES_COLLECTION, new_message_fields(&session, text))
            .await?;
        debug!(%id, uid = %session.uid, "chat: message sent");
        Ok(SendOutcome::Sent { id })
    }
}

#[cfg(test)]
#[path = "chat_test.rs"]
mod tests;
