//! In-memory backend — identity provider and live document store in process.
//!
//! DESIGN
//! ======
//! `MemoryBackend` stands in for one hosted project. It hands out a fresh
//! [`MemoryAuth`] client per browser context (auth state is client-local on
//! the hosted service too) while every context shares one [`MemoryStore`].
//!
//! The store evaluates only the query shape the shell issues: a collection
//! scan, an optional single-field ordering and an optional limit. Documents
//! missing the ordered field are excluded, as the hosted store does.
//!
//! Callbacks are always invoked after the internal lock is released, so a
//! callback may call back into the backend.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use tracing::{debug, info};
use uuid::Uuid;

use super::{
    AuthBackend, AuthCallback, BackendError, DocumentSnapshot, DocumentStore, FieldValue, Fields,
    HostedProject, ListenerHandle, Query, Snapshot, SnapshotCallback,
};
use crate::auth::{Session, SignInRequest};
use crate::frame::now_ms;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// =============================================================================
// PROJECT
// =============================================================================

/// One hosted project: a shared identity directory and a shared store.
#[derive(Clone)]
pub struct MemoryBackend {
    project_id: String,
    directory: Arc<Mutex<HashMap<String, String>>>,
    store: Arc<MemoryStore>,
}

impl MemoryBackend {
    #[must_use]
    pub fn new(project_id: impl Into<String>) -> Self {
        Self {
            project_id: project_id.into(),
            directory: Arc::new(Mutex::new(HashMap::new())),
            store: Arc::new(MemoryStore::new()),
        }
    }

    /// A new signed-out auth client bound to this project's accounts.
    #[must_use]
    pub fn auth_client(&self) -> MemoryAuth {
        MemoryAuth::with_directory(Arc::clone(&self.directory))
    }

    #[must_use]
    pub fn store(&self) -> Arc<MemoryStore> {
        Arc::clone(&self.store)
    }
}

impl HostedProject for MemoryBackend {
    fn project_id(&self) -> &str {
        &self.project_id
    }

    fn auth_client(&self) -> Arc<dyn AuthBackend> {
        Arc::new(MemoryBackend::auth_client(self))
    }

    fn store(&self) -> Arc<dyn DocumentStore> {
        MemoryBackend::store(self)
    }
}

// =============================================================================
// AUTH
// =============================================================================

#[derive(Default)]
struct AuthInner {
    current: Option<Session>,
    listeners: HashMap<u64, AuthCallback>,
    next_listener: u64,
}

/// Auth client for one browser context.
///
/// The popup is simulated: the display name in the sign-in request is the
/// account the user picked. A request without one behaves like a popup the
/// user closed. Accounts get a stable uid per display name within a project.
#[derive(Clone, Default)]
pub struct MemoryAuth {
    inner: Arc<Mutex<AuthInner>>,
    directory: Arc<Mutex<HashMap<String, String>>>,
}

impl MemoryAuth {
    /// A standalone client with its own account directory.
    #[cfg(test)]
    pub fn new() -> Self {
        Self::default()
    }

    fn with_directory(directory: Arc<Mutex<HashMap<String, String>>>) -> Self {
        Self { inner: Arc::default(), directory }
    }

    /// Number of registered auth-state listeners.
    #[cfg(test)]
    pub fn listener_count(&self) -> usize {
        lock(&self.inner).listeners.len()
    }

    fn set_current(&self, next: Option<Session>) {
        let (current, callbacks) = {
            let mut inner = lock(&self.inner);
            inner.current = next;
            let callbacks: Vec<AuthCallback> = inner.listeners.values().cloned().collect();
            (inner.current.clone(), callbacks)
        };
        for callback in callbacks {
            callback(current.clone());
        }
    }

    fn uid_for(&self, display_name: &str) -> String {
        lock(&self.directory)
            .entry(display_name.to_string())
            .or_insert_with(|| Uuid::new_v4().simple().to_string())
            .clone()
    }
}

#[async_trait]
impl AuthBackend for MemoryAuth {
    async fn sign_in_with_popup(&self, request: SignInRequest) -> Result<Session, BackendError> {
        let Some(display_name) = request
            .display_name
            .map(|name| name.trim().to_string())
            .filter(|name| !name.is_empty())
        else {
            return Err(BackendError::PopupClosed);
        };

        let session = Session {
            uid: self.uid_for(&display_name),
            display_name: Some(display_name),
            photo_url: request.photo_url.filter(|url| !url.trim().is_empty()),
        };
        self.set_current(Some(session.clone()));
        Ok(session)
    }

    async fn sign_out(&self) -> Result<(), BackendError> {
        self.set_current(None);
        Ok(())
    }

    fn on_auth_state_changed(&self, callback: AuthCallback) -> ListenerHandle {
        let (id, current) = {
            let mut inner = lock(&self.inner);
            let id = inner.next_listener;
            inner.next_listener += 1;
            inner.listeners.insert(id, Arc::clone(&callback));
            (id, inner.current.clone())
        };
        callback(current);

        let inner = Arc::clone(&self.inner);
        ListenerHandle::new(move || {
            lock(&inner).listeners.remove(&id);
        })
    }
}

// =============================================================================
// STORE
// =============================================================================

/// Per-subscription delivery slot.
///
/// Snapshots are numbered under the store lock. A snapshot is handed to the
/// callback only if it is newer than the last one delivered, and only one
/// thread drains the slot at a time, so concurrent inserts can never leave
/// an older snapshot as the last delivery. A callback that writes back into
/// the store just refills the slot; the draining thread picks it up.
struct Mailbox {
    callback: SnapshotCallback,
    state: Mutex<MailboxState>,
}

#[derive(Default)]
struct MailboxState {
    pending: Option<(u64, Snapshot)>,
    delivered: u64,
    draining: bool,
}

impl Mailbox {
    fn new(callback: SnapshotCallback) -> Self {
        Self { callback, state: Mutex::default() }
    }

    fn post(&self, seq: u64, snapshot: Snapshot) {
        {
            let mut state = lock(&self.state);
            let superseded = seq <= state.delivered || state.pending.as_ref().is_some_and(|(p, _)| *p >= seq);
            if superseded {
                debug!(seq, delivered = state.delivered, "store: dropping superseded snapshot");
                return;
            }
            state.pending = Some((seq, snapshot));
            if state.draining {
                return;
            }
            state.draining = true;
        }

        loop {
            let next = {
                let mut state = lock(&self.state);
                let Some((seq, snapshot)) = state.pending.take() else {
                    state.draining = false;
                    return;
                };
                state.delivered = seq;
                snapshot
            };
            (self.callback)(Ok(next));
        }
    }
}

struct Subscription {
    query: Query,
    mailbox: Arc<Mailbox>,
    next_seq: u64,
}

impl Subscription {
    fn next_seq(&mut self) -> u64 {
        self.next_seq += 1;
        self.next_seq
    }
}

type Collections = HashMap<String, Vec<DocumentSnapshot>>;

#[derive(Default)]
struct StoreInner {
    collections: Collections,
    subscriptions: HashMap<u64, Subscription>,
    next_subscription: u64,
    last_timestamp: i64,
}

impl StoreInner {
    /// Strictly increasing server clock so creation order is total.
    fn server_timestamp(&mut self) -> i64 {
        let ts = now_ms().max(self.last_timestamp + 1);
        self.last_timestamp = ts;
        ts
    }
}

fn evaluate(collections: &Collections, query: &Query) -> Snapshot {
    let Some(docs) = collections.get(&query.collection) else {
        return Snapshot::default();
    };

    let mut docs: Vec<DocumentSnapshot> = match &query.order_by {
        Some(field) => {
            let mut docs: Vec<DocumentSnapshot> = docs
                .iter()
                .filter(|doc| doc.data.get(field).is_some_and(|v| !v.is_null()))
                .cloned()
                .collect();
            docs.sort_by(|a, b| {
                let ord = compare_values(&a.data[field], &b.data[field]);
                if query.descending { ord.reverse() } else { ord }
            });
            docs
        }
        None => docs.clone(),
    };

    if let Some(limit) = query.limit {
        docs.truncate(limit);
    }
    Snapshot { docs }
}

/// Order numbers before strings before everything else; same kinds compare
/// by value.
fn compare_values(a: &serde_json::Value, b: &serde_json::Value) -> Ordering {
    use serde_json::Value;

    fn rank(v: &Value) -> u8 {
        match v {
            Value::Number(_) => 0,
            Value::String(_) => 1,
            _ => 2,
        }
    }

    match (a, b) {
        (Value::Number(x), Value::Number(y)) => {
            let x = x.as_f64().unwrap_or(0.0);
            let y = y.as_f64().unwrap_or(0.0);
            x.partial_cmp(&y).unwrap_or(Ordering::Equal)
        }
        (Value::String(x), Value::String(y)) => x.cmp(y),
        _ => rank(a).cmp(&rank(b)),
    }
}

/// Shared document store with live queries.
#[derive(Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<StoreInner>>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of open live queries.
    #[cfg(test)]
    pub fn subscription_count(&self) -> usize {
        lock(&self.inner).subscriptions.len()
    }

    /// Number of documents stored in `collection`.
    #[cfg(test)]
    pub fn document_count(&self, collection: &str) -> usize {
        lock(&self.inner)
            .collections
            .get(collection)
            .map_or(0, Vec::len)
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn add_document(&self, collection: &str, fields: Fields) -> Result<String, BackendError> {
        if collection.trim().is_empty() {
            return Err(BackendError::InvalidArgument("collection name is empty".into()));
        }

        let id = Uuid::new_v4().simple().to_string();
        let deliveries = {
            let mut guard = lock(&self.inner);
            let inner = &mut *guard;
            let mut data = serde_json::Map::new();
            for (key, value) in fields {
                let value = match value {
                    FieldValue::Value(v) => v,
                    FieldValue::ServerTimestamp => serde_json::json!(inner.server_timestamp()),
                };
                data.insert(key, value);
            }
            inner
                .collections
                .entry(collection.to_string())
                .or_default()
                .push(DocumentSnapshot { id: id.clone(), data });

            let collections = &inner.collections;
            let deliveries: Vec<(Arc<Mailbox>, u64, Snapshot)> = inner
                .subscriptions
                .values_mut()
                .filter(|sub| sub.query.collection == collection)
                .map(|sub| (Arc::clone(&sub.mailbox), sub.next_seq(), evaluate(collections, &sub.query)))
                .collect();
            deliveries
        };

        debug!(%collection, %id, listeners = deliveries.len(), "store: document added");
        for (mailbox, seq, snapshot) in deliveries {
            mailbox.post(seq, snapshot);
        }
        Ok(id)
    }

    fn on_snapshot(&self, query: Query, callback: SnapshotCallback) -> ListenerHandle {
        let mailbox = Arc::new(Mailbox::new(callback));
        let (id, seq, initial) = {
            let mut inner = lock(&self.inner);
            let id = inner.next_subscription;
            inner.next_subscription += 1;
            let initial = evaluate(&inner.collections, &query);
            info!(subscription = id, collection = %query.collection, "store: live query opened");
            let mut subscription = Subscription { query, mailbox: Arc::clone(&mailbox), next_seq: 0 };
            let seq = subscription.next_seq();
            inner.subscriptions.insert(id, subscription);
            (id, seq, initial)
        };
        mailbox.post(seq, initial);

        let inner = Arc::clone(&self.inner);
        ListenerHandle::new(move || {
            if lock(&inner).subscriptions.remove(&id).is_some() {
                info!(subscription = id, "store: live query closed");
            }
        })
    }
}

#[cfg(test)]
#[path = "memory_test.rs"]
mod tests;
