//! Backend seam — the hosted identity provider and document store.
//!
//! ARCHITECTURE
//! ============
//! All persistence, authentication and real-time delivery belong to an
//! external backend. The shell only sees it through two traits:
//! - [`AuthBackend`]: popup sign-in, sign-out, auth-state listener
//! - [`DocumentStore`]: document insert and live query subscription
//!
//! Both listener registrations return a [`ListenerHandle`]. The handle owns
//! the registration: releasing or dropping it deregisters the callback, so
//! whoever activated a listener is the one that tears it down.
//!
//! `memory` is the in-process implementation used for local runs and tests.

pub mod memory;

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::auth::{Session, SignInRequest};

// =============================================================================
// ERROR
// =============================================================================

/// Errors surfaced by the hosted backend.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BackendError {
    #[error("network request failed: {0}")]
    Network(String),
    #[error("permission denied: {0}")]
    PermissionDenied(String),
    #[error("sign-in popup was blocked")]
    PopupBlocked,
    #[error("sign-in popup was closed before completing")]
    PopupClosed,
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

impl crate::frame::ErrorCode for BackendError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::Network(_) => "E_NETWORK",
            Self::PermissionDenied(_) => "E_PERMISSION_DENIED",
            Self::PopupBlocked => "E_POPUP_BLOCKED",
            Self::PopupClosed => "E_POPUP_CLOSED",
            Self::InvalidArgument(_) => "E_INVALID_ARGUMENT",
        }
    }

    fn retryable(&self) -> bool {
        matches!(self, Self::Network(_))
    }
}

// =============================================================================
// DOCUMENTS
// =============================================================================

/// A field value written to the store.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Value(serde_json::Value),
    /// Replaced by the store's clock (ms since epoch) when the write lands.
    ServerTimestamp,
}

/// Fields of a document being written.
pub type Fields = BTreeMap<String, FieldValue>;

/// One document as delivered in a snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentSnapshot {
    pub id: String,
    pub data: serde_json::Map<String, serde_json::Value>,
}

/// One delivered batch of query results, in query order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Snapshot {
    pub docs: Vec<DocumentSnapshot>,
}

// =============================================================================
// QUERY
// =============================================================================

/// A collection query: optional single-field ordering plus optional limit.
///
/// Ordering is ascending unless [`Query::descending`] is applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Query {
    pub collection: String,
    pub order_by: Option<String>,
    pub descending: bool,
    pub limit: Option<usize>,
}

impl Query {
    #[must_use]
    pub fn collection(name: impl Into<String>) -> Self {
        Self { collection: name.into(), order_by: None, descending: false, limit: None }
    }

    #[must_use]
    pub fn order_by(mut self, field: impl Into<String>) -> Self {
        self.order_by = Some(field.into());
        self
    }

    #[must_use]
    pub fn descending(mut self) -> Self {
        self.descending = true;
        self
    }

    #[must_use]
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

// =============================================================================
// LISTENERS
// =============================================================================

/// Callback for auth-state changes. Receives the new session or `None`.
pub type AuthCallback = Arc<dyn Fn(Option<Session>) + Send + Sync>;

/// Callback for live query deliveries.
pub type SnapshotCallback = Arc<dyn Fn(Result<Snapshot, BackendError>) + Send + Sync>;

/// Owned registration of a backend listener.
///
/// Dropping the handle deregisters the listener. [`ListenerHandle::release`]
/// does the same explicitly.
#[must_use = "dropping a ListenerHandle deregisters the listener immediately"]
pub struct ListenerHandle {
    release: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl ListenerHandle {
    pub fn new(release: impl FnOnce() + Send + Sync + 'static) -> Self {
        Self { release: Some(Box::new(release)) }
    }

    /// Deregister the listener now.
    pub fn release(mut self) {
        self.run_release();
    }

    fn run_release(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

impl Drop for ListenerHandle {
    fn drop(&mut self) {
        self.run_release();
    }
}

impl std::fmt::Debug for ListenerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListenerHandle")
            .field("active", &self.release.is_some())
            .finish()
    }
}

// =============================================================================
// TRAITS
// =============================================================================

/// Hosted identity provider.
#[async_trait]
pub trait AuthBackend: Send + Sync {
    /// Run the interactive popup flow. Resolves once the flow completes.
    async fn sign_in_with_popup(&self, request: SignInRequest) -> Result<Session, BackendError>;

    /// End the provider-side session.
    async fn sign_out(&self) -> Result<(), BackendError>;

    /// Register a standing auth-state listener. The current state is
    /// delivered immediately, then again on every change.
    fn on_auth_state_changed(&self, callback: AuthCallback) -> ListenerHandle;
}

/// Hosted document database with live queries.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Insert a document with a store-assigned id. Returns the id.
    async fn add_document(&self, collection: &str, fields: Fields) -> Result<String, BackendError>;

    /// Open a live query. The current result is delivered immediately, then
    /// again whenever the underlying collection changes.
    fn on_snapshot(&self, query: Query, callback: SnapshotCallback) -> ListenerHandle;
}

/// One hosted project: hands out a per-context auth client and the shared
/// document store.
pub trait HostedProject: Send + Sync {
    fn project_id(&self) -> &str;

    /// A fresh, signed-out auth client for one browser context.
    fn auth_client(&self) -> Arc<dyn AuthBackend>;

    fn store(&self) -> Arc<dyn DocumentStore>;
}

// =============================================================================
// TEST HELPERS
// =============================================================================


#[cfg(test)]
#[path = "mod_test.rs"]
mod tests;
