//! Auth session provider — the current signed-in identity for one browser
//! context.
//!
//! SYSTEM CONTEXT
//! ==============
//! One provider exists per session socket. It owns the standing auth-state
//! listener on the hosted identity provider and mirrors the reported
//! identity into a `watch` channel that the chat manager and the socket loop
//! read from.
//!
//! TRADE-OFFS
//! ==========
//! Sign-out clears the local session before the provider acknowledges. If the
//! provider call then fails, the view shows signed-out while the provider may
//! still hold a live session; the failure is only logged.

use std::sync::{Arc, Mutex, PoisonError};

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{info, warn};

use crate::backend::{AuthBackend, BackendError, ListenerHandle};

// =============================================================================
// TYPES
// =============================================================================

/// The authenticated identity as reported by the identity provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub uid: String,
    pub display_name: Option<String>,
    #[serde(rename = "photoURL")]
    pub photo_url: Option<String>,
}

/// Identity providers the popup flow can be started with.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IdentityProvider {
    #[default]
    Google,
}

impl IdentityProvider {
    /// Parse a provider name as sent by a view.
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "google" => Some(Self::Google),
            _ => None,
        }
    }
}

/// Arguments for the interactive sign-in flow.
///
/// `display_name` and `photo_url` carry what the popup reports back for
/// backends that do not run a real popup (the in-memory backend). Hosted
/// backends ignore them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SignInRequest {
    pub provider: IdentityProvider,
    pub display_name: Option<String>,
    pub photo_url: Option<String>,
}

#[cfg(test)]
impl SignInRequest {
    pub fn google() -> Self {
        Self::default()
    }

    pub fn with_identity(mut self, display_name: impl Into<String>, photo_url: Option<String>) -> Self {
        self.display_name = Some(display_name.into());
        self.photo_url = photo_url;
        self
    }
}

// =============================================================================
// PROVIDER
// =============================================================================

/// Tracks the current session and exposes sign-in/sign-out.
pub struct AuthSessionProvider {
    backend: Arc<dyn AuthBackend>,
    session: Arc<watch::Sender<Option<Session>>>,
    listener: Mutex<Option<ListenerHandle>>,
}

/// Store `next` if it differs from the current value. Returns whether it changed.
fn replace_session(tx: &watch::Sender<Option<Session>>, next: Option<Session>) -> bool {
    tx.send_if_modified(|current| {
        if *current == next {
            return false;
        }
        *current = next;
        true
    })
}

impl AuthSessionProvider {
    /// Create a provider and register its standing auth-state listener.
    pub fn new(backend: Arc<dyn AuthBackend>) -> Self {
        let (tx, _rx) = watch::channel(None);
        let session = Arc::new(tx);

        let sink = Arc::clone(&session);
        let listener = backend.on_auth_state_changed(Arc::new(move |next| {
            replace_session(&sink, next);
        }));

        Self { backend, session, listener: Mutex::new(Some(listener)) }
    }

    /// Current session, if signed in.
    #[must_use]
    pub fn session(&self) -> Option<Session> {
        self.session.borrow().clone()
    }

    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        self.session.borrow().is_some()
    }

    /// Receiver that observes every session change.
    #[must_use]
    pub fn watch(&self) -> watch::Receiver<Option<Session>> {
        self.session.subscribe()
    }

    /// Run the popup sign-in flow.
    ///
    /// # Errors
    ///
    /// Returns the backend error unchanged (popup blocked or closed, network,
    /// permission). The local session is left as it was.
    pub async fn sign_in(&self, request: SignInRequest) -> Result<Session, BackendError> {
        let session = self.backend.sign_in_with_popup(request).await?;
        replace_session(&self.session, Some(session.clone()));
        info!(uid = %session.uid, "auth: signed in");
        Ok(session)
    }

    /// Clear the local session immediately, then end the provider session.
    ///
    /// Provider failures are logged and otherwise ignored.
    pub async fn sign_out(&self) {
        let uid = self.session().map(|s| s.uid);
        replace_session(&self.session, None);

        match self.backend.sign_out().await {
            Ok(()) => info!(uid = ?uid, "auth: signed out"),
            Err(e) => warn!(uid = ?uid, error = %e, "auth: provider sign-out failed; local session cleared anyway"),
        }
    }

    /// Deregister the auth-state listener. Idempotent.
    pub fn close(&self) {
        let listener = self
            .listener
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(listener) = listener {
            listener.release();
        }
    }

    /// Whether the auth-state listener is still registered.
    #[cfg(test)]
    pub fn is_listening(&self) -> bool {
        self.listener
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }
}

#[cfg(test)]
#[path = "auth_test.rs"]
mod tests;
