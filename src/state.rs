//! Shared application state.
//!
//! DESIGN
//! ======
//! `AppState` is injected into Axum handlers via the `State` extractor. It
//! holds the hosted project every session socket binds to and the view cache
//! the page routes render from. Per-browser state (auth session, message
//! feed) is not here: it lives inside each socket task.

use std::sync::Arc;

use crate::backend::HostedProject;
use crate::routes::views::ViewCache;

/// Shared application state. Clone is required by Axum; all fields are Arc-wrapped.
#[derive(Clone)]
pub struct AppState {
    pub project: Arc<dyn HostedProject>,
    pub views: Arc<ViewCache>,
}

impl AppState {
    #[must_use]
    pub fn new(project: Arc<dyn HostedProject>) -> Self {
        Self { project, views: Arc::new(ViewCache::new()) }
    }
}

// =============================================================================
// TEST HELPERS
// =============================================================================
