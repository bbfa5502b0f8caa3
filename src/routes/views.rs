//! Marketplace views — home, buyer and seller pages.
//!
//! The home page is rendered when the cache is built; buyer and seller pages
//! are rendered on their first request and reused afterwards. Buyer and
//! seller pages carry the chat panel, which talks to `/api/ws`.

use std::sync::OnceLock;

use axum::extract::State;
use axum::response::Html;
use tracing::info;

use crate::state::AppState;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum View {
    Home,
    Buyer,
    Seller,
}

impl View {
    pub const ALL: [View; 3] = [View::Home, View::Buyer, View::Seller];

    #[must_use]
    pub fn path(self) -> &'static str {
        match self {
            View::Home => "/",
            View::Buyer => "/buyer",
            View::Seller => "/seller",
        }
    }

    #[must_use]
    pub fn title(self) -> &'static str {
        match self {
            View::Home => "Marketplace",
            View::Buyer => "Buy",
            View::Seller => "Sell",
        }
    }

    fn has_chat(self) -> bool {
        !matches!(self, View::Home)
    }

    fn render(self) -> String {
        let nav: String = View::ALL
            .iter()
            .map(|v| format!(r#"<a href="{}">{}</a>"#, v.path(), v.title()))
            .collect::<Vec<_>>()
            .join(" | ");
        let body = match self {
            View::Home => "<p>Pick a side of the marketplace to get started.</p>".to_string(),
            View::Buyer => "<p>Browse listings and chat with sellers.</p>".to_string(),
            View::Seller => "<p>Manage your listings and chat with buyers.</p>".to_string(),
        };
        let chat = if self.has_chat() { CHAT_PANEL } else { "" };

        format!(
            r#"<!DOCTYPE html>
<html lang="en">
<head><meta charset="utf-8"/><meta name="viewport" content="width=device-width, initial-scale=1"/><title>{title}</title></head>
<body>
<nav>{nav}</nav>
<h1>{title}</h1>
{body}
{chat}
</body>
</html>
"#,
            title = self.title(),
        )
    }
}

/// Chat panel markup and the socket client behind it.
const CHAT_PANEL: &str = r#"<section id="chat">
<form id="sign-in"><input name="display_name" placeholder="Your name"/><button>Sign in</button></form>
<button id="sign-out" hidden>Sign out</button>
<ul id="messages"></ul>
<form id="send" hidden><input name="text" autocomplete="off"/><button>Send</button></form>
</section>
<script>
(() => {
  const proto = location.protocol === "https:" ? "wss" : "ws";
  const ws = new WebSocket(`${proto}://${location.host}/api/ws`);
  const frame = (syscall, data = {}) =>
    ws.send(JSON.stringify({ id: crypto.randomUUID(), syscall, status: "request", data }));
  const $ = (id) => document.getElementById(id);
  ws.onmessage = (ev) => {
    const f = JSON.parse(ev.data);
    if (f.syscall === "auth:state" && f.status === "request") {
      const signedIn = f.data.session !== null;
      $("sign-in").hidden = signedIn;
      $("sign-out").hidden = !signedIn;
      $("send").hidden = !signedIn;
    } else if (f.syscall === "chat:messages" && f.status === "request") {
      $("messages").replaceChildren(...f.data.messages.map((m) => {
        const li = document.createElement("li");
        li.textContent = `${m.userName ?? "anonymous"}: ${m.text}`;
        return li;
      }));
    } else if (f.status === "error") {
      console.warn(f.syscall, f.data.message);
    }
  };
  $("sign-in").onsubmit = (e) => {
    e.preventDefault();
    frame("auth:sign_in", { provider: "google", display_name: e.target.elements.display_name.value });
  };
  $("sign-out").onclick = () => frame("auth:sign_out");
  $("send").onsubmit = (e) => {
    e.preventDefault();
    frame("chat:send", { text: e.target.elements.text.value });
    e.target.reset();
  };
})();
</script>"#;

/// Rendered pages, each produced once.
pub struct ViewCache {
    home: OnceLock<String>,
    buyer: OnceLock<String>,
    seller: OnceLock<String>,
}

impl ViewCache {
    #[must_use]
    pub fn new() -> Self {
        let cache = Self { home: OnceLock::new(), buyer: OnceLock::new(), seller: OnceLock::new() };
        let _ = cache.get(View::Home);
        cache
    }

    fn slot(&self, view: View) -> &OnceLock<String> {
        match view {
            View::Home => &self.home,
            View::Buyer => &self.buyer,
            View::Seller => &self.seller,
        }
    }

    /// The rendered page, rendering it now if this is the first request.
    pub fn get(&self, view: View) -> &str {
        self.slot(view).get_or_init(|| {
            info!(path = view.path(), "views: rendering on first request");
            view.render()
        })
    }

    #[cfg(test)]
    pub fn is_loaded(&self, view: View) -> bool {
        self.slot(view).get().is_some()
    }
}

impl Default for ViewCache {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// HANDLERS
// =============================================================================

pub async fn home(State(state): State<AppState>) -> Html<String> {
    Html(state.views.get(View::Home).to_owned())
}

pub async fn buyer(State(state): State<AppState>) -> Html<String> {
    Html(state.views.get(View::Buyer).to_owned())
}

pub async fn seller(State(state): State<AppState>) -> Html<String> {
    Html(state.views.get(View::Seller).to_owned())
}

#[cfg(test)]
#[path = "views_test.rs"]
mod tests;
