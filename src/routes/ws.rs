//! WebSocket handler — one browser context per connection.
//!
//! DESIGN
//! ======
//! On upgrade the handler builds a [`ChatContext`]: a fresh auth client from
//! the hosted project, an `AuthSessionProvider` over it and a
//! `ChatSessionManager` over the shared store. It then enters a `select!`
//! loop over three sources:
//! - Incoming client frames → parse + dispatch by syscall prefix
//! - Session changes → re-sync the chat manager, push `auth:state`
//! - Message list changes → push `chat:messages`
//!
//! Handlers that change the session (`auth:sign_in`, `auth:sign_out`) sync
//! the chat manager before replying, so a signed-out view never receives a
//! list that predates its sign-out.
//!
//! LIFECYCLE
//! =========
//! 1. Upgrade → send `session:connected` and the initial `auth:state`
//! 2. Client frames → dispatch → one `done` or `error` reply each
//! 3. Close (or any send failure) → release live query and auth listener

use std::sync::Arc;

use axum::extract::State;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::response::Response;
use tokio::sync::watch;
use tracing::{info, warn};
use uuid::Uuid;

use crate::auth::{AuthSessionProvider, IdentityProvider, Session, SignInRequest};
use crate::backend::HostedProject;
use crate::chat::{self, ChatSessionManager, SendOutcome};
use crate::frame::{Data, Frame, Status};
use crate::state::AppState;

// =============================================================================
// CONTEXT
// =============================================================================

/// The auth provider and chat manager owned by one socket.
struct ChatContext {
    auth: Arc<AuthSessionProvider>,
    chat: ChatSessionManager,
}

impl ChatContext {
    fn open(project: &dyn HostedProject) -> Self {
        let auth = Arc::new(AuthSessionProvider::new(project.auth_client()));
        let chat = ChatSessionManager::new(Arc::clone(&auth), project.store());
        Self { auth, chat }
    }

    /// Release the live query and the auth listener.
    fn teardown(mut self) {
        self.chat.shutdown();
        self.auth.close();
    }
}

// =============================================================================
// UPGRADE
// =============================================================================

pub async fn handle_ws(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| run_ws(socket, state))
}

// =============================================================================
// CONNECTION
// =============================================================================

async fn run_ws(mut socket: WebSocket, state: AppState) {
    let client_id = Uuid::new_v4();
    let mut ctx = ChatContext::open(state.project.as_ref());
    let mut auth_rx = ctx.auth.watch();
    let mut messages_rx = ctx.chat.watch();

    let welcome = Frame::request("session:connected", Data::new())
        .with_data("client_id", client_id.to_string())
        .with_data("project_id", state.project.project_id());
    let initial = auth_state_frame(ctx.auth.session().as_ref());

    if send_frame(&mut socket, &welcome).await.is_ok() && send_frame(&mut socket, &initial).await.is_ok() {
        info!(%client_id, "ws: client connected");
        run_loop(&mut socket, &mut ctx, client_id, &mut auth_rx, &mut messages_rx).await;
    }

    ctx.teardown();
    info!(%client_id, "ws: client disconnected");
}

async fn run_loop(
    socket: &mut WebSocket,
    ctx: &mut ChatContext,
    client_id: Uuid,
    auth_rx: &mut watch::Receiver<Option<Session>>,
    messages_rx: &mut watch::Receiver<Vec<chat::Message>>,
) {
    loop {
        tokio::select! {
            msg = socket.recv() => {
                let Some(Ok(msg)) = msg else { break };
                match msg {
                    Message::Text(text) => {
                        let reply = process_inbound_text(ctx, client_id, text.as_str()).await;
                        if send_frame(socket, &reply).await.is_err() {
                            break;
                        }
                    }
                    Message::Close(_) => break,
                    _ => {}
                }
            }
            changed = auth_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                let session = auth_rx.borrow_and_update().clone();
                ctx.chat.sync();
                if send_frame(socket, &auth_state_frame(session.as_ref())).await.is_err() {
                    break;
                }
            }
            changed = messages_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                let messages = messages_rx.borrow_and_update().clone();
                if send_frame(socket, &messages_frame(&messages)).await.is_err() {
                    break;
                }
            }
        }
    }
}

// =============================================================================
// FRAME DISPATCH
// =============================================================================

/// Parse one inbound text frame, dispatch it and return the reply.
async fn process_inbound_text(ctx: &mut ChatContext, client_id: Uuid, text: &str) -> Frame {
    let req: Frame = match serde_json::from_str(text) {
        Ok(r) => r,
        Err(e) => {
            warn!(%client_id, error = %e, "ws: invalid inbound frame");
            return Frame::request("gateway:error", Data::new()).with_data("message", format!("invalid json: {e}"));
        }
    };

    info!(%client_id, id = %req.id, syscall = %req.syscall, "ws: recv frame");

    let result = match req.prefix() {
        "auth" => handle_auth(ctx, &req).await,
        "chat" => handle_chat(ctx, &req).await,
        prefix => Err(req.error(format!("unknown prefix: {prefix}"))),
    };

    match result {
        Ok(data) => req.done_with(data),
        Err(err_frame) => err_frame,
    }
}

// =============================================================================
// AUTH HANDLERS
// =============================================================================

async fn handle_auth(ctx: &mut ChatContext, req: &Frame) -> Result<Data, Frame> {
    match req.op() {
        "sign_in" => {
            let provider = match req.str_field("provider") {
                Some(raw) => IdentityProvider::parse(raw).ok_or_else(|| req.error(format!("unsupported provider: {raw}")))?,
                None => IdentityProvider::default(),
            };
            let request = SignInRequest {
                provider,
                display_name: req.str_field("display_name").map(str::to_owned),
                photo_url: req.str_field("photo_url").map(str::to_owned),
            };

            let session = ctx.auth.sign_in(request).await.map_err(|e| req.error_from(&e))?;
            ctx.chat.sync();

            let mut data = Data::new();
            data.insert("session".into(), session_value(Some(&session)));
            Ok(data)
        }
        "sign_out" => {
            ctx.auth.sign_out().await;
            ctx.chat.sync();
            Ok(Data::new())
        }
        "session" => {
            let mut data = Data::new();
            data.insert("session".into(), session_value(ctx.auth.session().as_ref()));
            Ok(data)
        }
        op => Err(req.error(format!("unknown auth op: {op}"))),
    }
}

// =============================================================================
// CHAT HANDLERS
// =============================================================================

async fn handle_chat(ctx: &mut ChatContext, req: &Frame) -> Result<Data, Frame> {
    match req.op() {
        "send" => {
            let Some(text) = req.str_field("text") else {
                return Err(req.error("text required"));
            };

            let mut data = Data::new();
            match ctx.chat.send(text).await.map_err(|e| req.error_from(&e))? {
                SendOutcome::Sent { id } => {
                    data.insert("sent".into(), serde_json::json!(true));
                    data.insert("id".into(), serde_json::json!(id));
                }
                SendOutcome::SignedOut => {
                    data.insert("sent".into(), serde_json::json!(false));
                }
                SendOutcome::Blocked { alerts } => {
                    data.insert("sent".into(), serde_json::json!(false));
                    data.insert("blocked".into(), serde_json::json!(true));
                    data.insert("alerts".into(), serde_json::to_value(alerts).unwrap_or_default());
                }
            }
            Ok(data)
        }
        "list" => {
            let mut data = Data::new();
            data.insert("messages".into(), serde_json::to_value(ctx.chat.messages()).unwrap_or_default());
            Ok(data)
        }
        op => Err(req.error(format!("unknown chat op: {op}"))),
    }
}

// =============================================================================
// HELPERS
// =============================================================================

fn session_value(session: Option<&Session>) -> serde_json::Value {
    serde_json::to_value(session).unwrap_or_default()
}

fn auth_state_frame(session: Option<&Session>) -> Frame {
    Frame::request("auth:state", Data::new()).with_data("session", session_value(session))
}

fn messages_frame(messages: &[chat::Message]) -> Frame {
    Frame::request("chat:messages", Data::new())
        .with_data("messages", serde_json::to_value(messages).unwrap_or_default())
}

async fn send_frame(socket: &mut WebSocket, frame: &Frame) -> Result<(), ()> {
    let json = match serde_json::to_string(frame) {
        Ok(j) => j,
        Err(e) => {
            warn!(error = %e, "ws: failed to serialize frame");
            return Err(());
        }
    };
    if frame.status == Status::Error {
        let code = frame.str_field("code").unwrap_or("-");
        let message = frame.str_field("message").unwrap_or("-");
        warn!(id = %frame.id, syscall = %frame.syscall, code, message, "ws: send frame status=Error");
    } else {
        info!(id = %frame.id, syscall = %frame.syscall, status = ?frame.status, "ws: send frame");
    }
    socket
        .send(Message::Text(json.into()))
        .await
        .map_err(|_| ())
}

#[cfg(test)]
#[path = "ws_test.rs"]
mod tests;
