mod auth;
mod backend;
mod chat;
mod config;
mod frame;
mod routes;
mod screening;
mod state;

use std::sync::Arc;

use backend::memory::MemoryBackend;
use config::AppConfig;

const LOCAL_PROJECT_ID: &str = "local";

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt::init();

    let config = AppConfig::from_env().expect("invalid configuration");
    let port = config.port;

    // Credentials are opaque here; only the project id is ever logged.
    let backend = match &config.backend {
        Some(backend) => {
            tracing::info!(project_id = %backend.project_id, "backend configured");
            MemoryBackend::new(backend.project_id.clone())
        }
        None => {
            tracing::warn!(project_id = LOCAL_PROJECT_ID, "backend credentials incomplete; using local project");
            MemoryBackend::new(LOCAL_PROJECT_ID)
        }
    };

    let state = state::AppState::new(Arc::new(backend));

    let app = routes::app(state);
    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{port}"))
        .await
        .expect("failed to bind");

    tracing::info!(%port, "marketshell listening");
    axum::serve(listener, app).await.expect("server failed");
}
