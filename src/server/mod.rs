//! HTTP API
//!
//! | method | path | |
//! |---|---|---|
//! | POST | `/api/chat` | run a turn, return the appended messages |
//! | POST | `/api/chat/stream` | run a turn, stream appended messages as SSE |
//! | GET | `/api/conversations` | list conversations, most recent first |
//! | GET | `/api/conversations/:id` | fetch (or create) a conversation |
//! | DELETE | `/api/conversations/:id` | kill its processes and delete it |
//! | GET | `/api/processes` | list background processes |
//! | POST | `/api/processes/:pid/kill` | kill a background process |
//! | GET | `/metrics` | Prometheus metrics |

pub mod api;
pub mod handlers;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use tokio::net::TcpListener;
use tracing::info;

use crate::agent::AgentController;
use crate::process::ProcessSupervisor;

/// Server application state
#[derive(Clone)]
pub struct AppState {
    pub controller: Arc<AgentController>,
    pub supervisor: Arc<ProcessSupervisor>,
}

/// Create the API router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/api/chat", post(handlers::chat))
        .route("/api/chat/stream", post(handlers::chat_stream))
        .route("/api/conversations", get(handlers::list_conversations))
        .route(
            "/api/conversations/:id",
            get(handlers::get_conversation).delete(handlers::delete_conversation),
        )
        .route("/api/processes", get(handlers::list_processes))
        .route("/api/processes/:pid/kill", post(handlers::kill_process))
        .route("/metrics", get(handlers::metrics_text))
        .with_state(state)
}

/// Bind `addr` and serve the API until the process exits
pub async fn serve(addr: SocketAddr, state: AppState) -> std::io::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    info!(addr = %listener.local_addr()?, "HTTP server listening");
    axum::serve(listener, create_router(state)).await
}
