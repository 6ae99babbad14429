//! Request/response bodies and error mapping for the HTTP API
//!
//! The DTOs are shared with the `agent-cli` client.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::error;

use crate::agent::AgentError;
use crate::conversation::{Conversation, Message};
use crate::process::SupervisorError;

/// Conversation used when a request does not name one
pub const DEFAULT_CONVERSATION_ID: &str = "default";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendMessageRequest {
    pub message: String,
    #[serde(
        rename = "conversationId",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub conversation_id: Option<String>,
}

impl SendMessageRequest {
    /// The target conversation, `"default"` when absent or blank
    pub fn conversation_id(&self) -> &str {
        match self.conversation_id.as_deref().map(str::trim) {
            Some(id) if !id.is_empty() => id,
            _ => DEFAULT_CONVERSATION_ID,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendMessageResponse {
    #[serde(rename = "conversationId")]
    pub conversation_id: String,
    /// Messages appended during the turn, user message first
    pub messages: Vec<Message>,
    /// finished, iteration_limit or cancelled
    pub completion: String,
    pub iterations: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationSnapshot {
    pub id: String,
    pub messages: Vec<Message>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<Conversation> for ConversationSnapshot {
    fn from(conv: Conversation) -> Self {
        Self {
            id: conv.id,
            messages: conv.messages,
            created_at: conv.created_at,
            updated_at: conv.updated_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KillResponse {
    pub pid: u32,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
}

/// Error type for HTTP handlers
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("{0}")]
    BadRequest(String),
    #[error("conversation '{0}' not found")]
    ConversationNotFound(String),
    #[error(transparent)]
    Agent(#[from] AgentError),
    #[error(transparent)]
    Supervisor(#[from] SupervisorError),
    #[error("failed to encode metrics: {0}")]
    Metrics(#[from] prometheus::Error),
}

impl ServerError {
    pub fn status(&self) -> StatusCode {
        match self {
            ServerError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ServerError::ConversationNotFound(_) => StatusCode::NOT_FOUND,
            ServerError::Supervisor(SupervisorError::NotFound(_)) => StatusCode::NOT_FOUND,
            ServerError::Agent(_) | ServerError::Supervisor(_) | ServerError::Metrics(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!(error = %self, "Request failed");
        }
        (
            status,
            Json(ErrorBody {
                error: self.to_string(),
            }),
        )
            .into_response()
    }
}
