//! HTTP handlers

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::IntoResponse;
use axum::Json;
use futures_util::{Stream, StreamExt};
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::api::{
    ConversationSnapshot, KillResponse, SendMessageRequest, SendMessageResponse, ServerError,
};
use super::AppState;
use crate::conversation::{ConversationSummary, Message};
use crate::metrics;
use crate::process::ProcessRecord;

fn validate(
    body: Result<Json<SendMessageRequest>, JsonRejection>,
) -> Result<SendMessageRequest, ServerError> {
    let Json(request) = body.map_err(|e| ServerError::BadRequest(e.body_text()))?;
    if request.message.trim().is_empty() {
        return Err(ServerError::BadRequest("message must not be empty".to_string()));
    }
    Ok(request)
}

/// POST /api/chat
pub async fn chat(
    State(state): State<AppState>,
    body: Result<Json<SendMessageRequest>, JsonRejection>,
) -> Result<Json<SendMessageResponse>, ServerError> {
    let request = validate(body)?;
    let conversation_id = request.conversation_id().to_string();

    let result = state
        .controller
        .send_message(&conversation_id, &request.message)
        .await?;

    Ok(Json(SendMessageResponse {
        conversation_id,
        messages: result.messages,
        completion: result.completion.as_str().to_string(),
        iterations: result.iterations,
    }))
}

/// POST /api/chat/stream
///
/// Emits `connected`, one `message` event per appended message, then `done`
/// or `error`. Closing the connection cancels the turn.
pub async fn chat_stream(
    State(state): State<AppState>,
    body: Result<Json<SendMessageRequest>, JsonRejection>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ServerError> {
    let request = validate(body)?;
    let conversation_id = request.conversation_id().to_string();

    let (tx, rx) = mpsc::unbounded_channel::<Event>();
    let cancel = CancellationToken::new();

    let _ = tx.send(event(serde_json::json!({
        "type": "connected",
        "conversationId": conversation_id,
    })));

    let controller = Arc::clone(&state.controller);
    let task_cancel = cancel.clone();
    tokio::spawn(async move {
        let message_tx = tx.clone();
        let on_message = move |message: &Message| {
            let _ = message_tx.send(event(serde_json::json!({
                "type": "message",
                "message": message,
            })));
        };

        let result = controller
            .send_message_with(&conversation_id, &request.message, Some(&on_message), &task_cancel)
            .await;

        let last = match result {
            Ok(result) => serde_json::json!({
                "type": "done",
                "completion": result.completion.as_str(),
                "iterations": result.iterations,
            }),
            Err(e) => {
                warn!(conversation_id = %conversation_id, error = %e, "Streaming turn failed");
                serde_json::json!({ "type": "error", "error": e.to_string() })
            }
        };
        if tx.send(event(last)).is_err() {
            info!(conversation_id = %conversation_id, "Client disconnected before turn finished");
        }
    });

    // Dropping the response stream (client went away) cancels the turn
    let guard = cancel.drop_guard();
    let stream = UnboundedReceiverStream::new(rx).map(move |ev| {
        let _ = &guard;
        Ok::<_, Infallible>(ev)
    });

    Ok(Sse::new(stream).keep_alive(KeepAlive::new().interval(Duration::from_secs(30))))
}

fn event(payload: serde_json::Value) -> Event {
    Event::default().data(payload.to_string())
}

/// GET /api/conversations/:id
pub async fn get_conversation(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Json<ConversationSnapshot> {
    let conversation = state.controller.store().get_or_create(&id).await;
    Json(conversation.into())
}

/// GET /api/conversations
pub async fn list_conversations(State(state): State<AppState>) -> Json<Vec<ConversationSummary>> {
    Json(state.controller.store().list().await)
}

/// DELETE /api/conversations/:id
pub async fn delete_conversation(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, ServerError> {
    if state.controller.delete_conversation(&id).await {
        info!(conversation_id = %id, "Deleted conversation");
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ServerError::ConversationNotFound(id))
    }
}

/// GET /api/processes
pub async fn list_processes(State(state): State<AppState>) -> Json<Vec<ProcessRecord>> {
    let mut records = state.supervisor.list().await;
    records.sort_by_key(|r| r.pid);
    Json(records)
}

/// POST /api/processes/:pid/kill
pub async fn kill_process(
    State(state): State<AppState>,
    Path(pid): Path<u32>,
) -> Result<Json<KillResponse>, ServerError> {
    state.supervisor.kill(pid).await?;
    Ok(Json(KillResponse {
        pid,
        message: format!("Successfully killed process {pid}"),
    }))
}

/// GET /metrics
pub async fn metrics_text() -> Result<impl IntoResponse, ServerError> {
    let body = metrics::gather_text()?;
    Ok((
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        body,
    ))
}
