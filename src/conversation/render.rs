//! Translation of a conversation log into the LLM message sequence
//!
//! The chat API rejects a request in which an assistant tool call is not
//! followed by its tool result before the next non-tool message. The log
//! itself is never validated on append, so pairing is enforced here:
//!
//! - every requested call id becomes pending
//! - a tool message resolves its pending id
//! - before any non-tool message, and once more at the end, every id still
//!   pending gets a placeholder tool result
//! - tool messages that answer no pending id are dropped

use tracing::warn;

use super::message::{Message, Role};
use crate::llm::ChatMessage;

/// Rendered LLM messages plus what had to be repaired
#[derive(Debug, Default)]
pub struct Rendered {
    pub messages: Vec<ChatMessage>,
    /// Call ids that received a placeholder result
    pub repaired: Vec<String>,
    /// Tool messages dropped because they answered no pending call
    pub dropped: usize,
}

pub fn missing_response_text(call_id: &str) -> String {
    format!(
        "Error: missing tool response for tool_call_id {call_id}. Conversation state may be corrupted."
    )
}

pub fn render_messages(log: &[Message]) -> Rendered {
    let mut out = Rendered::default();
    let mut pending: Vec<String> = Vec::new();

    for message in log {
        if message.role == Role::Tool {
            let answered = message
                .tool_call_id
                .as_deref()
                .and_then(|id| pending.iter().position(|p| p == id));
            match answered {
                Some(idx) => {
                    pending.remove(idx);
                    out.messages.push(message.to_chat_message());
                }
                None => {
                    warn!(
                        message_id = %message.id,
                        tool_call_id = ?message.tool_call_id,
                        "Dropping tool message that answers no pending tool call"
                    );
                    out.dropped += 1;
                }
            }
            continue;
        }

        flush_pending(&mut pending, &mut out);
        out.messages.push(message.to_chat_message());

        if message.role == Role::Assistant {
            for call in &message.tool_calls {
                if !pending.contains(&call.id) {
                    pending.push(call.id.clone());
                }
            }
        }
    }

    flush_pending(&mut pending, &mut out);
    out
}

fn flush_pending(pending: &mut Vec<String>, out: &mut Rendered) {
    for call_id in pending.drain(..) {
        warn!(tool_call_id = %call_id, "Missing tool response, inserting placeholder");
        out.messages
            .push(ChatMessage::tool(&call_id, missing_response_text(&call_id)));
        out.repaired.push(call_id);
    }
}
