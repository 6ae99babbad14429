//! Agent Controller - the tool-call orchestration loop
//!
//! One user turn runs as a sequence of rounds. Each round renders the
//! conversation, sends it with the tool catalog to the LLM, records the reply,
//! and executes any requested tool calls, appending exactly one tool result
//! per request. The turn ends when the model answers without tool calls, when
//! the iteration cap is reached, or when the caller cancels.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use tokio_util::sync::CancellationToken;
use tracing::{error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::conversation::{ConversationStore, Message, ToolCallRequest};
use crate::llm::{ChatError, ChatMessage, LlmClient, Tool, DEFAULT_AGENT_SYSTEM_PROMPT};
use crate::metrics::{AGENT_ITERATIONS, AGENT_TASKS, LLM_CALL_DURATION};
use crate::tools::{tool_catalog, ToolExecutor};

/// Configuration for the agent controller
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Model identifier sent to the provider (e.g., "gpt-4o")
    pub model: String,
    /// Maximum number of LLM calls per user turn
    pub max_iterations: usize,
    /// Custom system prompt (uses default if None)
    pub system_prompt: Option<String>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            model: "gpt-4o".to_string(),
            max_iterations: 10,
            system_prompt: None,
        }
    }
}

/// How a user turn ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    /// The model replied without requesting tools
    Finished,
    /// The iteration cap was reached; results so far are returned
    IterationLimit,
    /// The caller cancelled; no further rounds were started
    Cancelled,
}

impl Completion {
    pub fn as_str(&self) -> &'static str {
        match self {
            Completion::Finished => "finished",
            Completion::IterationLimit => "iteration_limit",
            Completion::Cancelled => "cancelled",
        }
    }
}

/// Result of one user turn
#[derive(Debug, Clone)]
pub struct AgentResult {
    /// Messages appended during this turn, in append order (user message first)
    pub messages: Vec<Message>,
    /// Number of LLM calls made
    pub iterations: usize,
    /// Number of tool calls executed
    pub tool_calls_made: usize,
    pub completion: Completion,
    /// Unique trace ID for this turn
    pub trace_id: String,
}

impl AgentResult {
    /// Content of the last assistant message, if any
    pub fn final_response(&self) -> Option<&str> {
        self.messages
            .iter()
            .rev()
            .find(|m| m.role == crate::conversation::Role::Assistant)
            .map(|m| m.content.as_str())
    }
}

/// Error type for agent operations
///
/// Only a failed LLM call aborts a turn. Tool failures become tool results.
#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    #[error("LLM call failed: {0}")]
    Llm(#[from] ChatError),
}

/// Invoked once per appended message, in append order
pub type MessageCallback = dyn Fn(&Message) + Send + Sync;

/// Agent Controller orchestrating the LLM and the tool executor
pub struct AgentController {
    llm: Arc<dyn LlmClient>,
    store: Arc<ConversationStore>,
    executor: Arc<ToolExecutor>,
    tools: Vec<Tool>,
    config: AgentConfig,
    /// Serialises turns within one conversation
    turn_locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl AgentController {
    /// Create a new agent controller
    ///
    /// # Arguments
    /// * `llm` - Chat model with tool calling
    /// * `store` - Conversation store shared with the transport layer
    /// * `executor` - Tool executor (owns the process supervisor)
    /// * `config` - Agent configuration
    pub fn new(
        llm: Arc<dyn LlmClient>,
        store: Arc<ConversationStore>,
        executor: Arc<ToolExecutor>,
        config: AgentConfig,
    ) -> Self {
        Self {
            llm,
            store,
            executor,
            tools: tool_catalog(),
            config,
            turn_locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn store(&self) -> &Arc<ConversationStore> {
        &self.store
    }

    pub fn executor(&self) -> &Arc<ToolExecutor> {
        &self.executor
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    /// Process one user message to completion
    pub async fn send_message(
        &self,
        conversation_id: &str,
        content: &str,
    ) -> Result<AgentResult, AgentError> {
        self.send_message_with(conversation_id, content, None, &CancellationToken::new())
            .await
    }

    /// Process one user message, reporting each appended message to `on_message`
    ///
    /// Cancelling `cancel` stops the turn before the next LLM call or tool
    /// dispatch. Background processes already started keep running.
    pub async fn send_message_with(
        &self,
        conversation_id: &str,
        content: &str,
        on_message: Option<&MessageCallback>,
        cancel: &CancellationToken,
    ) -> Result<AgentResult, AgentError> {
        let trace_id = Uuid::now_v7().to_string();

        // Create root span for the entire user turn
        let root_span = info_span!(
            "agent_task",
            trace_id = %trace_id,
            conversation_id = %conversation_id,
            model = %self.config.model,
            otel.name = "agent_task"
        );

        async {
            let lock = self.turn_lock(conversation_id);
            let result = {
                let _turn = lock.lock().await;
                self.run_turn(conversation_id, content, on_message, cancel, &trace_id)
                    .await
            };
            self.release_turn_lock(conversation_id, &lock);
            result
        }
        .instrument(root_span)
        .await
    }

    async fn run_turn(
        &self,
        conversation_id: &str,
        content: &str,
        on_message: Option<&MessageCallback>,
        cancel: &CancellationToken,
        trace_id: &str,
    ) -> Result<AgentResult, AgentError> {
        info!(trace_id = %trace_id, conversation_id, "Starting agent turn");

        let mut turn = Turn {
            conversation_id,
            on_message,
            messages: Vec::new(),
        };
        self.record(&mut turn, Message::user(content)).await;

        let system_prompt = self
            .config
            .system_prompt
            .as_deref()
            .unwrap_or(DEFAULT_AGENT_SYSTEM_PROMPT);

        let mut iterations = 0;
        let mut tool_calls_made = 0;

        let completion = loop {
            if cancel.is_cancelled() {
                break Completion::Cancelled;
            }
            if iterations >= self.config.max_iterations {
                warn!(
                    trace_id = %trace_id,
                    iterations,
                    "Max iterations reached, returning partial results"
                );
                break Completion::IterationLimit;
            }
            iterations += 1;

            let mut request = vec![ChatMessage::system(system_prompt)];
            request.extend(self.store.render(conversation_id).await);

            // Create span for LLM call
            let llm_span = info_span!(
                "llm_call",
                trace_id = %trace_id,
                iteration = iterations,
                model = %self.config.model,
                otel.name = "llm_call"
            );

            let call_start = Instant::now();
            let reply = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                reply = self
                    .llm
                    .chat(request, &self.config.model, &self.tools)
                    .instrument(llm_span) => Some(reply),
            };

            let reply = match reply {
                None => break Completion::Cancelled,
                Some(Ok(reply)) => reply,
                Some(Err(e)) => {
                    error!(trace_id = %trace_id, iteration = iterations, error = %e, "LLM call failed");
                    AGENT_TASKS.with_label_values(&["llm_error"]).inc();
                    AGENT_ITERATIONS.observe(iterations as f64);
                    return Err(AgentError::Llm(e));
                }
            };

            let call_duration = call_start.elapsed();
            LLM_CALL_DURATION
                .with_label_values(&[&self.config.model])
                .observe(call_duration.as_secs_f64());

            let calls: Vec<ToolCallRequest> =
                reply.tool_calls.into_iter().map(ToolCallRequest::from).collect();
            info!(
                trace_id = %trace_id,
                iteration = iterations,
                duration_ms = call_duration.as_secs_f64() * 1000.0,
                tool_calls = calls.len(),
                "LLM call completed"
            );

            self.record(&mut turn, Message::assistant(reply.content, calls.clone()))
                .await;

            if calls.is_empty() {
                break Completion::Finished;
            }

            tool_calls_made += self
                .dispatch_round(&mut turn, &calls, trace_id, cancel)
                .await;
        };

        info!(
            trace_id = %trace_id,
            iterations,
            tool_calls = tool_calls_made,
            completion = completion.as_str(),
            "Agent turn completed"
        );
        AGENT_TASKS.with_label_values(&[completion.as_str()]).inc();
        AGENT_ITERATIONS.observe(iterations as f64);

        Ok(AgentResult {
            messages: turn.messages,
            iterations,
            tool_calls_made,
            completion,
            trace_id: trace_id.to_string(),
        })
    }

    /// Kill a conversation's background processes and forget the conversation
    ///
    /// Waits for any in-flight turn on the conversation to finish first.
    pub async fn delete_conversation(&self, conversation_id: &str) -> bool {
        let lock = self.turn_lock(conversation_id);
        let deleted = {
            let _turn = lock.lock().await;
            let killed = self
                .executor
                .supervisor()
                .kill_by_conversation(conversation_id)
                .await;
            if killed > 0 {
                info!(conversation_id, killed, "Killed background processes of deleted conversation");
            }
            self.store.delete(conversation_id).await
        };

        self.release_turn_lock(conversation_id, &lock);
        deleted
    }

    /// Execute one round of tool calls in request order
    ///
    /// Returns the number of calls actually executed.
    async fn dispatch_round(
        &self,
        turn: &mut Turn<'_>,
        calls: &[ToolCallRequest],
        trace_id: &str,
        cancel: &CancellationToken,
    ) -> usize {
        let mut answered: HashSet<&str> = HashSet::new();
        let mut executed = 0;

        for call in calls {
            if !answered.insert(call.id.as_str()) {
                warn!(trace_id = %trace_id, tool_call_id = %call.id, "Skipping duplicate tool call id");
                continue;
            }

            let content = if cancel.is_cancelled() {
                format!(
                    "Error: tool call {} was not executed: the request was cancelled",
                    call.id
                )
            } else {
                let tool_span = info_span!(
                    "tool_call",
                    trace_id = %trace_id,
                    tool = %call.name,
                    tool_call_id = %call.id,
                    otel.name = "tool_call"
                );
                executed += 1;
                self.executor
                    .execute(&call.name, &call.arguments, Some(turn.conversation_id))
                    .instrument(tool_span)
                    .await
            };

            self.record(turn, Message::tool(&call.id, content)).await;
        }

        executed
    }

    async fn record(&self, turn: &mut Turn<'_>, message: Message) {
        self.store.append(turn.conversation_id, message.clone()).await;
        if let Some(callback) = turn.on_message {
            callback(&message);
        }
        turn.messages.push(message);
    }

    fn turn_lock(&self, conversation_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.turn_locks.lock().unwrap_or_else(|p| p.into_inner());
        Arc::clone(locks.entry(conversation_id.to_string()).or_default())
    }

    /// Drop the map entry for `lock` once no other turn holds or awaits it
    fn release_turn_lock(&self, conversation_id: &str, lock: &Arc<tokio::sync::Mutex<()>>) {
        let mut locks = self.turn_locks.lock().unwrap_or_else(|p| p.into_inner());
        let same = locks
            .get(conversation_id)
            .is_some_and(|current| Arc::ptr_eq(current, lock));
        // Only the map and the caller hold it
        if same && Arc::strong_count(lock) == 2 {
            locks.remove(conversation_id);
        }
    }
}

/// Per-turn bookkeeping
struct Turn<'a> {
    conversation_id: &'a str,
    on_message: Option<&'a MessageCallback>,
    messages: Vec<Message>,
}
