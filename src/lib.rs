//! ShellAgent - conversational front-end for a hosted LLM with shell tool calling
//!
//! The model can run shell commands (synchronously or in the background),
//! list the background processes it started, and kill them. Every requested
//! tool call gets exactly one tool-result message before the conversation is
//! sent back to the model.
//!
//! # Modules
//!
//! - `process` - background process supervisor (process groups, exit watchers, shutdown hook)
//! - `tools` - tool catalog advertised to the model and the executor that runs it
//! - `conversation` - append-only conversation logs and rendering for the LLM
//! - `llm` - OpenAI-compatible chat completions client
//! - `agent` - the tool-call orchestration loop
//! - `persistence` - SQLite mirror of conversations
//! - `server` - HTTP API (JSON + Server-Sent Events)
//! - `metrics` - Prometheus metrics for observability
//! - `telemetry` - tracing subscriber and OpenTelemetry export
//!
//! # Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use shellagent::{AgentConfig, AgentController, ChatClient, ConversationStore, ProcessSupervisor, ToolExecutor};
//!
//! let supervisor = Arc::new(ProcessSupervisor::default());
//! let executor = Arc::new(ToolExecutor::new(supervisor, Default::default()));
//! let store = Arc::new(ConversationStore::new());
//! let llm = Arc::new(ChatClient::new("https://api.openai.com/v1").with_api_key(key));
//! let controller = AgentController::new(llm, store, executor, AgentConfig::default());
//!
//! let result = controller.send_message("default", "list files").await?;
//! ```

pub mod agent;
pub mod config;
pub mod conversation;
pub mod llm;
pub mod metrics;
pub mod persistence;
pub mod process;
pub mod server;
pub mod telemetry;
pub mod tools;

// Re-export commonly used types at crate root for convenience
pub use agent::{AgentConfig, AgentController, AgentError, AgentResult, Completion};
pub use conversation::{Conversation, ConversationStore, Message, Role, ToolCallRequest};
pub use llm::{ChatClient, LlmClient};
pub use process::{ProcessRecord, ProcessSupervisor, SupervisorError};
pub use tools::{ExecutorConfig, ToolExecutor};
