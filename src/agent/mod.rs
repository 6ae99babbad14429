//! Agent module for LLM-driven shell tool use
//!
//! # Architecture
//!
//! ```text
//! User message → AgentController → ConversationStore.render() (+ system prompt)
//!                      ↓
//!               LlmClient.chat (with tool catalog)
//!                      ↓
//!           Tool calls? ── no ──→ Done
//!                      ↓ yes
//!               ToolExecutor.execute (one result per call, in order)
//!                      ↓
//!               run_command / list_processes / kill_process
//!                      ↓
//!           Append tool results → next round (bounded by max_iterations)
//! ```

pub mod controller;

pub use controller::{
    AgentConfig, AgentController, AgentError, AgentResult, Completion, MessageCallback,
};
