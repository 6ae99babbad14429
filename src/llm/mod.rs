//! LLM provider integration
//!
//! Speaks the OpenAI-compatible chat completions protocol with function
//! calling. The orchestration loop depends only on the [`LlmClient`] trait,
//! so tests can substitute a scripted model.

pub mod client;
pub mod types;

pub use client::{ChatClient, ChatError, LlmClient};
pub use types::{ChatMessage, ChatResponse, FunctionCall, Tool, ToolCall, ToolFunction};

/// Default system prompt for the shell agent
pub const DEFAULT_AGENT_SYSTEM_PROMPT: &str = r#"You are a helpful assistant with access to the user's shell.

You have three tools:
- run_command runs a shell command and returns its combined output. Set "background" to true for long-running commands such as servers or watchers; you get the PID back instead of the output.
- list_processes shows the background processes you started and how long they have been running.
- kill_process stops a background process (and everything it spawned) by PID.

Guidelines:
- Run commands to verify results rather than guessing
- If a command fails, read the output and try to fix it
- Do not start a background process when a foreground command will finish quickly
- Kill background processes you no longer need
- When the task is complete, respond with your final answer in plain text"#;
