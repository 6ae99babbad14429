//! Tools the model can call
//!
//! - `catalog` - tool definitions (name, description, JSON Schema)
//! - `executor` - dispatch of a tool call to its side effect
//! - `shell` - synchronous command runner with timeout

pub mod catalog;
pub mod executor;
pub mod shell;

pub use catalog::{tool_catalog, KILL_PROCESS, LIST_PROCESSES, RUN_COMMAND};
pub use executor::{ExecutorConfig, ToolError, ToolExecutor};
