//! Server configuration from command-line flags and environment variables

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

use crate::agent::AgentConfig;
use crate::tools::ExecutorConfig;

/// Conversational shell agent backed by an OpenAI-compatible LLM
#[derive(Debug, Clone, Parser)]
#[command(name = "shellagent", version)]
pub struct ServerConfig {
    /// Address the HTTP API listens on
    #[arg(long, env = "SHELLAGENT_LISTEN", default_value = "0.0.0.0:8080")]
    pub listen: SocketAddr,

    /// Base URL of the chat completions API
    #[arg(long, env = "OPENAI_BASE_URL", default_value = "https://api.openai.com/v1")]
    pub llm_base_url: String,

    /// API key sent as a bearer token
    #[arg(long, env = "OPENAI_API_KEY", hide_env_values = true)]
    pub api_key: Option<String>,

    /// Model identifier
    #[arg(long, env = "SHELLAGENT_MODEL", default_value = "gpt-4o")]
    pub model: String,

    /// Maximum LLM calls per user message
    #[arg(long, env = "SHELLAGENT_MAX_ITERATIONS", default_value_t = 10)]
    pub max_iterations: usize,

    /// Replace the built-in system prompt
    #[arg(long, env = "SHELLAGENT_SYSTEM_PROMPT")]
    pub system_prompt: Option<String>,

    /// Shell used to run commands
    #[arg(long, env = "SHELLAGENT_SHELL", default_value = "bash")]
    pub shell: String,

    /// Timeout for foreground commands, in seconds
    #[arg(long, env = "SHELLAGENT_COMMAND_TIMEOUT_SECS", default_value_t = 300)]
    pub command_timeout_secs: u64,

    /// SQLite database file for conversation history
    #[arg(long, env = "SHELLAGENT_DB_PATH", default_value = "agent.db")]
    pub db_path: PathBuf,

    /// Keep conversations in memory only
    #[arg(long)]
    pub no_persist: bool,

    /// OTLP collector endpoint for trace export
    #[arg(long, env = "OTEL_EXPORTER_OTLP_ENDPOINT")]
    pub otlp_endpoint: Option<String>,

    /// Log as JSON lines
    #[arg(long)]
    pub log_json: bool,
}

impl ServerConfig {
    pub fn agent_config(&self) -> AgentConfig {
        AgentConfig {
            model: self.model.clone(),
            max_iterations: self.max_iterations,
            system_prompt: self.system_prompt.clone(),
        }
    }

    pub fn executor_config(&self) -> ExecutorConfig {
        ExecutorConfig {
            shell: self.shell.clone(),
            command_timeout: Duration::from_secs(self.command_timeout_secs),
        }
    }
}
