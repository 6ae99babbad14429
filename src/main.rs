//! shellagent server
//!
//! Wires the process supervisor, conversation store, LLM client and agent
//! controller together and serves the HTTP API.

use std::sync::Arc;

use anyhow::{anyhow, Context};
use clap::Parser;
use tracing::info;

use shellagent::config::ServerConfig;
use shellagent::conversation::ConversationStore;
use shellagent::persistence::SqliteRepository;
use shellagent::process::{install_shutdown_hook, ProcessSupervisor};
use shellagent::server::{self, AppState};
use shellagent::telemetry::init_tracing;
use shellagent::{AgentController, ChatClient, ToolExecutor};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = ServerConfig::parse();

    init_tracing("shellagent", config.otlp_endpoint.as_deref(), config.log_json)
        .map_err(|e| anyhow!("failed to initialize tracing: {e}"))?;

    let supervisor = Arc::new(ProcessSupervisor::new(&config.shell));
    install_shutdown_hook(Arc::clone(&supervisor));

    let store = if config.no_persist {
        info!("Persistence disabled, conversations are kept in memory only");
        ConversationStore::new()
    } else {
        let repo = SqliteRepository::open(&config.db_path)
            .with_context(|| format!("failed to open database {}", config.db_path.display()))?;
        let store = ConversationStore::with_repository(Arc::new(repo));
        store
            .load_all()
            .await
            .context("failed to load conversations")?;
        store
    };
    let store = Arc::new(store);

    let executor = Arc::new(ToolExecutor::new(
        Arc::clone(&supervisor),
        config.executor_config(),
    ));

    let mut llm = ChatClient::new(&config.llm_base_url);
    if let Some(key) = &config.api_key {
        llm = llm.with_api_key(key);
    }

    let agent_config = config.agent_config();
    info!(
        model = %agent_config.model,
        max_iterations = agent_config.max_iterations,
        llm_base_url = %config.llm_base_url,
        "Agent configured"
    );

    let controller = Arc::new(AgentController::new(
        Arc::new(llm),
        store,
        executor,
        agent_config,
    ));

    let state = AppState {
        controller,
        supervisor,
    };
    server::serve(config.listen, state)
        .await
        .context("HTTP server failed")?;

    Ok(())
}
