use crate::agent_loop::AgentLoop;
use crate::checkpoint::CheckpointStore;
use crate::config::AppConfig;
use crate::error::Result;
use crate::mcp::McpConnector;
use crate::model::ModelSelector;
use crate::server_store::ServerStore;
use crate::types::Message;
use std::sync::Arc;
use tracing::info;

/// Wires model selection, the registered tool servers and the checkpoint
/// store into one request/response cycle per user message.
pub struct Orchestrator {
    servers: Arc<ServerStore>,
    models: Arc<ModelSelector>,
    connector: McpConnector,
    checkpoints: CheckpointStore,
    agent: AgentLoop,
}

impl Orchestrator {
    pub fn new(config: &AppConfig, servers: Arc<ServerStore>, models: Arc<ModelSelector>) -> Self {
        Self {
            servers,
            models,
            connector: McpConnector::new(config.mcp.connect_timeout()),
            checkpoints: CheckpointStore::new(&config.storage.checkpoint_db),
            agent: AgentLoop::new(config.agent.clone(), &config.provider),
        }
    }

    /// Answer `prompt` on thread `thread_id` with `model_id`, using every
    /// currently registered tool server. Messages already checkpointed stay
    /// persisted if a later step fails.
    pub async fn generate(&self, prompt: &str, model_id: &str, thread_id: &str) -> Result<Message> {
        // The handle is captured once; switching models mid-request does not affect this run.
        let model = self.models.ensure_model(model_id)?;
        let servers = self.servers.read().await?;
        let toolset = self.connector.connect_all(&servers).await?;
        let checkpoint = match self.checkpoints.open() {
            Ok(cp) => cp,
            Err(e) => {
                toolset.shutdown().await;
                return Err(e);
            }
        };

        info!(
            thread = thread_id,
            model = model.model_id(),
            tools = toolset.registry().len(),
            "Running agent"
        );
        let outcome = self
            .agent
            .run(&model, toolset.registry(), &checkpoint, thread_id, prompt)
            .await;
        toolset.shutdown().await;
        outcome
    }
}
