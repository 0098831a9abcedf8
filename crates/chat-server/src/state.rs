use chat_core::checkpoint::CheckpointStore;
use chat_core::config::AppConfig;
use chat_core::mcp::McpConnector;
use chat_core::model::ModelSelector;
use chat_core::orchestrator::Orchestrator;
use chat_core::server_store::ServerStore;
use std::sync::Arc;

/// Shared application state for the server.
#[derive(Clone)]
pub struct AppState {
    pub config: AppConfig,
    pub servers: Arc<ServerStore>,
    pub connector: McpConnector,
    pub models: Arc<ModelSelector>,
    pub checkpoints: CheckpointStore,
    pub orchestrator: Arc<Orchestrator>,
}

impl AppState {
    pub fn new(config: AppConfig) -> anyhow::Result<Self> {
        let servers = Arc::new(ServerStore::new(&config.storage.server_config_path));
        let models = Arc::new(ModelSelector::new(config.provider.clone())?);
        let orchestrator = Orchestrator::new(&config, servers.clone(), models.clone());

        Ok(Self {
            connector: McpConnector::new(config.mcp.connect_timeout()),
            checkpoints: CheckpointStore::new(&config.storage.checkpoint_db),
            orchestrator: Arc::new(orchestrator),
            servers,
            models,
            config,
        })
    }
}
