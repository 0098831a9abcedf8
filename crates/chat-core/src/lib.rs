pub mod agent_loop;
pub mod checkpoint;
pub mod config;
pub mod error;
pub mod mcp;
pub mod model;
pub mod orchestrator;
pub mod server_store;
pub mod tool_registry;
pub mod types;

#[cfg(test)]
mod test_support;

pub use agent_loop::AgentLoop;
pub use checkpoint::{CheckpointStore, Checkpointer, ThreadMessages};
pub use config::AppConfig;
pub use error::ChatError;
pub use mcp::McpConnector;
pub use model::{ModelHandle, ModelSelector};
pub use orchestrator::Orchestrator;
pub use server_store::{ServerRegistration, ServerStore};
pub use tool_registry::ToolRegistry;
