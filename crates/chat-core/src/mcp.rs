//! Connections to registered MCP tool servers.
//!
//! Every query opens fresh sessions: tool catalogs are never cached, so a
//! listing always reflects what the servers offer right now.

use crate::error::{ChatError, Result};
use crate::server_store::{ServerMap, ServerRegistration, ServerStore};
use crate::tool_registry::{Tool, ToolRegistry};
use crate::types::ToolDescriptor;
use async_trait::async_trait;
use futures::future::try_join_all;
use rmcp::model::{CallToolRequestParam, CallToolResult, RawContent, ResourceContents};
use rmcp::service::{Peer, RunningService};
use rmcp::transport::streamable_http_client::StreamableHttpClientTransport;
use rmcp::{RoleClient, ServiceExt};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Opens MCP client sessions with a bounded handshake.
#[derive(Debug, Clone)]
pub struct McpConnector {
    connect_timeout: Duration,
}

impl McpConnector {
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }

    /// Connect to one server and complete the initialize handshake.
    pub async fn connect(&self, name: &str, registration: &ServerRegistration) -> Result<McpSession> {
        debug!(server = name, url = %registration.url, "Connecting to MCP server");
        let transport = StreamableHttpClientTransport::from_uri(registration.url.as_str());
        let service = tokio::time::timeout(self.connect_timeout, ().serve(transport))
            .await
            .map_err(|_| {
                ChatError::connection(
                    name,
                    format!("handshake timed out after {}s", self.connect_timeout.as_secs()),
                )
            })?
            .map_err(|e| ChatError::connection(name, e))?;

        Ok(McpSession {
            name: name.to_string(),
            service,
        })
    }

    /// Tools of every registered server, flattened in server order then
    /// catalog order. Any unreachable server fails the whole listing.
    pub async fn list_all_tools(&self, servers: &ServerMap) -> Result<Vec<ToolDescriptor>> {
        let catalogs = try_join_all(servers.iter().map(|(name, registration)| async move {
            let session = self.connect(name, registration).await?;
            let tools = session.list_tools().await;
            session.close().await;
            tools
        }))
        .await
        .inspect_err(|e| warn!("Tool listing aborted: {}", e))?;

        Ok(catalogs
            .iter()
            .flatten()
            .map(descriptor)
            .collect())
    }

    /// Tools of a single registered server.
    pub async fn list_tools_for(&self, store: &ServerStore, name: &str) -> Result<Vec<ToolDescriptor>> {
        let registration = store.get(name).await?;
        let session = self.connect(name, &registration).await?;
        let tools = session.list_tools().await;
        session.close().await;
        Ok(tools?.iter().map(descriptor).collect())
    }

    /// Open a session to every registered server and expose their tools
    /// as one registry for an agent run.
    pub async fn connect_all(&self, servers: &ServerMap) -> Result<McpToolset> {
        let connected = try_join_all(servers.iter().map(|(name, registration)| async move {
            let session = self.connect(name, registration).await?;
            let tools = session.list_tools().await?;
            Ok::<_, ChatError>((session, tools))
        }))
        .await?;

        let mut registry = ToolRegistry::new();
        let mut sessions = Vec::with_capacity(connected.len());
        for (session, tools) in connected {
            let peer = session.service.peer().clone();
            for tool in tools {
                registry.register(Arc::new(McpTool {
                    server: session.name.clone(),
                    name: tool.name.to_string(),
                    description: tool.description.as_deref().unwrap_or_default().to_string(),
                    schema: Value::Object((*tool.input_schema).clone()),
                    peer: peer.clone(),
                }));
            }
            sessions.push(session);
        }

        info!(
            servers = sessions.len(),
            tools = registry.len(),
            "Connected MCP toolset"
        );
        Ok(McpToolset { sessions, registry })
    }
}

/// A live client session with one server. Dropping it tears the session down.
pub struct McpSession {
    name: String,
    service: RunningService<RoleClient, ()>,
}

impl McpSession {
    pub async fn list_tools(&self) -> Result<Vec<rmcp::model::Tool>> {
        self.service
            .list_all_tools()
            .await
            .map_err(|e| ChatError::connection(&self.name, e))
    }

    pub async fn close(self) {
        if let Err(e) = self.service.cancel().await {
            warn!(server = %self.name, "MCP session did not shut down cleanly: {}", e);
        }
    }
}

/// Sessions to every registered server plus the tools they offer.
pub struct McpToolset {
    sessions: Vec<McpSession>,
    registry: ToolRegistry,
}

impl McpToolset {
    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    pub async fn shutdown(self) {
        for session in self.sessions {
            session.close().await;
        }
    }
}

/// A tool exposed by a remote MCP server.
struct McpTool {
    server: String,
    name: String,
    description: String,
    schema: Value,
    peer: Peer<RoleClient>,
}

#[async_trait]
impl Tool for McpTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn parameters_schema(&self) -> Value {
        self.schema.clone()
    }

    async fn execute(&self, args: Value) -> std::result::Result<String, ChatError> {
        let arguments = match args {
            Value::Object(map) => Some(map),
            Value::Null => None,
            other => {
                return Err(ChatError::ToolExecution {
                    tool_name: self.name.clone(),
                    message: format!("arguments must be a JSON object, got {}", other),
                })
            }
        };

        debug!(server = %self.server, tool = %self.name, "Calling MCP tool");
        let result = self
            .peer
            .call_tool(CallToolRequestParam {
                name: self.name.clone().into(),
                arguments,
            })
            .await
            .map_err(|e| ChatError::connection(&self.server, e))?;

        let text = render_result(&result);
        if result.is_error.unwrap_or(false) {
            return Err(ChatError::ToolExecution {
                tool_name: self.name.clone(),
                message: text,
            });
        }
        Ok(text)
    }
}

fn descriptor(tool: &rmcp::model::Tool) -> ToolDescriptor {
    ToolDescriptor {
        tool_name: tool.name.to_string(),
        description: tool.description.as_deref().unwrap_or_default().to_string(),
    }
}

/// Flatten a tool result into the text handed back to the model.
fn render_result(result: &CallToolResult) -> String {
    let parts: Vec<String> = result
        .content
        .iter()
        .map(|c| match &c.raw {
            RawContent::Text(text) => text.text.clone(),
            RawContent::Image(img) => format!("[image: {}]", img.mime_type),
            RawContent::Audio(audio) => format!("[audio: {}]", audio.mime_type),
            RawContent::Resource(resource) => match &resource.resource {
                ResourceContents::TextResourceContents { text, .. } => text.clone(),
                ResourceContents::BlobResourceContents { uri, .. } => format!("[resource: {}]", uri),
            },
            RawContent::ResourceLink(link) => format!("[resource: {}]", link.uri),
        })
        .collect();

    if parts.is_empty() {
        if let Some(structured) = &result.structured_content {
            return structured.to_string();
        }
    }
    parts.join("\n")
}
