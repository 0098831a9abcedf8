//! In-process stand-ins for an OpenAI-compatible model backend and for
//! MCP tool servers.

use axum::extract::State;
use axum::routing::post;
use axum::{Json, Router};
use rmcp::handler::server::ServerHandler;
use rmcp::model::{
    CallToolRequestParam, CallToolResult, Content, Implementation, ListToolsResult,
    PaginatedRequestParam, ProtocolVersion, ServerCapabilities, ServerInfo, Tool,
};
use rmcp::service::{RequestContext, RoleServer};
use rmcp::transport::streamable_http_server::session::local::LocalSessionManager;
use rmcp::transport::streamable_http_server::{StreamableHttpServerConfig, StreamableHttpService};
use rmcp::ErrorData as McpError;
use serde_json::{json, Map, Value};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

#[derive(Clone, Default)]
pub struct ScriptedBackend {
    replies: Arc<Mutex<VecDeque<Value>>>,
    requests: Arc<Mutex<Vec<Value>>>,
}

impl ScriptedBackend {
    pub fn new(replies: Vec<Value>) -> Self {
        Self {
            replies: Arc::new(Mutex::new(replies.into())),
            requests: Arc::default(),
        }
    }

    /// Serve on an ephemeral port and return the `api_base` to use.
    pub async fn spawn(&self) -> String {
        let app = Router::new()
            .route("/v1/chat/completions", post(chat_completions))
            .with_state(self.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });
        format!("http://{}/v1", addr)
    }

    /// Request bodies received so far.
    pub fn requests(&self) -> Vec<Value> {
        self.requests.lock().unwrap().clone()
    }
}

async fn chat_completions(
    State(backend): State<ScriptedBackend>,
    Json(body): Json<Value>,
) -> Json<Value> {
    backend.requests.lock().unwrap().push(body);
    let reply = backend
        .replies
        .lock()
        .unwrap()
        .pop_front()
        .unwrap_or_else(|| text_reply("(script exhausted)"));
    Json(reply)
}

pub fn text_reply(content: &str) -> Value {
    completion(json!({"role": "assistant", "content": content}), "stop")
}

pub fn tool_call_reply(call_id: &str, name: &str, arguments: Value) -> Value {
    completion(
        json!({
            "role": "assistant",
            "content": null,
            "tool_calls": [{
                "id": call_id,
                "type": "function",
                "function": {"name": name, "arguments": arguments.to_string()}
            }]
        }),
        "tool_calls",
    )
}

fn completion(message: Value, finish_reason: &str) -> Value {
    json!({
        "id": "chatcmpl-test",
        "object": "chat.completion",
        "created": 1_700_000_000u32,
        "model": "test-model",
        "choices": [{"index": 0, "message": message, "finish_reason": finish_reason}]
    })
}

/// MCP server offering a fixed selection of these tools:
/// `add` (sums integers `a` and `b`), `fail` (always reports a tool error),
/// `echo` (returns its arguments as JSON).
#[derive(Clone)]
pub struct StubMcpServer {
    tools: &'static [&'static str],
}

impl StubMcpServer {
    pub fn new(tools: &'static [&'static str]) -> Self {
        Self { tools }
    }

    /// Serve over streamable HTTP on an ephemeral port and return the URL.
    pub async fn spawn(self) -> String {
        let service = StreamableHttpService::new(
            move || Ok(self.clone()),
            Arc::new(LocalSessionManager::default()),
            StreamableHttpServerConfig::default(),
        );
        let app = Router::new().nest_service("/mcp", service);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });
        format!("http://{}/mcp", addr)
    }

    fn definition(name: &str) -> Tool {
        let (description, schema) = match name {
            "add" => (
                "Add two integers",
                json!({
                    "type": "object",
                    "properties": {"a": {"type": "integer"}, "b": {"type": "integer"}},
                    "required": ["a", "b"]
                }),
            ),
            "fail" => ("Always fails", json!({"type": "object", "properties": {}})),
            _ => ("Echo the arguments", json!({"type": "object"})),
        };
        let schema = match schema {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        Tool {
            name: name.to_string().into(),
            title: None,
            description: Some(description.into()),
            input_schema: Arc::new(schema),
            annotations: None,
            output_schema: None,
            icons: None,
            meta: None,
        }
    }
}

impl ServerHandler for StubMcpServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            protocol_version: ProtocolVersion::V_2024_11_05,
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            server_info: Implementation::from_build_env(),
            instructions: None,
        }
    }

    fn list_tools(
        &self,
        _request: Option<PaginatedRequestParam>,
        _context: RequestContext<RoleServer>,
    ) -> impl std::future::Future<Output = Result<ListToolsResult, McpError>> + Send + '_ {
        std::future::ready(Ok(ListToolsResult {
            tools: self.tools.iter().map(|name| Self::definition(name)).collect(),
            next_cursor: None,
        }))
    }

    fn call_tool(
        &self,
        request: CallToolRequestParam,
        _context: RequestContext<RoleServer>,
    ) -> impl std::future::Future<Output = Result<CallToolResult, McpError>> + Send + '_ {
        let arguments = request.arguments.unwrap_or_default();
        let result = match request.name.as_ref() {
            "add" => {
                let a = arguments.get("a").and_then(Value::as_i64);
                let b = arguments.get("b").and_then(Value::as_i64);
                match (a, b) {
                    (Some(a), Some(b)) => {
                        CallToolResult::success(vec![Content::text((a + b).to_string())])
                    }
                    _ => CallToolResult::error(vec![Content::text("a and b must be integers")]),
                }
            }
            "fail" => CallToolResult::error(vec![Content::text("division by zero")]),
            "echo" => {
                CallToolResult::success(vec![Content::text(Value::Object(arguments).to_string())])
            }
            other => {
                CallToolResult::error(vec![Content::text(format!("Unknown tool: {}", other))])
            }
        };
        std::future::ready(Ok(result))
    }
}
