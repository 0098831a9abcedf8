use crate::error::ApiError;
use crate::state::AppState;
use axum::extract::{Path, State};
use axum::http::{Method, Uri};
use axum::response::{IntoResponse, Json};
use axum::routing::{get, post};
use axum::Router;
use chat_core::error::ChatError;
use chat_core::types::Role;
use serde::{Deserialize, Serialize};
use serde_json::json;

type ApiResult<T> = Result<T, ApiError>;

// ── Health ──────────────────────────────────────────────────────────────

pub fn health_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(home))
        .route("/health", get(health))
}

async fn home() -> impl IntoResponse {
    Json(json!({"Home": "Welcome"}))
}

async fn health() -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

// ── MCP servers ─────────────────────────────────────────────────────────

pub fn server_routes() -> Router<AppState> {
    Router::new()
        .route("/server_names", get(server_names))
        .route("/add_mcp", post(add_server))
        .route("/remove_mcp/{server_name}", post(remove_server))
}

#[derive(Debug, Deserialize)]
struct AddServerRequest {
    server_name: String,
    url: String,
}

async fn server_names(State(state): State<AppState>) -> ApiResult<impl IntoResponse> {
    let names = state.servers.names().await?;
    Ok(Json(json!({"mcpserver_names": names})))
}

async fn add_server(
    State(state): State<AppState>,
    Json(req): Json<AddServerRequest>,
) -> ApiResult<impl IntoResponse> {
    if req.server_name.trim().is_empty() {
        return Err(ApiError::BadRequest("server_name must not be empty".into()));
    }
    if req.url.trim().is_empty() {
        return Err(ApiError::BadRequest("url must not be empty".into()));
    }
    state.servers.add(&req.server_name, &req.url).await?;
    Ok(Json(json!({
        "res": format!("The {} server at {} is added", req.server_name, req.url)
    })))
}

async fn remove_server(
    State(state): State<AppState>,
    Path(server_name): Path<String>,
) -> ApiResult<impl IntoResponse> {
    remove_by_name(&state, &server_name).await
}

async fn remove_by_name(state: &AppState, server_name: &str) -> ApiResult<Json<serde_json::Value>> {
    state.servers.remove(server_name).await?;
    Ok(Json(json!({"res": format!("The {} is deleted", server_name)})))
}

/// Catches everything no route matched. Still honors the glued removal form
/// `POST /remove_mcp<name>` that older clients send.
pub async fn fallback(
    State(state): State<AppState>,
    method: Method,
    uri: Uri,
) -> ApiResult<impl IntoResponse> {
    if method == Method::POST {
        if let Some(raw) = uri.path().strip_prefix("/remove_mcp") {
            if !raw.is_empty() && !raw.contains('/') {
                let name = urlencoding::decode(raw).map_err(|_| {
                    ApiError::BadRequest(format!("server name '{}' is not valid UTF-8", raw))
                })?;
                return remove_by_name(&state, &name).await;
            }
        }
    }
    Err(ChatError::NotFound(format!("no route for {} {}", method, uri.path())).into())
}

// ── Tools ───────────────────────────────────────────────────────────────

pub fn tool_routes() -> Router<AppState> {
    Router::new()
        .route("/tools", get(all_tools))
        .route("/tools/{server_name}", get(server_tools))
}

async fn all_tools(State(state): State<AppState>) -> ApiResult<impl IntoResponse> {
    let servers = state.servers.read().await?;
    let tools = state.connector.list_all_tools(&servers).await?;
    Ok(Json(json!({"all_tools": tools})))
}

async fn server_tools(
    State(state): State<AppState>,
    Path(server_name): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let tools = state
        .connector
        .list_tools_for(&state.servers, &server_name)
        .await?;
    Ok(Json(json!({"tools": tools})))
}

// ── Models ──────────────────────────────────────────────────────────────

pub fn model_routes() -> Router<AppState> {
    Router::new().route("/model_list", get(model_list))
}

async fn model_list(State(state): State<AppState>) -> ApiResult<impl IntoResponse> {
    let models = state.models.list_models().await?;
    Ok(Json(json!({"model_list": models})))
}

// ── Chat ────────────────────────────────────────────────────────────────

pub fn chat_routes() -> Router<AppState> {
    Router::new().route("/generate", post(generate))
}

#[derive(Debug, Deserialize)]
struct GenerateRequest {
    user_prompt: String,
    model_name: String,
    chat_name: String,
}

async fn generate(
    State(state): State<AppState>,
    Json(req): Json<GenerateRequest>,
) -> ApiResult<impl IntoResponse> {
    if req.chat_name.is_empty() {
        return Err(ApiError::BadRequest("chat_name must not be empty".into()));
    }
    if req.model_name.is_empty() {
        return Err(ApiError::BadRequest("model_name must not be empty".into()));
    }
    state
        .orchestrator
        .generate(&req.user_prompt, &req.model_name, &req.chat_name)
        .await?;
    Ok(Json(json!({"result": "result added to chat history"})))
}

// ── Threads ─────────────────────────────────────────────────────────────

pub fn thread_routes() -> Router<AppState> {
    Router::new()
        .route("/threadid", get(thread_ids))
        .route("/messages/{thread_id}", get(thread_messages))
        .route("/transcript/{thread_id}", get(thread_transcript))
}

#[derive(Debug, Serialize)]
struct MessagesResponse {
    #[serde(rename = "AI")]
    ai: Vec<String>,
    #[serde(rename = "Human")]
    human: Vec<String>,
    #[serde(rename = "Tool")]
    tool: Vec<String>,
}

#[derive(Debug, Serialize)]
struct TranscriptEntry {
    role: Role,
    content: String,
}

async fn thread_ids(State(state): State<AppState>) -> ApiResult<impl IntoResponse> {
    let ids = state.checkpoints.open()?.thread_ids()?;
    Ok(Json(json!({"thread_ids": ids})))
}

async fn thread_messages(
    State(state): State<AppState>,
    Path(thread_id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let by_role = state.checkpoints.open()?.messages_by_role(&thread_id)?;
    Ok(Json(MessagesResponse {
        ai: by_role.ai,
        human: by_role.human,
        tool: by_role.tool,
    }))
}

async fn thread_transcript(
    State(state): State<AppState>,
    Path(thread_id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let messages: Vec<TranscriptEntry> = state
        .checkpoints
        .open()?
        .messages(&thread_id)?
        .into_iter()
        .map(|m| TranscriptEntry {
            role: m.role,
            content: m.content,
        })
        .collect();
    Ok(Json(json!({"thread_id": thread_id, "messages": messages})))
}
