pub mod error;
pub mod routes;
pub mod state;

use axum::extract::{Request, State};
use axum::http::StatusCode;
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::Router;
use chat_core::config::AppConfig;
use subtle::ConstantTimeEq;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

pub use error::ApiError;
pub use state::AppState;

/// Paths reachable without a bearer token.
const PUBLIC_PATHS: &[&str] = &["/", "/health"];

/// Middleware that validates a bearer token from the Authorization header.
///
/// Uses constant-time comparison (`subtle::ConstantTimeEq`) so response
/// timing does not leak how much of the token matched.
async fn auth_middleware(State(state): State<AppState>, req: Request, next: Next) -> Response {
    let expected = match &state.config.server.auth_token {
        Some(t) => t,
        None => return next.run(req).await,
    };
    if PUBLIC_PATHS.contains(&req.uri().path()) {
        return next.run(req).await;
    }

    let provided = req
        .headers()
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));

    match provided {
        Some(token) if bool::from(token.as_bytes().ct_eq(expected.as_bytes())) => next.run(req).await,
        _ => (StatusCode::UNAUTHORIZED, "Invalid or missing bearer token").into_response(),
    }
}

/// Build the axum Router with all routes and middleware.
pub fn build_router(state: AppState) -> Router {
    let cors_enabled = state.config.server.cors;

    let mut app = Router::new()
        .merge(routes::health_routes())
        .merge(routes::server_routes())
        .merge(routes::tool_routes())
        .merge(routes::model_routes())
        .merge(routes::chat_routes())
        .merge(routes::thread_routes())
        .fallback(routes::fallback)
        .layer(middleware::from_fn_with_state(state.clone(), auth_middleware))
        .with_state(state);

    // Middleware stack.
    app = app.layer(TraceLayer::new_for_http());
    if cors_enabled {
        app = app.layer(CorsLayer::permissive());
    }

    app
}

/// Start the HTTP server.
pub async fn serve(config: AppConfig) -> anyhow::Result<()> {
    let state = AppState::new(config.clone())?;
    state.servers.init_if_missing().await?;
    let router = build_router(state);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    tracing::info!("Starting server on {}", addr);
    tracing::info!(
        "Server registry: {}, checkpoints: {}",
        config.storage.server_config_path.display(),
        config.storage.checkpoint_db.display()
    );

    if config.server.auth_token.is_none() {
        tracing::warn!("No auth_token configured; server is unauthenticated");
    }

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, router).await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use axum::routing::{get, post};
    use axum::Json;
    use serde_json::{json, Value};
    use tempfile::TempDir;
    use tower::ServiceExt;

    /// Serve a minimal OpenAI-compatible backend that always answers "4".
    async fn spawn_backend() -> String {
        let app = Router::new()
            .route(
                "/v1/chat/completions",
                post(|| async {
                    Json(json!({
                        "id": "chatcmpl-1",
                        "object": "chat.completion",
                        "created": 1700000000u32,
                        "model": "qwen3:1.7b",
                        "choices": [{
                            "index": 0,
                            "message": {"role": "assistant", "content": "4"},
                            "finish_reason": "stop"
                        }]
                    }))
                }),
            )
            .route(
                "/v1/models",
                get(|| async {
                    Json(json!({
                        "object": "list",
                        "data": [{"id": "qwen3:1.7b", "object": "model", "created": 1700000000u32, "owned_by": "library"}]
                    }))
                }),
            );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });
        format!("http://{}/v1", addr)
    }

    fn test_config(dir: &TempDir) -> AppConfig {
        let mut config = AppConfig::default();
        config.storage.server_config_path = dir.path().join("server_config.json");
        config.storage.checkpoint_db = dir.path().join("agent_memory.db");
        config.mcp.connect_timeout_secs = 5;
        config
    }

    async fn router_with(config: AppConfig) -> Router {
        let state = AppState::new(config).expect("Failed to create test app state");
        state.servers.init_if_missing().await.unwrap();
        build_router(state)
    }

    /// Build a test router over a temp dir, with the given auth token.
    async fn test_router(auth_token: Option<String>) -> (Router, TempDir) {
        let dir = TempDir::new().unwrap();
        let mut config = test_config(&dir);
        config.server.auth_token = auth_token;
        (router_with(config).await, dir)
    }

    async fn send(app: &Router, req: Request<Body>) -> (StatusCode, Value) {
        let resp = app.clone().oneshot(req).await.unwrap();
        let status = resp.status();
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, body)
    }

    fn get_req(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    fn post_json(uri: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn post_empty(uri: &str) -> Request<Body> {
        Request::builder().method("POST").uri(uri).body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn test_home() {
        let (app, _dir) = test_router(None).await;
        let (status, body) = send(&app, get_req("/")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({"Home": "Welcome"}));
    }

    #[tokio::test]
    async fn test_health_no_auth_required() {
        let (app, _dir) = test_router(Some("secret-token".into())).await;
        let (status, body) = send(&app, get_req("/health")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn test_protected_route_rejects_without_token() {
        let (app, _dir) = test_router(Some("secret-token".into())).await;
        let (status, _) = send(&app, get_req("/server_names")).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_protected_route_rejects_wrong_token() {
        let (app, _dir) = test_router(Some("secret-token".into())).await;
        let req = Request::builder()
            .uri("/server_names")
            .header("authorization", "Bearer wrong-token")
            .body(Body::empty())
            .unwrap();
        let (status, _) = send(&app, req).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_protected_route_accepts_correct_token() {
        let (app, _dir) = test_router(Some("secret-token".into())).await;
        let req = Request::builder()
            .uri("/server_names")
            .header("authorization", "Bearer secret-token")
            .body(Body::empty())
            .unwrap();
        let (status, body) = send(&app, req).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({"mcpserver_names": []}));
    }

    #[tokio::test]
    async fn test_legacy_remove_requires_token() {
        let (app, _dir) = test_router(Some("secret-token".into())).await;
        let (status, _) = send(&app, post_empty("/remove_mcpcalc")).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_register_list_remove_scenario() {
        let (app, _dir) = test_router(None).await;

        let (status, body) = send(
            &app,
            post_json(
                "/add_mcp",
                json!({"server_name": "calc", "url": "http://localhost:9000/mcp"}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert!(body["res"].as_str().unwrap().contains("calc"));

        let (_, body) = send(&app, get_req("/server_names")).await;
        assert_eq!(body, json!({"mcpserver_names": ["calc"]}));

        let (status, body) = send(&app, post_empty("/remove_mcp/calc")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["res"], "The calc is deleted");

        let (_, body) = send(&app, get_req("/server_names")).await;
        assert_eq!(body, json!({"mcpserver_names": []}));
    }

    #[tokio::test]
    async fn test_legacy_glued_remove_path() {
        let (app, _dir) = test_router(None).await;
        send(
            &app,
            post_json(
                "/add_mcp",
                json!({"server_name": "calc", "url": "http://localhost:9000/mcp"}),
            ),
        )
        .await;

        let (status, _) = send(&app, post_empty("/remove_mcpcalc")).await;
        assert_eq!(status, StatusCode::OK);
        let (_, body) = send(&app, get_req("/server_names")).await;
        assert_eq!(body, json!({"mcpserver_names": []}));
    }

    #[tokio::test]
    async fn test_legacy_glued_remove_decodes_name() {
        let (app, _dir) = test_router(None).await;
        for name in ["my server", "café", "keep"] {
            send(
                &app,
                post_json(
                    "/add_mcp",
                    json!({"server_name": name, "url": "http://localhost:9000/mcp"}),
                ),
            )
            .await;
        }

        let (status, body) = send(&app, post_empty("/remove_mcpmy%20server")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["res"], "The my server is deleted");

        let (status, _) = send(&app, post_empty("/remove_mcp/caf%C3%A9")).await;
        assert_eq!(status, StatusCode::OK);

        let (_, body) = send(&app, get_req("/server_names")).await;
        assert_eq!(body, json!({"mcpserver_names": ["keep"]}));
    }

    #[tokio::test]
    async fn test_legacy_glued_remove_rejects_invalid_utf8() {
        let (app, _dir) = test_router(None).await;
        let (status, body) = send(&app, post_empty("/remove_mcp%FF")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["kind"], "invalid_request");
    }

    #[tokio::test]
    async fn test_server_names_keep_registration_order() {
        let (app, _dir) = test_router(None).await;
        for name in ["zeta", "alpha", "mid"] {
            send(
                &app,
                post_json(
                    "/add_mcp",
                    json!({"server_name": name, "url": "http://localhost:9000/mcp"}),
                ),
            )
            .await;
        }
        let (_, body) = send(&app, get_req("/server_names")).await;
        assert_eq!(body, json!({"mcpserver_names": ["zeta", "alpha", "mid"]}));
    }

    #[tokio::test]
    async fn test_remove_unknown_server_is_ok() {
        let (app, _dir) = test_router(None).await;
        let (status, _) = send(&app, post_empty("/remove_mcp/ghost")).await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_add_rejects_empty_name() {
        let (app, _dir) = test_router(None).await;
        let (status, body) = send(
            &app,
            post_json("/add_mcp", json!({"server_name": " ", "url": "http://x/mcp"})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["kind"], "invalid_request");
    }

    #[tokio::test]
    async fn test_unknown_route_is_structured_404() {
        let (app, _dir) = test_router(None).await;
        let (status, body) = send(&app, get_req("/nope")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"]["kind"], "not_found");
    }

    #[tokio::test]
    async fn test_tools_for_unregistered_server_is_404() {
        let (app, _dir) = test_router(None).await;
        let (status, body) = send(&app, get_req("/tools/calc")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"]["kind"], "not_found");
    }

    #[tokio::test]
    async fn test_tools_for_unreachable_server_is_502() {
        let (app, _dir) = test_router(None).await;
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);
        send(
            &app,
            post_json(
                "/add_mcp",
                json!({"server_name": "calc", "url": format!("http://127.0.0.1:{}/mcp", port)}),
            ),
        )
        .await;

        let (status, body) = send(&app, get_req("/tools/calc")).await;
        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert_eq!(body["error"]["kind"], "connection");

        let (status, _) = send(&app, get_req("/tools")).await;
        assert_eq!(status, StatusCode::BAD_GATEWAY);
    }

    #[tokio::test]
    async fn test_all_tools_empty_registry() {
        let (app, _dir) = test_router(None).await;
        let (status, body) = send(&app, get_req("/tools")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({"all_tools": []}));
    }

    #[tokio::test]
    async fn test_missing_registry_file_is_config_error() {
        let dir = TempDir::new().unwrap();
        let app = build_router(AppState::new(test_config(&dir)).unwrap());
        let (status, body) = send(&app, get_req("/server_names")).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["error"]["kind"], "config_io");
    }

    #[tokio::test]
    async fn test_messages_for_unknown_thread_is_404() {
        let (app, _dir) = test_router(None).await;
        let (status, body) = send(&app, get_req("/messages/ghost")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"]["kind"], "not_found");
    }

    #[tokio::test]
    async fn test_threadid_empty_initially() {
        let (app, _dir) = test_router(None).await;
        let (status, body) = send(&app, get_req("/threadid")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({"thread_ids": []}));
    }

    #[tokio::test]
    async fn test_generate_then_read_back() {
        let dir = TempDir::new().unwrap();
        let mut config = test_config(&dir);
        config.provider.api_base = spawn_backend().await;
        let app = router_with(config).await;

        let (status, body) = send(
            &app,
            post_json(
                "/generate",
                json!({"user_prompt": "2+2?", "model_name": "qwen3:1.7b", "chat_name": "t1"}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({"result": "result added to chat history"}));

        let (_, body) = send(&app, get_req("/threadid")).await;
        assert_eq!(body, json!({"thread_ids": ["t1"]}));

        let (status, body) = send(&app, get_req("/messages/t1")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["Human"], json!(["2+2?"]));
        assert_eq!(body["AI"], json!(["4"]));
        assert_eq!(body["Tool"], json!([]));

        let (status, body) = send(&app, get_req("/transcript/t1")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            body["messages"],
            json!([
                {"role": "human", "content": "2+2?"},
                {"role": "ai", "content": "4"}
            ])
        );
    }

    #[tokio::test]
    async fn test_generate_with_unreachable_backend_is_500() {
        let dir = TempDir::new().unwrap();
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);
        let mut config = test_config(&dir);
        config.provider.api_base = format!("http://127.0.0.1:{}/v1", port);
        let app = router_with(config).await;

        let (status, body) = send(
            &app,
            post_json(
                "/generate",
                json!({"user_prompt": "hi", "model_name": "qwen3:1.7b", "chat_name": "t1"}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["error"]["kind"], "upstream_agent");
    }

    #[tokio::test]
    async fn test_model_list_from_backend() {
        let dir = TempDir::new().unwrap();
        let mut config = test_config(&dir);
        config.provider.api_base = spawn_backend().await;
        let app = router_with(config).await;

        let (status, body) = send(&app, get_req("/model_list")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({"model_list": ["qwen3:1.7b"]}));
    }

    #[tokio::test]
    async fn test_cors_allows_any_origin() {
        let (app, _dir) = test_router(None).await;
        let req = Request::builder()
            .uri("/server_names")
            .header("origin", "http://example.com")
            .body(Body::empty())
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(
            resp.headers()
                .get("access-control-allow-origin")
                .and_then(|v| v.to_str().ok()),
            Some("*")
        );
    }
}
