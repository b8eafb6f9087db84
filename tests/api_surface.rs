use std::sync::{Arc, Mutex};

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::response::Response;
use axum::routing::post;
use axum::{Json, Router};
use ollama_relay::catalog::DEFAULT_MODELS;
use ollama_relay::config::AppConfig;
use ollama_relay::routing::dispatch::dispatch_request;
use ollama_relay::state::AppState;
use serde_json::{json, Value};

fn build_state(config: AppConfig) -> Arc<AppState> {
    AppState::from_config(config).expect("app state")
}

fn offline_state() -> Arc<AppState> {
    build_state(AppConfig::with_upstream("http://127.0.0.1:9/v1", "k"))
}

async fn send(state: Arc<AppState>, method: &str, path: &str, body: Body) -> Response {
    let request = Request::builder()
        .method(method)
        .uri(path)
        .header("host", "0xnode.gaia.domains")
        .body(body)
        .expect("request");
    dispatch_request(state, Arc::<str>::from(""), request)
        .await
        .expect("infallible")
}

async fn body_bytes(response: Response) -> bytes::Bytes {
    axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body")
}

async fn body_json(response: Response) -> Value {
    serde_json::from_slice(&body_bytes(response).await).expect("json body")
}

#[tokio::test]
async fn test_root_and_version() {
    let state = offline_state();

    let response = send(Arc::clone(&state), "GET", "/", Body::empty()).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_bytes(response).await, "Ollama is running");

    let response = send(state, "GET", "/api/version", Body::empty()).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await, json!({"version": "0.1.0"}));
}

#[tokio::test]
async fn test_tags_lists_catalog() {
    let mut config = AppConfig::with_upstream("http://127.0.0.1:9/v1", "k");
    config.models.names = vec!["custom:3b-q4_0".to_string(), "all-minilm".to_string()];
    let state = build_state(config);

    let response = send(state, "GET", "/api/tags", Body::empty()).await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    let models = body["models"].as_array().expect("models array");
    assert_eq!(models.len(), DEFAULT_MODELS.len() + 1);
    let custom = models.last().unwrap();
    assert_eq!(custom["name"], "custom:3b-q4_0");
    assert_eq!(custom["details"]["parameter_size"], "3B");
    assert_eq!(custom["details"]["quantization_level"], "Q4_0");
}

#[tokio::test]
async fn test_unknown_routes_and_methods() {
    let state = offline_state();

    let response = send(Arc::clone(&state), "GET", "/api/ps", Body::empty()).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(
        body_json(response).await,
        json!({"error": "Endpoint not supported"})
    );

    let response = send(Arc::clone(&state), "GET", "/api/generate", Body::empty()).await;
    assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);

    let response = send(Arc::clone(&state), "GET", "/v1/info", Body::empty()).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = send(state, "OPTIONS", "/api/chat", Body::empty()).await;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    assert_eq!(
        response.headers()[http::header::ACCESS_CONTROL_ALLOW_ORIGIN],
        "*"
    );
}

#[tokio::test]
async fn test_embeddings_routes() {
    let captured: Arc<Mutex<Vec<Value>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&captured);
    let app = Router::new().route(
        "/v1/embeddings",
        post(move |Json(body): Json<Value>| {
            let sink = Arc::clone(&sink);
            async move {
                sink.lock().unwrap().push(body);
                Json(json!({
                    "object": "list",
                    "data": [{"object": "embedding", "index": 0, "embedding": [0.25, -0.5, 1.0]}],
                    "model": "nomic-embed"
                }))
            }
        }),
    );
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind mock upstream");
    let addr = listener.local_addr().expect("local addr");
    let server = tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });

    let mut config = AppConfig::with_upstream("http://127.0.0.1:9/v1", "chat-key");
    config.embedding.base_url = Some(format!("http://{addr}/v1"));
    let state = build_state(config);

    let response = send(
        Arc::clone(&state),
        "POST",
        "/api/embed",
        Body::from(r#"{"model":"all-minilm","input":"hello"}"#),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body, json!({"embeddings": [[0.25, -0.5, 1.0]]}));

    let response = send(
        Arc::clone(&state),
        "POST",
        "/api/embeddings",
        Body::from(r#"{"model":"some-other-model","prompt":"hello"}"#),
    )
    .await;
    let body = body_json(response).await;
    assert_eq!(body["embedding"], json!([0.25, -0.5, 1.0]));
    assert_eq!(body["embeddings"], json!([[0.25, -0.5, 1.0]]));

    let response = send(
        state,
        "POST",
        "/api/embed",
        Body::from(r#"{"model":"all-minilm"}"#),
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let upstream_bodies = captured.lock().unwrap().clone();
    assert_eq!(upstream_bodies.len(), 2);
    assert_eq!(
        upstream_bodies[0],
        json!({"model": "nomic-embed", "input": "hello", "encoding_format": "float"})
    );
    assert_eq!(upstream_bodies[1]["model"], "text-embedding-3-small");

    server.abort();
}

#[tokio::test]
async fn test_llamaedge_node_files() {
    let dir = std::env::temp_dir().join(format!(
        "ollama-relay-node-{}-{}",
        std::process::id(),
        chrono::Utc::now().timestamp_nanos_opt().unwrap_or_default()
    ));
    std::fs::create_dir_all(&dir).expect("create config dir");
    std::fs::write(dir.join("config.json"), r#"{"chat":"llama","address":""}"#)
        .expect("write config.json");

    let mut config = AppConfig::with_upstream("http://127.0.0.1:9/v1", "k");
    config.features.llamaedge.enabled = true;
    config.features.llamaedge.config_dir = dir.to_string_lossy().into_owned();
    let state = build_state(config);

    let response = send(Arc::clone(&state), "GET", "/config_pub.json", Body::empty()).await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["chat"], "llama");
    assert_eq!(body["address"], "0xnode");

    let response = send(state, "GET", "/v1/info", Body::empty()).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(body_json(response).await, json!({"error": "Info not found"}));

    let _ = std::fs::remove_dir_all(&dir);
}
