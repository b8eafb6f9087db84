use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::body::Body;
use axum::http::{HeaderMap, Request, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use bytes::Bytes;
use futures_util::StreamExt;
use ollama_relay::config::AppConfig;
use ollama_relay::routing::dispatch::dispatch_request;
use ollama_relay::state::AppState;
use serde_json::{json, Value};

fn build_state(base_url: String) -> Arc<AppState> {
    build_state_with(AppConfig::with_upstream(base_url, "upstream-secret"))
}

fn build_state_with(config: AppConfig) -> Arc<AppState> {
    AppState::from_config(config).expect("app state")
}

async fn spawn_upstream(app: Router) -> (String, tokio::task::JoinHandle<()>) {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind mock upstream");
    let addr = listener.local_addr().expect("local addr");
    let server = tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    (format!("http://{addr}/v1"), server)
}

fn sse_response(chunks: Vec<&'static str>) -> Response {
    let stream = futures_util::stream::iter(
        chunks
            .into_iter()
            .map(|chunk| Ok::<Bytes, io::Error>(Bytes::from_static(chunk.as_bytes()))),
    );
    (
        [(http::header::CONTENT_TYPE, "text/event-stream")],
        Body::from_stream(stream),
    )
        .into_response()
}

async fn post_json(state: Arc<AppState>, path: &str, body: Value) -> Response {
    let request = Request::builder()
        .method("POST")
        .uri(path)
        .body(Body::from(serde_json::to_vec(&body).expect("serialize")))
        .expect("request");
    dispatch_request(state, Arc::<str>::from(""), request)
        .await
        .expect("infallible")
}

async fn body_lines(response: Response) -> Vec<Value> {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body");
    assert_eq!(bytes.last(), Some(&b'\n'), "NDJSON body ends with newline");
    bytes
        .split(|b| *b == b'\n')
        .filter(|line| !line.is_empty())
        .map(|line| serde_json::from_slice(line).expect("record json"))
        .collect()
}

async fn body_json(response: Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body");
    serde_json::from_slice(&bytes).expect("json body")
}

#[tokio::test]
async fn test_chat_stream_is_transcoded_to_ndjson() {
    let captured: Arc<Mutex<Option<(HeaderMap, Value)>>> = Arc::new(Mutex::new(None));
    let sink = Arc::clone(&captured);
    let app = Router::new().route(
        "/v1/chat/completions",
        post(move |headers: HeaderMap, Json(body): Json<Value>| {
            let sink = Arc::clone(&sink);
            async move {
                *sink.lock().unwrap() = Some((headers, body));
                sse_response(vec![
                    "data: {\"choices\":[{\"delta\":{\"role\":\"assistant\"}}]}\n\n",
                    "data: {\"choices\":[{\"delta\":{\"content\":\"Hel",
                    "lo\"}}]}\n\ndata: {\"choices\":[{\"delta\":{\"content\":\" world\"}}]}\n\n",
                    "data: {\"choices\":[{\"delta\":{},\"finish_reason\":\"stop\"}],\"usage\":{\"prompt_tokens\":4,\"completion_tokens\":2}}\n\n",
                    "data: [DONE]\n\n",
                ])
            }
        }),
    );
    let (base_url, server) = spawn_upstream(app).await;
    let state = build_state(base_url);

    let response = post_json(
        state,
        "/api/chat",
        json!({
            "model": "llama3.1:8b-instruct-q4_K_M",
            "messages": [{"role": "user", "content": "hi", "images": []}],
            "options": {"temperature": 0.1, "num_predict": 64, "num_ctx": 8192},
            "keep_alive": "5m"
        }),
    )
    .await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()[http::header::CONTENT_TYPE],
        "application/x-ndjson"
    );
    let records = body_lines(response).await;
    assert_eq!(records.len(), 3);
    assert_eq!(records[0]["message"]["content"], "Hello");
    assert_eq!(records[0]["done"], false);
    assert_eq!(records[0]["model"], "llama3.1:8b-instruct-q4_K_M");
    assert_eq!(records[1]["message"]["content"], " world");
    let terminal = &records[2];
    assert_eq!(terminal["done"], true);
    assert_eq!(terminal["done_reason"], "stop");
    assert_eq!(terminal["message"]["content"], "");
    assert_eq!(terminal["prompt_eval_count"], 4);
    assert_eq!(terminal["eval_count"], 2);
    assert!(terminal.get("context").is_none());

    let (headers, upstream_body) = captured.lock().unwrap().take().expect("upstream called");
    assert_eq!(headers["authorization"], "Bearer upstream-secret");
    assert_eq!(upstream_body["model"], "llama3.1:8b-instruct-q4_K_M");
    assert_eq!(upstream_body["stream"], true);
    assert_eq!(upstream_body["temperature"], 0.1);
    assert_eq!(upstream_body["max_tokens"], 64);
    assert_eq!(
        upstream_body["messages"],
        json!([{"role": "user", "content": "hi"}])
    );
    assert!(upstream_body.get("keep_alive").is_none());
    assert!(upstream_body.get("options").is_none());

    server.abort();
}

#[tokio::test]
async fn test_generate_stream_with_ollama_shaped_upstream() {
    let app = Router::new().route(
        "/v1/chat/completions",
        post(|| async {
            sse_response(vec![
                "{\"response\":\"The\",\"done\":false}\n{\"respon",
                "se\":\" sky\",\"done\":false}\n",
                "not json at all\n",
                "{\"response\":\"\",\"done\":true,\"done_reason\":\"length\",\"context\":[1,2,3],\"eval_count\":7}",
            ])
        }),
    );
    let (base_url, server) = spawn_upstream(app).await;
    let state = build_state(base_url);

    let response = post_json(
        state,
        "/api/generate",
        json!({"model": "qwen2.5:7b-instruct-fp16", "prompt": "Why?"}),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    let records = body_lines(response).await;
    assert_eq!(records.len(), 3);
    assert_eq!(records[0]["response"], "The");
    assert_eq!(records[1]["response"], " sky");
    let terminal = &records[2];
    assert_eq!(terminal["done"], true);
    assert_eq!(terminal["done_reason"], "length");
    assert_eq!(terminal["context"], json!([1, 2, 3]));
    assert_eq!(terminal["eval_count"], 7);
    for key in [
        "total_duration",
        "load_duration",
        "prompt_eval_count",
        "prompt_eval_duration",
        "eval_duration",
    ] {
        assert!(terminal[key].is_u64(), "terminal record carries {key}");
    }

    server.abort();
}

#[tokio::test]
async fn test_stream_without_completion_signal_still_terminates() {
    let app = Router::new().route(
        "/v1/chat/completions",
        post(|| async {
            sse_response(vec![
                "data: {\"choices\":[{\"delta\":{\"content\":\"a\"}}]}\n\n",
                "data: {\"choices\":[{\"delta\":{\"content\":\"b\"}}]}",
            ])
        }),
    );
    let (base_url, server) = spawn_upstream(app).await;
    let state = build_state(base_url);

    let response = post_json(state, "/api/chat", json!({"model": "m", "messages": []})).await;
    let records = body_lines(response).await;
    let contents: Vec<&str> = records[..records.len() - 1]
        .iter()
        .map(|record| record["message"]["content"].as_str().unwrap())
        .collect();
    assert_eq!(contents, vec!["a", "b"]);
    let terminal = records.last().unwrap();
    assert_eq!(terminal["done"], true);
    assert_eq!(terminal["done_reason"], "stop");
    assert_eq!(terminal["eval_count"], 2);
    assert_eq!(
        records.iter().filter(|record| record["done"] == true).count(),
        1
    );

    server.abort();
}

#[tokio::test]
async fn test_mid_stream_failure_ends_with_error_line() {
    let app = Router::new().route(
        "/v1/chat/completions",
        post(|| async {
            let first = futures_util::stream::iter(vec![Ok::<Bytes, io::Error>(
                Bytes::from_static(b"data: {\"choices\":[{\"delta\":{\"content\":\"partial\"}}]}\n\n"),
            )]);
            let failure = futures_util::stream::once(async {
                tokio::time::sleep(Duration::from_millis(50)).await;
                Err::<Bytes, io::Error>(io::Error::new(io::ErrorKind::Other, "upstream died"))
            });
            (
                [(http::header::CONTENT_TYPE, "text/event-stream")],
                Body::from_stream(first.chain(failure)),
            )
                .into_response()
        }),
    );
    let (base_url, server) = spawn_upstream(app).await;
    let state = build_state(base_url);

    let response = post_json(state, "/api/chat", json!({"model": "m", "messages": []})).await;
    assert_eq!(response.status(), StatusCode::OK);
    let records = body_lines(response).await;
    assert_eq!(records.len(), 2);
    assert_eq!(records[0]["message"]["content"], "partial");
    let error = records[1]["error"].as_str().expect("error line");
    assert!(error.starts_with("upstream stream error"), "{error}");
    assert!(records.iter().all(|record| record.get("done") != Some(&json!(true))));

    server.abort();
}

#[tokio::test]
async fn test_non_streaming_chat_and_generate() {
    let app = Router::new().route(
        "/v1/chat/completions",
        post(|Json(body): Json<Value>| async move {
            assert_eq!(body["stream"], false);
            let last = body["messages"]
                .as_array()
                .and_then(|messages| messages.last())
                .and_then(|message| message["content"].as_str())
                .unwrap_or_default()
                .to_string();
            Json(json!({
                "id": "chatcmpl_mock",
                "object": "chat.completion",
                "choices": [{
                    "index": 0,
                    "message": {"role": "assistant", "content": format!("echo: {last}")},
                    "finish_reason": "stop"
                }],
                "usage": {"prompt_tokens": 5, "completion_tokens": 2, "total_tokens": 7}
            }))
        }),
    );
    let (base_url, server) = spawn_upstream(app).await;
    let state = build_state(base_url);

    let response = post_json(
        Arc::clone(&state),
        "/api/chat",
        json!({"model": "llama3", "stream": false, "messages": [{"role": "user", "content": "ping"}]}),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    let chat = body_json(response).await;
    assert_eq!(chat["model"], "llama3");
    assert_eq!(chat["message"]["role"], "assistant");
    assert_eq!(chat["message"]["content"], "echo: ping");
    assert_eq!(chat["done"], true);
    assert_eq!(chat["done_reason"], "stop");
    assert_eq!(chat["eval_count"], 2);

    let response = post_json(
        state,
        "/api/generate",
        json!({"model": "llama3", "stream": false, "prompt": "pong", "format": "json"}),
    )
    .await;
    let generate = body_json(response).await;
    assert_eq!(generate["response"], "echo: pong");
    assert_eq!(generate["done"], true);
    assert_eq!(generate["context"], json!([]));
    assert_eq!(generate["prompt_eval_count"], 5);

    server.abort();
}

#[tokio::test]
async fn test_model_override_and_response_format() {
    let captured: Arc<Mutex<Option<Value>>> = Arc::new(Mutex::new(None));
    let sink = Arc::clone(&captured);
    let app = Router::new().route(
        "/v1/chat/completions",
        post(move |Json(body): Json<Value>| {
            let sink = Arc::clone(&sink);
            async move {
                *sink.lock().unwrap() = Some(body);
                Json(json!({"choices": [{"message": {"content": "{}"}, "finish_reason": "stop"}]}))
            }
        }),
    );
    let (base_url, server) = spawn_upstream(app).await;
    let mut config = AppConfig::with_upstream(base_url, "upstream-secret");
    config.upstream.model_override = Some("llama-3.1-8b-instruct".to_string());
    let state = build_state_with(config);

    let response = post_json(
        state,
        "/api/generate",
        json!({"model": "deepseek-r1:7b", "stream": false, "prompt": "list", "system": "json only", "format": "json"}),
    )
    .await;
    let generate = body_json(response).await;
    assert_eq!(generate["model"], "deepseek-r1:7b");

    let upstream_body = captured.lock().unwrap().take().expect("upstream called");
    assert_eq!(upstream_body["model"], "llama-3.1-8b-instruct");
    assert_eq!(upstream_body["response_format"], json!({"type": "json_object"}));
    assert_eq!(
        upstream_body["messages"],
        json!([
            {"role": "system", "content": "json only"},
            {"role": "user", "content": "list"}
        ])
    );

    server.abort();
}

#[tokio::test]
async fn test_upstream_error_status_is_relayed() {
    let app = Router::new().route(
        "/v1/chat/completions",
        post(|| async {
            (
                StatusCode::UNAUTHORIZED,
                Json(json!({"error": {"message": "invalid api key", "type": "auth"}})),
            )
        }),
    );
    let (base_url, server) = spawn_upstream(app).await;
    let state = build_state(base_url);

    let response = post_json(state, "/api/chat", json!({"model": "m", "messages": []})).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let body = body_json(response).await;
    assert_eq!(body["error"], "Failed to proxy request");
    assert!(body["details"]
        .as_str()
        .unwrap()
        .contains("invalid api key"));

    server.abort();
}

#[tokio::test]
async fn test_retriable_status_is_retried_before_streaming() {
    let attempts = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&attempts);
    let app = Router::new().route(
        "/v1/chat/completions",
        post(move || {
            let counter = Arc::clone(&counter);
            async move {
                if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                    return (
                        StatusCode::SERVICE_UNAVAILABLE,
                        [(http::header::RETRY_AFTER, "0")],
                        "busy",
                    )
                        .into_response();
                }
                sse_response(vec![
                    "data: {\"choices\":[{\"delta\":{\"content\":\"ok\"},\"finish_reason\":\"stop\"}]}\n\n",
                ])
            }
        }),
    );
    let (base_url, server) = spawn_upstream(app).await;
    let state = build_state(base_url);

    let response = post_json(state, "/api/chat", json!({"model": "m", "messages": []})).await;
    assert_eq!(response.status(), StatusCode::OK);
    let records = body_lines(response).await;
    assert_eq!(records.len(), 2);
    assert_eq!(records[0]["message"]["content"], "ok");
    assert_eq!(records[1]["done"], true);
    assert_eq!(attempts.load(Ordering::SeqCst), 2);

    server.abort();
}

#[tokio::test]
async fn test_unreachable_upstream_is_bad_gateway() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind");
    let addr = listener.local_addr().expect("addr");
    drop(listener);
    let state = build_state(format!("http://{addr}/v1"));

    let response = post_json(state, "/api/chat", json!({"model": "m", "messages": []})).await;
    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    let body = body_json(response).await;
    assert_eq!(body["error"], "Failed to proxy request");
}

#[tokio::test]
async fn test_invalid_body_is_bad_request() {
    let state = build_state("http://127.0.0.1:9/v1".to_string());
    let request = Request::builder()
        .method("POST")
        .uri("/api/chat")
        .header("content-type", "text/plain")
        .body(Body::from("not json"))
        .expect("request");
    let response = dispatch_request(state, Arc::<str>::from(""), request)
        .await
        .expect("infallible");
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert_eq!(body["error"], "Invalid request");
}
