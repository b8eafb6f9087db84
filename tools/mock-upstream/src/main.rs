//! Local chat-completion and embeddings upstream for exercising the relay by
//! hand or under load. Streaming follows the request's `stream` flag.

use std::convert::Infallible;
use std::env;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use http::{header, HeaderValue, Method, Request, Response, StatusCode};
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::service::service_fn;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder as AutoBuilder;
use tokio::net::TcpListener;

const DEFAULT_UPSTREAM_PORT: u16 = 19_001;

#[derive(Copy, Clone)]
enum MockScenario {
    /// OpenAI-style SSE chunks.
    Text,
    /// Ollama-style NDJSON lines with native timings.
    Ollama,
    /// Every completion request fails with 503.
    Error,
}

impl MockScenario {
    fn as_str(self) -> &'static str {
        match self {
            MockScenario::Text => "text",
            MockScenario::Ollama => "ollama",
            MockScenario::Error => "error",
        }
    }
}

#[derive(Default)]
struct RequestStats {
    chat: AtomicU64,
    embeddings: AtomicU64,
}

struct MockState {
    scenario: MockScenario,
    stats: RequestStats,
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let port = env_u16("UPSTREAM_PORT", DEFAULT_UPSTREAM_PORT);
    let state = Arc::new(MockState {
        scenario: parse_scenario(),
        stats: RequestStats::default(),
    });

    let listener = TcpListener::bind(("127.0.0.1", port))
        .await
        .unwrap_or_else(|err| panic!("failed to bind mock upstream on 127.0.0.1:{port}: {err}"));
    eprintln!(
        "mock upstream on http://127.0.0.1:{port}/v1 (scenario={})",
        state.scenario.as_str()
    );

    let conn_builder = AutoBuilder::new(TokioExecutor::new());
    loop {
        let (stream, remote_addr) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(err) => {
                eprintln!("accept error: {err}");
                continue;
            }
        };
        let io = TokioIo::new(stream);
        let conn_builder = conn_builder.clone();
        let service_state = Arc::clone(&state);
        let service = service_fn(move |request: Request<Incoming>| {
            let state_ref = Arc::clone(&service_state);
            async move { Ok::<_, Infallible>(handle_request(request, &state_ref).await) }
        });

        tokio::spawn(async move {
            if let Err(err) = conn_builder.serve_connection(io, service).await {
                eprintln!("mock upstream connection error from {remote_addr}: {err}");
            }
        });
    }
}

fn env_u16(name: &str, default: u16) -> u16 {
    env::var(name)
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
        .unwrap_or(default)
}

fn parse_scenario() -> MockScenario {
    match env::var("MOCK_SCENARIO").as_deref() {
        Ok("ollama") => MockScenario::Ollama,
        Ok("error") => MockScenario::Error,
        Ok("text") | Err(_) => MockScenario::Text,
        Ok(other) => {
            eprintln!("unknown MOCK_SCENARIO '{other}', fallback to text");
            MockScenario::Text
        }
    }
}

async fn handle_request(request: Request<Incoming>, state: &MockState) -> Response<Full<Bytes>> {
    let (parts, body) = request.into_parts();
    let body = match body.collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(_) => Bytes::new(),
    };
    let path = parts.uri.path();

    if parts.method == Method::GET && path == "/_mock/stats" {
        return stats_response(state);
    }
    if parts.method != Method::POST {
        return json_response(
            StatusCode::METHOD_NOT_ALLOWED,
            Bytes::from_static(br#"{"error":"method_not_allowed"}"#),
        );
    }

    match path {
        "/v1/chat/completions" | "/chat/completions" => {
            state.stats.chat.fetch_add(1, Ordering::Relaxed);
            chat_response(state.scenario, wants_stream(&body))
        }
        "/v1/embeddings" | "/embeddings" => {
            state.stats.embeddings.fetch_add(1, Ordering::Relaxed);
            json_response(StatusCode::OK, Bytes::from_static(EMBEDDINGS_BODY))
        }
        _ => json_response(
            StatusCode::NOT_FOUND,
            Bytes::from_static(br#"{"error":"not_found"}"#),
        ),
    }
}

fn wants_stream(body: &[u8]) -> bool {
    serde_json::from_slice::<serde_json::Value>(body)
        .ok()
        .and_then(|value| value.get("stream").and_then(serde_json::Value::as_bool))
        .unwrap_or(false)
}

fn stats_response(state: &MockState) -> Response<Full<Bytes>> {
    let body = serde_json::json!({
        "scenario": state.scenario.as_str(),
        "chat": state.stats.chat.load(Ordering::Relaxed),
        "embeddings": state.stats.embeddings.load(Ordering::Relaxed),
    });
    json_response(StatusCode::OK, Bytes::from(body.to_string()))
}

fn chat_response(scenario: MockScenario, stream: bool) -> Response<Full<Bytes>> {
    let body: &'static [u8] = match (scenario, stream) {
        (MockScenario::Error, _) => {
            return json_response(
                StatusCode::SERVICE_UNAVAILABLE,
                Bytes::from_static(br#"{"error":"mock_injected_error"}"#),
            );
        }
        (MockScenario::Text, false) => OPENAI_CHAT_NONSTREAM,
        (MockScenario::Text, true) => OPENAI_CHAT_STREAM,
        (MockScenario::Ollama, false) => OLLAMA_NONSTREAM,
        (MockScenario::Ollama, true) => OLLAMA_STREAM,
    };
    if !stream {
        return json_response(StatusCode::OK, Bytes::from_static(body));
    }

    let content_type = match scenario {
        MockScenario::Ollama => "application/x-ndjson",
        _ => "text/event-stream",
    };
    let mut response = simple_response(StatusCode::OK, content_type, Bytes::from_static(body));
    response
        .headers_mut()
        .insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    response
}

fn json_response(status: StatusCode, body: Bytes) -> Response<Full<Bytes>> {
    simple_response(status, "application/json", body)
}

fn simple_response(
    status: StatusCode,
    content_type: &'static str,
    body: Bytes,
) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(body));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(header::CONTENT_TYPE, HeaderValue::from_static(content_type));
    response
}

const OPENAI_CHAT_NONSTREAM: &[u8] = br#"{"id":"chatcmpl-mock","object":"chat.completion","created":1,"model":"m1","choices":[{"index":0,"message":{"role":"assistant","content":"ok"},"finish_reason":"stop"}],"usage":{"prompt_tokens":1,"completion_tokens":1,"total_tokens":2}}"#;
const OPENAI_CHAT_STREAM: &[u8] = b": keep-alive\n\ndata: {\"id\":\"chatcmpl-mock\",\"object\":\"chat.completion.chunk\",\"created\":1,\"model\":\"m1\",\"choices\":[{\"index\":0,\"delta\":{\"role\":\"assistant\",\"content\":\"o\"},\"finish_reason\":null}]}\n\ndata: {\"id\":\"chatcmpl-mock\",\"object\":\"chat.completion.chunk\",\"created\":1,\"model\":\"m1\",\"choices\":[{\"index\":0,\"delta\":{\"content\":\"k\"},\"finish_reason\":\"stop\"}],\"usage\":{\"prompt_tokens\":1,\"completion_tokens\":2,\"total_tokens\":3}}\n\ndata: [DONE]\n\n";

const OLLAMA_NONSTREAM: &[u8] = br#"{"model":"m1","created_at":"2024-01-01T00:00:00Z","response":"ok","done":true,"done_reason":"stop","context":[1,2,3],"total_duration":1000,"load_duration":10,"prompt_eval_count":1,"prompt_eval_duration":100,"eval_count":1,"eval_duration":500}"#;
const OLLAMA_STREAM: &[u8] = b"{\"model\":\"m1\",\"response\":\"o\",\"done\":false}\n{\"model\":\"m1\",\"response\":\"k\",\"done\":false}\n{\"model\":\"m1\",\"response\":\"\",\"done\":true,\"done_reason\":\"stop\",\"context\":[1,2,3],\"total_duration\":1000,\"load_duration\":10,\"prompt_eval_count\":1,\"prompt_eval_duration\":100,\"eval_count\":2,\"eval_duration\":500}\n";

const EMBEDDINGS_BODY: &[u8] = br#"{"object":"list","data":[{"object":"embedding","index":0,"embedding":[0.0125,-0.25,0.5,0.75]}],"model":"m1","usage":{"prompt_tokens":1,"total_tokens":1}}"#;
