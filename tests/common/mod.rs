//! In-process stand-in for the Cloudflare REST API.
//!
//! Serves the Workers AI, Vectorize and KV routes postvec calls, records every
//! request, and lets tests choose per-route status codes. The server runs on
//! its own thread and runtime so both async tests and binary-driven tests can
//! use it. Connections pass through a small TCP relay that can close the next
//! few connections before answering.

#![allow(dead_code)]

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::routing::{post, put};
use axum::Router;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::io::AsyncReadExt;

pub const ACCOUNT: &str = "acct-123";
pub const TOKEN: &str = "test-token";
pub const INDEX: &str = "blog-posts";
pub const NAMESPACE: &str = "ns-1";

pub const PRIMARY_MODEL: &str = "@cf/baai/bge-m3";
pub const FALLBACK_MODEL: &str = "@cf/baai/bge-base-en-v1.5";

#[derive(Debug, Clone)]
pub struct Call {
    pub method: String,
    pub path: String,
    pub content_type: Option<String>,
    pub authorization: Option<String>,
    pub body: String,
}

#[derive(Default)]
struct MockState {
    calls: Mutex<Vec<Call>>,
    model_status: Mutex<HashMap<String, u16>>,
    upsert_status: Mutex<Option<u16>>,
    matches: Mutex<Value>,
    kv: Mutex<HashMap<String, String>>,
    connections_to_drop: Mutex<usize>,
}

impl MockState {
    fn take_drop(&self) -> bool {
        let mut remaining = self.connections_to_drop.lock().unwrap();
        if *remaining == 0 {
            return false;
        }
        *remaining -= 1;
        true
    }
}

type Shared = Arc<MockState>;

pub struct MockCloudflare {
    pub base: String,
    state: Shared,
}

impl MockCloudflare {
    pub fn start() -> Self {
        let state: Shared = Arc::new(MockState {
            matches: Mutex::new(json!([])),
            ..MockState::default()
        });

        let front = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        front.set_nonblocking(true).unwrap();
        let addr = front.local_addr().unwrap();

        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.set_nonblocking(true).unwrap();
        let inner_addr = listener.local_addr().unwrap();

        let app = Router::new()
            .route("/client/v4/accounts/{account}/ai/run/{*model}", post(ai_run))
            .route(
                "/client/v4/accounts/{account}/vectorize/v2/indexes/{index}/upsert",
                post(upsert),
            )
            .route(
                "/client/v4/accounts/{account}/vectorize/v2/indexes/{index}/query",
                post(query),
            )
            .route(
                "/client/v4/accounts/{account}/storage/kv/namespaces/{ns}/values/{key}",
                put(kv_put).get(kv_get),
            )
            .with_state(state.clone());

        let relay_state = state.clone();
        std::thread::spawn(move || {
            let rt = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .unwrap();
            rt.block_on(async move {
                let listener = tokio::net::TcpListener::from_std(listener).unwrap();
                tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });
                relay(front, inner_addr, relay_state).await;
            });
        });

        Self {
            base: format!("http://{}/client/v4", addr),
            state,
        }
    }

    /// Close the next `n` connections after reading the request, without answering.
    pub fn drop_connections(&self, n: usize) {
        *self.state.connections_to_drop.lock().unwrap() = n;
    }

    /// Connections still due to be dropped.
    pub fn pending_drops(&self) -> usize {
        *self.state.connections_to_drop.lock().unwrap()
    }

    /// Make `model` answer with `status` instead of a vector.
    pub fn fail_model(&self, model: &str, status: u16) {
        self.state
            .model_status
            .lock()
            .unwrap()
            .insert(model.to_string(), status);
    }

    pub fn fail_upserts(&self, status: u16) {
        *self.state.upsert_status.lock().unwrap() = Some(status);
    }

    pub fn set_matches(&self, matches: Value) {
        *self.state.matches.lock().unwrap() = matches;
    }

    pub fn set_kv(&self, key: &str, value: &str) {
        self.state
            .kv
            .lock()
            .unwrap()
            .insert(key.to_string(), value.to_string());
    }

    pub fn kv(&self, key: &str) -> Option<String> {
        self.state.kv.lock().unwrap().get(key).cloned()
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state.calls.lock().unwrap().clone()
    }

    /// Recorded calls whose path ends with `suffix`.
    pub fn calls_to(&self, suffix: &str) -> Vec<Call> {
        self.calls()
            .into_iter()
            .filter(|c| c.path.ends_with(suffix))
            .collect()
    }

    /// A config document pointing every client at this server.
    pub fn config_toml(&self, extra: &str) -> String {
        format!(
            r#"[cloudflare]
account_id = "{ACCOUNT}"
api_base = "{}"
api_token = "{TOKEN}"

[embedding]
max_retries = 0
timeout_secs = 5

[index]
name = "{INDEX}"
dimensions = 3
timeout_secs = 5
max_retries = 1

[listing]
namespace_id = "{NAMESPACE}"
timeout_secs = 5
max_retries = 1

{extra}
"#,
            self.base
        )
    }
}

async fn relay(front: std::net::TcpListener, inner: std::net::SocketAddr, state: Shared) {
    let front = tokio::net::TcpListener::from_std(front).unwrap();
    loop {
        let Ok((mut client, _)) = front.accept().await else {
            continue;
        };
        if state.take_drop() {
            tokio::spawn(async move {
                let mut buf = [0u8; 4096];
                let _ = client.read(&mut buf).await;
            });
            continue;
        }
        tokio::spawn(async move {
            if let Ok(mut upstream) = tokio::net::TcpStream::connect(inner).await {
                let _ = tokio::io::copy_bidirectional(&mut client, &mut upstream).await;
            }
        });
    }
}

fn record(state: &MockState, method: Method, uri: &Uri, headers: &HeaderMap, body: &Bytes) {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    };
    state.calls.lock().unwrap().push(Call {
        method: method.to_string(),
        path: uri.path().to_string(),
        content_type: header("content-type"),
        authorization: header("authorization"),
        body: String::from_utf8_lossy(body).to_string(),
    });
}

fn error_response(status: u16) -> Response {
    let status = StatusCode::from_u16(status).unwrap();
    (
        status,
        axum::Json(json!({
            "success": false,
            "errors": [{ "code": 7000, "message": "mock failure" }]
        })),
    )
        .into_response()
}

async fn ai_run(
    State(state): State<Shared>,
    Path((_account, model)): Path<(String, String)>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    record(&state, method, &uri, &headers, &body);

    let model = model.trim_start_matches('/').to_string();
    if let Some(status) = state.model_status.lock().unwrap().get(&model).copied() {
        return error_response(status);
    }

    // The two default models answer in different shapes.
    let payload = if model == PRIMARY_MODEL {
        json!({ "success": true, "result": { "response": [[0.1, 0.2, 0.3]] } })
    } else {
        json!({ "success": true, "result": { "shape": [1, 3], "data": [[0.4, 0.5, 0.6]] } })
    };
    axum::Json(payload).into_response()
}

async fn upsert(
    State(state): State<Shared>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    record(&state, method, &uri, &headers, &body);

    if let Some(status) = *state.upsert_status.lock().unwrap() {
        return error_response(status);
    }
    axum::Json(json!({ "success": true, "result": { "mutationId": "mut-1" } })).into_response()
}

async fn query(
    State(state): State<Shared>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    record(&state, method, &uri, &headers, &body);

    let matches = state.matches.lock().unwrap().clone();
    let count = matches.as_array().map(Vec::len).unwrap_or(0);
    axum::Json(json!({ "success": true, "result": { "count": count, "matches": matches } }))
        .into_response()
}

async fn kv_put(
    State(state): State<Shared>,
    Path((_account, _ns, key)): Path<(String, String, String)>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    record(&state, method, &uri, &headers, &body);

    state
        .kv
        .lock()
        .unwrap()
        .insert(key, String::from_utf8_lossy(&body).to_string());
    axum::Json(json!({ "success": true, "errors": [], "messages": [], "result": null }))
        .into_response()
}

async fn kv_get(
    State(state): State<Shared>,
    Path((_account, _ns, key)): Path<(String, String, String)>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    record(&state, method, &uri, &headers, &body);

    match state.kv.lock().unwrap().get(&key) {
        Some(value) => (StatusCode::OK, value.clone()).into_response(),
        None => error_response(404),
    }
}
