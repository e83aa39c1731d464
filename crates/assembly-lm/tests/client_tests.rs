//! LM client tests against a local HTTP server.

#![allow(clippy::expect_used)]

use std::collections::{BTreeMap, HashMap};
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::json;

use assembly_lm::security::NEAR_EXPIRY_WAIT;
use assembly_lm::{
    CreateAssemblyRequest, DeleteAssemblyRequest, Error, LmApi, LmClient, LmConfig,
};

const TOKEN: &str = "test-token";

#[derive(Clone, Default)]
struct ServerState {
    token_requests: Arc<AtomicUsize>,
    reject_credentials: bool,
    require_auth: bool,
    token_expires_in: Option<u64>,
    seen_authorization: Arc<std::sync::Mutex<Vec<Option<String>>>>,
}

impl ServerState {
    fn record(&self, headers: &HeaderMap) -> bool {
        let auth = headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let ok = !self.require_auth || auth.as_deref() == Some(&format!("Bearer {TOKEN}"));
        self.seen_authorization
            .lock()
            .expect("lock")
            .push(auth);
        ok
    }
}

async fn token_handler(State(state): State<ServerState>, headers: HeaderMap, body: String) -> Response {
    state.token_requests.fetch_add(1, Ordering::SeqCst);
    let basic = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    if state.reject_credentials || !basic.starts_with("Basic ") || body != "grant_type=client_credentials" {
        return (StatusCode::UNAUTHORIZED, "bad credentials").into_response();
    }
    let expires_in = state.token_expires_in.unwrap_or(3600);
    Json(json!({"access_token": TOKEN, "expires_in": expires_in, "scope": "all"})).into_response()
}

async fn create_handler(
    State(state): State<ServerState>,
    headers: HeaderMap,
    Json(body): Json<serde_json::Value>,
) -> Response {
    if !state.record(&headers) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    if body["assemblyName"] == "revoked" {
        return (StatusCode::UNAUTHORIZED, "token revoked").into_response();
    }
    if body["assemblyName"] == "taken" {
        return (StatusCode::CONFLICT, "assembly name already in use").into_response();
    }
    if body["assemblyName"] == "no-location" {
        return StatusCode::CREATED.into_response();
    }
    (
        StatusCode::CREATED,
        [(header::LOCATION, "/api/processes/p-42")],
    )
        .into_response()
}

async fn delete_handler(State(state): State<ServerState>, headers: HeaderMap) -> Response {
    state.record(&headers);
    // Intents are only accepted with 201 Created.
    StatusCode::ACCEPTED.into_response()
}

async fn assembly_by_id_handler(
    State(state): State<ServerState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Response {
    state.record(&headers);
    if id != "a1" {
        return StatusCode::NOT_FOUND.into_response();
    }
    Json(json!({
        "id": "a1",
        "name": "svc-a",
        "state": "Active",
        "descriptorName": "assembly::svcA::1.0",
        "properties": [{"name": "size", "value": "2"}]
    }))
    .into_response()
}

async fn assemblies_handler(
    State(state): State<ServerState>,
    headers: HeaderMap,
    Query(query): Query<HashMap<String, String>>,
) -> Response {
    state.record(&headers);
    match query.get("name").map(String::as_str) {
        Some("svc a&b") => Json(json!([{
            "id": "a2",
            "name": "svc a&b",
            "state": "Installed",
            "descriptorName": "assembly::svcB::2.0",
            "properties": []
        }]))
        .into_response(),
        _ => Json(json!([])).into_response(),
    }
}

async fn processes_handler(
    State(state): State<ServerState>,
    headers: HeaderMap,
    Query(query): Query<HashMap<String, String>>,
) -> Response {
    state.record(&headers);
    if query.get("limit").map(String::as_str) != Some("1") {
        return StatusCode::BAD_REQUEST.into_response();
    }
    match query.get("assemblyName").map(String::as_str) {
        Some("svc-a") => Json(json!([{
            "id": "p-1",
            "assemblyId": "a1",
            "intentType": "CreateAssembly",
            "status": "In Progress"
        }]))
        .into_response(),
        _ => Json(json!([])).into_response(),
    }
}

async fn process_by_id_handler(State(state): State<ServerState>, headers: HeaderMap, Path(id): Path<String>) -> Response {
    state.record(&headers);
    match id.as_str() {
        "p-1" => Json(json!({
            "id": "p-1",
            "assemblyId": "a1",
            "intentType": "ChangeAssemblyState",
            "status": "Failed",
            "statusReason": "resource quota exceeded"
        }))
        .into_response(),
        "broken" => (StatusCode::OK, "not json").into_response(),
        "boom" => (StatusCode::INTERNAL_SERVER_ERROR, "database unavailable").into_response(),
        _ => StatusCode::NOT_FOUND.into_response(),
    }
}

async fn start_test_server(state: ServerState) -> (String, tokio::task::JoinHandle<()>) {
    let app = Router::new()
        .route("/oauth/token", post(token_handler))
        .route("/api/intent/createAssembly", post(create_handler))
        .route("/api/intent/deleteAssembly", post(delete_handler))
        .route("/api/topology/assemblies", get(assemblies_handler))
        .route("/api/topology/assemblies/{id}", get(assembly_by_id_handler))
        .route("/api/processes", get(processes_handler))
        .route("/api/processes/{id}", get(process_by_id_handler))
        .with_state(state);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind listener");
    let addr: SocketAddr = listener.local_addr().expect("listener addr");
    let base_url = format!("http://{addr}");

    let handle = tokio::spawn(async move {
        axum::serve(listener, app).await.expect("serve test server");
    });

    (base_url, handle)
}

fn create_request(name: &str) -> CreateAssemblyRequest {
    CreateAssemblyRequest {
        assembly_name: name.to_string(),
        descriptor_name: "assembly::svcA::1.0".to_string(),
        intended_state: "Active".to_string(),
        properties: BTreeMap::from([("size".to_string(), "2".to_string())]),
    }
}

fn secure_client(base_url: &str) -> LmClient {
    LmClient::new(LmConfig::new(base_url).with_client_credentials("operator", "secret"))
        .expect("client")
}

#[tokio::test]
async fn create_returns_process_id_from_location() {
    let (base_url, _handle) = start_test_server(ServerState::default()).await;
    let client = LmClient::new(LmConfig::new(&base_url)).expect("client");

    let process_id = client
        .create_assembly(create_request("svc-a"))
        .await
        .expect("create");
    assert_eq!(process_id, "p-42");
}

#[tokio::test]
async fn conflicting_create_reports_status_and_body() {
    let (base_url, _handle) = start_test_server(ServerState::default()).await;
    let client = LmClient::new(LmConfig::new(&base_url)).expect("client");

    let err = client
        .create_assembly(create_request("taken"))
        .await
        .expect_err("conflict");
    assert!(err.is_conflict());
    assert!(err.to_string().contains("assembly name already in use"));
}

#[tokio::test]
async fn created_without_location_is_an_error() {
    let (base_url, _handle) = start_test_server(ServerState::default()).await;
    let client = LmClient::new(LmConfig::new(&base_url)).expect("client");

    let err = client
        .create_assembly(create_request("no-location"))
        .await
        .expect_err("missing location");
    assert!(matches!(err, Error::MissingLocation { .. }));
}

#[tokio::test]
async fn intent_requires_created_status() {
    let (base_url, _handle) = start_test_server(ServerState::default()).await;
    let client = LmClient::new(LmConfig::new(&base_url)).expect("client");

    let err = client
        .delete_assembly(DeleteAssemblyRequest {
            assembly_name: "svc-a".to_string(),
        })
        .await
        .expect_err("202 is not accepted");
    assert_eq!(err.status_code(), Some(202));
}

#[tokio::test]
async fn reads_map_absence_to_none() {
    let (base_url, _handle) = start_test_server(ServerState::default()).await;
    let client = LmClient::new(LmConfig::new(&base_url)).expect("client");

    assert!(client.get_assembly_by_id("missing").await.expect("get").is_none());
    assert!(client.get_assembly_by_name("missing").await.expect("get").is_none());
    assert!(
        client
            .get_latest_process_for_name("missing")
            .await
            .expect("get")
            .is_none()
    );
    assert!(client.get_process_by_id("missing").await.expect("get").is_none());
}

#[tokio::test]
async fn reads_decode_lm_payloads() {
    let (base_url, _handle) = start_test_server(ServerState::default()).await;
    let client = LmClient::new(LmConfig::new(&base_url)).expect("client");

    let assembly = client
        .get_assembly_by_id("a1")
        .await
        .expect("get")
        .expect("found");
    assert_eq!(assembly.state, "Active");
    assert_eq!(assembly.property_map().get("size").map(String::as_str), Some("2"));

    let by_name = client
        .get_assembly_by_name("svc a&b")
        .await
        .expect("get")
        .expect("name is query-encoded");
    assert_eq!(by_name.id, "a2");

    let latest = client
        .get_latest_process_for_name("svc-a")
        .await
        .expect("get")
        .expect("found");
    assert_eq!(latest.status, "In Progress");

    let process = client
        .get_process_by_id("p-1")
        .await
        .expect("get")
        .expect("found");
    assert_eq!(process.status_reason.as_deref(), Some("resource quota exceeded"));
}

#[tokio::test]
async fn malformed_and_failed_reads_are_errors() {
    let (base_url, _handle) = start_test_server(ServerState::default()).await;
    let client = LmClient::new(LmConfig::new(&base_url)).expect("client");

    let err = client.get_process_by_id("broken").await.expect_err("decode");
    assert!(matches!(err, Error::Decode { .. }));

    let err = client.get_process_by_id("boom").await.expect_err("500");
    assert_eq!(err.status_code(), Some(500));
    assert!(err.to_string().contains("database unavailable"));
}

#[tokio::test]
async fn token_is_fetched_once_and_reused() {
    let state = ServerState {
        require_auth: true,
        ..ServerState::default()
    };
    let token_requests = Arc::clone(&state.token_requests);
    let (base_url, _handle) = start_test_server(state).await;
    let client = secure_client(&base_url);

    client.create_assembly(create_request("svc-a")).await.expect("create");
    client.get_assembly_by_id("a1").await.expect("get");
    client.get_process_by_id("p-1").await.expect("get");

    assert_eq!(token_requests.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn expired_token_is_replaced() {
    let state = ServerState {
        require_auth: true,
        token_expires_in: Some(0),
        ..ServerState::default()
    };
    let token_requests = Arc::clone(&state.token_requests);
    let (base_url, _handle) = start_test_server(state).await;
    let client = secure_client(&base_url);

    client.get_assembly_by_id("a1").await.expect("first get");
    client.get_assembly_by_id("a1").await.expect("second get");

    assert_eq!(token_requests.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn token_about_to_expire_is_replaced_after_wait() {
    let state = ServerState {
        require_auth: true,
        token_expires_in: Some(1),
        ..ServerState::default()
    };
    let token_requests = Arc::clone(&state.token_requests);
    let (base_url, _handle) = start_test_server(state).await;
    let client = secure_client(&base_url);

    client.get_assembly_by_id("a1").await.expect("first get");
    assert_eq!(token_requests.load(Ordering::SeqCst), 1);

    let started = Instant::now();
    client.get_assembly_by_id("a1").await.expect("second get");
    assert!(started.elapsed() >= NEAR_EXPIRY_WAIT);
    assert_eq!(token_requests.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn unauthorized_response_drops_cached_token() {
    let state = ServerState {
        require_auth: true,
        ..ServerState::default()
    };
    let token_requests = Arc::clone(&state.token_requests);
    let (base_url, _handle) = start_test_server(state).await;
    let client = secure_client(&base_url);

    let err = client
        .create_assembly(create_request("revoked"))
        .await
        .expect_err("unauthorized");
    assert_eq!(err.status_code(), Some(401));

    client.create_assembly(create_request("svc-a")).await.expect("create");
    assert_eq!(token_requests.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn rejected_credentials_fail_the_call() {
    let state = ServerState {
        reject_credentials: true,
        ..ServerState::default()
    };
    let seen = Arc::clone(&state.seen_authorization);
    let (base_url, _handle) = start_test_server(state).await;
    let client = secure_client(&base_url);

    let err = client
        .create_assembly(create_request("svc-a"))
        .await
        .expect_err("auth failure");
    assert!(err.is_authentication());
    assert!(seen.lock().expect("lock").is_empty(), "intent must not be sent");
}

#[tokio::test]
async fn unsecured_client_sends_no_authorization_header() {
    let state = ServerState::default();
    let seen = Arc::clone(&state.seen_authorization);
    let token_requests = Arc::clone(&state.token_requests);
    let (base_url, _handle) = start_test_server(state).await;
    let client = LmClient::new(LmConfig::new(&base_url)).expect("client");

    client.get_assembly_by_id("a1").await.expect("get");

    assert_eq!(token_requests.load(Ordering::SeqCst), 0);
    assert_eq!(seen.lock().expect("lock").as_slice(), &[None]);
}
