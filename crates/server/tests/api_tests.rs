//! Integration tests for HTTP API endpoints.

mod common;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use bytes::Bytes;
use common::TestServer;
use common::fixtures::{beacon_block_record, beacon_state_record, block_trace_record, put_object};
use serde_json::{Value, json};
use std::time::Duration;
use tower::ServiceExt;
use tracoor_core::location::{handshake_location, permanent_location};

/// Helper to make JSON requests.
async fn json_request(
    router: &axum::Router,
    method: &str,
    uri: &str,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);

    let body = match body {
        Some(v) => {
            builder = builder.header("Content-Type", "application/json");
            Body::from(serde_json::to_vec(&v).unwrap())
        }
        None => Body::empty(),
    };

    let request = builder.body(body).unwrap();
    let response = router.clone().oneshot(request).await.unwrap();

    let status = response.status();
    let body_bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();

    let json: Value = if body_bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&body_bytes).unwrap_or(Value::Null)
    };

    (status, json)
}

#[tokio::test]
async fn test_health_check() {
    let server = TestServer::new().await;

    let (status, body) = json_request(&server.router, "GET", "/v1/health", None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
}

#[tokio::test]
async fn test_create_then_duplicate_is_conflict() {
    let server = TestServer::new().await;
    let record = beacon_block_record("mainnet", "lighthouse-1", 100);
    put_object(server.storage().as_ref(), &record).await;

    let (status, body) = json_request(
        &server.router,
        "POST",
        "/api/v1/beacon-block",
        Some(serde_json::to_value(&record).unwrap()),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "body: {body}");
    let id = body["id"].as_str().unwrap().to_string();
    assert!(!id.is_empty());

    let (status, body) = json_request(
        &server.router,
        "POST",
        "/api/v1/beacon-block",
        Some(serde_json::to_value(&record).unwrap()),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "already_exists");

    // Same coordinates from another node are a separate observation
    let mut other = record.clone();
    other.node = "prysm-1".to_string();
    other.location = record.location.replace("lighthouse-1", "prysm-1");
    put_object(server.storage().as_ref(), &other).await;
    let (status, _) = json_request(
        &server.router,
        "POST",
        "/api/v1/beacon-block",
        Some(serde_json::to_value(&other).unwrap()),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
}

#[tokio::test]
async fn test_create_requires_stored_object() {
    let server = TestServer::new().await;
    let record = beacon_state_record("mainnet", "teku-1", 64);

    let (status, body) = json_request(
        &server.router,
        "POST",
        "/api/v1/beacon-state",
        Some(serde_json::to_value(&record).unwrap()),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "invalid_argument");
}

#[tokio::test]
async fn test_create_rejects_fields_of_other_kinds() {
    let server = TestServer::new().await;
    let mut record = beacon_state_record("mainnet", "teku-1", 64);
    record.block_hash = Some("0xdead".to_string());
    put_object(server.storage().as_ref(), &record).await;

    let (status, _) = json_request(
        &server.router,
        "POST",
        "/api/v1/beacon-state",
        Some(serde_json::to_value(&record).unwrap()),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_unknown_kind_is_bad_request() {
    let server = TestServer::new().await;

    let (status, body) = json_request(
        &server.router,
        "POST",
        "/api/v1/beacon-nonsense/count",
        Some(json!({"filter": {"network": "mainnet"}})),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "invalid_argument");
}

#[tokio::test]
async fn test_list_count_and_distinct() {
    let server = TestServer::new().await;
    for (node, number) in [("geth-1", 10), ("geth-1", 11), ("nethermind-1", 12)] {
        let record = block_trace_record("holesky", node, number);
        put_object(server.storage().as_ref(), &record).await;
        let (status, _) = json_request(
            &server.router,
            "POST",
            "/api/v1/execution-block-trace",
            Some(serde_json::to_value(&record).unwrap()),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
    }

    let (status, body) = json_request(
        &server.router,
        "POST",
        "/api/v1/execution-block-trace/list",
        Some(json!({
            "filter": {"network": "holesky"},
            "pagination": {"limit": 2, "order_by": "block_number DESC"}
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "body: {body}");
    let items = body["items"].as_array().unwrap();
    assert_eq!(items.len(), 2);
    assert_eq!(items[0]["block_number"], 12);
    assert_eq!(items[1]["block_number"], 11);

    let (status, body) = json_request(
        &server.router,
        "POST",
        "/api/v1/execution-block-trace/count",
        Some(json!({"filter": {"node": "geth-1"}})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["count"], 2);

    let (status, body) = json_request(
        &server.router,
        "POST",
        "/api/v1/execution-block-trace/distinct",
        Some(json!({"fields": ["node", "network"]})),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "body: {body}");
    let mut nodes: Vec<String> = serde_json::from_value(body["values"]["node"].clone()).unwrap();
    nodes.sort();
    assert_eq!(nodes, vec!["geth-1", "nethermind-1"]);
    assert_eq!(body["values"]["network"], json!(["holesky"]));
}

#[tokio::test]
async fn test_list_requires_bounded_limit() {
    let server = TestServer::new().await;

    let (status, _) = json_request(
        &server.router,
        "POST",
        "/api/v1/beacon-block/list",
        Some(json!({"filter": {"network": "mainnet"}})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = json_request(
        &server.router,
        "POST",
        "/api/v1/beacon-block/list",
        Some(json!({"pagination": {"limit": 5000}})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = json_request(
        &server.router,
        "POST",
        "/api/v1/beacon-block/list",
        Some(json!({"pagination": {"limit": 10, "order_by": "block_hash ASC"}})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_storage_handshake() {
    let server = TestServer::new().await;
    server
        .storage()
        .put(&handshake_location("lighthouse-1"), Bytes::from("secret-token\n"))
        .await
        .unwrap();

    let (status, _) = json_request(
        &server.router,
        "POST",
        "/api/v1/storage/handshake",
        Some(json!({"node": "lighthouse-1", "token": "secret-token"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = json_request(
        &server.router,
        "POST",
        "/api/v1/storage/handshake",
        Some(json!({"node": "lighthouse-1", "token": "wrong"})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = json_request(
        &server.router,
        "POST",
        "/api/v1/storage/handshake",
        Some(json!({"node": "never-wrote", "token": "secret-token"})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = json_request(
        &server.router,
        "POST",
        "/api/v1/storage/handshake",
        Some(json!({"node": "../escape", "token": "secret-token"})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_metrics_endpoint_toggle() {
    let server = TestServer::new().await;
    let record = beacon_state_record("mainnet", "teku-1", 96);
    put_object(server.storage().as_ref(), &record).await;
    json_request(
        &server.router,
        "POST",
        "/api/v1/beacon-state",
        Some(serde_json::to_value(&record).unwrap()),
    )
    .await;

    let response = server
        .router
        .clone()
        .oneshot(Request::get("/metrics").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let text = String::from_utf8(body.to_vec()).unwrap();
    assert!(text.contains("tracoor_artifacts_created_total{kind=\"beacon_state\"} 1"));

    let disabled = TestServer::with_config(|config| config.server.metrics_enabled = false).await;
    let response = disabled
        .router
        .clone()
        .oneshot(Request::get("/metrics").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_created_block_is_made_permanent() {
    let server = TestServer::with_config(|config| {
        config.permanent_store.enabled = true;
    })
    .await;
    let record = beacon_block_record("mainnet", "lighthouse-1", 4242);
    put_object(server.storage().as_ref(), &record).await;

    let (status, _) = json_request(
        &server.router,
        "POST",
        "/api/v1/beacon-block",
        Some(serde_json::to_value(&record).unwrap()),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    let root = record.block_root.clone().unwrap();
    let destination = permanent_location("mainnet", &root, &record.location);
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        if server
            .metadata()
            .get_permanent_block("mainnet", &root)
            .await
            .unwrap()
            .is_some()
        {
            break;
        }
        if tokio::time::Instant::now() > deadline {
            panic!("block was not made permanent in time");
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    assert!(server.storage().exists(&destination).await.unwrap());
}
