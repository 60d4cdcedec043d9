//! HTTP surface tests driven through the router directly.

use alloy_primitives::Address;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use serde_json::Value;
use sibyl_core::domain::message::SignRequest;
use sibyl_core::foundation::RequestHash;
use sibyl_core::infrastructure::storage::{RocksStore, Store};
use sibyl_service::api::{build_router, ApiState};
use std::sync::Arc;
use tempfile::TempDir;
use tower::ServiceExt;

fn quote_request(seed: u8, ds_id: u32, timestamp: i64, ticker: &str) -> SignRequest {
    SignRequest {
        hash: RequestHash::new([seed; 32]),
        data: vec![Value::from(ticker), Value::from("300000000000000000000")],
        data_structure: vec!["string".into(), "string".into()],
        data_structure_meta: vec!["ticker".into(), "price".into()],
        data_structure_id: ds_id,
        timestamp,
    }
}

fn signer(seed: u8) -> Address {
    Address::from_slice(&[seed; 20])
}

/// Store fixture: ds 1 holds one confirmed record (3 signatures) and one
/// unsigned newer record; ds 2 holds a single unsigned record.
fn fixture() -> (TempDir, Router, SignRequest) {
    let dir = TempDir::new().expect("temp dir");
    let store = Arc::new(RocksStore::open(dir.path()).expect("open store"));

    let confirmed = quote_request(1, 1, 100, "SBER");
    store.store_data(&confirmed).expect("store confirmed");
    for seed in 1..=3u8 {
        store.store_signature(&confirmed.hash, &signer(seed), &format!("0x{:02x}", seed)).expect("store signature");
    }

    let unsigned = quote_request(2, 1, 200, "SBER");
    store.store_data(&unsigned).expect("store unsigned");

    let other = quote_request(3, 2, 300, "GAZP");
    store.store_data(&other).expect("store other");

    let state = Arc::new(ApiState { store, threshold: 2 });
    (dir, build_router(state), confirmed)
}

async fn get(router: &Router, uri: &str) -> (StatusCode, Value) {
    let response =
        router.clone().oneshot(Request::builder().uri(uri).body(Body::empty()).expect("request")).await.expect("response");
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.expect("body");
    let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, value)
}

#[tokio::test]
async fn hash_lookup_returns_the_joined_record() {
    let (_dir, router, confirmed) = fixture();

    let (status, body) = get(&router, &format!("/hash?hash={}", confirmed.hash)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["hash"], confirmed.hash.to_string());
    assert_eq!(body["signatures"].as_object().map(|map| map.len()), Some(3));

    let unknown = RequestHash::new([0xee; 32]);
    let (status, _) = get(&router, &format!("/hash?hash={unknown}")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn hash_lookup_validates_input() {
    let (_dir, router, _) = fixture();

    let (status, _) = get(&router, "/hash").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = get(&router, "/hash?hash=zzzz").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn list_returns_newest_first() {
    let (_dir, router, _) = fixture();

    let (status, body) = get(&router, "/list?dsid=1").await;
    assert_eq!(status, StatusCode::OK);
    let records = body.as_array().expect("array");
    assert_eq!(records.len(), 2);
    assert_eq!(records[0]["timestamp"], 200);
    assert_eq!(records[1]["timestamp"], 100);

    let (status, body) = get(&router, "/list?dsid=1&page=2&limit=1").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_array().expect("array").len(), 1);
    assert_eq!(body[0]["timestamp"], 100);
}

#[tokio::test]
async fn non_get_methods_are_rejected() {
    let (_dir, router, _) = fixture();
    let response = router
        .oneshot(Request::builder().method("POST").uri("/list").body(Body::empty()).expect("request"))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
}

#[tokio::test]
async fn field_filtered_list_matches_one_value() {
    let (_dir, router, _) = fixture();

    let (status, body) = get(&router, "/data/1/list?ticker=SBER").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_array().expect("array").len(), 2);

    let (status, body) = get(&router, "/data/2/list?ticker=GAZP").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_array().expect("array").len(), 1);

    let (status, body) = get(&router, "/data/1/list?ticker=AAPL").await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.as_array().expect("array").is_empty());
}

#[tokio::test]
async fn latest_returns_confirmed_records_only() {
    let (_dir, router, confirmed) = fixture();

    // The newer ds-1 record has no signatures, so the confirmed one wins.
    let (status, body) = get(&router, "/data/1/latest").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["hash"], confirmed.hash.to_string());

    let (status, body) = get(&router, "/data/1/latest?field=ticker&value=SBER").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["hash"], confirmed.hash.to_string());

    // Nothing confirmed in ds 2: an empty object, not an error.
    let (status, body) = get(&router, "/data/2/latest").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, serde_json::json!({}));
}

#[tokio::test]
async fn malformed_structure_ids_are_bad_requests() {
    let (_dir, router, _) = fixture();
    let (status, _) = get(&router, "/data/notanumber/latest").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn structures_lists_every_schema_id() {
    let (_dir, router, _) = fixture();
    let (status, body) = get(&router, "/structures").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, serde_json::json!([1, 2]));
}

#[tokio::test]
async fn health_reports_ok_with_a_timestamp() {
    let (_dir, router, _) = fixture();
    let (status, body) = get(&router, "/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert!(body["time"].as_str().is_some());
}
