mod common;

use axum::{
    body::{Body, to_bytes},
    http::{Method, Request, StatusCode},
};
use common::Harness;
use receipt_mirror::web::{AppState, build_router};
use receipt_mirror::{OutboxStore, SyncPolicy};
use serde_json::Value;
use tower::ServiceExt;
use uuid::Uuid;

async fn send(app: &axum::Router, method: Method, uri: &str) -> (StatusCode, Value) {
    let request = Request::builder()
        .method(method)
        .uri(uri)
        .body(Body::empty())
        .expect("request should build");

    let response = app
        .clone()
        .oneshot(request)
        .await
        .expect("response expected");
    let status = response.status();
    let body = to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("response body should be readable");

    if body.is_empty() {
        return (status, Value::Null);
    }

    let json = serde_json::from_slice::<Value>(&body).expect("body should be valid JSON");
    (status, json)
}

#[tokio::test]
async fn health_reports_ok() {
    let h = Harness::new();
    let app = build_router(AppState::new(h.engine.clone()));

    let (status, body) = send(&app, Method::GET, "/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn sync_records_lists_most_recent_first_with_frozen_flag() {
    let h = Harness::with_policy(SyncPolicy::default().max_retries(1));
    let org = h.bound_org("Acme").await;
    h.mirror.set_available(false);
    h.receipt(&org, "older", 100).await;
    h.engine.run_once().await.unwrap();
    h.advance_ms(1_000);
    h.receipt(&org, "newer", 200).await;

    let app = build_router(AppState::new(h.engine.clone()));
    let (status, body) = send(
        &app,
        Method::GET,
        &format!("/api/v1/orgs/{}/sync-records", org.id),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["max_retries"], 1);
    let records = body["sync_records"].as_array().unwrap();
    assert_eq!(records.len(), 2);
    assert_eq!(records[0]["payload"]["snapshot"]["description"], "newer");
    assert_eq!(records[0]["frozen"], false);
    assert_eq!(records[1]["payload"]["snapshot"]["description"], "older");
    assert_eq!(records[1]["frozen"], true);
    assert_eq!(records[1]["retry_count"], 1);
    assert_eq!(records[1]["sync_type"], "append_record");
}

#[tokio::test]
async fn sync_records_for_unknown_org_is_not_found() {
    let h = Harness::new();
    let app = build_router(AppState::new(h.engine.clone()));

    let (status, body) = send(
        &app,
        Method::GET,
        &format!("/api/v1/orgs/{}/sync-records", Uuid::new_v4()),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "not_found");
}

#[tokio::test]
async fn run_reports_processed_count() {
    let h = Harness::new();
    let org = h.bound_org("Acme").await;
    h.mirror.set_available(false);
    h.receipt(&org, "a", 100).await;
    h.receipt(&org, "b", 200).await;
    h.mirror.set_available(true);

    let app = build_router(AppState::new(h.engine.clone()));
    let (status, body) = send(&app, Method::POST, "/api/v1/sync/run").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["processed_count"], 2);
    assert_eq!(body["succeeded"], 2);

    let (_, body) = send(&app, Method::POST, "/api/v1/sync/run").await;
    assert_eq!(body["processed_count"], 0);
}

#[tokio::test]
async fn run_surfaces_unreachable_store() {
    let h = Harness::new();
    let org = h.bound_org("Acme").await;
    h.mirror.set_available(false);
    h.receipt(&org, "Taxi", 3_000).await;
    h.store.set_fail_writes(true);

    let app = build_router(AppState::new(h.engine.clone()));
    let (status, body) = send(&app, Method::POST, "/api/v1/sync/run").await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["code"], "store_unavailable");
}

#[tokio::test]
async fn retry_endpoint_drains_one_record() {
    let h = Harness::with_policy(SyncPolicy::default().max_retries(1));
    let org = h.bound_org("Acme").await;
    h.mirror.set_available(false);
    h.receipt(&org, "Taxi", 3_000).await;
    h.engine.run_once().await.unwrap();
    let frozen = h.store.list_all().await.unwrap().remove(0);
    h.mirror.set_available(true);

    let app = build_router(AppState::new(h.engine.clone()));
    let uri = format!("/api/v1/sync-records/{}/retry", frozen.id);
    let (status, body) = send(&app, Method::POST, &uri).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["result"], "succeeded");
    assert_eq!(body["sync_id"], frozen.id.to_string());

    let (status, body) = send(&app, Method::POST, &uri).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "not_found");
}
