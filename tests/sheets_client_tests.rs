use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{post, put},
};
use receipt_mirror::config::MirrorConfig;
use receipt_mirror::mirror::http::parse_range_row;
use receipt_mirror::mirror::{MirrorClient, MirrorRecord};
use receipt_mirror::{
    InMemoryMirror, ManualClock, MemoryStore, MirrorError, NewReceipt, ReconcileEngine,
    SheetsMirrorClient, SyncStatus,
};
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Default)]
struct FakeLedger {
    titles: HashMap<String, String>,
    sheets: HashMap<String, Vec<Vec<String>>>,
    fail_next: Option<u16>,
    malformed_append: bool,
    last_auth: Option<String>,
    value_input_options: Vec<String>,
    ranges: Vec<String>,
}

type Shared = Arc<Mutex<FakeLedger>>;

fn injected_failure(ledger: &mut FakeLedger, headers: &HeaderMap) -> Option<Response> {
    ledger.last_auth = headers
        .get("authorization")
        .and_then(|value| value.to_str().ok())
        .map(str::to_string);
    let status = ledger.fail_next.take()?;
    let status = StatusCode::from_u16(status).unwrap();
    Some((status, Json(json!({ "error": { "message": "injected" } }))).into_response())
}

fn row_values(body: &Value) -> Vec<String> {
    body["values"][0]
        .as_array()
        .unwrap()
        .iter()
        .map(|cell| cell.as_str().unwrap_or_default().to_string())
        .collect()
}

async fn create_spreadsheet(
    State(ledger): State<Shared>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    let mut ledger = ledger.lock().unwrap();
    if let Some(failure) = injected_failure(&mut ledger, &headers) {
        return failure;
    }
    let id = format!("sheet-{}", ledger.sheets.len() + 1);
    let title = body["properties"]["title"].as_str().unwrap().to_string();
    ledger.titles.insert(id.clone(), title);
    ledger.sheets.insert(id.clone(), Vec::new());
    Json(json!({ "spreadsheetId": id })).into_response()
}

async fn write_range(
    State(ledger): State<Shared>,
    Path((id, range)): Path<(String, String)>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    let mut ledger = ledger.lock().unwrap();
    if let Some(failure) = injected_failure(&mut ledger, &headers) {
        return failure;
    }
    ledger.ranges.push(range.clone());
    if let Some(option) = query.get("valueInputOption") {
        ledger.value_input_options.push(option.clone());
    }
    let Some(row) = parse_range_row(&range) else {
        return (StatusCode::BAD_REQUEST, "bad range").into_response();
    };
    let Some(rows) = ledger.sheets.get_mut(&id) else {
        return (StatusCode::NOT_FOUND, "no such spreadsheet").into_response();
    };
    let index = row as usize - 1;
    if rows.len() <= index {
        rows.resize(index + 1, Vec::new());
    }
    rows[index] = row_values(&body);
    Json(json!({ "updatedRange": range })).into_response()
}

async fn append_range(
    State(ledger): State<Shared>,
    Path((id, range)): Path<(String, String)>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    let mut ledger = ledger.lock().unwrap();
    if let Some(failure) = injected_failure(&mut ledger, &headers) {
        return failure;
    }
    ledger.ranges.push(range.clone());
    if ledger.malformed_append {
        return Json(json!({ "updates": { "updatedRange": "Receipts!A:E" } })).into_response();
    }
    let sheet_title = range.split('!').next().unwrap_or_default().to_string();
    let Some(rows) = ledger.sheets.get_mut(&id) else {
        return (StatusCode::NOT_FOUND, "no such spreadsheet").into_response();
    };
    rows.push(row_values(&body));
    let row = rows.len();
    Json(json!({
        "updates": { "updatedRange": format!("{sheet_title}!A{row}:E{row}") }
    }))
    .into_response()
}

async fn spawn_fake_ledger() -> (String, Shared) {
    let ledger: Shared = Arc::new(Mutex::new(FakeLedger::default()));
    let app = Router::new()
        .route("/v4/spreadsheets", post(create_spreadsheet))
        .route(
            "/v4/spreadsheets/:id/values/:range",
            put(write_range).post(append_range),
        )
        .with_state(ledger.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (format!("http://{addr}"), ledger)
}

fn client(base_url: &str) -> SheetsMirrorClient {
    SheetsMirrorClient::new(
        MirrorConfig::new(base_url)
            .access_token("test-token")
            .timeout(Duration::from_secs(5)),
    )
    .unwrap()
}

fn record(description: &str, status: &str) -> MirrorRecord {
    MirrorRecord {
        date: "2024-03-01T09:00:00+00:00".to_string(),
        description: description.to_string(),
        amount: "12.50".to_string(),
        status: status.to_string(),
        image: String::new(),
    }
}

#[tokio::test]
async fn create_provisions_titled_sheet_with_header() {
    let (base_url, ledger) = spawn_fake_ledger().await;
    let mirror_id = client(&base_url).create("Acme").await.unwrap();

    let ledger = ledger.lock().unwrap();
    assert_eq!(ledger.titles[&mirror_id], "Treasury Receipts - Acme");
    assert_eq!(
        ledger.sheets[&mirror_id],
        vec![vec!["Date", "Description", "Amount", "Status", "Image"]]
    );
    assert_eq!(ledger.last_auth.as_deref(), Some("Bearer test-token"));
    assert_eq!(ledger.value_input_options, vec!["USER_ENTERED"]);
}

#[tokio::test]
async fn append_returns_the_row_the_ledger_reports() {
    let (base_url, ledger) = spawn_fake_ledger().await;
    let client = client(&base_url);
    let mirror_id = client.create("Acme").await.unwrap();

    assert_eq!(client.append(&mirror_id, &record("a", "pending")).await, Ok(2));
    assert_eq!(client.append(&mirror_id, &record("b", "pending")).await, Ok(3));

    client
        .update(&mirror_id, 2, &record("a", "approved"))
        .await
        .unwrap();
    let ledger = ledger.lock().unwrap();
    assert_eq!(ledger.sheets[&mirror_id][1][3], "approved");
    assert_eq!(ledger.sheets[&mirror_id][2][1], "b");
}

#[tokio::test]
async fn sheet_title_with_spaces_is_quoted_in_ranges() {
    let (base_url, ledger) = spawn_fake_ledger().await;
    let client = SheetsMirrorClient::new(
        MirrorConfig::new(&base_url)
            .sheet_title("Q1 Receipts")
            .timeout(Duration::from_secs(5)),
    )
    .unwrap();

    let mirror_id = client.create("Acme").await.unwrap();
    assert_eq!(client.append(&mirror_id, &record("a", "pending")).await, Ok(2));
    client
        .update(&mirror_id, 2, &record("a", "approved"))
        .await
        .unwrap();

    let ledger = ledger.lock().unwrap();
    assert_eq!(
        ledger.ranges,
        vec![
            "'Q1 Receipts'!A1:E1",
            "'Q1 Receipts'!A:E:append",
            "'Q1 Receipts'!A2:E2",
        ]
    );
    assert_eq!(ledger.sheets[&mirror_id][1][3], "approved");
}

#[tokio::test]
async fn http_failures_map_to_mirror_errors() {
    let (base_url, ledger) = spawn_fake_ledger().await;
    let client = client(&base_url);
    let mirror_id = client.create("Acme").await.unwrap();

    let cases = [
        (429, MirrorError::RateLimited),
        (503, MirrorError::Unavailable { status: 503 }),
    ];
    for (status, expected) in cases {
        ledger.lock().unwrap().fail_next = Some(status);
        let err = client
            .append(&mirror_id, &record("x", "pending"))
            .await
            .unwrap_err();
        assert_eq!(err, expected);
        assert!(err.is_transient());
    }

    ledger.lock().unwrap().fail_next = Some(400);
    let err = client
        .update(&mirror_id, 2, &record("x", "approved"))
        .await
        .unwrap_err();
    assert!(matches!(err, MirrorError::Rejected { status: 400, .. }));
    assert!(!err.is_transient());
}

#[tokio::test]
async fn unreadable_append_range_is_malformed() {
    let (base_url, ledger) = spawn_fake_ledger().await;
    let client = client(&base_url);
    let mirror_id = client.create("Acme").await.unwrap();
    ledger.lock().unwrap().malformed_append = true;

    let err = client
        .append(&mirror_id, &record("x", "pending"))
        .await
        .unwrap_err();
    assert!(matches!(err, MirrorError::Malformed(_)));
}

#[tokio::test]
async fn unreachable_ledger_is_a_transport_error() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let err = client(&format!("http://{addr}"))
        .create("Acme")
        .await
        .unwrap_err();
    assert!(matches!(err, MirrorError::Transport(_)));
}

#[tokio::test]
async fn engine_mirrors_through_the_http_client() {
    let (base_url, ledger) = spawn_fake_ledger().await;
    let store = Arc::new(MemoryStore::new());
    let engine = ReconcileEngine::builder(store.clone(), store.clone(), Arc::new(client(&base_url)))
        .clock(Arc::new(ManualClock::default()))
        .build();

    let org = engine.create_organization("Acme").await.unwrap().value;
    let receipt = engine
        .create_receipt(NewReceipt::new(org.id, "Fuel", 4_000))
        .await
        .unwrap()
        .value;
    assert_eq!(receipt.sync_status, SyncStatus::Synced);
    assert_eq!(receipt.mirror_position, Some(2));

    let mirror_id = org.mirror_id().unwrap().to_string();
    let ledger = ledger.lock().unwrap();
    assert_eq!(ledger.sheets[&mirror_id][1][1], "Fuel");
    assert_eq!(ledger.sheets[&mirror_id][1][2], "40.00");
}

#[tokio::test]
async fn in_memory_and_http_mirrors_agree_on_positions() {
    let (base_url, _ledger) = spawn_fake_ledger().await;
    let http = client(&base_url);
    let memory = InMemoryMirror::new();

    let http_id = http.create("Acme").await.unwrap();
    let memory_id = memory.create("Acme").await.unwrap();
    for description in ["a", "b", "c"] {
        let rec = record(description, "pending");
        assert_eq!(
            http.append(&http_id, &rec).await.unwrap(),
            memory.append(&memory_id, &rec).await.unwrap()
        );
    }
}
