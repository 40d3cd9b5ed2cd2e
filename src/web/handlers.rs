use super::AppState;
use super::error::{Result, WebError};
use crate::core::SyncRecord;
use crate::sync::Settlement;
use axum::Json;
use axum::extract::{Path, State};
use serde::Serialize;
use uuid::Uuid;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
}

/// An outbox entry as shown to operators.
#[derive(Debug, Serialize)]
pub struct SyncRecordView {
    #[serde(flatten)]
    pub record: SyncRecord,
    /// Reached the retry ceiling; only a manual retry will touch it again.
    pub frozen: bool,
}

#[derive(Debug, Serialize)]
pub struct SyncRecordsResponse {
    pub sync_records: Vec<SyncRecordView>,
    pub max_retries: u32,
}

#[derive(Debug, Serialize)]
pub struct RunOnceResponse {
    pub processed_count: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub discarded: usize,
}

#[derive(Debug, Serialize)]
pub struct RetryResponse {
    pub sync_id: Uuid,
    #[serde(flatten)]
    pub settlement: Settlement,
}

pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}

pub async fn list_sync_records(
    State(state): State<AppState>,
    Path(org_id): Path<Uuid>,
) -> Result<Json<SyncRecordsResponse>> {
    let engine = &state.engine;
    if engine.primary().get_organization(org_id).await?.is_none() {
        return Err(WebError::NotFound(format!(
            "organization '{org_id}' not found"
        )));
    }

    let sync_records = engine
        .list_sync_records(org_id)
        .await?
        .into_iter()
        .map(|record| SyncRecordView {
            frozen: engine.is_frozen(&record),
            record,
        })
        .collect();

    Ok(Json(SyncRecordsResponse {
        sync_records,
        max_retries: engine.policy().max_retries,
    }))
}

pub async fn run_sync(State(state): State<AppState>) -> Result<Json<RunOnceResponse>> {
    let report = state.engine.run_once().await?;
    Ok(Json(RunOnceResponse {
        processed_count: report.processed,
        succeeded: report.succeeded,
        failed: report.failed,
        discarded: report.discarded,
    }))
}

pub async fn retry_sync_record(
    State(state): State<AppState>,
    Path(sync_id): Path<Uuid>,
) -> Result<Json<RetryResponse>> {
    match state.engine.drain_record(sync_id).await? {
        Some(settlement) => Ok(Json(RetryResponse {
            sync_id,
            settlement,
        })),
        None => match state.engine.outbox().get(sync_id).await? {
            Some(_) => Err(WebError::Conflict(format!(
                "sync record '{sync_id}' is being processed by another worker"
            ))),
            None => Err(WebError::NotFound(format!(
                "sync record '{sync_id}' not found"
            ))),
        },
    }
}
