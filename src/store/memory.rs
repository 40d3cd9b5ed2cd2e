use super::{AttemptFailure, ClaimRequest, OutboxStore, PrimaryStore};
use crate::core::{
    MirrorBinding, MirrorPosition, Organization, Receipt, ReceiptStatus, Result, SyncError,
    SyncRecord, SyncStatus,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::RwLock;
use tracing::{Level, event};
use uuid::Uuid;

const SNAPSHOT_FORMAT_VERSION: u16 = 1;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct StoreState {
    #[serde(default)]
    organizations: HashMap<Uuid, Organization>,
    #[serde(default)]
    receipts: HashMap<Uuid, Receipt>,
    #[serde(default)]
    outbox: HashMap<Uuid, SyncRecord>,
    /// Insertion sequence per outbox record; breaks `created_at` ties.
    #[serde(default)]
    outbox_seq: HashMap<Uuid, u64>,
    #[serde(default)]
    next_seq: u64,
}

impl StoreState {
    fn outbox_order(&self, record: &SyncRecord) -> (DateTime<Utc>, u64) {
        (
            record.created_at,
            self.outbox_seq.get(&record.id).copied().unwrap_or(u64::MAX),
        )
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct StoreSnapshot {
    format_version: u16,
    written_at: DateTime<Utc>,
    state: StoreState,
}

/// Primary store and outbox in one process-local map.
///
/// With a snapshot path every mutation is applied to a copy, written
/// atomically to disk, and only then made visible, so a failed write leaves
/// both memory and disk at the previous state.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: RwLock<StoreState>,
    snapshot_path: Option<PathBuf>,
    fail_writes: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens a snapshot-backed store, restoring prior contents if the file
    /// exists.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let state = match tokio::fs::read(&path).await {
            Ok(bytes) => {
                let snapshot: StoreSnapshot = serde_json::from_slice(&bytes)?;
                if snapshot.format_version != SNAPSHOT_FORMAT_VERSION {
                    return Err(SyncError::store(format!(
                        "unsupported snapshot format {} in '{}'",
                        snapshot.format_version,
                        path.display()
                    )));
                }
                snapshot.state
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => StoreState::default(),
            Err(err) => return Err(err.into()),
        };

        event!(
            Level::INFO,
            path = %path.display(),
            organizations = state.organizations.len(),
            receipts = state.receipts.len(),
            outbox = state.outbox.len(),
            "store snapshot loaded"
        );

        Ok(Self {
            state: RwLock::new(state),
            snapshot_path: Some(path),
            fail_writes: AtomicBool::new(false),
        })
    }

    /// Makes every subsequent write fail, simulating an unreachable database.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    async fn mutate<T, F>(&self, apply: F) -> Result<T>
    where
        F: FnOnce(&mut StoreState) -> Result<T> + Send,
        T: Send,
    {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(SyncError::store("store is not accepting writes"));
        }

        let mut guard = self.state.write().await;
        let Some(path) = &self.snapshot_path else {
            return apply(&mut guard);
        };

        let mut next = guard.clone();
        let value = apply(&mut next)?;
        let snapshot = StoreSnapshot {
            format_version: SNAPSHOT_FORMAT_VERSION,
            written_at: Utc::now(),
            state: next,
        };
        let bytes = serde_json::to_vec_pretty(&snapshot)?;
        write_atomic(path.clone(), bytes).await?;
        *guard = snapshot.state;
        Ok(value)
    }
}

async fn write_atomic(path: PathBuf, bytes: Vec<u8>) -> Result<()> {
    tokio::task::spawn_blocking(move || -> Result<()> {
        let dir = path
            .parent()
            .filter(|parent| !parent.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        std::fs::create_dir_all(dir)?;
        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        tmp.write_all(&bytes)?;
        tmp.as_file().sync_all()?;
        tmp.persist(&path).map_err(|err| SyncError::from(err.error))?;
        Ok(())
    })
    .await
    .map_err(|err| SyncError::Io(format!("snapshot writer join: {err}")))?
}

/// Unleased, due records in claim order, capped at the batch limit.
fn due_ids(state: &StoreState, claim: &ClaimRequest) -> Vec<Uuid> {
    let mut due: Vec<(DateTime<Utc>, u64, Uuid)> = state
        .outbox
        .values()
        .filter(|record| record.is_due(claim.now, claim.max_retries) && !record.is_leased(claim.now))
        .map(|record| {
            let (created_at, seq) = state.outbox_order(record);
            (created_at, seq, record.id)
        })
        .collect();
    due.sort();
    due.truncate(claim.limit);
    due.into_iter().map(|(_, _, id)| id).collect()
}

fn receipt_mut(state: &mut StoreState, id: Uuid) -> Result<&mut Receipt> {
    state
        .receipts
        .get_mut(&id)
        .ok_or_else(|| SyncError::receipt_not_found(id))
}

#[async_trait]
impl PrimaryStore for MemoryStore {
    async fn insert_organization(&self, org: Organization) -> Result<Organization> {
        self.mutate(move |state| {
            if state.organizations.contains_key(&org.id) {
                return Err(SyncError::store(format!(
                    "organization '{}' already exists",
                    org.id
                )));
            }
            state.organizations.insert(org.id, org.clone());
            Ok(org)
        })
        .await
    }

    async fn get_organization(&self, id: Uuid) -> Result<Option<Organization>> {
        Ok(self.state.read().await.organizations.get(&id).cloned())
    }

    async fn set_mirror_binding(
        &self,
        org_id: Uuid,
        binding: MirrorBinding,
    ) -> Result<Organization> {
        self.mutate(move |state| {
            let org = state
                .organizations
                .get_mut(&org_id)
                .ok_or_else(|| SyncError::organization_not_found(org_id))?;
            match &org.mirror {
                Some(existing) if existing.mirror_id != binding.mirror_id => {
                    return Err(SyncError::BindingConflict {
                        org_id,
                        existing: existing.mirror_id.clone(),
                    });
                }
                Some(_) => {}
                None => org.mirror = Some(binding),
            }
            Ok(org.clone())
        })
        .await
    }

    async fn insert_receipt(&self, receipt: Receipt) -> Result<Receipt> {
        self.mutate(move |state| {
            if !state.organizations.contains_key(&receipt.org_id) {
                return Err(SyncError::organization_not_found(receipt.org_id));
            }
            if state.receipts.contains_key(&receipt.id) {
                return Err(SyncError::store(format!(
                    "receipt '{}' already exists",
                    receipt.id
                )));
            }
            state.receipts.insert(receipt.id, receipt.clone());
            Ok(receipt)
        })
        .await
    }

    async fn get_receipt(&self, id: Uuid) -> Result<Option<Receipt>> {
        Ok(self.state.read().await.receipts.get(&id).cloned())
    }

    async fn update_receipt_status(
        &self,
        id: Uuid,
        status: ReceiptStatus,
        now: DateTime<Utc>,
    ) -> Result<Receipt> {
        self.mutate(move |state| {
            let receipt = receipt_mut(state, id)?;
            receipt.status = status;
            receipt.updated_at = now;
            Ok(receipt.clone())
        })
        .await
    }

    async fn set_receipt_sync_status(&self, id: Uuid, sync_status: SyncStatus) -> Result<Receipt> {
        self.mutate(move |state| {
            let receipt = receipt_mut(state, id)?;
            receipt.sync_status = sync_status;
            Ok(receipt.clone())
        })
        .await
    }

    async fn mark_receipt_synced(
        &self,
        id: Uuid,
        position: Option<MirrorPosition>,
        now: DateTime<Utc>,
    ) -> Result<Receipt> {
        self.mutate(move |state| {
            let receipt = receipt_mut(state, id)?;
            if let Some(requested) = position {
                match receipt.mirror_position {
                    Some(existing) if existing != requested => {
                        return Err(SyncError::PositionConflict {
                            receipt_id: id,
                            existing,
                            requested,
                        });
                    }
                    _ => receipt.mirror_position = Some(requested),
                }
            }
            receipt.sync_status = SyncStatus::Synced;
            receipt.updated_at = now;
            Ok(receipt.clone())
        })
        .await
    }

    async fn list_receipts(&self, org_id: Uuid) -> Result<Vec<Receipt>> {
        let state = self.state.read().await;
        let mut receipts: Vec<Receipt> = state
            .receipts
            .values()
            .filter(|receipt| receipt.org_id == org_id)
            .cloned()
            .collect();
        receipts.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(receipts)
    }
}

#[async_trait]
impl OutboxStore for MemoryStore {
    async fn insert(&self, record: SyncRecord) -> Result<SyncRecord> {
        self.mutate(move |state| {
            if !state.outbox_seq.contains_key(&record.id) {
                state.outbox_seq.insert(record.id, state.next_seq);
                state.next_seq += 1;
            }
            state.outbox.insert(record.id, record.clone());
            Ok(record)
        })
        .await
    }

    async fn get(&self, id: Uuid) -> Result<Option<SyncRecord>> {
        Ok(self.state.read().await.outbox.get(&id).cloned())
    }

    async fn claim_due(&self, claim: ClaimRequest) -> Result<Vec<SyncRecord>> {
        if claim.limit == 0 {
            return Ok(Vec::new());
        }
        // Idle passes never touch the snapshot file.
        if due_ids(&*self.state.read().await, &claim).is_empty() {
            return Ok(Vec::new());
        }
        self.mutate(move |state| {
            let mut claimed = Vec::new();
            for id in due_ids(state, &claim) {
                if let Some(record) = state.outbox.get_mut(&id) {
                    record.lease_owner = Some(claim.owner.clone());
                    record.lease_expires_at = Some(claim.lease_until);
                    claimed.push(record.clone());
                }
            }
            Ok(claimed)
        })
        .await
    }

    async fn claim(
        &self,
        id: Uuid,
        owner: &str,
        now: DateTime<Utc>,
        lease_until: DateTime<Utc>,
    ) -> Result<Option<SyncRecord>> {
        let owner = owner.to_string();
        self.mutate(move |state| {
            let Some(record) = state.outbox.get_mut(&id) else {
                return Ok(None);
            };
            if record.is_leased(now) && record.lease_owner.as_deref() != Some(owner.as_str()) {
                return Ok(None);
            }
            record.lease_owner = Some(owner);
            record.lease_expires_at = Some(lease_until);
            Ok(Some(record.clone()))
        })
        .await
    }

    async fn record_failure(
        &self,
        id: Uuid,
        failure: AttemptFailure,
    ) -> Result<Option<SyncRecord>> {
        self.mutate(move |state| {
            let Some(record) = state.outbox.get_mut(&id) else {
                return Ok(None);
            };
            record.retry_count = failure.retry_count;
            record.next_attempt_at = failure.next_attempt_at;
            record.last_error = Some(failure.error);
            record.clear_lease();
            Ok(Some(record.clone()))
        })
        .await
    }

    async fn release(&self, id: Uuid, owner: &str) -> Result<()> {
        let owner = owner.to_string();
        self.mutate(move |state| {
            if let Some(record) = state.outbox.get_mut(&id) {
                if record.lease_owner.as_deref() == Some(owner.as_str()) {
                    record.clear_lease();
                }
            }
            Ok(())
        })
        .await
    }

    async fn delete(&self, id: Uuid) -> Result<bool> {
        self.mutate(move |state| {
            state.outbox_seq.remove(&id);
            Ok(state.outbox.remove(&id).is_some())
        })
        .await
    }

    async fn list_for_org(&self, org_id: Uuid, limit: usize) -> Result<Vec<SyncRecord>> {
        let state = self.state.read().await;
        let mut records: Vec<SyncRecord> = state
            .outbox
            .values()
            .filter(|record| record.org_id == org_id)
            .cloned()
            .collect();
        records.sort_by_key(|record| std::cmp::Reverse(state.outbox_order(record)));
        records.truncate(limit);
        Ok(records)
    }

    async fn list_all(&self) -> Result<Vec<SyncRecord>> {
        let state = self.state.read().await;
        let mut records: Vec<SyncRecord> = state.outbox.values().cloned().collect();
        records.sort_by_key(|record| state.outbox_order(record));
        Ok(records)
    }
}
