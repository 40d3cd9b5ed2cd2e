//! Storage contracts consumed by the reconciliation engine.
//!
//! [`PrimaryStore`] is the transactional home of organizations and
//! receipts. [`OutboxStore`] is the durable queue of pending mirror
//! mutations. Both are async traits so a SQL-backed implementation can
//! slot in next to [`MemoryStore`].

pub mod memory;

use crate::core::{
    MirrorBinding, MirrorPosition, Organization, Receipt, ReceiptStatus, Result, SyncRecord,
    SyncStatus,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

pub use memory::MemoryStore;

#[async_trait]
pub trait PrimaryStore: Send + Sync {
    async fn insert_organization(&self, org: Organization) -> Result<Organization>;

    async fn get_organization(&self, id: Uuid) -> Result<Option<Organization>>;

    /// Binds a mirror to an organization. Rebinding to the same mirror is a
    /// no-op; binding a different one fails with `BindingConflict`.
    async fn set_mirror_binding(&self, org_id: Uuid, binding: MirrorBinding)
    -> Result<Organization>;

    async fn insert_receipt(&self, receipt: Receipt) -> Result<Receipt>;

    async fn get_receipt(&self, id: Uuid) -> Result<Option<Receipt>>;

    async fn update_receipt_status(
        &self,
        id: Uuid,
        status: ReceiptStatus,
        now: DateTime<Utc>,
    ) -> Result<Receipt>;

    async fn set_receipt_sync_status(&self, id: Uuid, sync_status: SyncStatus) -> Result<Receipt>;

    /// Marks a receipt synced, recording `position` when given. A receipt
    /// that already holds a different position fails with `PositionConflict`.
    async fn mark_receipt_synced(
        &self,
        id: Uuid,
        position: Option<MirrorPosition>,
        now: DateTime<Utc>,
    ) -> Result<Receipt>;

    async fn list_receipts(&self, org_id: Uuid) -> Result<Vec<Receipt>>;
}

/// Selection criteria for one drain pass.
#[derive(Debug, Clone)]
pub struct ClaimRequest {
    pub now: DateTime<Utc>,
    pub limit: usize,
    pub max_retries: u32,
    pub owner: String,
    pub lease_until: DateTime<Utc>,
}

/// Bookkeeping written back after a failed attempt.
#[derive(Debug, Clone)]
pub struct AttemptFailure {
    pub retry_count: u32,
    pub next_attempt_at: DateTime<Utc>,
    pub error: String,
}

#[async_trait]
pub trait OutboxStore: Send + Sync {
    async fn insert(&self, record: SyncRecord) -> Result<SyncRecord>;

    async fn get(&self, id: Uuid) -> Result<Option<SyncRecord>>;

    /// Leases and returns due records: below the retry ceiling, due at
    /// `now`, not leased by anyone else, oldest first.
    async fn claim_due(&self, claim: ClaimRequest) -> Result<Vec<SyncRecord>>;

    /// Leases one record regardless of its schedule or retry count. Returns
    /// `None` if it does not exist or another owner holds a live lease.
    async fn claim(
        &self,
        id: Uuid,
        owner: &str,
        now: DateTime<Utc>,
        lease_until: DateTime<Utc>,
    ) -> Result<Option<SyncRecord>>;

    /// Applies retry bookkeeping and releases the lease. Returns `None` if
    /// the record no longer exists.
    async fn record_failure(&self, id: Uuid, failure: AttemptFailure)
    -> Result<Option<SyncRecord>>;

    /// Drops a lease held by `owner` without touching retry bookkeeping.
    async fn release(&self, id: Uuid, owner: &str) -> Result<()>;

    /// Returns `false` when there was nothing to delete.
    async fn delete(&self, id: Uuid) -> Result<bool>;

    /// Records for one organization, most recent first.
    async fn list_for_org(&self, org_id: Uuid, limit: usize) -> Result<Vec<SyncRecord>>;

    /// Every record, oldest first.
    async fn list_all(&self) -> Result<Vec<SyncRecord>>;
}
