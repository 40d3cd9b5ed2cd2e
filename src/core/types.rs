use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Ordinal row a receipt occupies inside its organization's mirror.
///
/// Positions are 1-based; position 1 holds the header row of a freshly
/// provisioned mirror, so receipts start at 2.
pub type MirrorPosition = u32;

/// Identifier connecting an organization to its provisioned mirror.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MirrorBinding {
    pub mirror_id: String,
    pub bound_at: DateTime<Utc>,
}

impl MirrorBinding {
    pub fn new(mirror_id: impl Into<String>, bound_at: DateTime<Utc>) -> Self {
        Self {
            mirror_id: mirror_id.into(),
            bound_at,
        }
    }
}

/// Tenant root.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Organization {
    pub id: Uuid,
    pub name: String,
    pub mirror: Option<MirrorBinding>,
    pub created_at: DateTime<Utc>,
}

impl Organization {
    pub fn new(name: impl Into<String>, created_at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            mirror: None,
            created_at,
        }
    }

    pub fn mirror_id(&self) -> Option<&str> {
        self.mirror.as_ref().map(|binding| binding.mirror_id.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum ReceiptStatus {
    #[default]
    Pending,
    Approved,
    Rejected,
}

impl ReceiptStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
        }
    }

    /// Approval decisions are the transitions mirrored as row updates.
    pub fn is_decision(&self) -> bool {
        matches!(self, Self::Approved | Self::Rejected)
    }
}

impl fmt::Display for ReceiptStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
    #[default]
    Unsynced,
    Pending,
    Synced,
}

/// Financial record owned by an organization.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Receipt {
    pub id: Uuid,
    pub org_id: Uuid,
    pub description: String,
    /// Amount in minor currency units.
    pub amount_cents: i64,
    pub status: ReceiptStatus,
    pub sync_status: SyncStatus,
    pub mirror_position: Option<MirrorPosition>,
    /// Object-storage key of the uploaded photo, re-signed on every mirror write.
    pub attachment_key: Option<String>,
    /// Pre-signed URL captured at upload time, used when no key is stored.
    pub attachment_url: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Receipt {
    pub fn from_new(new: NewReceipt, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            org_id: new.org_id,
            description: new.description,
            amount_cents: new.amount_cents,
            status: ReceiptStatus::Pending,
            sync_status: SyncStatus::Unsynced,
            mirror_position: None,
            attachment_key: new.attachment_key,
            attachment_url: new.attachment_url,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn snapshot(&self) -> ReceiptSnapshot {
        ReceiptSnapshot::from(self)
    }
}

/// Input for a new receipt; everything the caller validated before the write.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NewReceipt {
    pub org_id: Uuid,
    pub description: String,
    pub amount_cents: i64,
    pub attachment_key: Option<String>,
    pub attachment_url: Option<String>,
}

impl NewReceipt {
    pub fn new(org_id: Uuid, description: impl Into<String>, amount_cents: i64) -> Self {
        Self {
            org_id,
            description: description.into(),
            amount_cents,
            attachment_key: None,
            attachment_url: None,
        }
    }

    pub fn attachment_key(mut self, key: impl Into<String>) -> Self {
        self.attachment_key = Some(key.into());
        self
    }

    pub fn attachment_url(mut self, url: impl Into<String>) -> Self {
        self.attachment_url = Some(url.into());
        self
    }
}

/// The externally relevant fields of a receipt, frozen at enqueue time.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReceiptSnapshot {
    pub description: String,
    pub amount_cents: i64,
    pub status: ReceiptStatus,
    pub created_at: DateTime<Utc>,
    pub attachment_key: Option<String>,
    pub attachment_url: Option<String>,
}

impl From<&Receipt> for ReceiptSnapshot {
    fn from(receipt: &Receipt) -> Self {
        Self {
            description: receipt.description.clone(),
            amount_cents: receipt.amount_cents,
            status: receipt.status,
            created_at: receipt.created_at,
            attachment_key: receipt.attachment_key.clone(),
            attachment_url: receipt.attachment_url.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum SyncType {
    CreateMirror,
    AppendRecord,
    UpdateRecord,
}

impl SyncType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CreateMirror => "create_mirror",
            Self::AppendRecord => "append_record",
            Self::UpdateRecord => "update_record",
        }
    }
}

impl fmt::Display for SyncType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct SyncPayload {
    /// Receipt fields to mirror when the receipt row can no longer be read.
    pub snapshot: Option<ReceiptSnapshot>,
    /// Row an `update_record` must rewrite.
    pub target_position: Option<MirrorPosition>,
}

/// Outbox entry: one pending mirror mutation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SyncRecord {
    pub id: Uuid,
    pub org_id: Uuid,
    pub sync_type: SyncType,
    pub receipt_id: Option<Uuid>,
    #[serde(default)]
    pub payload: SyncPayload,
    pub retry_count: u32,
    pub next_attempt_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub last_error: Option<String>,
    #[serde(default)]
    pub lease_owner: Option<String>,
    #[serde(default)]
    pub lease_expires_at: Option<DateTime<Utc>>,
}

impl SyncRecord {
    fn new(org_id: Uuid, sync_type: SyncType, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            org_id,
            sync_type,
            receipt_id: None,
            payload: SyncPayload::default(),
            retry_count: 0,
            next_attempt_at: now,
            created_at: now,
            last_error: None,
            lease_owner: None,
            lease_expires_at: None,
        }
    }

    pub fn create_mirror(org_id: Uuid, now: DateTime<Utc>) -> Self {
        Self::new(org_id, SyncType::CreateMirror, now)
    }

    pub fn append_record(receipt: &Receipt, now: DateTime<Utc>) -> Self {
        let mut record = Self::new(receipt.org_id, SyncType::AppendRecord, now);
        record.receipt_id = Some(receipt.id);
        record.payload.snapshot = Some(receipt.snapshot());
        record
    }

    /// Synthetic append with no backing receipt row.
    pub fn append_snapshot(org_id: Uuid, snapshot: ReceiptSnapshot, now: DateTime<Utc>) -> Self {
        let mut record = Self::new(org_id, SyncType::AppendRecord, now);
        record.payload.snapshot = Some(snapshot);
        record
    }

    pub fn update_record(
        receipt: &Receipt,
        position: MirrorPosition,
        now: DateTime<Utc>,
    ) -> Self {
        let mut record = Self::new(receipt.org_id, SyncType::UpdateRecord, now);
        record.receipt_id = Some(receipt.id);
        record.payload.snapshot = Some(receipt.snapshot());
        record.payload.target_position = Some(position);
        record
    }

    /// Frozen records stay in storage for inspection but are never scheduled.
    pub fn is_frozen(&self, max_retries: u32) -> bool {
        self.retry_count >= max_retries
    }

    pub fn is_due(&self, now: DateTime<Utc>, max_retries: u32) -> bool {
        !self.is_frozen(max_retries) && self.next_attempt_at <= now
    }

    pub fn is_leased(&self, now: DateTime<Utc>) -> bool {
        match (&self.lease_owner, self.lease_expires_at) {
            (Some(_), Some(expires_at)) => expires_at > now,
            _ => false,
        }
    }

    pub fn clear_lease(&mut self) {
        self.lease_owner = None;
        self.lease_expires_at = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn receipt(now: DateTime<Utc>) -> Receipt {
        Receipt::from_new(NewReceipt::new(Uuid::new_v4(), "Taxi", 2_350), now)
    }

    #[test]
    fn new_receipt_starts_unsynced_without_position() {
        let receipt = receipt(Utc::now());
        assert_eq!(receipt.status, ReceiptStatus::Pending);
        assert_eq!(receipt.sync_status, SyncStatus::Unsynced);
        assert!(receipt.mirror_position.is_none());
    }

    #[test]
    fn append_record_is_due_immediately() {
        let now = Utc::now();
        let receipt = receipt(now);
        let record = SyncRecord::append_record(&receipt, now);

        assert_eq!(record.sync_type, SyncType::AppendRecord);
        assert_eq!(record.receipt_id, Some(receipt.id));
        assert_eq!(record.retry_count, 0);
        assert_eq!(record.next_attempt_at, now);
        assert!(record.is_due(now, 10));
        assert!(!record.is_due(now - Duration::milliseconds(1), 10));
    }

    #[test]
    fn records_at_the_ceiling_are_frozen() {
        let now = Utc::now();
        let mut record = SyncRecord::create_mirror(Uuid::new_v4(), now);
        record.retry_count = 10;
        assert!(record.is_frozen(10));
        assert!(!record.is_due(now + Duration::days(365), 10));
    }

    #[test]
    fn expired_lease_no_longer_blocks() {
        let now = Utc::now();
        let mut record = SyncRecord::create_mirror(Uuid::new_v4(), now);
        record.lease_owner = Some("worker-a".to_string());
        record.lease_expires_at = Some(now + Duration::seconds(30));
        assert!(record.is_leased(now));
        assert!(!record.is_leased(now + Duration::seconds(30)));
    }

    #[test]
    fn sync_type_serializes_snake_case() {
        let encoded = serde_json::to_string(&SyncType::UpdateRecord).unwrap();
        assert_eq!(encoded, "\"update_record\"");
    }
}
