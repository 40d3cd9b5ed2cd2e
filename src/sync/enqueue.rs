//! Request-side half of the engine.
//!
//! Each operation first commits the primary write (failures there are
//! returned to the caller), then tries to mirror it synchronously and falls
//! back to an outbox entry. Nothing after the primary write can fail the
//! call.

use super::engine::ReconcileEngine;
use crate::core::{
    MirrorBinding, MirrorPosition, NewReceipt, Organization, Receipt, ReceiptSnapshot,
    ReceiptStatus, Result, SyncError, SyncRecord, SyncStatus,
};
use crate::mirror::MirrorError;
use serde::Serialize;
use tracing::{Instrument, Level, event, info_span};
use uuid::Uuid;

/// What happened to the mirror side of a request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum MirrorOutcome {
    /// The mirror was updated synchronously.
    Mirrored { position: Option<MirrorPosition> },
    /// The mutation was deferred to the outbox.
    Queued { sync_id: Uuid },
    /// Nothing had to be mirrored.
    NotRequired,
    /// Both the mirror and the outbox write failed; the intent is lost.
    Unrecorded { error: String },
}

/// A committed primary-store value plus the mirror outcome.
#[derive(Debug, Clone, Serialize)]
pub struct Mirrored<T> {
    pub value: T,
    pub mirror: MirrorOutcome,
}

impl ReconcileEngine {
    /// Creates an organization and provisions its mirror, deferring
    /// provisioning to the outbox when it fails or is disabled.
    pub async fn create_organization(&self, name: &str) -> Result<Mirrored<Organization>> {
        let org = self
            .primary
            .insert_organization(Organization::new(name, self.clock.now()))
            .await?;
        let mirror = self.organization_created(&org).await;
        let value = self.reload_organization(org).await;
        Ok(Mirrored { value, mirror })
    }

    /// Creates a receipt and appends it to the organization's mirror.
    pub async fn create_receipt(&self, new: NewReceipt) -> Result<Mirrored<Receipt>> {
        let receipt = self
            .primary
            .insert_receipt(Receipt::from_new(new, self.clock.now()))
            .await?;
        let mirror = self.receipt_created(&receipt).await;
        let value = self.reload_receipt(receipt).await;
        Ok(Mirrored { value, mirror })
    }

    /// Changes a receipt's status; approval decisions are pushed to the
    /// receipt's mirror row.
    pub async fn update_receipt_status(
        &self,
        receipt_id: Uuid,
        status: ReceiptStatus,
    ) -> Result<Mirrored<Receipt>> {
        let receipt = self
            .primary
            .update_receipt_status(receipt_id, status, self.clock.now())
            .await?;
        let mirror = self.receipt_status_changed(&receipt).await;
        let value = self.reload_receipt(receipt).await;
        Ok(Mirrored { value, mirror })
    }

    /// Mirror-side hook for an organization the caller already stored.
    pub async fn organization_created(&self, org: &Organization) -> MirrorOutcome {
        if org.mirror.is_some() {
            return MirrorOutcome::NotRequired;
        }

        let span = info_span!("sync.enqueue.organization", org_id = %org.id);
        async {
            if !self.policy.provision_on_create {
                event!(Level::DEBUG, "mirror provisioning deferred");
                return self.queue(SyncRecord::create_mirror(org.id, self.clock.now())).await;
            }

            let _lease = self.guard.lock(org.id).await;
            match self.provision(org).await {
                Ok(()) => MirrorOutcome::Mirrored { position: None },
                Err(err) => {
                    event!(Level::WARN, error = %err, "mirror provisioning failed, queued for retry");
                    self.queue(SyncRecord::create_mirror(org.id, self.clock.now())).await
                }
            }
        }
        .instrument(span)
        .await
    }

    /// Mirror-side hook for a receipt the caller already stored.
    pub async fn receipt_created(&self, receipt: &Receipt) -> MirrorOutcome {
        let span = info_span!(
            "sync.enqueue.append",
            org_id = %receipt.org_id,
            receipt_id = %receipt.id
        );
        async {
            let _lease = self.guard.lock(receipt.org_id).await;
            match self.append_now(receipt).await {
                Ok(position) => {
                    event!(Level::DEBUG, position, "receipt mirrored");
                    MirrorOutcome::Mirrored {
                        position: Some(position),
                    }
                }
                Err(err) => {
                    event!(Level::INFO, error = %err, "receipt append deferred to outbox");
                    self.mark_pending(receipt.id).await;
                    self.queue(SyncRecord::append_record(receipt, self.clock.now()))
                        .await
                }
            }
        }
        .instrument(span)
        .await
    }

    /// Mirror-side hook for a receipt whose status the caller already
    /// changed. Only approval decisions on already-positioned receipts touch
    /// the mirror; a receipt still waiting for its append picks up the new
    /// status when that append lands.
    ///
    /// The position is read under the organization lock, so an append that
    /// is in flight finishes first and its row is then rewritten here.
    pub async fn receipt_status_changed(&self, receipt: &Receipt) -> MirrorOutcome {
        if !receipt.status.is_decision() {
            return MirrorOutcome::NotRequired;
        }

        let span = info_span!(
            "sync.enqueue.update",
            org_id = %receipt.org_id,
            receipt_id = %receipt.id
        );
        async {
            let _lease = self.guard.lock(receipt.org_id).await;
            let current = match self.primary.get_receipt(receipt.id).await {
                Ok(Some(current)) => current,
                Ok(None) => return MirrorOutcome::NotRequired,
                Err(err) => {
                    event!(Level::WARN, error = %err, "could not reload receipt, using caller copy");
                    receipt.clone()
                }
            };
            let Some(position) = current.mirror_position else {
                return MirrorOutcome::NotRequired;
            };

            match self.update_now(&current, position).await {
                Ok(()) => MirrorOutcome::Mirrored {
                    position: Some(position),
                },
                Err(err) => {
                    event!(Level::INFO, error = %err, position, "receipt update deferred to outbox");
                    self.mark_pending(current.id).await;
                    self.queue(SyncRecord::update_record(&current, position, self.clock.now()))
                        .await
                }
            }
        }
        .instrument(span)
        .await
    }

    pub(super) async fn provision(&self, org: &Organization) -> Result<()> {
        let mirror_id = self.mirror.create(&org.name).await?;
        self.primary
            .set_mirror_binding(org.id, MirrorBinding::new(mirror_id, self.clock.now()))
            .await?;
        Ok(())
    }

    async fn append_now(&self, receipt: &Receipt) -> Result<MirrorPosition> {
        let mirror_id = self.bound_mirror(receipt.org_id).await?;
        let snapshot = receipt.snapshot();
        let record = self.records.build(&snapshot)?;
        let position = self.mirror.append(&mirror_id, &record).await?;
        let synced = self
            .primary
            .mark_receipt_synced(receipt.id, Some(position), self.clock.now())
            .await?;
        self.catch_up(&mirror_id, &snapshot, &synced, position).await;
        Ok(position)
    }

    /// Rewrites a freshly appended row when the receipt changed while the
    /// append was in flight, queueing the update if the rewrite fails.
    pub(super) async fn catch_up(
        &self,
        mirror_id: &str,
        appended: &ReceiptSnapshot,
        synced: &Receipt,
        position: MirrorPosition,
    ) {
        let current = synced.snapshot();
        if current == *appended {
            return;
        }

        event!(Level::DEBUG, position, "receipt changed during append, rewriting row");
        let rewrite = async {
            let record = self.records.build(&current)?;
            self.mirror.update(mirror_id, position, &record).await?;
            Ok::<(), SyncError>(())
        };
        if let Err(err) = rewrite.await {
            event!(Level::INFO, error = %err, position, "row rewrite deferred to outbox");
            self.mark_pending(synced.id).await;
            self.queue(SyncRecord::update_record(synced, position, self.clock.now()))
                .await;
        }
    }

    async fn update_now(&self, receipt: &Receipt, position: MirrorPosition) -> Result<()> {
        let mirror_id = self.bound_mirror(receipt.org_id).await?;
        let record = self.records.build(&receipt.snapshot())?;
        self.mirror.update(&mirror_id, position, &record).await?;
        Ok(())
    }

    pub(super) async fn bound_mirror(&self, org_id: Uuid) -> Result<String> {
        let org = self
            .primary
            .get_organization(org_id)
            .await?
            .ok_or_else(|| SyncError::organization_not_found(org_id))?;
        org.mirror
            .map(|binding| binding.mirror_id)
            .ok_or_else(|| MirrorError::NotProvisioned.into())
    }

    async fn mark_pending(&self, receipt_id: Uuid) {
        if let Err(err) = self
            .primary
            .set_receipt_sync_status(receipt_id, SyncStatus::Pending)
            .await
        {
            event!(Level::WARN, error = %err, "could not flag receipt as pending sync");
        }
    }

    async fn queue(&self, record: SyncRecord) -> MirrorOutcome {
        let sync_id = record.id;
        let sync_type = record.sync_type;
        match self.outbox.insert(record).await {
            Ok(_) => {
                event!(Level::DEBUG, %sync_id, %sync_type, "sync record queued");
                MirrorOutcome::Queued { sync_id }
            }
            Err(err) => {
                event!(
                    Level::ERROR,
                    %sync_type,
                    error = %err,
                    "outbox insert failed, mirror intent lost"
                );
                MirrorOutcome::Unrecorded {
                    error: err.to_string(),
                }
            }
        }
    }

    async fn reload_organization(&self, fallback: Organization) -> Organization {
        match self.primary.get_organization(fallback.id).await {
            Ok(Some(org)) => org,
            _ => fallback,
        }
    }

    async fn reload_receipt(&self, fallback: Receipt) -> Receipt {
        match self.primary.get_receipt(fallback.id).await {
            Ok(Some(receipt)) => receipt,
            _ => fallback,
        }
    }
}
