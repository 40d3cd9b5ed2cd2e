//! Worker-side half of the engine: one drain pass over the outbox.

use super::backoff::next_failure;
use super::engine::ReconcileEngine;
use crate::core::{Result, SyncError, SyncRecord, SyncType};
use crate::store::ClaimRequest;
use futures::future::join_all;
use serde::Serialize;
use std::collections::HashMap;
use tracing::{Instrument, Level, event, info_span};
use uuid::Uuid;

/// Counters for one drain pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DrainReport {
    /// Records attempted in this pass.
    pub processed: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// Records removed because their target no longer exists.
    pub discarded: usize,
}

impl DrainReport {
    fn absorb(&mut self, other: DrainReport) {
        self.processed += other.processed;
        self.succeeded += other.succeeded;
        self.failed += other.failed;
        self.discarded += other.discarded;
    }

    fn count(&mut self, settlement: &Settlement) {
        self.processed += 1;
        match settlement {
            Settlement::Succeeded => self.succeeded += 1,
            Settlement::Discarded { .. } => self.discarded += 1,
            Settlement::Failed { .. } => self.failed += 1,
        }
    }
}

/// How a single outbox record was settled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum Settlement {
    /// Mirror mutation confirmed, record deleted.
    Succeeded,
    /// Nothing left to mirror, record deleted.
    Discarded { reason: String },
    /// Attempt failed; backoff scheduled or record frozen at the ceiling.
    Failed {
        retry_count: u32,
        frozen: bool,
        error: String,
    },
}

enum Resolution {
    Done,
    Discard(String),
}

impl ReconcileEngine {
    /// Runs one drain pass: claims due records (oldest first, up to the
    /// batch size), processes each organization's records in order, and
    /// settles every record.
    ///
    /// Periodic and manually triggered passes both come through here.
    pub async fn run_once(&self) -> Result<DrainReport> {
        let now = self.clock.now();
        let claimed = self
            .outbox
            .claim_due(ClaimRequest {
                now,
                limit: self.policy.batch_size,
                max_retries: self.policy.max_retries,
                owner: self.worker_id.clone(),
                lease_until: self.policy.lease_until(now),
            })
            .await?;

        if claimed.is_empty() {
            return Ok(DrainReport::default());
        }

        let reports = join_all(
            group_by_org(claimed)
                .into_iter()
                .map(|(org_id, records)| self.drain_org(org_id, records)),
        )
        .await;

        let mut report = DrainReport::default();
        for org_report in reports {
            report.absorb(org_report);
        }
        event!(
            Level::INFO,
            worker_id = %self.worker_id,
            processed = report.processed,
            succeeded = report.succeeded,
            failed = report.failed,
            discarded = report.discarded,
            "drain pass finished"
        );
        Ok(report)
    }

    /// Processes one record immediately, ignoring its schedule and retry
    /// ceiling. Returns `None` when the record does not exist or another
    /// worker holds it.
    pub async fn drain_record(&self, sync_id: Uuid) -> Result<Option<Settlement>> {
        let now = self.clock.now();
        let Some(record) = self
            .outbox
            .claim(
                sync_id,
                &self.worker_id,
                now,
                self.policy.lease_until(now),
            )
            .await?
        else {
            return Ok(None);
        };

        let _lease = self.guard.lock(record.org_id).await;
        Ok(Some(self.process_and_settle(&record).await))
    }

    async fn drain_org(&self, org_id: Uuid, records: Vec<SyncRecord>) -> DrainReport {
        let _lease = self.guard.lock(org_id).await;
        let mut report = DrainReport::default();
        for record in &records {
            let settlement = self.process_and_settle(record).await;
            report.count(&settlement);
        }
        report
    }

    async fn process_and_settle(&self, record: &SyncRecord) -> Settlement {
        let span = info_span!(
            "sync.drain.record",
            sync_id = %record.id,
            org_id = %record.org_id,
            sync_type = %record.sync_type,
            retry_count = record.retry_count
        );
        async {
            let outcome = self.process(record).await;
            self.settle(record, outcome).await
        }
        .instrument(span)
        .await
    }

    async fn settle(&self, record: &SyncRecord, outcome: Result<Resolution>) -> Settlement {
        match outcome {
            Ok(resolution) => {
                let settlement = match resolution {
                    Resolution::Done => Settlement::Succeeded,
                    Resolution::Discard(reason) => {
                        event!(Level::WARN, %reason, "sync record discarded");
                        Settlement::Discarded { reason }
                    }
                };
                if let Err(err) = self.outbox.delete(record.id).await {
                    // The mutation stands; the record replays once its lease lapses.
                    event!(Level::ERROR, error = %err, "could not delete settled sync record");
                }
                settlement
            }
            Err(err) => self.settle_failure(record, err).await,
        }
    }

    async fn settle_failure(&self, record: &SyncRecord, err: SyncError) -> Settlement {
        let failure = next_failure(record, &self.policy, self.clock.now(), err.to_string());
        let retry_count = failure.retry_count;
        let frozen = retry_count >= self.policy.max_retries;

        if frozen {
            event!(
                Level::WARN,
                error = %err,
                retry_count,
                "sync record exhausted retries, frozen for inspection"
            );
        } else if err.is_transient() {
            event!(
                Level::INFO,
                error = %err,
                retry_count,
                next_attempt_at = %failure.next_attempt_at,
                "sync attempt failed, backing off"
            );
        } else {
            event!(
                Level::WARN,
                error = %err,
                retry_count,
                next_attempt_at = %failure.next_attempt_at,
                "sync attempt failed with a non-transient error, backing off"
            );
        }

        if let Err(store_err) = self.outbox.record_failure(record.id, failure).await {
            event!(Level::ERROR, error = %store_err, "could not record sync failure");
        }

        Settlement::Failed {
            retry_count,
            frozen,
            error: err.to_string(),
        }
    }

    async fn process(&self, record: &SyncRecord) -> Result<Resolution> {
        let Some(org) = self.primary.get_organization(record.org_id).await? else {
            return Ok(Resolution::Discard(format!(
                "organization '{}' no longer exists",
                record.org_id
            )));
        };

        match record.sync_type {
            SyncType::CreateMirror => {
                if org.mirror.is_none() {
                    self.provision(&org).await?;
                }
                Ok(Resolution::Done)
            }
            SyncType::AppendRecord => self.replay_append(record).await,
            SyncType::UpdateRecord => self.replay_update(record).await,
        }
    }

    async fn replay_append(&self, record: &SyncRecord) -> Result<Resolution> {
        let mirror_id = self.bound_mirror(record.org_id).await?;

        let (receipt_id, snapshot) = match record.receipt_id {
            Some(receipt_id) => match self.primary.get_receipt(receipt_id).await? {
                // Already positioned: an earlier replay got this far before the
                // record could be deleted.
                Some(receipt) if receipt.mirror_position.is_some() => {
                    return Ok(Resolution::Done);
                }
                Some(receipt) => (Some(receipt.id), receipt.snapshot()),
                None => match &record.payload.snapshot {
                    Some(snapshot) => (None, snapshot.clone()),
                    None => {
                        return Ok(Resolution::Discard(format!(
                            "receipt '{receipt_id}' no longer exists"
                        )));
                    }
                },
            },
            None => match &record.payload.snapshot {
                Some(snapshot) => (None, snapshot.clone()),
                None => return Ok(Resolution::Discard("append carries no payload".to_string())),
            },
        };

        let mirror_record = self.records.build(&snapshot)?;
        let position = self.mirror.append(&mirror_id, &mirror_record).await?;
        if let Some(receipt_id) = receipt_id {
            let synced = self
                .primary
                .mark_receipt_synced(receipt_id, Some(position), self.clock.now())
                .await?;
            self.catch_up(&mirror_id, &snapshot, &synced, position).await;
        }
        event!(Level::DEBUG, position, "append replayed");
        Ok(Resolution::Done)
    }

    async fn replay_update(&self, record: &SyncRecord) -> Result<Resolution> {
        let mirror_id = self.bound_mirror(record.org_id).await?;

        let receipt = match record.receipt_id {
            Some(receipt_id) => self.primary.get_receipt(receipt_id).await?,
            None => None,
        };
        let position = receipt
            .as_ref()
            .and_then(|receipt| receipt.mirror_position)
            .or(record.payload.target_position);
        let snapshot = receipt
            .as_ref()
            .map(|receipt| receipt.snapshot())
            .or_else(|| record.payload.snapshot.clone());

        let (Some(position), Some(snapshot)) = (position, snapshot) else {
            return Ok(Resolution::Discard(
                "update has no target position or receipt state".to_string(),
            ));
        };

        let mirror_record = self.records.build(&snapshot)?;
        self.mirror
            .update(&mirror_id, position, &mirror_record)
            .await?;
        if let Some(receipt) = receipt {
            self.primary
                .mark_receipt_synced(receipt.id, None, self.clock.now())
                .await?;
        }
        event!(Level::DEBUG, position, "update replayed");
        Ok(Resolution::Done)
    }
}

/// Splits a claimed batch by organization, keeping creation order both
/// across groups and within each group.
fn group_by_org(records: Vec<SyncRecord>) -> Vec<(Uuid, Vec<SyncRecord>)> {
    let mut groups: Vec<(Uuid, Vec<SyncRecord>)> = Vec::new();
    let mut index: HashMap<Uuid, usize> = HashMap::new();
    for record in records {
        match index.get(&record.org_id) {
            Some(&slot) => groups[slot].1.push(record),
            None => {
                index.insert(record.org_id, groups.len());
                groups.push((record.org_id, vec![record]));
            }
        }
    }
    groups
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    #[test]
    fn grouping_preserves_creation_order() {
        let now = Utc::now();
        let org_a = Uuid::new_v4();
        let org_b = Uuid::new_v4();
        let records = vec![
            SyncRecord::create_mirror(org_a, now),
            SyncRecord::create_mirror(org_b, now + Duration::seconds(1)),
            SyncRecord::create_mirror(org_a, now + Duration::seconds(2)),
        ];
        let ids: Vec<Uuid> = records.iter().map(|r| r.id).collect();

        let groups = group_by_org(records);
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].0, org_a);
        assert_eq!(
            groups[0].1.iter().map(|r| r.id).collect::<Vec<_>>(),
            vec![ids[0], ids[2]]
        );
        assert_eq!(groups[1].1[0].id, ids[1]);
    }

    #[test]
    fn report_counts_each_settlement_kind() {
        let mut report = DrainReport::default();
        report.count(&Settlement::Succeeded);
        report.count(&Settlement::Discarded {
            reason: "gone".to_string(),
        });
        report.count(&Settlement::Failed {
            retry_count: 1,
            frozen: false,
            error: "boom".to_string(),
        });
        assert_eq!(
            report,
            DrainReport {
                processed: 3,
                succeeded: 1,
                failed: 1,
                discarded: 1,
            }
        );
    }
}
