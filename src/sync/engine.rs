use super::guard::OrgGuard;
use crate::clock::{Clock, SystemClock};
use crate::config::{SignerConfig, SyncPolicy};
use crate::core::{Result, SyncRecord};
use crate::mirror::{MirrorClient, RecordBuilder};
use crate::signer::{AttachmentUrlSigner, ExpiringUrlSigner};
use crate::store::{OutboxStore, PrimaryStore};
use std::sync::Arc;
use uuid::Uuid;

/// The external-state reconciliation engine.
///
/// Request handlers call the enqueue-side operations after their own write;
/// the drain worker and the manual trigger call [`ReconcileEngine::run_once`].
/// All durable state lives in the two stores, so an engine can be dropped
/// at any point without losing queued work.
pub struct ReconcileEngine {
    pub(super) primary: Arc<dyn PrimaryStore>,
    pub(super) outbox: Arc<dyn OutboxStore>,
    pub(super) mirror: Arc<dyn MirrorClient>,
    pub(super) records: RecordBuilder,
    pub(super) clock: Arc<dyn Clock>,
    pub(super) policy: SyncPolicy,
    pub(super) guard: OrgGuard,
    pub(super) worker_id: String,
}

impl ReconcileEngine {
    pub fn builder(
        primary: Arc<dyn PrimaryStore>,
        outbox: Arc<dyn OutboxStore>,
        mirror: Arc<dyn MirrorClient>,
    ) -> ReconcileEngineBuilder {
        ReconcileEngineBuilder {
            primary,
            outbox,
            mirror,
            clock: None,
            signer: None,
            policy: SyncPolicy::default(),
            worker_id: None,
        }
    }

    pub fn policy(&self) -> &SyncPolicy {
        &self.policy
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    pub fn primary(&self) -> &Arc<dyn PrimaryStore> {
        &self.primary
    }

    pub fn outbox(&self) -> &Arc<dyn OutboxStore> {
        &self.outbox
    }

    /// Outbox entries of one organization, most recent first, frozen ones
    /// included.
    pub async fn list_sync_records(&self, org_id: Uuid) -> Result<Vec<SyncRecord>> {
        self.outbox
            .list_for_org(org_id, self.policy.inspection_limit)
            .await
    }

    pub fn is_frozen(&self, record: &SyncRecord) -> bool {
        record.is_frozen(self.policy.max_retries)
    }
}

pub struct ReconcileEngineBuilder {
    primary: Arc<dyn PrimaryStore>,
    outbox: Arc<dyn OutboxStore>,
    mirror: Arc<dyn MirrorClient>,
    clock: Option<Arc<dyn Clock>>,
    signer: Option<Arc<dyn AttachmentUrlSigner>>,
    policy: SyncPolicy,
    worker_id: Option<String>,
}

impl ReconcileEngineBuilder {
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn signer(mut self, signer: Arc<dyn AttachmentUrlSigner>) -> Self {
        self.signer = Some(signer);
        self
    }

    pub fn policy(mut self, policy: SyncPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Lease owner recorded on claimed outbox entries.
    pub fn worker_id(mut self, worker_id: impl Into<String>) -> Self {
        self.worker_id = Some(worker_id.into());
        self
    }

    pub fn build(self) -> ReconcileEngine {
        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let signer = self.signer.unwrap_or_else(|| {
            Arc::new(ExpiringUrlSigner::new(SignerConfig::default(), clock.clone()))
        });

        ReconcileEngine {
            primary: self.primary,
            outbox: self.outbox,
            mirror: self.mirror,
            records: RecordBuilder::new(signer),
            clock,
            policy: self.policy,
            guard: OrgGuard::new(),
            worker_id: self
                .worker_id
                .unwrap_or_else(|| format!("worker-{}", Uuid::new_v4())),
        }
    }
}
