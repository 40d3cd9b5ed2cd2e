#![allow(dead_code)]

use chrono::{TimeZone, Utc};
use receipt_mirror::{
    InMemoryMirror, ManualClock, MemoryStore, NewReceipt, Organization, Receipt, ReconcileEngine,
    SyncPolicy,
};
use std::sync::Arc;
use std::time::Duration;

pub struct Harness {
    pub engine: Arc<ReconcileEngine>,
    pub store: Arc<MemoryStore>,
    pub mirror: Arc<InMemoryMirror>,
    pub clock: Arc<ManualClock>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_policy(SyncPolicy::default())
    }

    pub fn with_policy(policy: SyncPolicy) -> Self {
        Self::with_store(Arc::new(MemoryStore::new()), policy)
    }

    pub fn with_store(store: Arc<MemoryStore>, policy: SyncPolicy) -> Self {
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap(),
        ));
        let mirror = Arc::new(InMemoryMirror::new());
        let engine = Arc::new(
            ReconcileEngine::builder(store.clone(), store.clone(), mirror.clone())
                .clock(clock.clone())
                .policy(policy)
                .worker_id("test-worker")
                .build(),
        );
        Self {
            engine,
            store,
            mirror,
            clock,
        }
    }

    pub fn advance_ms(&self, ms: u64) {
        self.clock.advance(Duration::from_millis(ms));
    }

    /// An organization whose mirror was provisioned synchronously.
    pub async fn bound_org(&self, name: &str) -> Organization {
        let created = self.engine.create_organization(name).await.unwrap();
        assert!(created.value.mirror.is_some(), "mirror should be provisioned");
        created.value
    }

    pub async fn receipt(&self, org: &Organization, description: &str, cents: i64) -> Receipt {
        self.engine
            .create_receipt(NewReceipt::new(org.id, description, cents))
            .await
            .unwrap()
            .value
    }

    pub fn mirror_id(&self, org: &Organization) -> String {
        org.mirror_id().unwrap().to_string()
    }
}
