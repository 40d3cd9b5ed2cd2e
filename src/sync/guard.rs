use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use uuid::Uuid;

/// Idle entries are swept once the table grows past this size.
const SWEEP_THRESHOLD: usize = 1_024;

/// Per-organization mutual exclusion for mirror-mutating sequences.
///
/// Every append or update, together with the position write that follows
/// it, runs while holding the organization's lock. Mirror mutations for one
/// organization are therefore applied one at a time, in the order the
/// positions are recorded. Different organizations never contend.
#[derive(Debug, Default)]
pub struct OrgGuard {
    locks: Mutex<HashMap<Uuid, Arc<AsyncMutex<()>>>>,
}

/// Held for the duration of one organization's critical section.
pub type OrgLease = OwnedMutexGuard<()>;

impl OrgGuard {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn lock(&self, org_id: Uuid) -> OrgLease {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            if locks.len() > SWEEP_THRESHOLD {
                locks.retain(|_, lock| Arc::strong_count(lock) > 1);
            }
            locks.entry(org_id).or_default().clone()
        };
        lock.lock_owned().await
    }

    /// Number of organizations currently tracked.
    pub fn tracked(&self) -> usize {
        self.locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }
}
