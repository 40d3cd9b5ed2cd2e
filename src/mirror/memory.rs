use super::{MirrorClient, MirrorError, MirrorRecord};
use crate::core::MirrorPosition;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use uuid::Uuid;

#[derive(Debug, Clone)]
struct MirrorSheet {
    title: String,
    rows: Vec<Vec<String>>,
}

/// Process-local mirror used in development and tests.
///
/// Positions are row numbers, header included, so the first appended
/// record lands at position 2. Failures can be injected to exercise the
/// outbox path.
#[derive(Debug, Default)]
pub struct InMemoryMirror {
    sheets: Mutex<HashMap<String, MirrorSheet>>,
    unavailable: AtomicBool,
    failures_remaining: AtomicU32,
    calls: AtomicUsize,
}

impl InMemoryMirror {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next `count` calls fail with a transport error.
    pub fn fail_next(&self, count: u32) {
        self.failures_remaining.store(count, Ordering::SeqCst);
    }

    /// Toggles a full outage; every call fails while unavailable.
    pub fn set_available(&self, available: bool) {
        self.unavailable.store(!available, Ordering::SeqCst);
    }

    /// Total number of calls received, failed ones included.
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn mirror_ids(&self) -> Vec<String> {
        let sheets = self.sheets.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let mut ids: Vec<String> = sheets.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn title(&self, mirror_id: &str) -> Option<String> {
        let sheets = self.sheets.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        sheets.get(mirror_id).map(|sheet| sheet.title.clone())
    }

    /// All rows of a mirror, header first.
    pub fn rows(&self, mirror_id: &str) -> Vec<Vec<String>> {
        let sheets = self.sheets.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        sheets
            .get(mirror_id)
            .map(|sheet| sheet.rows.clone())
            .unwrap_or_default()
    }

    pub fn row(&self, mirror_id: &str, position: MirrorPosition) -> Option<Vec<String>> {
        let index = (position as usize).checked_sub(1)?;
        self.rows(mirror_id).get(index).cloned()
    }

    fn check_available(&self) -> Result<(), MirrorError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(MirrorError::Unavailable { status: 503 });
        }
        let injected = self
            .failures_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1));
        if injected.is_ok() {
            return Err(MirrorError::Transport("injected failure".to_string()));
        }
        Ok(())
    }

    fn lock_sheets(
        &self,
    ) -> Result<std::sync::MutexGuard<'_, HashMap<String, MirrorSheet>>, MirrorError> {
        self.sheets
            .lock()
            .map_err(|err| MirrorError::Transport(format!("mirror lock poisoned: {err}")))
    }
}

#[async_trait]
impl MirrorClient for InMemoryMirror {
    async fn create(&self, tenant_name: &str) -> Result<String, MirrorError> {
        self.check_available()?;
        let mirror_id = format!("mirror-{}", Uuid::new_v4().simple());
        let sheet = MirrorSheet {
            title: tenant_name.to_string(),
            rows: vec![MirrorRecord::header()],
        };
        self.lock_sheets()?.insert(mirror_id.clone(), sheet);
        Ok(mirror_id)
    }

    async fn append(
        &self,
        mirror_id: &str,
        record: &MirrorRecord,
    ) -> Result<MirrorPosition, MirrorError> {
        self.check_available()?;
        let mut sheets = self.lock_sheets()?;
        let sheet = sheets.get_mut(mirror_id).ok_or_else(|| MirrorError::Rejected {
            status: 404,
            message: format!("mirror '{mirror_id}' not found"),
        })?;
        sheet.rows.push(record.to_row());
        Ok(sheet.rows.len() as MirrorPosition)
    }

    async fn update(
        &self,
        mirror_id: &str,
        position: MirrorPosition,
        record: &MirrorRecord,
    ) -> Result<(), MirrorError> {
        self.check_available()?;
        if position == 0 {
            return Err(MirrorError::Rejected {
                status: 400,
                message: "positions are 1-based".to_string(),
            });
        }
        let mut sheets = self.lock_sheets()?;
        let sheet = sheets.get_mut(mirror_id).ok_or_else(|| MirrorError::Rejected {
            status: 404,
            message: format!("mirror '{mirror_id}' not found"),
        })?;
        let index = position as usize - 1;
        if sheet.rows.len() <= index {
            sheet.rows.resize(index + 1, Vec::new());
        }
        sheet.rows[index] = record.to_row();
        Ok(())
    }
}
