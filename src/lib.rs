// ============================================================================
// Receipt Mirror Library
// ============================================================================

pub mod clock;
pub mod config;
pub mod core;
pub mod mirror;
pub mod signer;
pub mod store;
pub mod sync;
pub mod web;

// Re-export main types for convenience
pub use core::{
    MirrorBinding, MirrorPosition, NewReceipt, Organization, Receipt, ReceiptSnapshot,
    ReceiptStatus, Result, SyncError, SyncRecord, SyncStatus, SyncType,
};

// Re-export engine API
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{AppConfig, MirrorBackend, MirrorConfig, SignerConfig, SyncPolicy};
pub use mirror::{InMemoryMirror, MirrorClient, MirrorError, SheetsMirrorClient};
pub use signer::{AttachmentUrlSigner, ExpiringUrlSigner};
pub use store::{MemoryStore, OutboxStore, PrimaryStore};
pub use sync::{
    DrainReport, DrainWorker, MirrorOutcome, Mirrored, ReconcileEngine, Settlement,
    spawn_drain_worker,
};

// ============================================================================
// Quick start
// ============================================================================

/// Builds an engine over one in-process store and the in-memory mirror.
///
/// Handy for local runs and tests; production wiring passes its own stores
/// and mirror client to [`ReconcileEngine::builder`].
///
/// # Examples
///
/// ```
/// use receipt_mirror::{NewReceipt, SyncPolicy, SyncStatus, in_memory_engine};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> receipt_mirror::Result<()> {
/// let engine = in_memory_engine(SyncPolicy::default());
///
/// let org = engine.create_organization("Acme").await?.value;
/// let receipt = engine
///     .create_receipt(NewReceipt::new(org.id, "Printer paper", 1_250))
///     .await?
///     .value;
///
/// assert_eq!(receipt.sync_status, SyncStatus::Synced);
/// assert_eq!(receipt.mirror_position, Some(2));
/// # Ok(())
/// # }
/// ```
pub fn in_memory_engine(policy: SyncPolicy) -> std::sync::Arc<ReconcileEngine> {
    let store = std::sync::Arc::new(MemoryStore::new());
    std::sync::Arc::new(
        ReconcileEngine::builder(store.clone(), store, std::sync::Arc::new(InMemoryMirror::new()))
            .policy(policy)
            .build(),
    )
}
