pub mod error;
pub mod types;

pub use error::{Result, SyncError};
pub use types::{
    MirrorBinding, MirrorPosition, NewReceipt, Organization, Receipt, ReceiptSnapshot,
    ReceiptStatus, SyncPayload, SyncRecord, SyncStatus, SyncType,
};
