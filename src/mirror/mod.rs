//! External mirror boundary.
//!
//! The reconciliation engine only ever talks to the mirror through
//! [`MirrorClient`]. Implementations surface every failure as a
//! [`MirrorError`]; the engine decides what to do with it.

pub mod http;
pub mod memory;
pub mod record;

use crate::core::MirrorPosition;
use async_trait::async_trait;
use thiserror::Error;

pub use http::SheetsMirrorClient;
pub use memory::InMemoryMirror;
pub use record::{MirrorRecord, RecordBuilder};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MirrorError {
    #[error("mirror client is not configured")]
    NotConfigured,

    #[error("organization has no provisioned mirror")]
    NotProvisioned,

    #[error("transport failure: {0}")]
    Transport(String),

    #[error("mirror rate limit exceeded")]
    RateLimited,

    #[error("mirror unavailable (HTTP {status})")]
    Unavailable { status: u16 },

    #[error("mirror rejected request (HTTP {status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("malformed mirror response: {0}")]
    Malformed(String),
}

impl MirrorError {
    /// Network blips, throttling, and missing provisioning can clear up on
    /// their own; rejections and malformed responses usually do not.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport(_)
            | Self::RateLimited
            | Self::Unavailable { .. }
            | Self::NotProvisioned => true,
            Self::NotConfigured | Self::Rejected { .. } | Self::Malformed(_) => false,
        }
    }
}

/// Capability set of the external ledger.
#[async_trait]
pub trait MirrorClient: Send + Sync {
    /// Provisions a new mirror for a tenant and returns its identifier.
    async fn create(&self, tenant_name: &str) -> Result<String, MirrorError>;

    /// Appends one record and returns the position the mirror assigned to it.
    async fn append(
        &self,
        mirror_id: &str,
        record: &MirrorRecord,
    ) -> Result<MirrorPosition, MirrorError>;

    /// Rewrites the record stored at `position`.
    async fn update(
        &self,
        mirror_id: &str,
        position: MirrorPosition,
        record: &MirrorRecord,
    ) -> Result<(), MirrorError>;
}
