use thiserror::Error;
use uuid::Uuid;

use crate::mirror::MirrorError;

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Store error: {0}")]
    Store(String),

    #[error("{entity} '{id}' not found")]
    NotFound { entity: &'static str, id: Uuid },

    #[error("Organization '{org_id}' is already bound to mirror '{existing}'")]
    BindingConflict { org_id: Uuid, existing: String },

    #[error(
        "Receipt '{receipt_id}' already occupies mirror position {existing}, refusing to move it to {requested}"
    )]
    PositionConflict {
        receipt_id: Uuid,
        existing: u32,
        requested: u32,
    },

    #[error("Mirror error: {0}")]
    Mirror(#[from] MirrorError),

    #[error("Signer error: {0}")]
    Signer(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl SyncError {
    pub fn store(message: impl Into<String>) -> Self {
        Self::Store(message.into())
    }

    pub fn organization_not_found(id: Uuid) -> Self {
        Self::NotFound {
            entity: "Organization",
            id,
        }
    }

    pub fn receipt_not_found(id: Uuid) -> Self {
        Self::NotFound {
            entity: "Receipt",
            id,
        }
    }

    /// Whether a retry has any chance of succeeding.
    ///
    /// Used for log levels and operator diagnostics only; the drain worker
    /// retries every failure the same way.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Mirror(err) => err.is_transient(),
            Self::Store(_) | Self::Io(_) => true,
            Self::Signer(_) => true,
            Self::NotFound { .. }
            | Self::BindingConflict { .. }
            | Self::PositionConflict { .. }
            | Self::Config(_)
            | Self::Serialization(_) => false,
        }
    }
}

impl From<std::io::Error> for SyncError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;
