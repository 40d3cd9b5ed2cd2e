//! Time-limited retrieval URLs for stored receipt attachments.

use crate::clock::Clock;
use crate::config::SignerConfig;
use crate::core::{Result, SyncError};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::sync::Arc;
use tracing::{Level, event};

type HmacSha256 = Hmac<Sha256>;

/// Turns a stored object key into a freshly signed, expiring URL.
pub trait AttachmentUrlSigner: Send + Sync {
    fn sign(&self, key: &str) -> Result<String>;
}

/// Query-string signer: `<base>/<key>?expires=<unix>&signature=<hmac-sha256>`.
pub struct ExpiringUrlSigner {
    config: SignerConfig,
    clock: Arc<dyn Clock>,
}

impl ExpiringUrlSigner {
    pub fn new(config: SignerConfig, clock: Arc<dyn Clock>) -> Self {
        if config.secret.is_empty() {
            event!(
                Level::WARN,
                "attachment signing secret is empty, signed URLs can be forged"
            );
        }
        Self { config, clock }
    }

    fn signature(&self, key: &str, expires: i64) -> Result<String> {
        let mut mac = HmacSha256::new_from_slice(self.config.secret.as_bytes())
            .map_err(|err| SyncError::Signer(err.to_string()))?;
        mac.update(key.as_bytes());
        mac.update(b"\n");
        mac.update(expires.to_string().as_bytes());
        Ok(format!("{:x}", mac.finalize().into_bytes()))
    }
}

impl AttachmentUrlSigner for ExpiringUrlSigner {
    fn sign(&self, key: &str) -> Result<String> {
        let key = key.trim_start_matches('/');
        if key.is_empty() {
            return Err(SyncError::Signer("attachment key is empty".to_string()));
        }

        let expires = self
            .clock
            .now()
            .timestamp()
            .saturating_add(self.config.expiry_secs.min(i64::MAX as u64) as i64);
        let signature = self.signature(key, expires)?;
        Ok(format!(
            "{}/{}?expires={}&signature={}",
            self.config.base_url.trim_end_matches('/'),
            key,
            expires,
            signature
        ))
    }
}
