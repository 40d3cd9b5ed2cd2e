use crate::core::{Result, SyncError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Longest lease ever granted: one year.
const MAX_LEASE_MS: u64 = 365 * 24 * 60 * 60 * 1_000;

/// Retry, batching and scheduling knobs for the reconciliation engine.
///
/// Built once at process start and handed to the engine; nothing reads
/// these values from globals afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncPolicy {
    /// Retry ceiling. Records reaching it are frozen, never deleted.
    pub max_retries: u32,
    /// Backoff base; the n-th consecutive failure waits `base * 2^(n-1)`.
    pub base_delay_ms: u64,
    /// Maximum records claimed per drain pass.
    pub batch_size: usize,
    /// Interval between periodic drain passes.
    pub poll_interval_ms: u64,
    /// How long a claimed record stays invisible to other workers.
    pub lease_ms: u64,
    /// Maximum records returned by the inspection listing.
    pub inspection_limit: usize,
    /// Attempt mirror provisioning while creating an organization.
    pub provision_on_create: bool,
}

impl Default for SyncPolicy {
    fn default() -> Self {
        Self {
            max_retries: 10,
            base_delay_ms: 5_000,
            batch_size: 20,
            poll_interval_ms: 30_000,
            lease_ms: 5 * 60_000,
            inspection_limit: 100,
            provision_on_create: true,
        }
    }
}

impl SyncPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the retry ceiling
    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Set the backoff base delay
    pub fn base_delay(mut self, delay: Duration) -> Self {
        self.base_delay_ms = delay.as_millis() as u64;
        self
    }

    /// Set the per-pass batch size
    pub fn batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Set the periodic drain interval
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval_ms = interval.as_millis() as u64;
        self
    }

    /// Set the claim lease duration
    pub fn lease(mut self, lease: Duration) -> Self {
        self.lease_ms = lease.as_millis() as u64;
        self
    }

    pub fn inspection_limit(mut self, limit: usize) -> Self {
        self.inspection_limit = limit;
        self
    }

    pub fn provision_on_create(mut self, enabled: bool) -> Self {
        self.provision_on_create = enabled;
        self
    }

    pub fn poll_interval_duration(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(10))
    }

    pub fn lease_duration(&self) -> chrono::Duration {
        chrono::Duration::milliseconds(self.lease_ms.clamp(1, MAX_LEASE_MS) as i64)
    }

    /// End of a lease taken at `now`, saturating at the latest representable instant.
    pub fn lease_until(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now.checked_add_signed(self.lease_duration())
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    /// Reads the policy from `RECEIPT_MIRROR_*` environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Reads the policy through an arbitrary variable lookup, falling back to
    /// defaults for anything unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        Ok(Self {
            max_retries: parse_var(&lookup, "RECEIPT_MIRROR_MAX_RETRIES", defaults.max_retries)?,
            base_delay_ms: parse_var(
                &lookup,
                "RECEIPT_MIRROR_BASE_DELAY_MS",
                defaults.base_delay_ms,
            )?,
            batch_size: parse_var(&lookup, "RECEIPT_MIRROR_BATCH_SIZE", defaults.batch_size)?,
            poll_interval_ms: parse_var(
                &lookup,
                "RECEIPT_MIRROR_POLL_INTERVAL_MS",
                defaults.poll_interval_ms,
            )?,
            lease_ms: parse_var(&lookup, "RECEIPT_MIRROR_LEASE_MS", defaults.lease_ms)?,
            inspection_limit: parse_var(
                &lookup,
                "RECEIPT_MIRROR_INSPECTION_LIMIT",
                defaults.inspection_limit,
            )?,
            provision_on_create: parse_var(
                &lookup,
                "RECEIPT_MIRROR_PROVISION_ON_CREATE",
                defaults.provision_on_create,
            )?,
        })
    }
}

/// Connection settings for the spreadsheet-values REST API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MirrorConfig {
    pub base_url: String,
    /// Bearer token; issuing and refreshing it happens outside this crate.
    pub access_token: Option<String>,
    /// Name of the sheet receipts are written to.
    pub sheet_title: String,
    /// Prefix of the spreadsheet title, followed by the organization name.
    pub title_prefix: String,
    pub timeout_ms: u64,
}

impl Default for MirrorConfig {
    fn default() -> Self {
        Self {
            base_url: "https://sheets.googleapis.com".to_string(),
            access_token: None,
            sheet_title: "Receipts".to_string(),
            title_prefix: "Treasury Receipts - ".to_string(),
            timeout_ms: 10_000,
        }
    }
}

impl MirrorConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Self::default()
        }
    }

    pub fn access_token(mut self, token: impl Into<String>) -> Self {
        self.access_token = Some(token.into());
        self
    }

    pub fn sheet_title(mut self, title: impl Into<String>) -> Self {
        self.sheet_title = title.into();
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        Ok(Self {
            base_url: lookup("MIRROR_BASE_URL").unwrap_or(defaults.base_url),
            access_token: lookup("MIRROR_ACCESS_TOKEN").filter(|token| !token.is_empty()),
            sheet_title: lookup("MIRROR_SHEET_TITLE").unwrap_or(defaults.sheet_title),
            title_prefix: lookup("MIRROR_TITLE_PREFIX").unwrap_or(defaults.title_prefix),
            timeout_ms: parse_var(&lookup, "MIRROR_TIMEOUT_MS", defaults.timeout_ms)?,
        })
    }
}

/// Settings for the attachment URL signer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignerConfig {
    pub base_url: String,
    pub expiry_secs: u64,
    pub secret: String,
}

impl Default for SignerConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:9000/receipts".to_string(),
            expiry_secs: 60 * 60 * 24 * 7,
            secret: String::new(),
        }
    }
}

impl SignerConfig {
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        Ok(Self {
            base_url: lookup("ATTACHMENT_BASE_URL").unwrap_or(defaults.base_url),
            expiry_secs: parse_var(&lookup, "ATTACHMENT_EXPIRY_SECS", defaults.expiry_secs)?,
            secret: lookup("ATTACHMENT_SIGNING_SECRET").unwrap_or(defaults.secret),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MirrorBackend {
    Memory,
    Http,
}

impl MirrorBackend {
    fn parse(raw: &str) -> Result<Self> {
        match raw.to_ascii_lowercase().as_str() {
            "memory" | "mem" => Ok(Self::Memory),
            "http" | "sheets" => Ok(Self::Http),
            _ => Err(SyncError::Config(
                "MIRROR_BACKEND must be one of: memory, http".to_string(),
            )),
        }
    }
}

/// Process-level configuration for the `receipt-mirror` binary.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub mirror_backend: MirrorBackend,
    pub store_path: Option<PathBuf>,
    pub worker_id: String,
    pub policy: SyncPolicy,
    pub mirror: MirrorConfig,
    pub signer: SignerConfig,
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mirror_backend =
            MirrorBackend::parse(&lookup("MIRROR_BACKEND").unwrap_or_else(|| "memory".to_string()))?;

        let signer = SignerConfig::from_lookup(&lookup)?;
        if mirror_backend == MirrorBackend::Http && signer.secret.is_empty() {
            return Err(SyncError::Config(
                "ATTACHMENT_SIGNING_SECRET must be set for the http mirror backend".to_string(),
            ));
        }

        Ok(Self {
            host: lookup("APP_HOST").unwrap_or_else(|| "0.0.0.0".to_string()),
            port: parse_var(&lookup, "APP_PORT", 8080)?,
            mirror_backend,
            store_path: lookup("STORE_PATH")
                .filter(|path| !path.is_empty())
                .map(PathBuf::from),
            worker_id: lookup("WORKER_ID")
                .unwrap_or_else(|| format!("worker-{}", uuid::Uuid::new_v4())),
            policy: SyncPolicy::from_lookup(&lookup)?,
            mirror: MirrorConfig::from_lookup(&lookup)?,
            signer,
        })
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn parse_var<F, T>(lookup: &F, key: &str, default: T) -> Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        Some(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse::<T>()
            .map_err(|err| SyncError::Config(format!("{key} is invalid: {err}"))),
        _ => Ok(default),
    }
}
