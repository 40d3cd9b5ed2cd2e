use crate::core::{ReceiptSnapshot, Result};
use crate::signer::AttachmentUrlSigner;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Column titles written as the first row of every new mirror.
pub const HEADER: [&str; 5] = ["Date", "Description", "Amount", "Status", "Image"];

/// One receipt as it appears in the mirror.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MirrorRecord {
    pub date: String,
    pub description: String,
    pub amount: String,
    pub status: String,
    pub image: String,
}

impl MirrorRecord {
    pub fn header() -> Vec<String> {
        HEADER.iter().map(|title| title.to_string()).collect()
    }

    pub fn to_row(&self) -> Vec<String> {
        vec![
            self.date.clone(),
            self.description.clone(),
            self.amount.clone(),
            self.status.clone(),
            self.image.clone(),
        ]
    }
}

/// Renders receipt snapshots into mirror records, re-signing attachment
/// URLs on every build since signed URLs expire.
#[derive(Clone)]
pub struct RecordBuilder {
    signer: Arc<dyn AttachmentUrlSigner>,
}

impl RecordBuilder {
    pub fn new(signer: Arc<dyn AttachmentUrlSigner>) -> Self {
        Self { signer }
    }

    pub fn build(&self, snapshot: &ReceiptSnapshot) -> Result<MirrorRecord> {
        let image_url = match (&snapshot.attachment_key, &snapshot.attachment_url) {
            (Some(key), _) => Some(self.signer.sign(key)?),
            (None, Some(url)) => Some(url.clone()),
            (None, None) => None,
        };

        Ok(MirrorRecord {
            date: snapshot.created_at.to_rfc3339(),
            description: snapshot.description.clone(),
            amount: format_amount(snapshot.amount_cents),
            status: snapshot.status.as_str().to_string(),
            image: image_url.map(|url| image_formula(&url)).unwrap_or_default(),
        })
    }
}

fn format_amount(cents: i64) -> String {
    let sign = if cents < 0 { "-" } else { "" };
    let abs = cents.unsigned_abs();
    format!("{sign}{}.{:02}", abs / 100, abs % 100)
}

fn image_formula(url: &str) -> String {
    format!("=IMAGE(\"{}\")", url.replace('"', "%22"))
}
