use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::url_repo::UrlRecord;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShortenPayload {
    pub long_url: String,
    #[serde(default)]
    pub custom_shortcode: Option<String>,
    /// Whole minutes, as typed into the form
    #[serde(default)]
    pub expiry_minutes: Option<String>,
}

/// A record as rendered in a listing, with its expiry status resolved at render time.
#[derive(Debug, Serialize)]
pub struct UrlView {
    #[serde(flatten)]
    pub record: UrlRecord,
    pub expired: bool,
}

impl UrlView {
    #[must_use]
    pub fn new(record: UrlRecord, now: OffsetDateTime) -> Self {
        Self {
            expired: record.is_expired(now),
            record,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Error {
    pub error: String,
    pub error_id: String,
}
