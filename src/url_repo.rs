use std::{net::IpAddr, sync::Arc};

use anyhow::Context;
use async_trait::async_trait;
use rearch::CapsuleHandle;
use serde::{Deserialize, Serialize};
use time::{Duration, OffsetDateTime};
use tracing::{instrument, warn};
use uuid::Uuid;

use crate::{config::local_storage_capsule, local_storage::LocalStorage};

/// The local storage key the whole record collection lives under.
pub const SHORTENED_URLS_KEY: &str = "shortenedUrls";

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UrlRecord {
    pub id: Uuid,
    /// Exactly as submitted; only checked to parse as an absolute URL.
    pub original_url: String,
    pub shortcode: String,
    pub short_url: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub expiry_at: Option<OffsetDateTime>,
    pub clicks: u64,
    pub click_details: Vec<ClickEvent>,
}

impl UrlRecord {
    /// Expiry is never stored; it is derived from `expiry_at` whenever it is needed.
    #[must_use]
    pub fn is_expired(&self, now: OffsetDateTime) -> bool {
        self.expiry_at.is_some_and(|expiry_at| expiry_at < now)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClickEvent {
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
    pub referrer: String,
    pub user_agent: String,
    pub ip: IpAddr,
}

/// The current UTC time, truncated to whole milliseconds.
#[must_use]
pub fn timestamp_now() -> OffsetDateTime {
    let now = OffsetDateTime::now_utc();
    now - Duration::nanoseconds(i64::from(now.nanosecond() % 1_000_000))
}

pub fn url_repository_capsule(
    CapsuleHandle { mut get, .. }: CapsuleHandle,
) -> Arc<dyn UrlRepository> {
    let storage = get.as_ref(local_storage_capsule).clone();
    Arc::new(UrlRepositoryImpl { storage })
}

#[async_trait]
pub trait UrlRepository: Send + Sync {
    /// Loads the full record collection; nothing stored, or content that
    /// can't be read as a collection, yields an empty one.
    async fn load_urls(&self) -> anyhow::Result<Vec<UrlRecord>>;

    /// Overwrites the stored collection with `urls`.
    async fn save_urls(&self, urls: &[UrlRecord]) -> anyhow::Result<()>;
}

struct UrlRepositoryImpl {
    storage: LocalStorage,
}

#[async_trait]
impl UrlRepository for UrlRepositoryImpl {
    #[instrument(skip(self))]
    async fn load_urls(&self) -> anyhow::Result<Vec<UrlRecord>> {
        let Some(stored) = self.storage.get_item(SHORTENED_URLS_KEY).await? else {
            return Ok(Vec::new());
        };

        Ok(serde_json::from_str(&stored).unwrap_or_else(|err| {
            warn!(?err, "Stored URL collection is malformed; treating it as empty");
            Vec::new()
        }))
    }

    #[instrument(skip(self, urls), fields(count = urls.len()))]
    async fn save_urls(&self, urls: &[UrlRecord]) -> anyhow::Result<()> {
        let serialized =
            serde_json::to_string(urls).context("Failed to serialize URL collection")?;
        self.storage
            .set_item(SHORTENED_URLS_KEY, &serialized)
            .await
            .context("Failed to save URL collection")
    }
}

/// A [`UrlRepository`] that keeps the collection in memory.
#[cfg(test)]
#[derive(Default)]
pub(crate) struct InMemoryUrlRepository {
    urls: std::sync::Mutex<Vec<UrlRecord>>,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
impl InMemoryUrlRepository {
    pub(crate) fn new(urls: Vec<UrlRecord>) -> Self {
        Self {
            urls: std::sync::Mutex::new(urls),
        }
    }

    pub(crate) fn stored_urls(&self) -> Vec<UrlRecord> {
        self.urls.lock().unwrap().clone()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
#[async_trait]
impl UrlRepository for InMemoryUrlRepository {
    async fn load_urls(&self) -> anyhow::Result<Vec<UrlRecord>> {
        Ok(self.stored_urls())
    }

    async fn save_urls(&self, urls: &[UrlRecord]) -> anyhow::Result<()> {
        urls.clone_into(&mut self.urls.lock().unwrap());
        Ok(())
    }
}
