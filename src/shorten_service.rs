use std::sync::Arc;

use async_trait::async_trait;
use rearch::CapsuleHandle;
use thiserror::Error;
use time::{Duration, OffsetDateTime};
use tracing::{info, instrument};
use url::Url;
use uuid::Uuid;

use crate::{
    config::short_url_base_capsule,
    shortcode::{
        ShortcodeGenerator, ShortcodeValidationError, shortcode_generator_capsule,
        validate_shortcode,
    },
    url_repo::{UrlRecord, UrlRepository, timestamp_now, url_repository_capsule},
};

pub fn shorten_service_capsule(
    CapsuleHandle { mut get, .. }: CapsuleHandle,
) -> Arc<dyn ShortenService> {
    let url_repo = Arc::clone(get.as_ref(url_repository_capsule));
    let shortcode_generator = Arc::clone(get.as_ref(shortcode_generator_capsule));
    let short_url_base = get.as_ref(short_url_base_capsule).clone();
    Arc::new(ShortenServiceImpl {
        url_repo,
        shortcode_generator,
        short_url_base,
    })
}

#[async_trait]
pub trait ShortenService: Send + Sync {
    /// Validates the submission, then prepends the new record to the stored collection.
    ///
    /// Empty optional strings count as absent.
    async fn submit(
        &self,
        long_url: &str,
        custom_shortcode: Option<&str>,
        expiry_minutes: Option<&str>,
    ) -> Result<UrlRecord, SubmitError>;
}

/// Why a submission was rejected. Checks run in declaration order and the first failure wins.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Please enter a URL")]
    EmptyUrl,
    #[error("Please enter a valid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
    #[error("Custom shortcode can only contain letters, numbers, and hyphens; found {0}")]
    InvalidShortcode(#[from] ShortcodeValidationError),
    #[error("Please enter a valid expiry time in minutes")]
    InvalidExpiry,
    #[error("This shortcode is already taken. Please choose another one.")]
    ShortcodeTaken,
}

#[derive(Debug, Error)]
pub enum SubmitError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("internal/storage error: {0}")]
    Internal(anyhow::Error), // NOTE: no #[from] so we have to be explicit
}

struct ShortenServiceImpl {
    url_repo: Arc<dyn UrlRepository>,
    shortcode_generator: Arc<dyn ShortcodeGenerator>,
    short_url_base: String,
}

impl ShortenServiceImpl {
    fn short_url(&self, shortcode: &str) -> String {
        format!("{}/{shortcode}", self.short_url_base.trim_end_matches('/'))
    }
}

/// Parses a positive whole number of minutes and applies it to `created_at`.
fn expiry_after(
    created_at: OffsetDateTime,
    expiry_minutes: &str,
) -> Result<OffsetDateTime, ValidationError> {
    if !expiry_minutes.bytes().all(|b| b.is_ascii_digit()) {
        return Err(ValidationError::InvalidExpiry);
    }

    let minutes: i64 = expiry_minutes
        .parse()
        .map_err(|_| ValidationError::InvalidExpiry)?;
    if minutes <= 0 {
        return Err(ValidationError::InvalidExpiry);
    }

    minutes
        .checked_mul(60)
        .map(Duration::seconds)
        .and_then(|lifetime| created_at.checked_add(lifetime))
        .ok_or(ValidationError::InvalidExpiry)
}

#[async_trait]
impl ShortenService for ShortenServiceImpl {
    #[instrument(skip(self))]
    async fn submit(
        &self,
        long_url: &str,
        custom_shortcode: Option<&str>,
        expiry_minutes: Option<&str>,
    ) -> Result<UrlRecord, SubmitError> {
        let created_at = timestamp_now();
        let custom_shortcode = custom_shortcode.filter(|s| !s.is_empty());
        let expiry_minutes = expiry_minutes.filter(|s| !s.is_empty());

        if long_url.trim().is_empty() {
            return Err(ValidationError::EmptyUrl.into());
        }
        Url::parse(long_url).map_err(ValidationError::from)?;

        if let Some(custom_shortcode) = custom_shortcode {
            validate_shortcode(custom_shortcode).map_err(ValidationError::from)?;
        }

        let expiry_at = expiry_minutes
            .map(|minutes| expiry_after(created_at, minutes))
            .transpose()?;

        let shortcode = custom_shortcode.map_or_else(
            || self.shortcode_generator.generate(),
            ToOwned::to_owned,
        );

        let mut urls = self
            .url_repo
            .load_urls()
            .await
            .map_err(SubmitError::Internal)?;
        if urls.iter().any(|url| url.shortcode == shortcode) {
            info!(shortcode, "Shortcode is already taken");
            return Err(ValidationError::ShortcodeTaken.into());
        }

        let record = UrlRecord {
            id: Uuid::new_v4(),
            original_url: long_url.to_owned(),
            short_url: self.short_url(&shortcode),
            shortcode,
            created_at,
            expiry_at,
            clicks: 0,
            click_details: Vec::new(),
        };
        urls.insert(0, record.clone());

        self.url_repo
            .save_urls(&urls)
            .await
            .map_err(SubmitError::Internal)?;

        info!(id = %record.id, shortcode = record.shortcode, "Created short URL");
        Ok(record)
    }
}
