use std::{
    io::ErrorKind,
    path::{Path, PathBuf},
};

use anyhow::Context;
use thiserror::Error;
use tokio::fs;
use tracing::{debug, instrument, warn};
use uuid::Uuid;

/// A string key/value store where every key is a single JSON file in a directory.
///
/// Values are written to a temporary sibling file first and then renamed into place,
/// so readers only ever observe a complete value.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LocalStorage {
    dir: PathBuf,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum StorageKeyError {
    #[error("storage key must not be empty")]
    Empty,
    #[error("storage key contains invalid characters: {invalid_chars}")]
    InvalidCharacters { invalid_chars: String },
}

impl LocalStorage {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn entry_path(&self, key: &str) -> Result<PathBuf, StorageKeyError> {
        if key.is_empty() {
            return Err(StorageKeyError::Empty);
        }

        let invalid_chars: String = key
            .chars()
            .filter(|c| !(c.is_ascii_alphanumeric() || *c == '-' || *c == '_'))
            .collect();
        if !invalid_chars.is_empty() {
            return Err(StorageKeyError::InvalidCharacters { invalid_chars });
        }

        Ok(self.dir.join(format!("{key}.json")))
    }

    /// Returns the value stored under `key`, or [`None`] if nothing is stored.
    ///
    /// # Errors
    /// Will return [`Err`] if the key is invalid or the entry could not be read.
    #[instrument(skip(self))]
    pub async fn get_item(&self, key: &str) -> anyhow::Result<Option<String>> {
        let path = self.entry_path(key)?;
        match fs::read_to_string(&path).await {
            Ok(value) => Ok(Some(value)),
            Err(err) if err.kind() == ErrorKind::NotFound => {
                debug!(?path, "No entry stored");
                Ok(None)
            }
            Err(err) if err.kind() == ErrorKind::InvalidData => {
                warn!(?path, ?err, "Stored entry is not valid UTF-8; ignoring it");
                Ok(None)
            }
            Err(err) => Err(err).with_context(|| format!("Failed to read {}", path.display())),
        }
    }

    /// Stores `value` under `key`, replacing whatever was there.
    ///
    /// Every call writes through its own temporary file, so overlapping writers to the
    /// same key never see each other's partial output; the last rename wins.
    ///
    /// # Errors
    /// Will return [`Err`] if the key is invalid or the entry could not be written.
    #[instrument(skip(self, value), fields(len = value.len()))]
    pub async fn set_item(&self, key: &str, value: &str) -> anyhow::Result<()> {
        let path = self.entry_path(key)?;
        let tmp_path = self.dir.join(format!(".{key}.{}.tmp", Uuid::new_v4()));

        fs::create_dir_all(&self.dir)
            .await
            .with_context(|| format!("Failed to create {}", self.dir.display()))?;

        let written = match fs::write(&tmp_path, value).await {
            Ok(()) => fs::rename(&tmp_path, &path)
                .await
                .with_context(|| format!("Failed to move entry into {}", path.display())),
            Err(err) => Err(err).with_context(|| format!("Failed to write {}", tmp_path.display())),
        };

        if written.is_err() {
            if let Err(err) = fs::remove_file(&tmp_path).await {
                if err.kind() != ErrorKind::NotFound {
                    warn!(?tmp_path, ?err, "Failed to clean up temporary entry");
                }
            }
        }
        written
    }
}

/// A [`LocalStorage`] rooted in a fresh, not yet created directory under the system temp dir.
#[cfg(test)]
pub(crate) fn scratch_storage() -> LocalStorage {
    LocalStorage::new(std::env::temp_dir().join(format!("local-short-{}", Uuid::new_v4())))
}
