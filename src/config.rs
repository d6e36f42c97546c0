use std::{
    env::{self, VarError},
    path::PathBuf,
};

use anyhow::Context;
use rearch::{CapsuleHandle, Container};
use tracing::{info, instrument, warn};

use crate::local_storage::LocalStorage;

/// # Errors
/// Will return [`Err`] if the storage directory can't be created.
#[instrument]
pub async fn init_container() -> anyhow::Result<Container> {
    info!("Initializing container");
    let container = Container::new();

    let storage = container.read(local_storage_capsule);
    info!(dir = ?storage.dir(), "Preparing local storage");
    tokio::fs::create_dir_all(storage.dir())
        .await
        .with_context(|| format!("Failed to create {}", storage.dir().display()))?;

    info!("Container initialized");
    Ok(container)
}

/// Reads `name` from the environment, falling back to `default` when it is not set.
///
/// # Panics
/// Panics when the environment variable is not valid unicode.
fn env_var_or(name: &str, default: &str) -> String {
    match env::var(name) {
        Ok(value) => {
            info!(value, "{name} environment variable set");
            value
        }
        Err(VarError::NotPresent) => {
            warn!(
                value = default,
                "{name} environment variable not set; defaulting to {default}"
            );
            default.to_owned()
        }
        Err(VarError::NotUnicode(actual)) => {
            panic!("{name} environment variable is invalid: {}", actual.display());
        }
    }
}

/// # Panics
/// Panics when environment variable is invalid.
pub fn storage_dir_capsule(_: CapsuleHandle) -> PathBuf {
    env_var_or("STORAGE_DIR", ".local-short").into()
}

pub fn local_storage_capsule(CapsuleHandle { mut get, .. }: CapsuleHandle) -> LocalStorage {
    LocalStorage::new(get.as_ref(storage_dir_capsule).clone())
}

/// Base the shortcode is appended to when deriving a record's display short URL.
///
/// # Panics
/// Panics when environment variable is invalid.
pub fn short_url_base_capsule(_: CapsuleHandle) -> String {
    env_var_or("SHORT_URL_BASE", "http://localhost:3000")
}

/// # Panics
/// Panics when environment variable is invalid.
pub fn addr_capsule(_: CapsuleHandle) -> String {
    env_var_or("ADDR", "127.0.0.1:0")
}
