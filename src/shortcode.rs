use std::sync::Arc;

use rearch::CapsuleHandle;
use thiserror::Error;

/// Length of generated shortcodes; custom ones may be any non-empty length.
pub const GENERATED_SHORTCODE_LEN: usize = 6;

const GENERATED_SHORTCODE_ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";

pub fn shortcode_generator_capsule(_: CapsuleHandle) -> Arc<dyn ShortcodeGenerator> {
    Arc::new(RandomShortcodeGenerator)
}

pub trait ShortcodeGenerator: Send + Sync {
    /// Produces a candidate shortcode. Uniqueness is not guaranteed.
    fn generate(&self) -> String;
}

/// Non-cryptographic `[a-z0-9]{6}` codes from the thread-local RNG.
pub(crate) struct RandomShortcodeGenerator;

impl ShortcodeGenerator for RandomShortcodeGenerator {
    fn generate(&self) -> String {
        (0..GENERATED_SHORTCODE_LEN)
            .map(|_| {
                let idx = rand::random_range(0..GENERATED_SHORTCODE_ALPHABET.len());
                char::from(GENERATED_SHORTCODE_ALPHABET[idx])
            })
            .collect()
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid characters: {invalid_chars}")]
pub struct ShortcodeValidationError {
    pub invalid_chars: String,
}

/// Checks that `shortcode` only uses ASCII letters, digits and hyphens.
///
/// # Errors
/// Will return [`Err`] listing every offending character, in order.
pub fn validate_shortcode(shortcode: &str) -> Result<(), ShortcodeValidationError> {
    let invalid_chars: String = shortcode
        .chars()
        .filter(|c| !(c.is_ascii_alphanumeric() || *c == '-'))
        .collect();

    if invalid_chars.is_empty() {
        Ok(())
    } else {
        Err(ShortcodeValidationError { invalid_chars })
    }
}
