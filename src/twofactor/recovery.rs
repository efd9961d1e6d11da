//! Recovery code generation and normalization.
//!
//! Codes are eight uppercase hex characters, generated in batches; each code
//! is usable exactly once and only the sha256 hash is stored. Regenerating a
//! batch deletes the previous one.

use anyhow::{Context, Result};
use rand::{rngs::OsRng, RngCore};

const RECOVERY_CODE_LEN: usize = 8;

/// Generate a batch of fresh recovery codes (plaintext; the caller hashes at
/// store time and shows the plaintext to the user exactly once).
pub(crate) fn generate_batch(count: usize) -> Result<Vec<String>> {
    let mut codes = Vec::with_capacity(count);
    for _ in 0..count {
        codes.push(generate_code()?);
    }
    Ok(codes)
}

fn generate_code() -> Result<String> {
    let mut bytes = [0u8; RECOVERY_CODE_LEN / 2];
    OsRng
        .try_fill_bytes(&mut bytes)
        .context("failed to generate recovery code")?;
    Ok(bytes.iter().map(|byte| format!("{byte:02X}")).collect())
}

/// Normalize user input for lookup; `None` when it cannot be a code.
pub(crate) fn normalize_code(input: &str) -> Option<String> {
    let normalized = input.trim().to_ascii_uppercase();
    if normalized.len() != RECOVERY_CODE_LEN {
        return None;
    }
    if !normalized.chars().all(|c| c.is_ascii_hexdigit()) {
        return None;
    }
    Some(normalized)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn batch_has_requested_size() {
        let codes = generate_batch(10).unwrap();
        assert_eq!(codes.len(), 10);
        for code in &codes {
            assert_eq!(code.len(), 8);
            assert!(code.chars().all(|c| c.is_ascii_hexdigit()));
            assert_eq!(*code, code.to_ascii_uppercase());
        }
    }

    #[test]
    fn batch_codes_are_distinct() {
        let codes = generate_batch(10).unwrap();
        let mut deduped = codes.clone();
        deduped.sort();
        deduped.dedup();
        assert_eq!(deduped.len(), codes.len());
    }

    #[test]
    fn normalize_accepts_valid_codes() {
        assert_eq!(normalize_code("abcd1234"), Some("ABCD1234".to_string()));
        assert_eq!(normalize_code(" ABCD1234 "), Some("ABCD1234".to_string()));
    }

    #[test]
    fn normalize_rejects_wrong_shape() {
        assert_eq!(normalize_code("short"), None);
        assert_eq!(normalize_code("toolongcode123"), None);
        assert_eq!(normalize_code("ghijklmn"), None);
        assert_eq!(normalize_code(""), None);
    }
}
