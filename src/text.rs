//! # Text Utilities Module
//!
//! ## Purpose
//! Shared text normalization and hashing helpers used by the corpus, the
//! verifier and the change watcher.
//!
//! ## Input/Output Specification
//! - **Input**: Raw article text, claimed quotes, free-text queries
//! - **Output**: Normalized strings, stable content hashes, bounded previews
//! - **Stability**: `content_hash` must be identical across processes and
//!   runs for identical input; it is persisted alongside article text.

use sha2::{Digest, Sha256};
use unicode_normalization::UnicodeNormalization;

/// Collapse all runs of whitespace into single spaces and trim the ends.
pub fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Normalization applied before hashing article text: NFC + whitespace
/// collapsing, so cosmetic reflows of the source never count as changes.
pub fn normalize_for_hash(text: &str) -> String {
    normalize_whitespace(&text.nfc().collect::<String>())
}

/// Stable SHA-256 hex digest of the normalized text.
pub fn content_hash(text: &str) -> String {
    let normalized = normalize_for_hash(text);
    let mut hasher = Sha256::new();
    hasher.update(normalized.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Case-folded, accent-stripped, whitespace-collapsed form used for
/// containment checks and alias lookup.
pub fn normalize_for_match(text: &str) -> String {
    let folded: String = text
        .nfd()
        .filter(|c| !unicode_normalization::char::is_combining_mark(*c))
        .collect();
    normalize_whitespace(&folded.to_lowercase())
}

/// Truncate to at most `max_chars`, respecting char boundaries. Used to bound
/// the query prefix handed to the embedder.
pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

/// Short preview of a text for log lines.
pub fn preview(text: &str, max_chars: usize) -> String {
    let trimmed = normalize_whitespace(text);
    if trimmed.chars().count() <= max_chars {
        trimmed
    } else {
        format!("{}...", truncate_chars(&trimmed, max_chars))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_whitespace_collapse() {
        assert_eq!(normalize_whitespace("  el  plazo\n de\ttres  "), "el plazo de tres");
    }

    #[test]
    fn test_hash_ignores_reflow() {
        let a = content_hash("El plazo será\nde tres meses.");
        let b = content_hash("El plazo   será de tres meses.");
        assert_eq!(a, b);
    }

    #[test]
    fn test_hash_detects_text_change() {
        assert_ne!(
            content_hash("plazo de tres meses"),
            content_hash("plazo de seis meses")
        );
    }

    #[test]
    fn test_hash_is_stable_hex_sha256() {
        let h = content_hash("abc");
        assert_eq!(h.len(), 64);
        // SHA-256("abc"), well-known vector
        assert_eq!(
            h,
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_match_normalization_strips_accents_and_case() {
        assert_eq!(normalize_for_match("Según"), "segun");
        assert_eq!(normalize_for_match("  PROCEDIMIENTO  Común "), "procedimiento comun");
    }

    #[test]
    fn test_truncate_respects_char_boundaries() {
        assert_eq!(truncate_chars("artículo", 4), "artí");
        assert_eq!(truncate_chars("ab", 10), "ab");
    }
}
