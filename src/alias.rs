//! # Alias Resolution Module
//!
//! ## Purpose
//! Pure mapping from free-text law names and abbreviations, as they appear in
//! generated prose, to canonical law codes. No state, no I/O.
//!
//! ## Input/Output Specification
//! - **Input**: Raw law mentions ("la Ley de Procedimiento", "LPAC",
//!   "Ley 39/2015"), raw article numbers ("14º", "Art. 21.")
//! - **Output**: Canonical `LawCode` values and normalized article numbers
//! - **Idempotence**: resolving an already-canonical code returns it unchanged
//!
//! The alias set lives in a declarative table so new variants are added as
//! data, not control flow.

use crate::text::normalize_for_match;
use crate::LawCode;
use std::collections::HashMap;

/// Built-in alias table: normalized variant -> canonical code.
///
/// Variants are matched after `normalize_for_match` (case folding, accent
/// stripping, whitespace collapsing), so entries here are written in that
/// normalized form.
const BUILTIN_ALIASES: &[(&str, LawCode)] = &[
    // Constitución
    ("ce", LawCode::CE),
    ("constitucion", LawCode::CE),
    ("constitucion espanola", LawCode::CE),
    // Ley 39/2015
    ("lpac", LawCode::LPAC),
    ("ley 39/2015", LawCode::LPAC),
    ("ley del procedimiento administrativo comun", LawCode::LPAC),
    ("ley de procedimiento administrativo comun", LawCode::LPAC),
    ("ley de procedimiento administrativo", LawCode::LPAC),
    ("ley de procedimiento", LawCode::LPAC),
    ("procedimiento administrativo comun", LawCode::LPAC),
    // Ley 40/2015
    ("lrjsp", LawCode::LRJSP),
    ("ley 40/2015", LawCode::LRJSP),
    ("ley de regimen juridico del sector publico", LawCode::LRJSP),
    ("regimen juridico del sector publico", LawCode::LRJSP),
    // EBEP
    ("ebep", LawCode::EBEP),
    ("trebep", LawCode::EBEP),
    ("estatuto basico del empleado publico", LawCode::EBEP),
    ("real decreto legislativo 5/2015", LawCode::EBEP),
    // LCSP
    ("lcsp", LawCode::LCSP),
    ("ley 9/2017", LawCode::LCSP),
    ("ley de contratos del sector publico", LawCode::LCSP),
    ("contratos del sector publico", LawCode::LCSP),
    // LGP
    ("lgp", LawCode::LGP),
    ("ley 47/2003", LawCode::LGP),
    ("ley general presupuestaria", LawCode::LGP),
    // LOPJ
    ("lopj", LawCode::LOPJ),
    ("ley organica 6/1985", LawCode::LOPJ),
    ("ley organica del poder judicial", LawCode::LOPJ),
];

/// Leading filler words stripped before table lookup.
const LEADING_FILLERS: &[&str] = &["la ", "el ", "de la ", "del "];

/// Resolves free-text law mentions to canonical law codes.
#[derive(Debug, Clone)]
pub struct AliasResolver {
    aliases: HashMap<String, LawCode>,
}

impl AliasResolver {
    /// Build a resolver from the built-in table.
    pub fn new() -> Self {
        let aliases = BUILTIN_ALIASES
            .iter()
            .map(|(variant, code)| (variant.to_string(), *code))
            .collect();
        Self { aliases }
    }

    /// Build a resolver with extra (variant, canonical code) pairs merged over
    /// the built-in table. Unknown canonical codes in the extra set are
    /// skipped with a warning rather than rejected.
    pub fn with_extra_aliases(extra: &HashMap<String, String>) -> Self {
        let mut resolver = Self::new();
        for (variant, code) in extra {
            match code.parse::<LawCode>() {
                Ok(code) => {
                    resolver
                        .aliases
                        .insert(normalize_for_match(variant), code);
                }
                Err(_) => {
                    tracing::warn!(variant = %variant, code = %code, "Skipping alias with unknown canonical code");
                }
            }
        }
        resolver
    }

    /// Resolve a raw law mention to its canonical code.
    ///
    /// Returns `None` when the mention does not map to any tracked law; the
    /// verifier reports that as `LawNotResolved`, never as an error.
    pub fn resolve(&self, raw: &str) -> Option<LawCode> {
        let mut normalized = normalize_for_match(raw);
        normalized = normalized
            .trim_matches(|c: char| c.is_ascii_punctuation())
            .trim()
            .to_string();

        if let Some(code) = self.aliases.get(&normalized) {
            return Some(*code);
        }

        // Strip leading articles ("la Ley de...") and retry
        for filler in LEADING_FILLERS {
            if let Some(rest) = normalized.strip_prefix(filler) {
                if let Some(code) = self.aliases.get(rest) {
                    return Some(*code);
                }
            }
        }

        None
    }

    /// Number of known variants, for diagnostics.
    pub fn variant_count(&self) -> usize {
        self.aliases.len()
    }
}

impl Default for AliasResolver {
    fn default() -> Self {
        Self::new()
    }
}

/// Normalize an article number to its corpus form.
///
/// Strips an "art."/"artículo" prefix, ordinal markers and trailing
/// punctuation while preserving meaningful structure ("14 bis", "24.2").
pub fn normalize_article_number(raw: &str) -> String {
    let mut s = normalize_for_match(raw);
    for prefix in ["articulo ", "articulos ", "art. ", "art "] {
        if let Some(rest) = s.strip_prefix(prefix) {
            s = rest.to_string();
            break;
        }
    }
    s = s.replace(['º', 'ª'], "");
    // "24.2" stays; a bare trailing dot ("21.") goes
    let s = s.trim_end_matches(|c: char| c == '.' || c == ',' || c == ';');
    normalize_for_match(s)
}
