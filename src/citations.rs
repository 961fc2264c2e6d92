//! # Citation Extraction Module
//!
//! ## Purpose
//! Scans arbitrary generated prose for citation-shaped substrings: a law
//! name or abbreviation adjacent to an article-number token, optionally with
//! a quoted excerpt the generator claims is the article's content.
//!
//! ## Input/Output Specification
//! - **Input**: Free text (AI-generated prose)
//! - **Output**: Candidate `Citation`s with raw law text, article number and
//!   optional claimed quote
//! - **Precision policy**: extraction is lexical, not semantic. It must not
//!   produce false positives on ordinary prose mentioning numbers; it is
//!   allowed to miss stylistically unusual citations (false negatives lower
//!   the trust score but never crash).
//!
//! The pattern set is data: article-number shapes and law-mention shapes are
//! regex fragments assembled in the constructor, so variants are added
//! without touching control flow.

use regex::Regex;
use serde::{Deserialize, Serialize};

/// A single claimed reference extracted from generated text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Citation {
    /// Law mention exactly as written ("LPAC", "la Ley de Procedimiento")
    pub raw_law_text: String,
    /// Article number as written ("21", "14º", "14 bis")
    pub article_number: String,
    /// Optional short excerpt the generator asserts is the article's content
    pub claimed_quote: Option<String>,
    /// Byte offset of the citation in the source text
    pub position: usize,
}

/// Article-number shape: digits, optional decimal subsection, optional
/// ordinal marker, optional latin suffix ("14", "24.2", "14º", "14 bis").
const ARTICLE_NUMBER: &str = r"\d+(?:\.\d+)?º?(?:\s+(?:bis|ter|quater))?";

/// Law-mention shape: an uppercase-initial word followed by up to seven
/// continuation words (connectives or capitalized/number words). Covers
/// "LPAC", "CE", "Ley 39/2015", "Constitución Española",
/// "Ley de Procedimiento Administrativo Común".
const LAW_MENTION: &str =
    r"[A-ZÁÉÍÓÚÑ][\w/.-]*(?:\s+(?:de|del|la|el|las|los|y|[A-ZÁÉÍÓÚÑ][\w/.-]*|\d[\w/.-]*)){0,7}";

/// Connective tokens stripped from the tail of a law mention; the greedy
/// pattern may pick up a trailing "y el" before stopping.
const TRAILING_CONNECTIVES: &[&str] = &["de", "del", "la", "el", "las", "los", "y"];

/// Window after a citation match scanned for a claimed quote.
const QUOTE_WINDOW_CHARS: usize = 220;

/// Minimum quote length considered a content claim rather than emphasis.
const MIN_QUOTE_CHARS: usize = 8;

/// Quote delimiter pairs recognized when attaching claimed excerpts.
const QUOTE_DELIMITERS: &[(char, char)] = &[('«', '»'), ('“', '”'), ('"', '"')];

/// Extracts citation candidates from prose.
pub struct CitationExtractor {
    /// "art. N <LAW>" and "art. N de la <LAW>" forms
    number_then_law: Regex,
}

impl CitationExtractor {
    pub fn new() -> Self {
        // "artículo"/"art."/"arts." + number + optional connector + law mention.
        // Case-insensitivity is scoped to the keyword and connector so the law
        // mention itself must start uppercase, keeping precision on prose.
        let pattern = format!(
            r"\b(?i:art(?:ículo|iculo)?s?)\.?\s+(?P<num>{ARTICLE_NUMBER})\s*,?\s*(?i:de\s+la\s+|de\s+el\s+|del\s+|de\s+)?(?P<law>{LAW_MENTION})"
        );
        let number_then_law = Regex::new(&pattern).expect("citation pattern must compile");
        Self { number_then_law }
    }

    /// Extract all citation candidates, in order of appearance.
    pub fn extract(&self, text: &str) -> Vec<Citation> {
        let matches: Vec<regex::Captures> = self.number_then_law.captures_iter(text).collect();

        let mut citations = Vec::new();
        for (index, captures) in matches.iter().enumerate() {
            let whole = captures.get(0).expect("match has full capture");
            let num = &captures["num"];
            let law = trim_trailing_connectives(
                captures["law"].trim_end_matches(|c: char| c.is_ascii_punctuation()),
            );

            // A quote belongs to this citation only up to where the next
            // citation starts
            let window_end = matches
                .get(index + 1)
                .and_then(|next| next.get(0))
                .map(|m| m.start())
                .unwrap_or(text.len());

            citations.push(Citation {
                raw_law_text: law,
                article_number: num.trim().to_string(),
                claimed_quote: find_claimed_quote(&text[whole.end()..window_end]),
                position: whole.start(),
            });
        }
        tracing::debug!(count = citations.len(), "Extracted citation candidates");
        citations
    }
}

impl Default for CitationExtractor {
    fn default() -> Self {
        Self::new()
    }
}

fn trim_trailing_connectives(law: &str) -> String {
    let mut words: Vec<&str> = law.split_whitespace().collect();
    while let Some(last) = words.last() {
        if words.len() > 1 && TRAILING_CONNECTIVES.contains(&last.to_lowercase().as_str()) {
            words.pop();
        } else {
            break;
        }
    }
    words.join(" ")
}

/// Look for a quoted span shortly after the citation; a quote in the same
/// sentence is treated as the claimed article content. The caller slices the
/// text so the span never reaches past the next citation.
fn find_claimed_quote(after_citation: &str) -> Option<String> {
    let window: String = after_citation.chars().take(QUOTE_WINDOW_CHARS).collect();

    let mut best: Option<(usize, String)> = None;
    for (open, close) in QUOTE_DELIMITERS {
        if let Some(start) = window.find(*open) {
            let after_open = &window[start + open.len_utf8()..];
            if let Some(len) = after_open.find(*close) {
                let inner = after_open[..len].trim();
                if inner.chars().count() >= MIN_QUOTE_CHARS {
                    match &best {
                        Some((pos, _)) if *pos <= start => {}
                        _ => best = Some((start, inner.to_string())),
                    }
                }
            }
        }
    }
    best.map(|(_, quote)| quote)
}
