//! # Citation Verifier Module
//!
//! ## Purpose
//! Takes AI-generated prose, extracts claimed legal citations, resolves their
//! aliases to canonical identifiers and determines — deterministically,
//! without any further AI — whether each citation's claim matches the corpus.
//!
//! ## Input/Output Specification
//! - **Input**: Generated text
//! - **Output**: One `VerificationResult` per extracted citation plus an
//!   aggregate trust score
//! - **Determinism**: a hard requirement. Same text and corpus state always
//!   yields bit-identical results; trust scoring must be auditable.
//!
//! A citation referencing a missing law or article is the expected,
//! correctly-reported outcome of verification, not an error.

use crate::alias::{normalize_article_number, AliasResolver};
use crate::citations::{Citation, CitationExtractor};
use crate::corpus::CorpusRead;
use crate::errors::Result;
use crate::text::normalize_for_match;
use crate::LawCode;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Why a citation failed verification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FailureReason {
    /// The law mention did not resolve to any tracked law
    LawNotResolved,
    /// The law resolved but the article is not in the corpus
    ArticleNotFound,
    /// The claimed quote does not appear in the stored article text
    TextMismatch,
}

/// Outcome of checking one citation against the corpus. Immutable once
/// created; persisted alongside the generated content by the caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerificationResult {
    pub citation: Citation,
    pub verified: bool,
    /// Canonical law the mention resolved to, when resolution succeeded
    pub resolved_law: Option<LawCode>,
    /// Stored article text, when the article was located
    pub matched_article_text: Option<String>,
    pub failure_reason: Option<FailureReason>,
}

/// Aggregate of one verification pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerificationReport {
    pub results: Vec<VerificationResult>,
    /// verified / total; 1.0 when no citations were found (nothing to
    /// disprove)
    pub score: f64,
}

/// Deterministic citation verifier.
pub struct CitationVerifier {
    extractor: CitationExtractor,
    resolver: AliasResolver,
    corpus: Arc<dyn CorpusRead>,
}

impl CitationVerifier {
    pub fn new(resolver: AliasResolver, corpus: Arc<dyn CorpusRead>) -> Self {
        Self {
            extractor: CitationExtractor::new(),
            resolver,
            corpus,
        }
    }

    /// Verify every citation found in `text` against the corpus.
    pub async fn verify_all(&self, text: &str) -> Result<VerificationReport> {
        let citations = self.extractor.extract(text);
        let mut results = Vec::with_capacity(citations.len());

        for citation in citations {
            results.push(self.verify_one(citation).await?);
        }

        let verified = results.iter().filter(|r| r.verified).count();
        let score = if results.is_empty() {
            1.0
        } else {
            verified as f64 / results.len() as f64
        };

        tracing::debug!(
            citations = results.len(),
            verified,
            score,
            "Verification pass completed"
        );

        Ok(VerificationReport { results, score })
    }

    async fn verify_one(&self, citation: Citation) -> Result<VerificationResult> {
        // 1. Alias resolution. The extractor's law capture can carry trailing
        // prose words, so unresolved mentions are retried with the tail
        // progressively dropped.
        let law = match self.resolve_loose(&citation.raw_law_text) {
            Some(law) => law,
            None => {
                return Ok(VerificationResult {
                    citation,
                    verified: false,
                    resolved_law: None,
                    matched_article_text: None,
                    failure_reason: Some(FailureReason::LawNotResolved),
                });
            }
        };

        // 2. Corpus match, with the article number normalized first
        // ("14º" and "14" address the same article)
        let number = normalize_article_number(&citation.article_number);
        let article = match self.corpus.find_article(law, &number).await? {
            Some(article) => article,
            None => {
                return Ok(VerificationResult {
                    citation,
                    verified: false,
                    resolved_law: Some(law),
                    matched_article_text: None,
                    failure_reason: Some(FailureReason::ArticleNotFound),
                });
            }
        };

        // 3. Quote containment: the claimed excerpt must appear verbatim,
        // after whitespace/case/accent normalization, inside the stored text.
        // Without a claimed quote, a successful lookup alone verifies.
        let quote_ok = match &citation.claimed_quote {
            Some(quote) => {
                normalize_for_match(&article.full_text).contains(&normalize_for_match(quote))
            }
            None => true,
        };

        Ok(VerificationResult {
            citation,
            verified: quote_ok,
            resolved_law: Some(law),
            matched_article_text: Some(article.full_text),
            failure_reason: if quote_ok {
                None
            } else {
                Some(FailureReason::TextMismatch)
            },
        })
    }

    /// Resolve a raw law mention, dropping trailing words one at a time when
    /// the full capture does not resolve.
    fn resolve_loose(&self, raw: &str) -> Option<LawCode> {
        if let Some(law) = self.resolver.resolve(raw) {
            return Some(law);
        }
        let mut words: Vec<&str> = raw.split_whitespace().collect();
        while words.len() > 1 {
            words.pop();
            if let Some(law) = self.resolver.resolve(&words.join(" ")) {
                return Some(law);
            }
        }
        None
    }
}
