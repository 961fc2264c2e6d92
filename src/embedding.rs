//! # Embedding Module
//!
//! ## Purpose
//! Query and article embedders for semantic similarity search, with a remote
//! HTTP service implementation and a deterministic local fallback.
//!
//! ## Input/Output Specification
//! - **Input**: Free text (queries, article bodies)
//! - **Output**: Fixed-dimension `Vec<f32>` vectors
//! - **Failure**: an embedder error is never fatal to retrieval; the engine
//!   degrades to lexical search and tags the bundle accordingly
//!
//! ## Key Features
//! - `Embedder` trait at the seam so the service can be swapped in tests
//! - Remote embedding service client with request timeout
//! - Deterministic feature-hashing embedder requiring no external service
//! - Small embedding cache to avoid re-encoding hot queries

use crate::config::EmbeddingConfig;
use crate::errors::{GroundingError, Result};
use crate::text::normalize_for_match;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

/// Produces fixed-dimension vectors from text.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Embed one text. Errors signal service unavailability, which retrieval
    /// treats as a degrade signal, not a failure.
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Output vector dimension.
    fn dimension(&self) -> usize;
}

/// Client for a remote embedding service speaking a minimal JSON contract.
pub struct RemoteEmbedder {
    client: reqwest::Client,
    service_url: String,
    dimension: usize,
    cache: EmbeddingCache,
}

#[derive(Serialize)]
struct EmbedRequest<'a> {
    text: &'a str,
}

#[derive(Deserialize)]
struct EmbedResponse {
    embedding: Vec<f32>,
}

impl RemoteEmbedder {
    pub fn new(config: &EmbeddingConfig, service_url: String) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_seconds))
            .build()
            .map_err(GroundingError::Http)?;
        Ok(Self {
            client,
            service_url,
            dimension: config.dimension,
            cache: EmbeddingCache::new(config.cache_size),
        })
    }
}

#[async_trait]
impl Embedder for RemoteEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        if let Some(cached) = self.cache.get(text) {
            return Ok(cached);
        }

        let response = self
            .client
            .post(&self.service_url)
            .json(&EmbedRequest { text })
            .send()
            .await
            .map_err(|e| GroundingError::EmbeddingFailed {
                details: e.to_string(),
            })?
            .error_for_status()
            .map_err(|e| GroundingError::EmbeddingFailed {
                details: e.to_string(),
            })?;

        let body: EmbedResponse =
            response
                .json()
                .await
                .map_err(|e| GroundingError::EmbeddingFailed {
                    details: e.to_string(),
                })?;

        if body.embedding.len() != self.dimension {
            return Err(GroundingError::EmbeddingFailed {
                details: format!(
                    "Service returned dimension {} (expected {})",
                    body.embedding.len(),
                    self.dimension
                ),
            });
        }

        self.cache.insert(text.to_string(), body.embedding.clone());
        Ok(body.embedding)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

/// Deterministic feature-hashing embedder.
///
/// Tokens of the normalized text are hashed into a fixed number of buckets
/// with alternating sign, then L2-normalized. Stable across processes (the
/// bucket hash is SHA-256 based), so stored article vectors and fresh query
/// vectors always agree. Not a semantic model; it captures lexical overlap in
/// vector form and serves as the default when no service is configured.
pub struct HashingEmbedder {
    dimension: usize,
}

impl HashingEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self { dimension }
    }

    fn bucket(&self, token: &str) -> (usize, f32) {
        let digest = Sha256::digest(token.as_bytes());
        let mut raw = [0u8; 8];
        raw.copy_from_slice(&digest[..8]);
        let value = u64::from_be_bytes(raw);
        let index = (value % self.dimension as u64) as usize;
        let sign = if digest[8] & 1 == 0 { 1.0 } else { -1.0 };
        (index, sign)
    }
}

#[async_trait]
impl Embedder for HashingEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut vector = vec![0.0f32; self.dimension];
        for token in normalize_for_match(text).split_whitespace() {
            if token.len() < 3 {
                continue;
            }
            let (index, sign) = self.bucket(token);
            vector[index] += sign;
        }
        let norm: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for value in &mut vector {
                *value /= norm;
            }
        }
        Ok(vector)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

/// Cache for frequently embedded texts. Insertion-order eviction.
struct EmbeddingCache {
    entries: Mutex<HashMap<String, Vec<f32>>>,
    max_size: usize,
}

impl EmbeddingCache {
    fn new(max_size: usize) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            max_size,
        }
    }

    fn get(&self, key: &str) -> Option<Vec<f32>> {
        self.entries.lock().ok()?.get(key).cloned()
    }

    fn insert(&self, key: String, value: Vec<f32>) {
        if let Ok(mut entries) = self.entries.lock() {
            if entries.len() >= self.max_size {
                if let Some(first_key) = entries.keys().next().cloned() {
                    entries.remove(&first_key);
                }
            }
            entries.insert(key, value);
        }
    }
}
