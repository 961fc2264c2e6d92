//! # Source Fetcher Module
//!
//! ## Purpose
//! HTTP retrieval of raw law content from the configured per-law source URLs,
//! with request timeout and bounded exponential-backoff retry.
//!
//! ## Input/Output Specification
//! - **Input**: A tracked law code with a configured source URL
//! - **Output**: Raw response body as text
//! - **Retry policy**: server errors (5xx) and connect/timeout failures are
//!   retried with exponential backoff; client errors (4xx) fail immediately

use crate::config::WatcherConfig;
use crate::errors::{GroundingError, Result};
use crate::watcher::SourceFetcher;
use crate::LawCode;
use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;

/// Base delay for the exponential backoff, doubled per attempt.
const BACKOFF_BASE_MS: u64 = 200;

/// Fetches law sources over HTTP.
pub struct HttpSourceFetcher {
    client: reqwest::Client,
    source_urls: HashMap<LawCode, String>,
    max_retries: u32,
}

impl HttpSourceFetcher {
    pub fn new(config: &WatcherConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.fetch_timeout_seconds))
            .build()
            .map_err(GroundingError::Http)?;

        // Unknown codes are rejected by config validation before this point
        let mut source_urls = HashMap::new();
        for (code, url) in &config.source_urls {
            source_urls.insert(code.parse::<LawCode>()?, url.clone());
        }

        Ok(Self {
            client,
            source_urls,
            max_retries: config.max_retries,
        })
    }

    async fn fetch_once(&self, url: &str) -> std::result::Result<String, FetchAttemptError> {
        let response = self.client.get(url).send().await.map_err(|e| {
            if e.is_connect() || e.is_timeout() {
                FetchAttemptError::Retryable(e.to_string())
            } else {
                FetchAttemptError::Fatal(e.to_string())
            }
        })?;

        let status = response.status();
        if status.is_server_error() {
            return Err(FetchAttemptError::Retryable(format!(
                "Server error: {}",
                status
            )));
        }
        if !status.is_success() {
            return Err(FetchAttemptError::Fatal(format!("HTTP status {}", status)));
        }

        response
            .text()
            .await
            .map_err(|e| FetchAttemptError::Retryable(e.to_string()))
    }
}

enum FetchAttemptError {
    /// Worth retrying: 5xx, connect failure, timeout
    Retryable(String),
    /// Not worth retrying: 4xx, malformed request
    Fatal(String),
}

#[async_trait]
impl SourceFetcher for HttpSourceFetcher {
    async fn fetch_raw_content(&self, law: LawCode) -> Result<String> {
        let url = self
            .source_urls
            .get(&law)
            .ok_or_else(|| GroundingError::FetchFailed {
                law: law.to_string(),
                details: "No source URL configured".to_string(),
            })?;

        let mut last_error = String::new();
        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = Duration::from_millis(BACKOFF_BASE_MS * 2u64.pow(attempt - 1));
                tracing::debug!(law = %law, attempt, delay_ms = delay.as_millis() as u64, "Retrying fetch");
                tokio::time::sleep(delay).await;
            }

            match self.fetch_once(url).await {
                Ok(body) => {
                    tracing::debug!(law = %law, bytes = body.len(), "Fetched source");
                    return Ok(body);
                }
                Err(FetchAttemptError::Fatal(details)) => {
                    return Err(GroundingError::FetchFailed {
                        law: law.to_string(),
                        details,
                    });
                }
                Err(FetchAttemptError::Retryable(details)) => {
                    tracing::warn!(law = %law, attempt, error = %details, "Fetch attempt failed");
                    last_error = details;
                }
            }
        }

        Err(GroundingError::RetriesExhausted {
            attempts: self.max_retries + 1,
            message: format!("{}: {}", law, last_error),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config_for(server: &MockServer, max_retries: u32) -> WatcherConfig {
        let mut source_urls = HashMap::new();
        source_urls.insert("LPAC".to_string(), format!("{}/lpac.json", server.uri()));
        WatcherConfig {
            source_urls,
            fetch_timeout_seconds: 5,
            max_retries,
            worker_count: 2,
            activity_path: None,
        }
    }

    #[tokio::test]
    async fn test_fetch_success() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/lpac.json"))
            .respond_with(ResponseTemplate::new(200).set_body_string("{\"21\": \"texto\"}"))
            .mount(&server)
            .await;

        let fetcher = HttpSourceFetcher::new(&config_for(&server, 1)).unwrap();
        let body = fetcher.fetch_raw_content(LawCode::LPAC).await.unwrap();
        assert_eq!(body, "{\"21\": \"texto\"}");
    }

    #[tokio::test]
    async fn test_server_error_is_retried_until_success() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/lpac.json"))
            .respond_with(ResponseTemplate::new(500))
            .up_to_n_times(2)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/lpac.json"))
            .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
            .mount(&server)
            .await;

        let fetcher = HttpSourceFetcher::new(&config_for(&server, 3)).unwrap();
        let body = fetcher.fetch_raw_content(LawCode::LPAC).await.unwrap();
        assert_eq!(body, "ok");
    }

    #[tokio::test]
    async fn test_retries_exhausted() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let fetcher = HttpSourceFetcher::new(&config_for(&server, 1)).unwrap();
        assert!(matches!(
            fetcher.fetch_raw_content(LawCode::LPAC).await,
            Err(GroundingError::RetriesExhausted { attempts: 2, .. })
        ));
    }

    #[tokio::test]
    async fn test_client_error_fails_without_retry() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .expect(1)
            .mount(&server)
            .await;

        let fetcher = HttpSourceFetcher::new(&config_for(&server, 3)).unwrap();
        assert!(matches!(
            fetcher.fetch_raw_content(LawCode::LPAC).await,
            Err(GroundingError::FetchFailed { .. })
        ));
    }

    #[tokio::test]
    async fn test_unconfigured_law_is_an_error() {
        let server = MockServer::start().await;
        let fetcher = HttpSourceFetcher::new(&config_for(&server, 1)).unwrap();
        assert!(matches!(
            fetcher.fetch_raw_content(LawCode::CE).await,
            Err(GroundingError::FetchFailed { .. })
        ));
    }
}
