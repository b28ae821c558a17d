//! Derivation backends and the timeout guard around them

use std::time::Duration;

use anyhow::Result as AnyResult;
use async_trait::async_trait;
use codesync_domain::preprocessing::{embedding_input, hash_embedding};
use codesync_domain::{Derivation, Deriver};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::errors::{Result, SyncError};

/// Run one derive call under a time budget and check its arity.
///
/// Errors and timeouts become [`SyncError::DerivationFailure`]; a result
/// whose length differs from the input becomes [`SyncError::ArityMismatch`].
pub async fn derive_with_timeout(
    deriver: &dyn Deriver,
    texts: &[String],
    language: &str,
    budget: Duration,
) -> Result<Derivation> {
    let started = std::time::Instant::now();
    let outcome = tokio::time::timeout(budget, deriver.derive(texts, language)).await;
    metrics::histogram!("codesync_derive_duration_seconds").record(started.elapsed().as_secs_f64());

    let derivation = match outcome {
        Ok(Ok(derivation)) => derivation,
        Ok(Err(e)) => {
            return Err(SyncError::derivation_failure_with_source(
                format!("{} failed", deriver.name()),
                e,
            ));
        }
        Err(_) => {
            warn!(
                deriver = deriver.name(),
                timeout_ms = budget.as_millis() as u64,
                batch = texts.len(),
                "Derivation timed out"
            );
            return Err(SyncError::derivation_failure(format!(
                "{} timed out after {}ms",
                deriver.name(),
                budget.as_millis()
            )));
        }
    };

    if !derivation.matches_arity(texts.len()) {
        return Err(SyncError::arity_mismatch(
            texts.len(),
            derivation.summaries.len().min(derivation.embeddings.len()),
        ));
    }
    Ok(derivation)
}

/// Offline deriver with deterministic hash embeddings and a heuristic
/// one-line summary. For development without a derivation service.
pub struct LocalDeriver {
    dimension: usize,
}

impl LocalDeriver {
    pub fn new(dimension: usize) -> Self {
        info!("LocalDeriver initialized with dimension {}", dimension);
        Self { dimension }
    }

    fn summarize(text: &str, language: &str) -> String {
        let headline = text
            .lines()
            .map(str::trim)
            .find(|line| !line.is_empty() && !line.starts_with("//") && !line.starts_with('#'))
            .unwrap_or("");
        let headline: String = headline.chars().take(120).collect();
        let lines = text.lines().count();
        format!("{language} code ({lines} lines): {headline}")
    }
}

#[async_trait]
impl Deriver for LocalDeriver {
    async fn derive(&self, texts: &[String], language: &str) -> AnyResult<Derivation> {
        let summaries = texts
            .iter()
            .map(|text| Self::summarize(text, language))
            .collect();
        let embeddings = texts
            .iter()
            .map(|text| hash_embedding(&embedding_input(text, language), self.dimension))
            .collect();
        Ok(Derivation { summaries, embeddings })
    }

    fn embedding_dimension(&self) -> usize {
        self.dimension
    }

    fn name(&self) -> &str {
        "local"
    }
}

#[derive(Serialize)]
struct DeriveRequest<'a> {
    texts: &'a [String],
    language: &'a str,
}

/// HTTP client for a derivation service speaking
/// `POST {base}/derive {texts, language} -> {summaries, embeddings}`
pub struct RemoteDeriver {
    client: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
    dimension: usize,
}

impl RemoteDeriver {
    pub fn new(
        base_url: &str,
        api_key: Option<String>,
        dimension: usize,
        request_timeout: Duration,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| SyncError::configuration_error_with_source("deriver.url", e))?;
        Ok(Self {
            client,
            endpoint: format!("{}/derive", base_url.trim_end_matches('/')),
            api_key,
            dimension,
        })
    }
}

#[async_trait]
impl Deriver for RemoteDeriver {
    async fn derive(&self, texts: &[String], language: &str) -> AnyResult<Derivation> {
        debug!(endpoint = %self.endpoint, batch = texts.len(), language, "Sending derive request");

        let mut request = self
            .client
            .post(&self.endpoint)
            .json(&DeriveRequest { texts, language });
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow::anyhow!("derive request failed with {status}: {body}"));
        }

        let derivation: Derivation = response.json().await?;
        debug!(
            summaries = derivation.summaries.len(),
            embeddings = derivation.embeddings.len(),
            "Received derive response"
        );
        Ok(derivation)
    }

    fn embedding_dimension(&self) -> usize {
        self.dimension
    }

    fn name(&self) -> &str {
        "remote"
    }
}

#[cfg(test)]
mod tests {
    use codesync_services::{MockDeriver, MockMode};
    use pretty_assertions::assert_eq;

    use super::*;

    fn texts(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("fn f{i}() {{}}")).collect()
    }

    #[tokio::test]
    async fn test_successful_derivation() {
        let fixture = MockDeriver::new(8);

        let actual = derive_with_timeout(&fixture, &texts(3), "rust", Duration::from_secs(1))
            .await
            .unwrap();

        assert!(actual.matches_arity(3));
    }

    #[tokio::test]
    async fn test_arity_mismatch_is_reported() {
        let fixture = MockDeriver::new(8).with_mode(MockMode::Truncate);

        let actual = derive_with_timeout(&fixture, &texts(3), "rust", Duration::from_secs(1)).await;

        assert!(matches!(actual, Err(SyncError::ArityMismatch { expected: 3, actual: 2 })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_is_a_derivation_failure() {
        let fixture = MockDeriver::new(8).with_mode(MockMode::Delay(Duration::from_secs(60)));

        let actual = derive_with_timeout(&fixture, &texts(1), "rust", Duration::from_secs(30)).await;

        assert!(matches!(actual, Err(SyncError::DerivationFailure { .. })));
    }

    #[tokio::test]
    async fn test_error_is_a_derivation_failure() {
        let fixture = MockDeriver::new(8).with_mode(MockMode::Fail);

        let actual = derive_with_timeout(&fixture, &texts(1), "rust", Duration::from_secs(1)).await;

        assert_eq!(actual.unwrap_err().error_code(), "DERIVATION_FAILURE");
    }

    #[tokio::test]
    async fn test_local_deriver_is_deterministic() {
        let fixture = LocalDeriver::new(16);
        let input = vec!["// helper\nfn add(a: i32, b: i32) -> i32 { a + b }".to_string()];

        let first = fixture.derive(&input, "rust").await.unwrap();
        let second = fixture.derive(&input, "rust").await.unwrap();

        assert_eq!(first, second);
        assert_eq!(
            first.summaries,
            vec!["rust code (2 lines): fn add(a: i32, b: i32) -> i32 { a + b }".to_string()]
        );
        assert!(!first.embeddings[0].iter().all(|x| *x == 0.0));
    }
}
