//! Mock deriver implementation for testing

use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use codesync_domain::preprocessing::{hash_embedding, is_valid_vector};
use codesync_domain::{Derivation, Deriver};

/// How the mock responds to `derive`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MockMode {
    /// Deterministic summaries and unit-length embeddings
    #[default]
    Normal,
    /// Every call fails
    Fail,
    /// Drops the last result, producing an arity mismatch
    Truncate,
    /// Sleeps before answering normally
    Delay(Duration),
    /// Answers with all-zero embeddings
    ZeroVectors,
}

/// A mock deriver that produces deterministic output and counts its calls
#[derive(Debug)]
pub struct MockDeriver {
    dimension: usize,
    calls: AtomicUsize,
    texts: AtomicUsize,
    mode: Mutex<MockMode>,
}

impl MockDeriver {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            calls: AtomicUsize::new(0),
            texts: AtomicUsize::new(0),
            mode: Mutex::new(MockMode::Normal),
        }
    }

    pub fn with_mode(self, mode: MockMode) -> Self {
        self.set_mode(mode);
        self
    }

    pub fn set_mode(&self, mode: MockMode) {
        *self.mode.lock().unwrap_or_else(|poisoned| poisoned.into_inner()) = mode;
    }

    fn mode(&self) -> MockMode {
        *self.mode.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Number of `derive` calls received
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Total number of texts received across all calls
    pub fn text_count(&self) -> usize {
        self.texts.load(Ordering::SeqCst)
    }

    /// The summary the mock produces for `text`
    pub fn summary_for(text: &str, language: &str) -> String {
        let first_line = text.lines().map(str::trim).find(|l| !l.is_empty()).unwrap_or("");
        format!("{language}: {first_line}")
    }

    fn derive_one(&self, text: &str, language: &str) -> Result<(String, Vec<f32>)> {
        let embedding = hash_embedding(text, self.dimension);
        if !is_valid_vector(&embedding) {
            return Err(anyhow::anyhow!("Generated invalid vector"));
        }
        Ok((Self::summary_for(text, language), embedding))
    }
}

#[async_trait]
impl Deriver for MockDeriver {
    async fn derive(&self, texts: &[String], language: &str) -> Result<Derivation> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.texts.fetch_add(texts.len(), Ordering::SeqCst);

        let mode = self.mode();
        match mode {
            MockMode::Fail => return Err(anyhow::anyhow!("mock derivation failure")),
            MockMode::Delay(delay) => tokio::time::sleep(delay).await,
            _ => {}
        }

        let mut derivation = Derivation::default();
        for text in texts {
            let (summary, embedding) = self.derive_one(text, language)?;
            derivation.summaries.push(summary);
            derivation.embeddings.push(match mode {
                MockMode::ZeroVectors => vec![0.0; self.dimension],
                _ => embedding,
            });
        }

        if mode == MockMode::Truncate {
            derivation.summaries.pop();
            derivation.embeddings.pop();
        }

        Ok(derivation)
    }

    fn embedding_dimension(&self) -> usize {
        self.dimension
    }

    fn name(&self) -> &str {
        "mock"
    }
}
