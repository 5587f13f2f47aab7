//! Headline classification through a hosted model.

use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

use super::{extract_json_array_from_text, LlmError, LlmProvider, LlmRequest};
use crate::category::Category;
use crate::processing::Severity;

/// Remote classification boundary. Implementations answer with exactly one
/// category per headline, in input order.
#[async_trait]
pub trait RemoteClassifier: Send + Sync {
    async fn classify_headline(&self, headline: &str) -> Result<Category, ClassifyError>;

    async fn classify_headlines(&self, headlines: &[String]) -> Result<Vec<Category>, ClassifyError>;
}

#[derive(Debug, thiserror::Error)]
pub enum ClassifyError {
    #[error("classifier still rate limited after {attempts} attempts")]
    RateLimited { attempts: u32 },
    #[error(transparent)]
    Provider(LlmError),
    #[error("unusable classifier answer: {0}")]
    Malformed(String),
}

impl ClassifyError {
    /// Rate limiting is transient and only worth a warning.
    pub fn severity(&self) -> Severity {
        match self {
            ClassifyError::RateLimited { .. } => Severity::Warning,
            _ => Severity::Error,
        }
    }
}

/// Bounded retry for rate-limited calls: `max_retries` extra attempts, each
/// after a fixed `backoff`. Other failures are returned immediately.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 1,
            backoff: Duration::from_secs(2),
        }
    }
}

impl RetryPolicy {
    pub async fn run<T, F, Fut>(&self, mut call: F) -> Result<T, ClassifyError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, LlmError>>,
    {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match call().await {
                Ok(value) => return Ok(value),
                Err(LlmError::RateLimited { .. }) if attempt <= self.max_retries => {
                    warn!(
                        "classifier: rate limited (attempt {}), retrying in {:?}",
                        attempt, self.backoff
                    );
                    tokio::time::sleep(self.backoff).await;
                }
                Err(LlmError::RateLimited { .. }) => {
                    return Err(ClassifyError::RateLimited { attempts: attempt })
                }
                Err(e) => return Err(ClassifyError::Provider(e)),
            }
        }
    }
}

/// [`RemoteClassifier`] on top of a chat-completion provider.
pub struct LlmClassifier {
    provider: Arc<dyn LlmProvider>,
    retry: RetryPolicy,
}

impl LlmClassifier {
    pub fn new(provider: Arc<dyn LlmProvider>) -> Self {
        Self {
            provider,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    async fn ask(&self, request: LlmRequest) -> Result<String, ClassifyError> {
        let response = self
            .retry
            .run(|| self.provider.generate(request.clone()))
            .await?;
        Ok(response.content)
    }
}

fn category_list() -> String {
    Category::ALL
        .iter()
        .map(|c| c.label())
        .collect::<Vec<_>>()
        .join(", ")
}

#[async_trait]
impl RemoteClassifier for LlmClassifier {
    async fn classify_headline(&self, headline: &str) -> Result<Category, ClassifyError> {
        let request = LlmRequest {
            system: Some(format!(
                "You classify news headlines. Answer with exactly one word from this list: {}. \
                 No explanation, no sentence, only the word.",
                category_list()
            )),
            prompt: format!("Headline: \"{}\"\nCategory:", headline),
            temperature: Some(0.1),
            ..Default::default()
        };
        let answer = self.ask(request).await?;
        Ok(Category::from_label_or_default(&answer))
    }

    async fn classify_headlines(&self, headlines: &[String]) -> Result<Vec<Category>, ClassifyError> {
        if headlines.is_empty() {
            return Ok(Vec::new());
        }

        let numbered = headlines
            .iter()
            .enumerate()
            .map(|(i, h)| format!("{}. {}", i + 1, h))
            .collect::<Vec<_>>()
            .join("\n");
        let request = LlmRequest {
            system: Some(format!(
                "You classify news headlines. You receive a numbered list of headlines. \
                 Answer ONLY with a JSON array of words from this list: {}. \
                 The array must have exactly as many elements as the input list. \
                 Example answer: [\"General\", \"Politics\", \"Sports\"]. \
                 No explanation, only the JSON array.",
                category_list()
            )),
            prompt: format!("Headlines:\n{}", numbered),
            temperature: Some(0.1),
            ..Default::default()
        };
        let answer = self.ask(request).await?;
        parse_batch_answer(&answer, headlines.len())
    }
}

/// Map a JSON-array answer onto `expected` categories. Missing trailing
/// entries get the fallback category, surplus entries are dropped.
pub fn parse_batch_answer(answer: &str, expected: usize) -> Result<Vec<Category>, ClassifyError> {
    let json = extract_json_array_from_text(answer)
        .ok_or_else(|| ClassifyError::Malformed(format!("no JSON array in {:?}", answer)))?;
    let labels: Vec<String> = serde_json::from_str(json)
        .map_err(|e| ClassifyError::Malformed(format!("{}: {:?}", e, json)))?;

    if labels.len() != expected {
        warn!(
            "classifier: expected {} labels, got {}; aligning with fallback",
            expected,
            labels.len()
        );
    }

    let mut categories: Vec<Category> = labels
        .iter()
        .take(expected)
        .map(|label| Category::from_label_or_default(label))
        .collect();
    categories.resize(expected, Category::FALLBACK);
    Ok(categories)
}
