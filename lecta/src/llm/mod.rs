use std::time::Duration;

/// Core trait for chat-completion providers
#[async_trait::async_trait]
pub trait LlmProvider: Send + Sync {
    /// Generate completion for a given prompt
    async fn generate(&self, request: LlmRequest) -> Result<LlmResponse, LlmError>;
}

/// Request structure for LLM generation
#[derive(Debug, Clone, Default)]
pub struct LlmRequest {
    pub system: Option<String>,
    pub prompt: String,
    pub max_tokens: Option<usize>,
    pub temperature: Option<f32>,
    pub timeout_seconds: Option<u64>,
}

/// Response from LLM generation
#[derive(Debug, Clone)]
pub struct LlmResponse {
    pub content: String,
    pub usage: UsageMetadata,
    pub model: String,
}

/// Token usage metadata
#[derive(Debug, Clone, Default)]
pub struct UsageMetadata {
    pub prompt_tokens: usize,
    pub completion_tokens: usize,
    pub total_tokens: usize,
}

/// Failures of a provider call. Rate limiting is kept apart because it is the
/// only condition callers retry.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("LLM API rate limited the request (429): {body}")]
    RateLimited { body: String },
    #[error("LLM API error {status}: {body}")]
    Api { status: u16, body: String },
    #[error("LLM request timed out after {0:?}")]
    Timeout(Duration),
    #[error("LLM HTTP request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("failed to decode LLM response: {0}")]
    Decode(String),
}

pub mod classifier;
pub mod remote;

/// Helper to extract a JSON array from text that might contain markdown backticks or preamble
pub fn extract_json_array_from_text(text: &str) -> Option<&str> {
    let start = text.find('[')?;
    let end = text.rfind(']')?;
    if end < start {
        return None;
    }
    Some(&text[start..=end])
}
