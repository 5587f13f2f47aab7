use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use std::io::Cursor;
use std::time::Duration;
use tracing::debug;

/// Produces a short lead for an article page. `Ok(None)` means the page had
/// nothing usable; both that and `Err` end up as "no summary".
#[async_trait]
pub trait ContentExtractor: Send + Sync {
    async fn extract_summary(&self, url: &str) -> Result<Option<String>>;
}

/// How a lead is cut out of page text.
#[derive(Debug, Clone, Copy)]
pub struct LeadOptions {
    /// Lines of this many characters or fewer are treated as navigation noise.
    pub min_paragraph_chars: usize,
    pub max_sentences: usize,
}

impl Default for LeadOptions {
    fn default() -> Self {
        Self {
            min_paragraph_chars: 60,
            max_sentences: 3,
        }
    }
}

/// First `max_sentences` sentences of the first substantial paragraph.
///
/// A sentence is a run of text ended by `.`, `!` or `?`; trailing text without
/// a terminator is not a sentence.
pub fn lead_from_text(text: &str, options: LeadOptions) -> Option<String> {
    let paragraph = text
        .lines()
        .map(str::trim)
        .find(|line| line.chars().count() > options.min_paragraph_chars)?;

    let sentences = split_sentences(paragraph);
    if sentences.is_empty() {
        return None;
    }
    Some(
        sentences
            .into_iter()
            .take(options.max_sentences)
            .collect::<Vec<_>>()
            .join(" "),
    )
}

fn split_sentences(paragraph: &str) -> Vec<String> {
    let is_terminator = |c: char| matches!(c, '.' | '!' | '?');
    let mut sentences = Vec::new();
    let mut current = String::new();
    let mut chars = paragraph.chars().peekable();

    while let Some(c) = chars.next() {
        if !is_terminator(c) {
            current.push(c);
            continue;
        }
        // a run of terminators closes the sentence ("Really?!")
        let mut closing = String::from(c);
        while let Some(&next) = chars.peek() {
            if !is_terminator(next) {
                break;
            }
            closing.push(next);
            chars.next();
        }
        let body = current.trim();
        if !body.is_empty() {
            sentences.push(format!("{}{}", body, closing));
        }
        current.clear();
    }
    sentences
}

fn build_client(timeout_secs: u64, user_agent: &str) -> Result<Client> {
    Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .user_agent(user_agent)
        .build()
        .context("failed to build reqwest client")
}

/// Asks a text-rendering proxy (`{reader_url}{article_url}`) for the page text.
pub struct ReaderExtractor {
    reader_url: String,
    options: LeadOptions,
    client: Client,
}

impl ReaderExtractor {
    pub fn new(reader_url: impl Into<String>, timeout_secs: u64, options: LeadOptions) -> Result<Self> {
        Ok(Self {
            reader_url: reader_url.into(),
            options,
            client: build_client(timeout_secs, "Lecta/0.1.0")?,
        })
    }
}

#[async_trait]
impl ContentExtractor for ReaderExtractor {
    async fn extract_summary(&self, url: &str) -> Result<Option<String>> {
        let target = format!("{}{}", self.reader_url, url);
        let response = self
            .client
            .get(&target)
            .send()
            .await
            .context("failed to fetch reader page")?;

        let status = response.status();
        if !status.is_success() {
            anyhow::bail!("reader fetch failed with status: {}", status);
        }

        let text = response.text().await.context("failed to read reader body")?;
        let lead = lead_from_text(&text, self.options);
        debug!("scraping: reader returned {} chars for {}, lead found: {}", text.len(), url, lead.is_some());
        Ok(lead)
    }
}

/// Fetches the page itself and isolates the main content with readability.
pub struct ReadabilityExtractor {
    options: LeadOptions,
    client: Client,
}

impl ReadabilityExtractor {
    pub fn new(timeout_secs: u64, options: LeadOptions) -> Result<Self> {
        Ok(Self {
            options,
            client: build_client(timeout_secs, "Lecta/0.1.0")?,
        })
    }
}

#[async_trait]
impl ContentExtractor for ReadabilityExtractor {
    async fn extract_summary(&self, url: &str) -> Result<Option<String>> {
        let url_obj = url::Url::parse(url).context("failed to parse article URL")?;

        let response = self.client.get(url).send().await.context("failed to fetch article page")?;
        let status = response.status();
        if !status.is_success() {
            anyhow::bail!("article fetch failed with status: {}", status);
        }

        // Readability requires a Reader, so we fetch bytes
        let bytes = response.bytes().await.context("failed to read response body")?;
        let mut reader = Cursor::new(bytes);

        let product = readability::extractor::extract(&mut reader, &url_obj)
            .map_err(|e| anyhow::anyhow!("readability failed for {}: {}", url, e))?;

        // Wide rendering keeps each paragraph on one line.
        let text = html2text::from_read(product.content.as_bytes(), 10_000)
            .unwrap_or(product.text);

        let lead = lead_from_text(&text, self.options);
        debug!("scraping: readability extracted {} chars from {}, lead found: {}", text.len(), url, lead.is_some());
        Ok(lead)
    }
}

/// Extraction switched off.
pub struct NoopExtractor;

#[async_trait]
impl ContentExtractor for NoopExtractor {
    async fn extract_summary(&self, _url: &str) -> Result<Option<String>> {
        Ok(None)
    }
}
