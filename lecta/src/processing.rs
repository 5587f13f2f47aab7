//! Batch enrichment: cache lookup, classification, summary extraction,
//! merge and write-through.
//!
//! Per-item failures never abort a batch. Batch-level failures are returned
//! alongside the enriched articles and can be folded into a single notice.

use serde::Serialize;
use std::collections::HashSet;
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::article::Article;
use crate::cache::{Enrichment, EnrichmentCache};
use crate::category::Category;
use crate::llm::classifier::RemoteClassifier;
use crate::rules::RuleStore;
use crate::scraping::ContentExtractor;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum Severity {
    Warning,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Stage {
    Classify,
    Extract,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Classify => f.write_str("classification"),
            Stage::Extract => f.write_str("summary extraction"),
        }
    }
}

/// A failure that affected a whole stage of one batch.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StageFailure {
    pub stage: Stage,
    pub severity: Severity,
    pub affected: usize,
    pub cause: String,
}

/// All failures of one batch folded into one user-facing notification.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchNotice {
    pub severity: Severity,
    pub stages: Vec<Stage>,
    pub affected: usize,
    pub causes: Vec<String>,
}

impl fmt::Display for BatchNotice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let stages = self
            .stages
            .iter()
            .map(|s| s.to_string())
            .collect::<Vec<_>>()
            .join(", ");
        write!(
            f,
            "{} failed for {} article(s): {}",
            stages,
            self.affected,
            self.causes.join("; ")
        )
    }
}

/// Settled result of one per-item operation.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome<T> {
    Success(T),
    Failure(String),
}

impl<T> Outcome<T> {
    pub fn is_failure(&self) -> bool {
        matches!(self, Outcome::Failure(_))
    }
}

impl<T> From<anyhow::Result<T>> for Outcome<T> {
    fn from(result: anyhow::Result<T>) -> Self {
        match result {
            Ok(value) => Outcome::Success(value),
            Err(e) => Outcome::Failure(format!("{:#}", e)),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct EnrichedBatch {
    /// Every input article, in input order, with category and summary set.
    pub articles: Vec<Article>,
    pub failures: Vec<StageFailure>,
}

impl EnrichedBatch {
    pub fn notice(&self) -> Option<BatchNotice> {
        let severity = self.failures.iter().map(|f| f.severity).max()?;
        let mut stages = Vec::new();
        for failure in &self.failures {
            if !stages.contains(&failure.stage) {
                stages.push(failure.stage);
            }
        }
        Some(BatchNotice {
            severity,
            stages,
            affected: self.failures.iter().map(|f| f.affected).max().unwrap_or(0),
            causes: self.failures.iter().map(|f| f.cause.clone()).collect(),
        })
    }
}

pub const DEFAULT_EXTRACTION_TIMEOUT: Duration = Duration::from_secs(15);

/// Coordinates classification, extraction and caching for batches of articles.
pub struct EnrichmentPipeline {
    rules: Arc<RuleStore>,
    cache: Arc<EnrichmentCache>,
    extractor: Arc<dyn ContentExtractor>,
    remote: Option<Arc<dyn RemoteClassifier>>,
    extraction_timeout: Duration,
    in_flight: Mutex<HashSet<String>>,
}

/// Releases the claimed ids when the batch finishes or is dropped midway.
struct InFlight<'a> {
    pipeline: &'a EnrichmentPipeline,
    ids: Vec<String>,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        let mut in_flight = self.pipeline.in_flight.lock().unwrap_or_else(|e| e.into_inner());
        for id in &self.ids {
            in_flight.remove(id);
        }
    }
}

impl EnrichmentPipeline {
    pub fn new(
        rules: Arc<RuleStore>,
        cache: Arc<EnrichmentCache>,
        extractor: Arc<dyn ContentExtractor>,
    ) -> Self {
        Self {
            rules,
            cache,
            extractor,
            remote: None,
            extraction_timeout: DEFAULT_EXTRACTION_TIMEOUT,
            in_flight: Mutex::new(HashSet::new()),
        }
    }

    /// Prefer a hosted classifier; `None` keeps classification local.
    pub fn with_remote(mut self, remote: Option<Arc<dyn RemoteClassifier>>) -> Self {
        self.remote = remote;
        self
    }

    pub fn with_extraction_timeout(mut self, timeout: Duration) -> Self {
        self.extraction_timeout = timeout;
        self
    }

    pub fn is_busy(&self) -> bool {
        !self.in_flight.lock().unwrap_or_else(|e| e.into_inner()).is_empty()
    }

    fn claim(&self, ids: &[String]) -> Option<InFlight<'_>> {
        let mut in_flight = self.in_flight.lock().unwrap_or_else(|e| e.into_inner());
        if ids.iter().any(|id| in_flight.contains(id)) {
            return None;
        }
        in_flight.extend(ids.iter().cloned());
        Some(InFlight {
            pipeline: self,
            ids: ids.to_vec(),
        })
    }

    /// Copy cached enrichments onto `articles`; returns indices of the misses.
    pub async fn apply_cache(&self, articles: &mut [Article]) -> Vec<usize> {
        let mut misses = Vec::new();
        for (i, article) in articles.iter_mut().enumerate() {
            match self.cache.get(&article.id).await {
                Some(entry) => {
                    article.category = Some(entry.category);
                    article.summary = entry.summary;
                }
                None => misses.push(i),
            }
        }
        misses
    }

    /// Enrich a batch of articles.
    ///
    /// Returns `None` without doing anything when any of the articles is
    /// already part of a batch in flight.
    pub async fn enrich_batch(&self, mut articles: Vec<Article>) -> Option<EnrichedBatch> {
        let ids: Vec<String> = articles.iter().map(|a| a.id.clone()).collect();
        let Some(_claim) = self.claim(&ids) else {
            info!("Enrichment already in flight for this batch, ignoring");
            return None;
        };

        let misses = self.apply_cache(&mut articles).await;
        info!(
            "Enriching batch of {}: {} cached, {} to process",
            articles.len(),
            articles.len() - misses.len(),
            misses.len()
        );
        if misses.is_empty() {
            return Some(EnrichedBatch {
                articles,
                failures: Vec::new(),
            });
        }

        let headlines: Vec<String> = misses.iter().map(|&i| articles[i].headline.clone()).collect();
        let urls: Vec<String> = misses.iter().map(|&i| articles[i].url.clone()).collect();

        let ((categories, classify_failure), summaries) = tokio::join!(
            self.classify_misses(&headlines),
            self.extract_summaries(&urls)
        );

        let mut failures: Vec<StageFailure> = classify_failure.into_iter().collect();
        let failed_extractions = summaries.iter().filter(|o| o.is_failure()).count();
        if failed_extractions > 0 {
            debug!("{} of {} extractions failed", failed_extractions, summaries.len());
        }
        if failed_extractions == summaries.len() {
            if let Some(Outcome::Failure(cause)) = summaries.first() {
                failures.push(StageFailure {
                    stage: Stage::Extract,
                    severity: Severity::Warning,
                    affected: failed_extractions,
                    cause: cause.clone(),
                });
            }
        }

        let mut updates = Vec::with_capacity(misses.len());
        for (slot, &index) in misses.iter().enumerate() {
            let category = categories.get(slot).copied().unwrap_or(Category::FALLBACK);
            let summary = summaries.get(slot).map(summary_text).unwrap_or_default();
            let article = &mut articles[index];
            article.category = Some(category);
            article.summary = summary.clone();
            updates.push((article.id.clone(), Enrichment { category, summary }));
        }

        self.cache.put_batch(updates).await;

        if !failures.is_empty() {
            warn!("Batch finished with {} stage failure(s)", failures.len());
        }
        Some(EnrichedBatch { articles, failures })
    }

    /// Single-article variant of [`enrich_batch`](Self::enrich_batch), used
    /// for articles outside the eager window.
    pub async fn enrich_one(&self, mut article: Article) -> Option<EnrichedBatch> {
        let Some(_claim) = self.claim(std::slice::from_ref(&article.id)) else {
            debug!("Enrichment already in flight for article {}", article.id);
            return None;
        };

        if let Some(entry) = self.cache.get(&article.id).await {
            return Some(EnrichedBatch {
                articles: vec![article.with_enrichment(entry.category, entry.summary)],
                failures: Vec::new(),
            });
        }

        let ((category, failure), summaries) = tokio::join!(
            self.classify_single(&article.headline),
            self.extract_summaries(std::slice::from_ref(&article.url))
        );
        let summary = summaries.first().map(summary_text).unwrap_or_default();

        self.cache.put(&article.id, category, &summary).await;
        article = article.with_enrichment(category, summary);
        Some(EnrichedBatch {
            articles: vec![article],
            failures: failure.into_iter().collect(),
        })
    }

    async fn classify_misses(&self, headlines: &[String]) -> (Vec<Category>, Option<StageFailure>) {
        let rules = self.rules.rule_set().await;
        let Some(remote) = &self.remote else {
            return (rules.classify_batch(headlines), None);
        };

        match remote.classify_headlines(headlines).await {
            Ok(categories) if categories.len() == headlines.len() => (categories, None),
            Ok(categories) => {
                warn!(
                    "Remote classifier returned {} categories for {} headlines, using local rules",
                    categories.len(),
                    headlines.len()
                );
                let failure = StageFailure {
                    stage: Stage::Classify,
                    severity: Severity::Error,
                    affected: headlines.len(),
                    cause: format!(
                        "remote classifier returned {} categories for {} headlines",
                        categories.len(),
                        headlines.len()
                    ),
                };
                (rules.classify_batch(headlines), Some(failure))
            }
            Err(e) => {
                warn!("Remote classification failed, using local rules: {}", e);
                let failure = StageFailure {
                    stage: Stage::Classify,
                    severity: e.severity(),
                    affected: headlines.len(),
                    cause: e.to_string(),
                };
                (rules.classify_batch(headlines), Some(failure))
            }
        }
    }

    async fn classify_single(&self, headline: &str) -> (Category, Option<StageFailure>) {
        let rules = self.rules.rule_set().await;
        let Some(remote) = &self.remote else {
            return (rules.classify(headline), None);
        };

        match remote.classify_headline(headline).await {
            Ok(category) => (category, None),
            Err(e) => {
                warn!("Remote classification failed, using local rules: {}", e);
                let failure = StageFailure {
                    stage: Stage::Classify,
                    severity: e.severity(),
                    affected: 1,
                    cause: e.to_string(),
                };
                (rules.classify(headline), Some(failure))
            }
        }
    }

    /// Extract all summaries concurrently and wait for every one to settle.
    async fn extract_summaries(&self, urls: &[String]) -> Vec<Outcome<Option<String>>> {
        let timeout = self.extraction_timeout;
        let tasks = urls.iter().map(|url| async move {
            match tokio::time::timeout(timeout, self.extractor.extract_summary(url)).await {
                Ok(result) => {
                    let outcome = Outcome::from(result);
                    if let Outcome::Failure(cause) = &outcome {
                        debug!("Extraction failed for {}: {}", url, cause);
                    }
                    outcome
                }
                Err(_) => Outcome::Failure(format!("extraction timed out after {:?}", timeout)),
            }
        });
        futures::future::join_all(tasks).await
    }
}

/// Failed or empty extractions become an empty summary, never an error text.
fn summary_text(outcome: &Outcome<Option<String>>) -> String {
    match outcome {
        Outcome::Success(Some(text)) => text.trim().to_string(),
        _ => String::new(),
    }
}
