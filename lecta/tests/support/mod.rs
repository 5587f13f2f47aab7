//! In-test fakes of the pipeline collaborators.
#![allow(dead_code)]

use async_trait::async_trait;
use lecta::article::{Article, RawItem};
use lecta::cache::{EnrichmentCache, DEFAULT_TTL_DAYS};
use lecta::category::Category;
use lecta::llm::classifier::{ClassifyError, RemoteClassifier};
use lecta::processing::EnrichmentPipeline;
use lecta::rules::RuleStore;
use lecta::scraping::ContentExtractor;
use lecta::storage::{MemorySlotStore, SlotStore};
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

pub const CACHE_SLOT: &str = "lecta_article_cache";
pub const RULES_SLOT: &str = "lecta_filter_rules";

pub fn raw(id: &str, title: &str) -> RawItem {
    RawItem {
        id: id.to_string(),
        title: title.to_string(),
        url: format!("https://news.example/{}", id),
        source: "news.example".to_string(),
        published_at: None,
    }
}

pub fn article(id: &str, title: &str) -> Article {
    Article::from(raw(id, title))
}

/// Answers `Lead of <url>.` except for URLs marked as failing.
#[derive(Default)]
pub struct FakeExtractor {
    failing: HashSet<String>,
    pub calls: AtomicUsize,
    pub urls: Mutex<Vec<String>>,
    gate: Option<(Arc<Notify>, Arc<Notify>)>,
}

impl FakeExtractor {
    pub fn failing_for(ids: &[&str]) -> Self {
        Self {
            failing: ids.iter().map(|id| format!("https://news.example/{}", id)).collect(),
            ..Default::default()
        }
    }

    /// Signals `entered` on each call, then waits for `release`.
    pub fn gated(entered: Arc<Notify>, release: Arc<Notify>) -> Self {
        Self {
            gate: Some((entered, release)),
            ..Default::default()
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ContentExtractor for FakeExtractor {
    async fn extract_summary(&self, url: &str) -> anyhow::Result<Option<String>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.urls.lock().unwrap().push(url.to_string());
        if let Some((entered, release)) = &self.gate {
            entered.notify_one();
            release.notified().await;
        }
        if self.failing.contains(url) {
            anyhow::bail!("connection reset for {}", url);
        }
        Ok(Some(format!("  Lead of {}.  ", url)))
    }
}

pub enum RemoteAnswer {
    Categories(Vec<Category>),
    RateLimited,
    Malformed,
}

pub struct FakeRemote {
    answer: RemoteAnswer,
    pub calls: AtomicUsize,
}

impl FakeRemote {
    pub fn new(answer: RemoteAnswer) -> Self {
        Self {
            answer,
            calls: AtomicUsize::new(0),
        }
    }

    fn respond(&self) -> Result<Vec<Category>, ClassifyError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.answer {
            RemoteAnswer::Categories(categories) => Ok(categories.clone()),
            RemoteAnswer::RateLimited => Err(ClassifyError::RateLimited { attempts: 2 }),
            RemoteAnswer::Malformed => Err(ClassifyError::Malformed("no JSON array".to_string())),
        }
    }
}

#[async_trait]
impl RemoteClassifier for FakeRemote {
    async fn classify_headline(&self, _headline: &str) -> Result<Category, ClassifyError> {
        self.respond()
            .map(|categories| categories.first().copied().unwrap_or(Category::FALLBACK))
    }

    async fn classify_headlines(&self, _headlines: &[String]) -> Result<Vec<Category>, ClassifyError> {
        self.respond()
    }
}

pub struct Harness {
    pub store: Arc<MemorySlotStore>,
    pub cache: Arc<EnrichmentCache>,
    pub pipeline: Arc<EnrichmentPipeline>,
}

pub async fn harness(
    extractor: Arc<dyn ContentExtractor>,
    remote: Option<Arc<dyn RemoteClassifier>>,
) -> Harness {
    let store = Arc::new(MemorySlotStore::new());
    let slots: Arc<dyn SlotStore> = store.clone();
    let rules = Arc::new(RuleStore::open(slots.clone(), RULES_SLOT).await);
    let cache = Arc::new(
        EnrichmentCache::init(slots, CACHE_SLOT, chrono::Duration::days(DEFAULT_TTL_DAYS)).await,
    );
    let pipeline = Arc::new(EnrichmentPipeline::new(rules, cache.clone(), extractor).with_remote(remote));
    Harness {
        store,
        cache,
        pipeline,
    }
}
