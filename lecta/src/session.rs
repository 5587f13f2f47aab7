//! Paginated feed state: ordered articles, cursor, and the eager enrichment
//! window applied to each freshly loaded page.

use anyhow::Result;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::article::Article;
use crate::ingestion::FeedSource;
use crate::processing::{BatchNotice, EnrichedBatch, EnrichmentPipeline};

/// Number of new articles enriched as soon as a page arrives.
pub const DEFAULT_WINDOW: usize = 20;

/// What one page load produced.
#[derive(Debug, Clone)]
pub struct PageResult {
    /// New articles of this page, deduplicated against earlier pages.
    pub articles: Vec<Article>,
    pub notice: Option<BatchNotice>,
    pub exhausted: bool,
}

#[derive(Default)]
struct FeedState {
    cursor: Option<String>,
    exhausted: bool,
    articles: Vec<Article>,
    seen: HashSet<String>,
}

/// Set while a flag-guarded operation runs; cleared on drop.
struct Busy<'a>(&'a AtomicBool);

impl<'a> Busy<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .ok()
            .map(|_| Busy(flag))
    }
}

impl Drop for Busy<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

pub struct FeedSession {
    source: Arc<dyn FeedSource>,
    pipeline: Arc<EnrichmentPipeline>,
    window: usize,
    state: Mutex<FeedState>,
    fetching: AtomicBool,
    analyzing: AtomicBool,
}

impl FeedSession {
    pub fn new(source: Arc<dyn FeedSource>, pipeline: Arc<EnrichmentPipeline>) -> Self {
        Self {
            source,
            pipeline,
            window: DEFAULT_WINDOW,
            state: Mutex::new(FeedState::default()),
            fetching: AtomicBool::new(false),
            analyzing: AtomicBool::new(false),
        }
    }

    pub fn with_window(mut self, window: usize) -> Self {
        self.window = window;
        self
    }

    pub fn is_fetching(&self) -> bool {
        self.fetching.load(Ordering::SeqCst)
    }

    pub fn is_analyzing(&self) -> bool {
        self.analyzing.load(Ordering::SeqCst)
    }

    pub async fn is_exhausted(&self) -> bool {
        self.state.lock().await.exhausted
    }

    /// Snapshot of every article loaded so far, in feed order.
    pub async fn articles(&self) -> Vec<Article> {
        self.state.lock().await.articles.clone()
    }

    /// Load the first page. `Ok(None)` when a load is already running.
    pub async fn load_initial(&self) -> Result<Option<PageResult>> {
        self.load_page(None).await
    }

    /// Load the page after the current cursor. `Ok(None)` when a load or its
    /// enrichment window is still running, nothing was loaded yet, or the
    /// feed is exhausted.
    pub async fn load_more(&self) -> Result<Option<PageResult>> {
        let cursor = {
            let state = self.state.lock().await;
            match (&state.cursor, state.exhausted) {
                (Some(cursor), false) => cursor.clone(),
                _ => return Ok(None),
            }
        };
        self.load_page(Some(cursor)).await
    }

    async fn load_page(&self, cursor: Option<String>) -> Result<Option<PageResult>> {
        let Some(fetching) = Busy::acquire(&self.fetching) else {
            debug!("Page load already in progress, ignoring");
            return Ok(None);
        };
        if self.is_analyzing() {
            debug!("Enrichment window still running, ignoring page load");
            return Ok(None);
        }

        let page = self.source.fetch_page(cursor.as_deref()).await?;
        let fetched = page.items.len();

        let mut fresh: Vec<Article> = {
            let mut state = self.state.lock().await;
            state.exhausted = page.next_cursor.is_none();
            state.cursor = page.next_cursor;
            page.items
                .into_iter()
                .filter(|item| state.seen.insert(item.id.clone()))
                .map(Article::from)
                .collect()
        };

        let misses = self.pipeline.apply_cache(&mut fresh).await;
        info!(
            "Loaded page: {} fetched, {} new, {} cached",
            fetched,
            fresh.len(),
            fresh.len() - misses.len()
        );

        let exhausted = {
            let mut state = self.state.lock().await;
            state.articles.extend(fresh.iter().cloned());
            state.exhausted
        };

        let window: Vec<Article> = fresh
            .iter()
            .take(self.window)
            .filter(|a| !a.is_classified())
            .cloned()
            .collect();

        // the page is in; further loads now wait on the window instead
        let analyzing = if window.is_empty() {
            None
        } else {
            Busy::acquire(&self.analyzing)
        };
        drop(fetching);

        let mut notice = None;
        if let Some(_analyzing) = analyzing {
            if let Some(batch) = self.pipeline.enrich_batch(window).await {
                notice = batch.notice();
                replace_by_id(&mut fresh, &batch.articles);
                replace_by_id(&mut self.state.lock().await.articles, &batch.articles);
            }
        }

        Ok(Some(PageResult {
            articles: fresh,
            notice,
            exhausted,
        }))
    }

    /// Enrich one loaded article on demand. `None` when the id is unknown or
    /// the article is already being enriched.
    pub async fn enrich_article(&self, id: &str) -> Option<EnrichedBatch> {
        let article = {
            let state = self.state.lock().await;
            state.articles.iter().find(|a| a.id == id).cloned()?
        };
        let batch = self.pipeline.enrich_one(article).await?;
        replace_by_id(&mut self.state.lock().await.articles, &batch.articles);
        Some(batch)
    }
}

fn replace_by_id(articles: &mut [Article], enriched: &[Article]) {
    for enriched in enriched {
        if let Some(slot) = articles.iter_mut().find(|a| a.id == enriched.id) {
            *slot = enriched.clone();
        }
    }
}
