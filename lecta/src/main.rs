/*
lecta - command line front end.
Loads configuration, wires the rule store, cache, extractor and optional remote
classifier into an enrichment pipeline, then runs one command against them.
*/

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use common::{init_db_pool, Config};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};
use tracing_subscriber::{fmt, EnvFilter};

use lecta::cache::{EnrichmentCache, DEFAULT_TTL_DAYS};
use lecta::ingestion::{FeedSource, RedditFeedSource, RssFeedSource};
use lecta::llm::classifier::{LlmClassifier, RemoteClassifier, RetryPolicy};
use lecta::llm::remote::RemoteLlmProvider;
use lecta::processing::{EnrichmentPipeline, DEFAULT_EXTRACTION_TIMEOUT};
use lecta::rules::{parse_rules, RuleStore};
use lecta::scraping::{ContentExtractor, LeadOptions, NoopExtractor, ReadabilityExtractor, ReaderExtractor};
use lecta::session::{FeedSession, DEFAULT_WINDOW};
use lecta::storage::{MemorySlotStore, SlotStore, SqliteSlotStore};

const DEFAULT_FEED_URL: &str = "https://www.reddit.com/r/worldnews/hot.json";
const DEFAULT_USER_AGENT: &str = "lecta/0.1";
const DEFAULT_READER_URL: &str = "https://r.jina.ai/";
const DEFAULT_RULES_SLOT: &str = "lecta_filter_rules";
const DEFAULT_CACHE_SLOT: &str = "lecta_article_cache";

#[derive(Parser, Debug)]
#[command(name = "lecta", about = "Lecta article enrichment and categorization")]
struct Args {
    /// Path to config.toml
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Override log level (info, debug, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Load feed pages and print the enriched articles
    Feed {
        #[arg(long, default_value_t = 1)]
        pages: usize,
    },
    /// Classify headlines with the stored rules
    Classify {
        /// Ask the remote classifier instead of the local rules
        #[arg(long)]
        remote: bool,
        #[arg(required = true)]
        headlines: Vec<String>,
    },
    /// Inspect or replace the rule set
    Rules {
        #[command(subcommand)]
        action: RulesAction,
    },
    /// Inspect the enrichment cache
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },
}

#[derive(Subcommand, Debug)]
enum RulesAction {
    List,
    Reset,
    Import { file: PathBuf },
    Export,
}

#[derive(Subcommand, Debug)]
enum CacheAction {
    Stats,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize logging
    let filter = EnvFilter::try_new(&args.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(filter).init();

    // Resolve config paths
    let default_path = PathBuf::from("config.default.toml");
    let override_path = if let Some(p) = args.config {
        if !p.exists() {
            error!(path = ?p, "specified config file not found");
            return Err(anyhow::anyhow!("Config file not found: {}", p.display()));
        }
        Some(p)
    } else {
        let p = PathBuf::from("config.toml");
        if p.exists() { Some(p) } else { None }
    };

    let config = match Config::load_with_defaults(
        if default_path.exists() { Some(&default_path) } else { None },
        override_path.as_deref(),
    )
    .await
    {
        Ok(cfg) => cfg,
        Err(e) => {
            error!(%e, "failed to load configuration");
            return Err(e);
        }
    };
    info!(default = ?default_path, override = ?override_path, "configuration loaded");

    let store = open_slot_store(&config).await?;
    let enrichment = &config.enrichment;
    let rules = Arc::new(
        RuleStore::open(
            store.clone(),
            enrichment.rules_slot.clone().unwrap_or_else(|| DEFAULT_RULES_SLOT.to_string()),
        )
        .await,
    );

    match args.command {
        Command::Rules { action } => run_rules(&rules, action).await,
        Command::Classify { remote, headlines } => {
            if remote {
                let classifier = create_remote_classifier(&config)
                    .context("remote classifier is not configured")?;
                let categories = classifier.classify_headlines(&headlines).await?;
                for (headline, category) in headlines.iter().zip(categories) {
                    println!("[{}] {}", category, headline);
                }
            } else {
                let rule_set = rules.rule_set().await;
                for (headline, category) in headlines.iter().zip(rule_set.classify_batch(&headlines[..])) {
                    println!("[{}] {}", category, headline);
                }
            }
            Ok(())
        }
        Command::Cache { action: CacheAction::Stats } => {
            let cache = open_cache(&config, store).await;
            println!("{} cached enrichment(s)", cache.len().await);
            Ok(())
        }
        Command::Feed { pages } => {
            let cache = Arc::new(open_cache(&config, store).await);
            let extractor = create_extractor(&config)?;
            let timeout = enrichment
                .extraction_timeout_seconds
                .map(Duration::from_secs)
                .unwrap_or(DEFAULT_EXTRACTION_TIMEOUT);
            let pipeline = EnrichmentPipeline::new(rules, cache, extractor)
                .with_remote(create_remote_classifier(&config))
                .with_extraction_timeout(timeout);

            let session = FeedSession::new(create_feed_source(&config)?, Arc::new(pipeline))
                .with_window(enrichment.window.unwrap_or(DEFAULT_WINDOW));
            run_feed(&session, pages).await
        }
    }
}

async fn open_slot_store(config: &Config) -> Result<Arc<dyn SlotStore>> {
    let Some(path) = config.storage.path.as_deref() else {
        info!("No storage path configured, rules and cache stay in memory");
        return Ok(Arc::new(MemorySlotStore::new()));
    };

    let db_path_abs = match tokio::fs::canonicalize(path).await {
        Ok(p) => p.to_string_lossy().to_string(),
        Err(_) => path.to_string(),
    };
    info!(db_path = %db_path_abs, "resolved DB path");

    let pool = match init_db_pool(&db_path_abs).await {
        Ok(p) => p,
        Err(e) => {
            error!(%e, db_path = %db_path_abs, "failed to initialize database pool");
            return Err(e);
        }
    };
    Ok(Arc::new(SqliteSlotStore::new(pool).await?))
}

async fn open_cache(config: &Config, store: Arc<dyn SlotStore>) -> EnrichmentCache {
    let enrichment = &config.enrichment;
    EnrichmentCache::init(
        store,
        enrichment.cache_slot.clone().unwrap_or_else(|| DEFAULT_CACHE_SLOT.to_string()),
        chrono::Duration::days(enrichment.cache_ttl_days.unwrap_or(DEFAULT_TTL_DAYS)),
    )
    .await
}

fn create_feed_source(config: &Config) -> Result<Arc<dyn FeedSource>> {
    let feed = &config.feed;
    let url = feed.url.clone().unwrap_or_else(|| DEFAULT_FEED_URL.to_string());
    let timeout = feed.timeout_seconds.unwrap_or(10);
    let user_agent = feed.user_agent.as_deref().unwrap_or(DEFAULT_USER_AGENT);
    let max_retries = feed.max_retries.unwrap_or(3);

    match feed.kind.as_deref().unwrap_or("reddit") {
        "reddit" => Ok(Arc::new(
            RedditFeedSource::new(url, timeout, user_agent)?
                .with_fallback(feed.fallback_url.clone())
                .with_page_size(feed.page_size.unwrap_or(40))
                .with_retries(max_retries, Duration::from_secs(1)),
        )),
        "rss" => Ok(Arc::new(
            RssFeedSource::new(url, timeout, user_agent)?.with_retries(max_retries),
        )),
        other => anyhow::bail!("Unknown feed kind: {}", other),
    }
}

fn create_extractor(config: &Config) -> Result<Arc<dyn ContentExtractor>> {
    let extractor = &config.extractor;
    let defaults = LeadOptions::default();
    let options = LeadOptions {
        min_paragraph_chars: extractor.min_paragraph_chars.unwrap_or(defaults.min_paragraph_chars),
        max_sentences: extractor.max_sentences.unwrap_or(defaults.max_sentences),
    };
    let timeout = extractor.timeout_seconds.unwrap_or(10);

    match extractor.adapter.as_deref().unwrap_or("reader") {
        "reader" => {
            let reader_url = extractor.reader_url.clone().unwrap_or_else(|| DEFAULT_READER_URL.to_string());
            Ok(Arc::new(ReaderExtractor::new(reader_url, timeout, options)?))
        }
        "readability" => Ok(Arc::new(ReadabilityExtractor::new(timeout, options)?)),
        "none" => Ok(Arc::new(NoopExtractor)),
        other => anyhow::bail!("Unknown extractor adapter: {}", other),
    }
}

/// Remote classification is optional: it stays off without a configured API key.
fn create_remote_classifier(config: &Config) -> Option<Arc<dyn RemoteClassifier>> {
    let classifier = config.classifier.as_ref()?;
    let Some(api_key_env) = classifier.api_key_env.as_deref() else {
        info!("Remote classifier has no api_key_env, using local rules");
        return None;
    };
    let api_key = match std::env::var(api_key_env) {
        Ok(key) if !key.is_empty() => key,
        _ => {
            info!("Env var '{}' not set, using local rules", api_key_env);
            return None;
        }
    };

    let api_url = classifier
        .api_url
        .clone()
        .unwrap_or_else(|| "https://openrouter.ai/api/v1/chat/completions".to_string());
    let model = classifier.model.clone().unwrap_or_else(|| "openai/gpt-4o-mini".to_string());
    info!("Remote classifier enabled: {}", model);

    let provider = RemoteLlmProvider::new(api_url, api_key, model)
        .with_defaults(classifier.timeout_seconds.unwrap_or(30), None, 0.1)
        .with_attribution(classifier.referer.clone(), classifier.title.clone());
    let defaults = RetryPolicy::default();
    let retry = RetryPolicy {
        max_retries: classifier.max_retries.unwrap_or(defaults.max_retries),
        backoff: classifier
            .retry_backoff_ms
            .map(Duration::from_millis)
            .unwrap_or(defaults.backoff),
    };
    Some(Arc::new(LlmClassifier::new(Arc::new(provider)).with_retry(retry)))
}

async fn run_rules(rules: &RuleStore, action: RulesAction) -> Result<()> {
    match action {
        RulesAction::List => {
            for rule in rules.rules().await {
                let kind = if rule.kind == lecta::rules::RuleKind::And { "AND" } else { "OR" };
                println!("{} [{}] {}: {}", rule.id, rule.category, kind, rule.keywords.join(", "));
            }
        }
        RulesAction::Reset => {
            rules.reset().await?;
            println!("Rules reset to defaults");
        }
        RulesAction::Import { file } => {
            let raw = tokio::fs::read_to_string(&file)
                .await
                .with_context(|| format!("Failed to read rules file: {}", file.display()))?;
            let parsed = parse_rules(&raw)
                .ok_or_else(|| anyhow::anyhow!("{} is not a valid rule list", file.display()))?;
            let count = parsed.len();
            rules.save_rules(parsed).await?;
            println!("Imported {} rule(s)", count);
        }
        RulesAction::Export => {
            println!("{}", serde_json::to_string_pretty(&rules.rules().await)?);
        }
    }
    Ok(())
}

async fn run_feed(session: &FeedSession, pages: usize) -> Result<()> {
    let mut page = session.load_initial().await?;
    let mut loaded = 0;

    while let Some(result) = page {
        loaded += 1;
        for article in &result.articles {
            let category = article
                .category
                .map(|c| c.to_string())
                .unwrap_or_else(|| "unclassified".to_string());
            println!("[{}] {} ({})", category, article.headline, article.source);
            if !article.summary.is_empty() {
                println!("    {}", article.summary);
            }
        }
        if let Some(notice) = &result.notice {
            eprintln!("{:?}: {}", notice.severity, notice);
        }
        if result.exhausted || loaded >= pages {
            break;
        }
        page = session.load_more().await?;
    }

    info!("Feed run finished after {} page(s)", loaded);
    Ok(())
}
