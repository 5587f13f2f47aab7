/*!
common/src/lib.rs

Shared configuration types and storage helpers for Lecta.

This file provides:
- Config data structures (deserialized from TOML)
- A layered async loader (default file + override file)
- A helper to open the SQLite pool backing the persisted slots
*/

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::path::Path;
use std::str::FromStr;

/// Durable storage section
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Path to the sqlite database file (e.g. "data/lecta.db").
    /// When absent, rules and cache live in memory only.
    pub path: Option<String>,
}

/// Upstream feed section
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FeedConfig {
    /// "reddit" (paginated listing JSON) or "rss" (single page)
    pub kind: Option<String>,
    pub url: Option<String>,
    /// Tried when the primary URL fails (reddit only)
    pub fallback_url: Option<String>,
    pub page_size: Option<u32>,
    pub timeout_seconds: Option<u64>,
    pub max_retries: Option<u32>,
    pub user_agent: Option<String>,
}

/// Enrichment pipeline section
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EnrichmentConfig {
    /// How many new articles of each page are enriched eagerly
    pub window: Option<usize>,
    pub cache_ttl_days: Option<i64>,
    pub extraction_timeout_seconds: Option<u64>,
    pub rules_slot: Option<String>,
    pub cache_slot: Option<String>,
}

/// Content extraction section
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExtractorConfig {
    pub adapter: Option<String>, // "reader", "readability", "none"
    pub reader_url: Option<String>,
    pub timeout_seconds: Option<u64>,
    pub min_paragraph_chars: Option<usize>,
    pub max_sentences: Option<usize>,
}

/// Remote (LLM) classifier section. The feature is off unless the
/// environment variable named by `api_key_env` is set.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClassifierConfig {
    pub api_url: Option<String>,
    pub api_key_env: Option<String>,
    pub model: Option<String>,
    pub timeout_seconds: Option<u64>,
    pub max_retries: Option<u32>,
    pub retry_backoff_ms: Option<u64>,
    pub referer: Option<String>,
    pub title: Option<String>,
}

/// Top-level application configuration (deserialized from config.toml)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub feed: FeedConfig,
    #[serde(default)]
    pub enrichment: EnrichmentConfig,
    #[serde(default)]
    pub extractor: ExtractorConfig,
    pub classifier: Option<ClassifierConfig>,
}

impl Config {
    /// Load configuration from a TOML file asynchronously.
    ///
    /// Example:
    ///   let cfg = Config::from_file("config.toml").await?;
    pub async fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let data = tokio::fs::read_to_string(path.as_ref())
            .await
            .with_context(|| format!("Failed to read config file: {}", path.as_ref().display()))?;
        let cfg: Config = toml::from_str(&data).context("Failed to parse TOML configuration")?;
        Ok(cfg)
    }

    /// Load configuration with an optional default file and an optional override file.
    /// If both are present, they are merged (override takes precedence).
    pub async fn load_with_defaults(default_path: Option<&Path>, override_path: Option<&Path>) -> Result<Self> {
        let mut config_value = toml::Value::Table(toml::map::Map::new());

        if let Some(path) = default_path {
            if path.exists() {
                let data = tokio::fs::read_to_string(path).await
                    .with_context(|| format!("Failed to read default config: {}", path.display()))?;
                let val: toml::Value = toml::from_str(&data)
                    .context("Failed to parse default configuration")?;
                merge_toml(&mut config_value, val);
            }
        }

        if let Some(path) = override_path {
            if path.exists() {
                let data = tokio::fs::read_to_string(path).await
                    .with_context(|| format!("Failed to read override config: {}", path.display()))?;
                let val: toml::Value = toml::from_str(&data)
                    .context("Failed to parse override configuration")?;
                merge_toml(&mut config_value, val);
            }
        }

        let cfg: Config = config_value.try_into().context("Failed to parse merged configuration")?;
        Ok(cfg)
    }
}

fn merge_toml(a: &mut toml::Value, b: toml::Value) {
    match (a, b) {
        (toml::Value::Table(a_map), toml::Value::Table(b_map)) => {
            for (k, v) in b_map {
                if let Some(a_val) = a_map.get_mut(&k) {
                    merge_toml(a_val, v);
                } else {
                    a_map.insert(k, v);
                }
            }
        }
        (a_val, b_val) => *a_val = b_val,
    }
}

/// Initialize an SQLite connection pool.
///
/// Creates the parent directory if necessary and returns a small pool in WAL mode.
/// Schema creation is left to the caller.
///
/// Example:
///   let pool = init_db_pool("data/lecta.db").await?;
pub async fn init_db_pool(path: &str) -> Result<SqlitePool> {
    if let Some(parent) = Path::new(path).parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent).await.with_context(|| {
                format!("Failed to create DB parent directory: {}", parent.display())
            })?;
        }
    }

    let options = SqliteConnectOptions::from_str(&format!("sqlite://{}", path))?
        .create_if_missing(true)
        .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal);

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await
        .with_context(|| format!("Failed to connect to sqlite database at path: {}", path))?;

    Ok(pool)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_from_string() {
        let toml = r#"
            [storage]
            path = "data/test.db"

            [feed]
            url = "https://www.reddit.com/r/news.json"
            page_size = 25

            [enrichment]
            window = 10

            [classifier]
            api_key_env = "OPENROUTER_API_KEY"
            max_retries = 1
        "#;

        let cfg: Config = toml::from_str(toml).expect("parse config");
        assert_eq!(cfg.storage.path.as_deref(), Some("data/test.db"));
        assert_eq!(cfg.feed.page_size, Some(25));
        assert_eq!(cfg.enrichment.window, Some(10));
        assert!(cfg.extractor.adapter.is_none());
        let classifier = cfg.classifier.expect("classifier section");
        assert_eq!(classifier.api_key_env.as_deref(), Some("OPENROUTER_API_KEY"));
    }

    #[test]
    fn empty_config_is_valid() {
        let cfg: Config = toml::from_str("").expect("parse empty config");
        assert!(cfg.storage.path.is_none());
        assert!(cfg.classifier.is_none());
    }

    #[tokio::test]
    async fn override_file_wins_over_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let default_path = dir.path().join("config.default.toml");
        let override_path = dir.path().join("config.toml");
        tokio::fs::write(&default_path, "[feed]\npage_size = 40\ntimeout_seconds = 10\n")
            .await
            .expect("write defaults");
        tokio::fs::write(&override_path, "[feed]\npage_size = 5\n")
            .await
            .expect("write override");

        let cfg = Config::load_with_defaults(Some(&default_path), Some(&override_path))
            .await
            .expect("load config");
        assert_eq!(cfg.feed.page_size, Some(5));
        assert_eq!(cfg.feed.timeout_seconds, Some(10));
    }

    #[tokio::test]
    async fn db_pool_creates_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let db_path = dir.path().join("nested").join("lecta.db");
        let db_path_str = db_path.to_string_lossy().to_string();

        let pool = init_db_pool(&db_path_str).await.expect("init pool");
        let conn = pool.acquire().await.expect("acquire conn");
        drop(conn);
        assert!(db_path.exists());
    }
}
