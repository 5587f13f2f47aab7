use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use feed_rs::parser;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::article::RawItem;

/// One page of an upstream feed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeedPage {
    pub items: Vec<RawItem>,
    /// Cursor for the next page; `None` once the feed is exhausted.
    pub next_cursor: Option<String>,
}

/// A paginated article source.
#[async_trait]
pub trait FeedSource: Send + Sync {
    async fn fetch_page(&self, cursor: Option<&str>) -> Result<FeedPage>;
}

fn build_client(timeout_secs: u64, user_agent: &str) -> Result<Client> {
    Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .user_agent(user_agent)
        .build()
        .context("failed to build reqwest client")
}

/// Delay before `attempt` (1-based): none for the first, then 1x, 2x, 4x...
fn backoff_for(base: Duration, attempt: u32) -> Duration {
    if attempt <= 1 {
        return Duration::ZERO;
    }
    base.saturating_mul(2u32.saturating_pow(attempt - 2))
}

/// Fetch a URL, retrying server errors, rate limiting and network failures.
async fn fetch_with_retries(
    client: &Client,
    url: &str,
    max_retries: u32,
    base_backoff: Duration,
) -> Result<Vec<u8>> {
    let mut last_error = None;

    for attempt in 1..=max_retries.max(1) {
        if attempt > 1 {
            let backoff = backoff_for(base_backoff, attempt);
            info!("Retrying fetch for {} (attempt {}/{}) after {:?}...", url, attempt, max_retries, backoff);
            tokio::time::sleep(backoff).await;
        }

        match client.get(url).send().await {
            Ok(response) => {
                let status = response.status();
                if status.is_success() {
                    let bytes = response.bytes().await.context("failed to read response body")?;
                    return Ok(bytes.to_vec());
                } else if status.is_server_error() {
                    last_error = Some(anyhow::anyhow!("server error: {}", status));
                    continue;
                } else if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
                    last_error = Some(anyhow::anyhow!("rate limited: {}", status));
                    continue;
                } else {
                    // Client error (4xx) - likely permanent, don't retry
                    return Err(anyhow::anyhow!("feed fetch failed with status: {}", status));
                }
            }
            Err(e) => {
                last_error = Some(anyhow::Error::new(e).context("network error during fetch"));
            }
        }
    }

    Err(last_error.unwrap_or_else(|| anyhow::anyhow!("unknown error after retries")))
}

/// Reddit-style listing JSON: `data.children[].data` plus `data.after`.
pub struct RedditFeedSource {
    url: String,
    fallback_url: Option<String>,
    page_size: u32,
    max_retries: u32,
    retry_backoff: Duration,
    client: Client,
}

impl RedditFeedSource {
    pub fn new(url: impl Into<String>, timeout_secs: u64, user_agent: &str) -> Result<Self> {
        Ok(Self {
            url: url.into(),
            fallback_url: None,
            page_size: 40,
            max_retries: 3,
            retry_backoff: Duration::from_secs(1),
            client: build_client(timeout_secs, user_agent)?,
        })
    }

    pub fn with_fallback(mut self, fallback_url: Option<String>) -> Self {
        self.fallback_url = fallback_url;
        self
    }

    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size;
        self
    }

    pub fn with_retries(mut self, max_retries: u32, backoff: Duration) -> Self {
        self.max_retries = max_retries;
        self.retry_backoff = backoff;
        self
    }

    fn page_url(&self, base: &str, cursor: Option<&str>) -> Result<String> {
        let mut url = url::Url::parse(base).with_context(|| format!("invalid feed URL: {}", base))?;
        {
            let mut query = url.query_pairs_mut();
            if let Some(after) = cursor {
                query.append_pair("after", after);
            }
            query.append_pair("limit", &self.page_size.to_string());
            query.append_pair("raw_json", "1");
        }
        Ok(url.to_string())
    }

    async fn fetch_from(&self, base: &str, cursor: Option<&str>) -> Result<FeedPage> {
        let url = self.page_url(base, cursor)?;
        let body = fetch_with_retries(&self.client, &url, self.max_retries, self.retry_backoff).await?;
        let text = String::from_utf8_lossy(&body);
        parse_listing(&text)
    }
}

#[async_trait]
impl FeedSource for RedditFeedSource {
    async fn fetch_page(&self, cursor: Option<&str>) -> Result<FeedPage> {
        match self.fetch_from(&self.url, cursor).await {
            Ok(page) => Ok(page),
            Err(primary) => {
                let Some(fallback) = &self.fallback_url else {
                    return Err(primary);
                };
                warn!("Primary feed fetch failed ({:#}), trying fallback {}", primary, fallback);
                self.fetch_from(fallback, cursor)
                    .await
                    .context("fallback feed fetch failed")
            }
        }
    }
}

#[derive(Debug, Deserialize)]
struct Listing {
    data: Option<ListingData>,
}

#[derive(Debug, Deserialize)]
struct ListingData {
    #[serde(default)]
    children: Vec<ListingChild>,
    after: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ListingChild {
    data: Option<Post>,
}

#[derive(Debug, Deserialize)]
struct Post {
    id: String,
    title: Option<String>,
    url: Option<String>,
    domain: Option<String>,
    created_utc: Option<f64>,
}

/// Parse a listing body. A listing without data is an empty, final page.
pub fn parse_listing(body: &str) -> Result<FeedPage> {
    let listing: Listing = serde_json::from_str(body).context("failed to parse listing JSON")?;
    let Some(data) = listing.data else {
        return Ok(FeedPage::default());
    };

    let items = data
        .children
        .into_iter()
        .filter_map(|child| child.data)
        .filter_map(|post| {
            let Some(url) = post.url.filter(|u| !u.is_empty()) else {
                debug!("Skipping post {} without URL", post.id);
                return None;
            };
            Some(RawItem {
                id: post.id,
                title: post.title.unwrap_or_default(),
                url,
                source: post.domain.unwrap_or_else(|| "Reddit".to_string()),
                published_at: post
                    .created_utc
                    .and_then(|ts| Utc.timestamp_opt(ts as i64, 0).single()),
            })
        })
        .collect();

    Ok(FeedPage {
        items,
        next_cursor: data.after.filter(|a| !a.is_empty()),
    })
}

/// RSS/Atom feed; always a single page.
pub struct RssFeedSource {
    url: String,
    max_retries: u32,
    client: Client,
}

impl RssFeedSource {
    pub fn new(url: impl Into<String>, timeout_secs: u64, user_agent: &str) -> Result<Self> {
        Ok(Self {
            url: url.into(),
            max_retries: 3,
            client: build_client(timeout_secs, user_agent)?,
        })
    }

    pub fn with_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }
}

#[async_trait]
impl FeedSource for RssFeedSource {
    async fn fetch_page(&self, cursor: Option<&str>) -> Result<FeedPage> {
        if cursor.is_some() {
            return Ok(FeedPage::default());
        }
        let body = fetch_with_retries(&self.client, &self.url, self.max_retries, Duration::from_secs(1)).await?;
        parse_feed(&body)
    }
}

/// Convert an RSS/Atom document into a final page.
pub fn parse_feed(bytes: &[u8]) -> Result<FeedPage> {
    let feed = parser::parse(bytes).context("failed to parse feed")?;
    let source = feed
        .title
        .as_ref()
        .map(|t| t.content.clone())
        .unwrap_or_else(|| "RSS".to_string());

    let items = feed
        .entries
        .into_iter()
        .filter_map(|entry| {
            let url = entry.links.first().map(|l| l.href.clone()).unwrap_or_default();
            if url.is_empty() {
                debug!("Skipping entry without URL: {:?}", entry.id);
                return None;
            }
            Some(RawItem {
                id: entry.id,
                title: entry.title.map(|t| t.content).unwrap_or_default(),
                url,
                source: source.clone(),
                published_at: entry.published,
            })
        })
        .collect();

    Ok(FeedPage {
        items,
        next_cursor: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;

    const LISTING: &str = r#"{"data":{"after":null,"children":[
        {"data":{"id":"x1","title":"Storm closes harbour","url":"https://news.example/x1","domain":"news.example","created_utc":1700000000.0}}
    ]}}"#;

    #[test]
    fn backoff_doubles_and_saturates() {
        let base = Duration::from_millis(100);
        assert_eq!(backoff_for(base, 1), Duration::ZERO);
        assert_eq!(backoff_for(base, 2), base);
        assert_eq!(backoff_for(base, 4), Duration::from_millis(400));
        assert_eq!(backoff_for(base, 40), base * u32::MAX);
        assert_eq!(backoff_for(Duration::from_secs(u64::MAX / 2), 40), Duration::MAX);
    }

    #[tokio::test]
    async fn server_error_is_retried_until_success() {
        let mut server = mockito::Server::new_async().await;
        let failing = server
            .mock("GET", "/r/news.json")
            .match_query(Matcher::Any)
            .with_status(500)
            .expect(1)
            .create_async()
            .await;
        let ok = server
            .mock("GET", "/r/news.json")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(LISTING)
            .expect(1)
            .create_async()
            .await;

        let source = RedditFeedSource::new(format!("{}/r/news.json", server.url()), 5, "lecta-test")
            .unwrap()
            .with_retries(3, Duration::from_millis(5));
        let page = source.fetch_page(None).await.unwrap();

        assert_eq!(page.items.len(), 1);
        assert_eq!(page.items[0].id, "x1");
        failing.assert_async().await;
        ok.assert_async().await;
    }

    #[tokio::test]
    async fn client_error_is_not_retried() {
        let mut server = mockito::Server::new_async().await;
        let missing = server
            .mock("GET", "/r/news.json")
            .match_query(Matcher::Any)
            .with_status(404)
            .expect(1)
            .create_async()
            .await;

        let source = RedditFeedSource::new(format!("{}/r/news.json", server.url()), 5, "lecta-test")
            .unwrap()
            .with_retries(3, Duration::from_millis(5));
        let err = source.fetch_page(None).await.unwrap_err();

        assert!(format!("{:#}", err).contains("404"));
        missing.assert_async().await;
    }

    #[tokio::test]
    async fn failing_primary_falls_back() {
        let mut primary = mockito::Server::new_async().await;
        let mut fallback = mockito::Server::new_async().await;
        let down = primary
            .mock("GET", "/r/news.json")
            .match_query(Matcher::Any)
            .with_status(503)
            .expect(2)
            .create_async()
            .await;
        let up = fallback
            .mock("GET", "/r/news.json")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(LISTING)
            .create_async()
            .await;

        let source = RedditFeedSource::new(format!("{}/r/news.json", primary.url()), 5, "lecta-test")
            .unwrap()
            .with_fallback(Some(format!("{}/r/news.json", fallback.url())))
            .with_retries(2, Duration::from_millis(5));
        let page = source.fetch_page(None).await.unwrap();

        assert_eq!(page.items[0].title, "Storm closes harbour");
        down.assert_async().await;
        up.assert_async().await;
    }

    #[test]
    fn listing_maps_posts_and_cursor() {
        let body = r#"{
            "data": {
                "after": "t3_next",
                "children": [
                    {"data": {"id": "a1", "title": "Bridge reopens", "url": "https://example.com/a1",
                              "domain": "example.com", "created_utc": 1700000000.0}},
                    {"data": {"id": "a2", "title": "No link"}},
                    {"data": {"id": "a3", "url": "https://example.com/a3"}}
                ]
            }
        }"#;
        let page = parse_listing(body).unwrap();
        assert_eq!(page.next_cursor.as_deref(), Some("t3_next"));
        assert_eq!(page.items.len(), 2);
        assert_eq!(page.items[0].id, "a1");
        assert_eq!(page.items[0].source, "example.com");
        assert!(page.items[0].published_at.is_some());
        assert_eq!(page.items[1].source, "Reddit");
        assert_eq!(page.items[1].title, "");
    }

    #[test]
    fn listing_without_data_is_final() {
        let page = parse_listing("{}").unwrap();
        assert!(page.items.is_empty());
        assert!(page.next_cursor.is_none());
        assert!(parse_listing("<html>").is_err());
    }

    #[test]
    fn rss_entries_become_items() {
        let rss = r#"<?xml version="1.0"?>
            <rss version="2.0"><channel>
              <title>Daily</title>
              <item><guid>g1</guid><title>Parliament votes</title><link>https://example.com/1</link></item>
              <item><guid>g2</guid><title>No link here</title></item>
            </channel></rss>"#;
        let page = parse_feed(rss.as_bytes()).unwrap();
        assert_eq!(page.items.len(), 1);
        assert_eq!(page.items[0].title, "Parliament votes");
        assert_eq!(page.items[0].source, "Daily");
        assert!(page.next_cursor.is_none());
    }
}
