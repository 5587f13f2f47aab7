use lecta::classifier::RuleSet;
use lecta::ingestion::{FeedSource, RedditFeedSource, RssFeedSource};
use lecta::rules::default_rules;
use std::sync::Arc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    let feeds: Vec<(&str, Arc<dyn FeedSource>)> = vec![
        (
            "https://www.reddit.com/r/worldnews/hot.json",
            Arc::new(RedditFeedSource::new("https://www.reddit.com/r/worldnews/hot.json", 10, "lecta-probe/0.1")?.with_page_size(10)) as Arc<dyn FeedSource>,
        ),
        (
            "https://feeds.arstechnica.com/arstechnica/index",
            Arc::new(RssFeedSource::new("https://feeds.arstechnica.com/arstechnica/index", 10, "lecta-probe/0.1")?) as Arc<dyn FeedSource>,
        ),
    ];
    let rules = RuleSet::compile(&default_rules());

    for (url, source) in feeds {
        println!("\n{}", "=".repeat(60));
        println!("Testing: {}", url);
        println!("{}", "=".repeat(60));

        match source.fetch_page(None).await {
            Ok(page) => {
                println!("✓ Success!");
                println!("  Items: {}", page.items.len());
                println!("  Next cursor: {:?}", page.next_cursor);

                if !page.items.is_empty() {
                    println!("\n  First 5 items:");
                    for (i, item) in page.items.iter().take(5).enumerate() {
                        println!("    {}. [{}] {}", i + 1, rules.classify(&item.title), item.title);
                        println!("       URL: {}", item.url);
                    }
                }
            }
            Err(e) => {
                println!("✗ Failed: {:#}", e);
            }
        }
    }
    Ok(())
}
