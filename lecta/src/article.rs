use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::category::Category;

/// A single item as delivered by a feed source, before enrichment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawItem {
    pub id: String,
    pub title: String,
    pub url: String,
    pub source: String,
    pub published_at: Option<DateTime<Utc>>,
}

/// An article as shown to the reader.
///
/// `category` is `None` until the article has been classified. The enrichment
/// core only ever writes `category` and `summary`, and only on copies it hands
/// back to the caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Article {
    pub id: String,
    pub headline: String,
    pub url: String,
    pub source: String,
    pub published_at: Option<DateTime<Utc>>,
    pub category: Option<Category>,
    pub summary: String,
}

impl Article {
    pub fn is_classified(&self) -> bool {
        self.category.is_some()
    }

    pub fn with_enrichment(mut self, category: Category, summary: impl Into<String>) -> Self {
        self.category = Some(category);
        self.summary = summary.into();
        self
    }
}

impl From<RawItem> for Article {
    fn from(item: RawItem) -> Self {
        let headline = if item.title.trim().is_empty() {
            "Untitled".to_string()
        } else {
            item.title
        };
        Self {
            id: item.id,
            headline,
            url: item.url,
            source: item.source,
            published_at: item.published_at,
            category: None,
            summary: String::new(),
        }
    }
}
