use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::category::Category;
use crate::storage::SlotStore;

pub const DEFAULT_TTL_DAYS: i64 = 7;

/// Result of enriching one article.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Enrichment {
    pub category: Category,
    pub summary: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub category: Category,
    #[serde(default)]
    pub summary: String,
    #[serde(rename = "timestamp", with = "chrono::serde::ts_milliseconds")]
    pub recorded_at: DateTime<Utc>,
}

impl CacheEntry {
    fn is_expired(&self, now: DateTime<Utc>, ttl: Duration) -> bool {
        now - self.recorded_at > ttl
    }
}

/// Article id -> enrichment, persisted as one slot and expired after a TTL.
///
/// Every mutation is flushed while the entry lock is held, so a later write
/// for a key is always the one that ends up persisted. Flush failures are
/// logged and otherwise ignored.
pub struct EnrichmentCache {
    store: Arc<dyn SlotStore>,
    slot: String,
    ttl: Duration,
    entries: Mutex<HashMap<String, CacheEntry>>,
}

impl EnrichmentCache {
    /// Load the persisted cache, dropping expired or unreadable entries.
    /// Never fails: unreadable state yields an empty cache.
    pub async fn init(store: Arc<dyn SlotStore>, slot: impl Into<String>, ttl: Duration) -> Self {
        let slot = slot.into();
        let raw = match store.read(&slot).await {
            Ok(raw) => raw,
            Err(e) => {
                warn!("cache: failed to read slot {}: {:#}", slot, e);
                None
            }
        };

        let mut entries = HashMap::new();
        let mut dropped = 0usize;
        if let Some(raw) = raw {
            match serde_json::from_str::<HashMap<String, serde_json::Value>>(&raw) {
                Ok(values) => {
                    let now = Utc::now();
                    for (id, value) in values {
                        match serde_json::from_value::<CacheEntry>(value) {
                            Ok(entry) if !entry.is_expired(now, ttl) => {
                                entries.insert(id, entry);
                            }
                            Ok(_) => dropped += 1,
                            Err(e) => {
                                debug!("cache: dropping unreadable entry {}: {}", id, e);
                                dropped += 1;
                            }
                        }
                    }
                }
                Err(e) => warn!("cache: persisted cache is corrupted, starting empty: {}", e),
            }
        }

        let cache = Self {
            store,
            slot,
            ttl,
            entries: Mutex::new(entries),
        };

        if dropped > 0 {
            let entries = cache.entries.lock().await;
            info!("cache: purged {} stale entries, {} remain", dropped, entries.len());
            cache.flush(&entries).await;
        }
        cache
    }

    pub async fn get(&self, id: &str) -> Option<CacheEntry> {
        let mut entries = self.entries.lock().await;
        let expired = entries.get(id)?.is_expired(Utc::now(), self.ttl);
        if expired {
            // purged from the persisted set on the next flush
            entries.remove(id);
            return None;
        }
        entries.get(id).cloned()
    }

    pub async fn put(&self, id: &str, category: Category, summary: &str) {
        let mut entries = self.entries.lock().await;
        entries.insert(
            id.to_string(),
            CacheEntry {
                category,
                summary: summary.to_string(),
                recorded_at: Utc::now(),
            },
        );
        self.flush(&entries).await;
    }

    /// Upsert many entries with a single flush.
    pub async fn put_batch<I>(&self, updates: I)
    where
        I: IntoIterator<Item = (String, Enrichment)>,
    {
        let mut entries = self.entries.lock().await;
        let now = Utc::now();
        let mut count = 0usize;
        for (id, enrichment) in updates {
            entries.insert(
                id,
                CacheEntry {
                    category: enrichment.category,
                    summary: enrichment.summary,
                    recorded_at: now,
                },
            );
            count += 1;
        }
        if count > 0 {
            debug!("cache: storing {} entries", count);
            self.flush(&entries).await;
        }
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }

    async fn flush(&self, entries: &HashMap<String, CacheEntry>) {
        let serialized = match serde_json::to_string(entries) {
            Ok(s) => s,
            Err(e) => {
                warn!("cache: failed to serialize entries: {}", e);
                return;
            }
        };
        if let Err(e) = self.store.write(&self.slot, &serialized).await {
            warn!("cache: failed to persist {} entries: {:#}", entries.len(), e);
        }
    }
}
