use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use sqlx::SqlitePool;
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::debug;

/// Durable key/value storage for whole serialized values ("slots").
///
/// A write replaces the slot's previous value entirely.
#[async_trait]
pub trait SlotStore: Send + Sync {
    async fn read(&self, slot: &str) -> Result<Option<String>>;

    async fn write(&self, slot: &str, value: &str) -> Result<()>;
}

/// Create the slots table if it does not exist yet.
pub async fn ensure_schema(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS slots (
            name TEXT PRIMARY KEY,
            value TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await
    .context("failed to create slots table")?;
    Ok(())
}

/// Slots kept in a SQLite table.
pub struct SqliteSlotStore {
    pool: SqlitePool,
}

impl SqliteSlotStore {
    /// Wraps the pool and makes sure the schema exists.
    pub async fn new(pool: SqlitePool) -> Result<Self> {
        ensure_schema(&pool).await?;
        Ok(Self { pool })
    }
}

#[async_trait]
impl SlotStore for SqliteSlotStore {
    async fn read(&self, slot: &str) -> Result<Option<String>> {
        let value = sqlx::query_scalar::<_, String>("SELECT value FROM slots WHERE name = ?")
            .bind(slot)
            .fetch_optional(&self.pool)
            .await
            .with_context(|| format!("failed to read slot {}", slot))?;
        Ok(value)
    }

    async fn write(&self, slot: &str, value: &str) -> Result<()> {
        sqlx::query("INSERT OR REPLACE INTO slots (name, value, updated_at) VALUES (?, ?, ?)")
            .bind(slot)
            .bind(value)
            .bind(Utc::now().to_rfc3339())
            .execute(&self.pool)
            .await
            .with_context(|| format!("failed to write slot {}", slot))?;
        debug!("Stored slot {} ({} bytes)", slot, value.len());
        Ok(())
    }
}

/// Process-local slots. Nothing survives a restart.
#[derive(Default)]
pub struct MemorySlotStore {
    slots: RwLock<HashMap<String, String>>,
}

impl MemorySlotStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-populate a slot, e.g. with state written by an earlier run.
    pub fn with_slot(slot: impl Into<String>, value: impl Into<String>) -> Self {
        let mut slots = HashMap::new();
        slots.insert(slot.into(), value.into());
        Self {
            slots: RwLock::new(slots),
        }
    }
}

#[async_trait]
impl SlotStore for MemorySlotStore {
    async fn read(&self, slot: &str) -> Result<Option<String>> {
        Ok(self.slots.read().await.get(slot).cloned())
    }

    async fn write(&self, slot: &str, value: &str) -> Result<()> {
        self.slots
            .write()
            .await
            .insert(slot.to_string(), value.to_string());
        Ok(())
    }
}
