//! SQLite-backed `ForgeState` implementation.
//!
//! Values are stored as JSON text in a single `forge_state` table and
//! deserialized on read. Callers wanting per-session isolation compose this
//! with [`crate::scoped::ScopedForgeState`].

use chrono::Utc;
use serde_json::Value;
use sqlx::Row;
use sqlx::sqlite::SqlitePool;
use treeforge_core::state::ForgeState;
use treeforge_types::error::StateError;

/// SQLite-backed state store.
#[derive(Debug, Clone)]
pub struct SqliteForgeState {
    pool: SqlitePool,
}

impl SqliteForgeState {
    /// Connect to `url` (e.g. `sqlite::memory:` or `sqlite://forge.db`) and
    /// ensure the backing table exists.
    pub async fn connect(url: &str) -> Result<Self, StateError> {
        let pool = SqlitePool::connect(url)
            .await
            .map_err(|e| StateError::Backend(e.to_string()))?;
        Self::with_pool(pool).await
    }

    /// Wrap an existing pool and ensure the backing table exists.
    pub async fn with_pool(pool: SqlitePool) -> Result<Self, StateError> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS forge_state (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )",
        )
        .execute(&pool)
        .await
        .map_err(|e| StateError::Backend(e.to_string()))?;

        Ok(Self { pool })
    }
}

impl ForgeState for SqliteForgeState {
    async fn get(&self, key: &str) -> Result<Option<Value>, StateError> {
        let row = sqlx::query("SELECT value FROM forge_state WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StateError::Backend(e.to_string()))?;

        match row {
            Some(row) => {
                let text: String = row
                    .try_get("value")
                    .map_err(|e| StateError::Backend(e.to_string()))?;
                let value = serde_json::from_str(&text)
                    .map_err(|e| StateError::Serialization(e.to_string()))?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: Value) -> Result<(), StateError> {
        let text = serde_json::to_string(&value)
            .map_err(|e| StateError::Serialization(e.to_string()))?;

        sqlx::query(
            "INSERT INTO forge_state (key, value, updated_at)
             VALUES (?, ?, ?)
             ON CONFLICT(key) DO UPDATE SET
                 value = excluded.value,
                 updated_at = excluded.updated_at",
        )
        .bind(key)
        .bind(text)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(|e| StateError::Backend(e.to_string()))?;

        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
