//! In-memory `ForgeState` for tests and single-process hosts.

use dashmap::DashMap;
use serde_json::Value;
use treeforge_core::state::ForgeState;
use treeforge_types::error::StateError;

/// DashMap-backed state store. Share it between a session and the host by
/// wrapping it in an `Arc`.
#[derive(Debug, Default)]
pub struct MemoryForgeState {
    entries: DashMap<String, Value>,
}

impl MemoryForgeState {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a key directly, bypassing the engine. Useful for rehydration
    /// setups.
    pub fn insert(&self, key: impl Into<String>, value: Value) {
        self.entries.insert(key.into(), value);
    }

    /// Point-in-time copy of a single key.
    pub fn peek(&self, key: &str) -> Option<Value> {
        self.entries.get(key).map(|entry| entry.value().clone())
    }

    /// Number of stored keys.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the store holds no keys.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl ForgeState for MemoryForgeState {
    async fn get(&self, key: &str) -> Result<Option<Value>, StateError> {
        Ok(self.entries.get(key).map(|entry| entry.value().clone()))
    }

    async fn set(&self, key: &str, value: Value) -> Result<(), StateError> {
        self.entries.insert(key.to_string(), value);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
