//! Session-ID namespacing for shared stores.
//!
//! The engine always passes bare protocol keys (`CTN`, `LTA`, `<key>_AR`);
//! when several sessions share one physical store, wrap it so each session's
//! keys land under its own prefix.

use serde_json::Value;
use treeforge_core::state::ForgeState;
use treeforge_types::error::StateError;

/// Wrapper prefixing every key with `"<scope>:"`.
#[derive(Debug)]
pub struct ScopedForgeState<S> {
    scope: String,
    inner: S,
}

impl<S: ForgeState> ScopedForgeState<S> {
    /// Scope `inner` under the given namespace (typically a session ID).
    pub fn new(scope: impl Into<String>, inner: S) -> Self {
        Self {
            scope: scope.into(),
            inner,
        }
    }

    /// The namespace applied to every key.
    pub fn scope(&self) -> &str {
        &self.scope
    }

    fn scoped_key(&self, key: &str) -> String {
        format!("{}:{}", self.scope, key)
    }
}

impl<S: ForgeState> ForgeState for ScopedForgeState<S> {
    async fn get(&self, key: &str) -> Result<Option<Value>, StateError> {
        self.inner.get(&self.scoped_key(key)).await
    }

    async fn set(&self, key: &str, value: Value) -> Result<(), StateError> {
        self.inner.set(&self.scoped_key(key), value).await
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryForgeState;
    use serde_json::json;
    use std::sync::Arc;

    #[tokio::test]
    async fn sessions_do_not_see_each_other() {
        let shared = Arc::new(MemoryForgeState::new());
        let a = ScopedForgeState::new("session-a", Arc::clone(&shared));
        let b = ScopedForgeState::new("session-b", Arc::clone(&shared));

        a.set("CTN", json!("Root")).await.unwrap();
        assert_eq!(a.get("CTN").await.unwrap(), Some(json!("Root")));
        assert_eq!(b.get("CTN").await.unwrap(), None);

        // The physical key carries the namespace.
        assert_eq!(shared.peek("session-a:CTN"), Some(json!("Root")));
    }
}
