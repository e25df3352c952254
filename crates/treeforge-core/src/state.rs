//! Durable session state: the `ForgeState` capability and the commit protocol.
//!
//! A walk persists its progress under a small set of well-known keys so a
//! crashed or restarted host can resume mid-flight:
//!
//! | key | value | meaning |
//! |---|---|---|
//! | `CTN` | node key | node currently being walked |
//! | `LTA` | action key | last action whose response was committed |
//! | `<actionKey>_AR` | response envelope | committed response for an action |
//! | `<actionKey>_Int` | opaque | action-owned intermediate state |
//!
//! Commit ordering is part of the protocol: `CTN` is written before the
//! node's before-visit callback fires, and a response write always precedes
//! the `LTA` write for that action. Reads swallow backend faults and surface
//! them as absence; writes propagate.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde_json::Value;
use treeforge_types::error::StateError;
use treeforge_types::response::ActionResponse;

/// Key under which the current node is persisted.
pub const CURRENT_NODE_KEY: &str = "CTN";

/// Key under which the most recently committed action key is persisted.
pub const LAST_ACTION_KEY: &str = "LTA";

/// Suffix appended to an action key for its committed response.
pub const RESPONSE_SUFFIX: &str = "_AR";

/// Suffix appended to an action key for its persisted intermediates.
pub const INTERMEDIATE_SUFFIX: &str = "_Int";

/// State key holding the committed response for `action_key`.
pub fn response_key(action_key: &str) -> String {
    format!("{action_key}{RESPONSE_SUFFIX}")
}

/// State key reserved for intermediates persisted by `action_key`.
pub fn intermediate_key(action_key: &str) -> String {
    format!("{action_key}{INTERMEDIATE_SUFFIX}")
}

// ---------------------------------------------------------------------------
// ForgeState port
// ---------------------------------------------------------------------------

/// Key/value persistence capability backing a session.
///
/// Session-ID namespacing is applied by the storage implementation, not by
/// the engine; the engine always passes bare protocol keys. Operations are
/// individually atomic but not transactional across keys.
///
/// Uses RPITIT for zero-cost async in concrete types. For dynamic dispatch
/// (trait objects), see [`BoxForgeState`].
pub trait ForgeState: Send + Sync {
    /// Read a value. `Ok(None)` means the key is absent.
    fn get(&self, key: &str) -> impl Future<Output = Result<Option<Value>, StateError>> + Send;

    /// Write a value (upsert).
    fn set(&self, key: &str, value: Value) -> impl Future<Output = Result<(), StateError>> + Send;
}

impl<S: ForgeState> ForgeState for Arc<S> {
    async fn get(&self, key: &str) -> Result<Option<Value>, StateError> {
        (**self).get(key).await
    }

    async fn set(&self, key: &str, value: Value) -> Result<(), StateError> {
        (**self).set(key, value).await
    }
}

/// Object-safe version of [`ForgeState`] for dynamic dispatch.
///
/// A blanket implementation is provided for all types implementing
/// [`ForgeState`].
pub trait BoxForgeState: Send + Sync {
    fn get_boxed<'a>(
        &'a self,
        key: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<Option<Value>, StateError>> + Send + 'a>>;

    fn set_boxed<'a>(
        &'a self,
        key: &'a str,
        value: Value,
    ) -> Pin<Box<dyn Future<Output = Result<(), StateError>> + Send + 'a>>;
}

impl<T: ForgeState> BoxForgeState for T {
    fn get_boxed<'a>(
        &'a self,
        key: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<Option<Value>, StateError>> + Send + 'a>> {
        Box::pin(self.get(key))
    }

    fn set_boxed<'a>(
        &'a self,
        key: &'a str,
        value: Value,
    ) -> Pin<Box<dyn Future<Output = Result<(), StateError>> + Send + 'a>> {
        Box::pin(self.set(key, value))
    }
}

/// Type alias for a dynamically-dispatched state store.
pub type DynForgeState = Arc<dyn BoxForgeState>;

// ---------------------------------------------------------------------------
// SessionState: the commit layer
// ---------------------------------------------------------------------------

/// Typed view over a session's durable state implementing the commit
/// protocol and its read/write error asymmetry.
#[derive(Clone)]
pub struct SessionState {
    store: DynForgeState,
}

impl SessionState {
    /// Wrap a store handle.
    pub fn new(store: DynForgeState) -> Self {
        Self { store }
    }

    /// Access the underlying store handle.
    pub fn store(&self) -> &DynForgeState {
        &self.store
    }

    /// Read a key, swallowing backend faults as absence.
    pub async fn read_soft(&self, key: &str) -> Option<Value> {
        match self.store.get_boxed(key).await {
            Ok(value) => value,
            Err(err) => {
                tracing::debug!(key, error = %err, "state read failed, treating as absent");
                None
            }
        }
    }

    /// Committed response for an action, if any.
    pub async fn response(&self, action_key: &str) -> Option<ActionResponse> {
        let key = response_key(action_key);
        let value = self.read_soft(&key).await?;
        match serde_json::from_value(value) {
            Ok(response) => Some(response),
            Err(err) => {
                tracing::warn!(action_key, error = %err, "committed response is malformed");
                None
            }
        }
    }

    /// Key of the last action whose response was committed, if any.
    pub async fn last_action(&self) -> Option<String> {
        match self.read_soft(LAST_ACTION_KEY).await? {
            Value::String(key) => Some(key),
            other => serde_json::from_value(other).ok(),
        }
    }

    /// Node key most recently committed as current, if any.
    pub async fn current_node(&self) -> Option<String> {
        match self.read_soft(CURRENT_NODE_KEY).await? {
            Value::String(key) => Some(key),
            other => serde_json::from_value(other).ok(),
        }
    }

    /// Commit the node about to be visited.
    pub async fn commit_current_node(&self, node_key: &str) -> Result<(), StateError> {
        self.store
            .set_boxed(CURRENT_NODE_KEY, Value::String(node_key.to_owned()))
            .await?;
        tracing::debug!(node_key, "committed current node");
        Ok(())
    }

    /// Commit an action response: the response write precedes the
    /// last-action write.
    pub async fn commit_response(
        &self,
        action_key: &str,
        response: &ActionResponse,
    ) -> Result<(), StateError> {
        let value = serde_json::to_value(response)
            .map_err(|e| StateError::Serialization(e.to_string()))?;
        let key = response_key(action_key);
        self.store.set_boxed(&key, value).await?;
        self.store
            .set_boxed(LAST_ACTION_KEY, Value::String(action_key.to_owned()))
            .await?;
        tracing::debug!(action_key, status = response.status.as_str(), "committed action response");
        Ok(())
    }

    /// Repair the last-action marker after a rehydrated skip: a response
    /// exists but the marker was lost mid-commit.
    pub async fn repair_last_action(&self, action_key: &str) -> Result<(), StateError> {
        if self.read_soft(LAST_ACTION_KEY).await.is_some() {
            return Ok(());
        }
        self.store
            .set_boxed(LAST_ACTION_KEY, Value::String(action_key.to_owned()))
            .await?;
        tracing::debug!(action_key, "repaired last-action marker from rehydrated response");
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// Store that records operations in order and can be forced to fail reads.
    #[derive(Default)]
    struct RecordingStore {
        entries: Mutex<HashMap<String, Value>>,
        ops: Mutex<Vec<String>>,
        fail_reads: bool,
    }

    impl ForgeState for RecordingStore {
        async fn get(&self, key: &str) -> Result<Option<Value>, StateError> {
            if self.fail_reads {
                return Err(StateError::Backend("read refused".to_string()));
            }
            self.ops.lock().unwrap().push(format!("get:{key}"));
            Ok(self.entries.lock().unwrap().get(key).cloned())
        }

        async fn set(&self, key: &str, value: Value) -> Result<(), StateError> {
            self.ops.lock().unwrap().push(format!("set:{key}"));
            self.entries.lock().unwrap().insert(key.to_string(), value);
            Ok(())
        }
    }

    fn session_state(store: Arc<RecordingStore>) -> SessionState {
        SessionState::new(store as DynForgeState)
    }

    // -------------------------------------------------------------------
    // Key formatting
    // -------------------------------------------------------------------

    #[test]
    fn protocol_keys_are_verbatim() {
        assert_eq!(CURRENT_NODE_KEY, "CTN");
        assert_eq!(LAST_ACTION_KEY, "LTA");
        assert_eq!(response_key("A1"), "A1_AR");
        assert_eq!(intermediate_key("A1"), "A1_Int");
    }

    // -------------------------------------------------------------------
    // Commit ordering
    // -------------------------------------------------------------------

    #[tokio::test]
    async fn response_write_precedes_last_action_write() {
        let store = Arc::new(RecordingStore::default());
        let state = session_state(Arc::clone(&store));

        state
            .commit_response("A1", &ActionResponse::new("Success"))
            .await
            .unwrap();

        let ops = store.ops.lock().unwrap().clone();
        assert_eq!(ops, ["set:A1_AR", "set:LTA"]);
        assert_eq!(state.last_action().await, Some("A1".to_string()));
        assert_eq!(state.response("A1").await.unwrap().status, "Success");
    }

    // -------------------------------------------------------------------
    // Read/write error asymmetry
    // -------------------------------------------------------------------

    #[tokio::test]
    async fn failing_reads_surface_as_absence() {
        let store = Arc::new(RecordingStore {
            fail_reads: true,
            ..Default::default()
        });
        let state = session_state(store);

        assert!(state.response("A1").await.is_none());
        assert!(state.last_action().await.is_none());
        assert!(state.current_node().await.is_none());
    }

    // -------------------------------------------------------------------
    // Last-action repair
    // -------------------------------------------------------------------

    #[tokio::test]
    async fn repair_only_writes_when_marker_is_absent() {
        let store = Arc::new(RecordingStore::default());
        let state = session_state(Arc::clone(&store));

        state.repair_last_action("A1").await.unwrap();
        assert_eq!(state.last_action().await, Some("A1".to_string()));

        // A present marker is left alone.
        state.repair_last_action("A2").await.unwrap();
        assert_eq!(state.last_action().await, Some("A1".to_string()));
    }

    #[tokio::test]
    async fn malformed_response_reads_as_absent() {
        let store = Arc::new(RecordingStore::default());
        store
            .entries
            .lock()
            .unwrap()
            .insert("A1_AR".to_string(), json!({ "noStatus": true }));
        let state = session_state(store);

        assert!(state.response("A1").await.is_none());
    }
}
