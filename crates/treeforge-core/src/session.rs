//! Tree sessions: construction, the observable surface, and cancellation.
//!
//! A session binds a parsed schema to the injected capabilities (state,
//! expression executor, external executors, callbacks, registry) plus an
//! opaque user context. It is single-use per walk; the state-backed getters
//! remain valid after termination.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;

use serde_json::{Map, Value, json};
use thiserror::Error;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use treeforge_types::response::ActionResponse;
use treeforge_types::schema::{ForgeTree, TreeAction, TreeNode};
use treeforge_types::status::WalkStatus;
use uuid::Uuid;

use crate::callbacks::{DynVisitCallbacks, VisitCallbacks};
use crate::evaluate::PropertyEvaluator;
use crate::expression::{DynExpressionExecutor, ExpressionExecutor, SessionScope};
use crate::external::{DynExternalExecutor, ExternalExecutor, ExternalExecutors};
use crate::registry::ActionRegistry;
use crate::state::{DynForgeState, ForgeState, SessionState};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Session assembly errors.
#[derive(Debug, Error)]
pub enum SessionError {
    /// No state capability was supplied.
    #[error("session requires a state capability")]
    MissingState,

    /// No expression executor was supplied.
    #[error("session requires an expression executor")]
    MissingExpressionExecutor,
}

// ---------------------------------------------------------------------------
// ScopeView
// ---------------------------------------------------------------------------

/// The session surface expressions evaluate against. Owns cheap handles so
/// it can be shared with evaluators running on spawned action tasks.
pub(crate) struct ScopeView {
    session_id: String,
    tree: Arc<ForgeTree>,
    state: SessionState,
    user_context: Value,
    dependencies: Value,
}

impl SessionScope for ScopeView {
    fn session_id(&self) -> &str {
        &self.session_id
    }

    fn response<'a>(
        &'a self,
        action_key: &'a str,
    ) -> Pin<Box<dyn Future<Output = Option<ActionResponse>> + Send + 'a>> {
        Box::pin(self.state.response(action_key))
    }

    fn expression_context<'a>(&'a self) -> Pin<Box<dyn Future<Output = Value> + Send + 'a>> {
        Box::pin(async move {
            let mut actions = Map::new();
            for node in self.tree.nodes.values() {
                for action_key in node.actions.keys() {
                    if let Some(response) = self.state.response(action_key).await {
                        let value = serde_json::to_value(&response).unwrap_or(Value::Null);
                        actions.insert(action_key.clone(), value);
                    }
                }
            }

            let last = match self.state.last_action().await {
                Some(key) => self
                    .state
                    .response(&key)
                    .await
                    .and_then(|r| serde_json::to_value(&r).ok())
                    .unwrap_or(Value::Null),
                None => Value::Null,
            };

            json!({
                "session": { "id": self.session_id },
                "actions": actions,
                "last": last,
                "context": self.user_context,
                "deps": self.dependencies,
            })
        })
    }
}

// ---------------------------------------------------------------------------
// WalkEngine
// ---------------------------------------------------------------------------

/// Shared session internals; the walker and spawned action tasks reach
/// these through the session's `Arc`.
pub(crate) struct WalkEngine {
    pub(crate) session_id: String,
    pub(crate) tree: Arc<ForgeTree>,
    pub(crate) state: SessionState,
    pub(crate) scope: Arc<ScopeView>,
    pub(crate) expressions: DynExpressionExecutor,
    pub(crate) externals: Arc<ExternalExecutors>,
    pub(crate) callbacks: Option<DynVisitCallbacks>,
    pub(crate) registry: ActionRegistry,
    pub(crate) user_context: Value,
    pub(crate) token: CancellationToken,
    pub(crate) status_tx: watch::Sender<WalkStatus>,
    pub(crate) walked: AtomicBool,
}

impl WalkEngine {
    /// Evaluator bound to this session's capabilities and token.
    pub(crate) fn evaluator(&self) -> PropertyEvaluator {
        PropertyEvaluator::new(
            Arc::clone(&self.expressions),
            Arc::clone(&self.externals),
            Arc::clone(&self.scope) as Arc<dyn SessionScope>,
            self.token.clone(),
        )
    }

    pub(crate) fn set_status(&self, status: WalkStatus) {
        let previous = self.status_tx.send_replace(status);
        if previous != status {
            tracing::debug!(
                session_id = self.session_id.as_str(),
                from = %previous,
                to = %status,
                "walk status changed"
            );
        }
    }
}

// ---------------------------------------------------------------------------
// TreeSession
// ---------------------------------------------------------------------------

/// A single-use walk over one schema, with a queryable surface that stays
/// valid after the walk terminates.
#[derive(Clone)]
pub struct TreeSession {
    pub(crate) engine: Arc<WalkEngine>,
}

impl std::fmt::Debug for TreeSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TreeSession")
            .field("session_id", &self.engine.session_id)
            .finish_non_exhaustive()
    }
}

impl TreeSession {
    /// Start assembling a session for `tree`.
    pub fn builder(tree: ForgeTree) -> SessionBuilder {
        SessionBuilder::new(tree)
    }

    /// Session identifier.
    pub fn session_id(&self) -> &str {
        &self.engine.session_id
    }

    /// The schema this session walks.
    pub fn tree(&self) -> &ForgeTree {
        &self.engine.tree
    }

    /// Current walk status.
    pub fn status(&self) -> WalkStatus {
        *self.engine.status_tx.borrow()
    }

    /// Watch status transitions as they happen.
    pub fn watch_status(&self) -> watch::Receiver<WalkStatus> {
        self.engine.status_tx.subscribe()
    }

    /// Request cancellation of an in-flight walk.
    pub fn cancel_walk_tree(&self) {
        tracing::debug!(
            session_id = self.engine.session_id.as_str(),
            "walk cancellation requested"
        );
        self.engine.token.cancel();
    }

    /// Committed response for an action key, if any. State read faults
    /// surface as absence.
    pub async fn get_output(&self, action_key: &str) -> Option<ActionResponse> {
        self.engine.state.response(action_key).await
    }

    /// Response of the most recently committed action, if any.
    pub async fn get_last_action_response(&self) -> Option<ActionResponse> {
        let key = self.engine.state.last_action().await?;
        self.engine.state.response(&key).await
    }

    /// Schema node matching the persisted current-node marker, if any.
    pub async fn get_current_tree_node(&self) -> Option<TreeNode> {
        let key = self.engine.state.current_node().await?;
        self.engine.tree.node(&key).cloned()
    }

    /// Key of the persisted current-node marker, if any.
    pub async fn get_current_node_key(&self) -> Option<String> {
        self.engine.state.current_node().await
    }

    /// Schema action matching the last committed action key, if any.
    pub async fn get_last_tree_action(&self) -> Option<TreeAction> {
        let key = self.engine.state.last_action().await?;
        self.engine
            .tree
            .nodes
            .values()
            .find_map(|node| node.actions.get(&key).cloned())
    }
}

// ---------------------------------------------------------------------------
// SessionBuilder
// ---------------------------------------------------------------------------

/// Collects capabilities for a [`TreeSession`].
pub struct SessionBuilder {
    session_id: Option<String>,
    tree: ForgeTree,
    state: Option<DynForgeState>,
    expressions: Option<DynExpressionExecutor>,
    externals: ExternalExecutors,
    callbacks: Option<DynVisitCallbacks>,
    registry: ActionRegistry,
    user_context: Value,
    dependencies: Value,
    parent_token: Option<CancellationToken>,
}

impl SessionBuilder {
    fn new(tree: ForgeTree) -> Self {
        Self {
            session_id: None,
            tree,
            state: None,
            expressions: None,
            externals: ExternalExecutors::new(),
            callbacks: None,
            registry: ActionRegistry::empty(),
            user_context: Value::Null,
            dependencies: Value::Null,
            parent_token: None,
        }
    }

    /// Explicit session identifier; defaults to a fresh UUIDv7.
    pub fn session_id(mut self, id: impl Into<String>) -> Self {
        self.session_id = Some(id.into());
        self
    }

    /// State capability. The store is expected to apply any session-ID
    /// namespacing; the engine passes bare protocol keys.
    pub fn state<S: ForgeState + 'static>(mut self, store: S) -> Self {
        self.state = Some(Arc::new(store));
        self
    }

    /// Expression executor capability.
    pub fn expressions<E: ExpressionExecutor + 'static>(mut self, executor: E) -> Self {
        self.expressions = Some(Arc::new(executor));
        self
    }

    /// Register an external executor under a string prefix.
    pub fn external_executor<E: ExternalExecutor + 'static>(
        mut self,
        prefix: impl Into<String>,
        executor: E,
    ) -> Self {
        self.externals
            .insert(prefix.into(), Arc::new(executor) as DynExternalExecutor);
        self
    }

    /// Host visit callbacks.
    pub fn callbacks<C: VisitCallbacks + 'static>(mut self, callbacks: C) -> Self {
        self.callbacks = Some(Arc::new(callbacks));
        self
    }

    /// Action registry.
    pub fn registry(mut self, registry: ActionRegistry) -> Self {
        self.registry = registry;
        self
    }

    /// Opaque value threaded to callbacks and action contexts.
    pub fn user_context(mut self, value: Value) -> Self {
        self.user_context = value;
        self
    }

    /// Opaque value exposed to the expression executor.
    pub fn dependencies(mut self, value: Value) -> Self {
        self.dependencies = value;
        self
    }

    /// Parent cancellation token. The session derives a child token so host
    /// cancellation propagates in while engine-internal cancellation never
    /// flips the host's token.
    pub fn cancellation_token(mut self, token: CancellationToken) -> Self {
        self.parent_token = Some(token);
        self
    }

    /// Assemble the session.
    pub fn build(self) -> Result<TreeSession, SessionError> {
        let store = self.state.ok_or(SessionError::MissingState)?;
        let expressions = self
            .expressions
            .ok_or(SessionError::MissingExpressionExecutor)?;
        let session_id = self
            .session_id
            .unwrap_or_else(|| Uuid::now_v7().to_string());
        let token = match self.parent_token {
            Some(parent) => parent.child_token(),
            None => CancellationToken::new(),
        };
        let (status_tx, _) = watch::channel(WalkStatus::Initialized);

        let tree = Arc::new(self.tree);
        let state = SessionState::new(store);
        let scope = Arc::new(ScopeView {
            session_id: session_id.clone(),
            tree: Arc::clone(&tree),
            state: state.clone(),
            user_context: self.user_context.clone(),
            dependencies: self.dependencies,
        });

        Ok(TreeSession {
            engine: Arc::new(WalkEngine {
                session_id,
                tree,
                state,
                scope,
                expressions,
                externals: Arc::new(self.externals),
                callbacks: self.callbacks,
                registry: self.registry,
                user_context: self.user_context,
                token,
                status_tx,
                walked: AtomicBool::new(false),
            }),
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expression::ExpressionError;
    use crate::typing::TypeHint;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use treeforge_types::error::StateError;

    #[derive(Default)]
    struct MapState {
        entries: Mutex<HashMap<String, Value>>,
    }

    impl ForgeState for MapState {
        async fn get(&self, key: &str) -> Result<Option<Value>, StateError> {
            Ok(self.entries.lock().unwrap().get(key).cloned())
        }

        async fn set(&self, key: &str, value: Value) -> Result<(), StateError> {
            self.entries.lock().unwrap().insert(key.to_string(), value);
            Ok(())
        }
    }

    struct FixedExpressions;

    impl ExpressionExecutor for FixedExpressions {
        async fn execute(
            &self,
            _source: &str,
            _hint: Option<&TypeHint>,
            _scope: &dyn SessionScope,
        ) -> Result<Value, ExpressionError> {
            Ok(Value::Bool(true))
        }
    }

    #[test]
    fn build_requires_state_and_expressions() {
        let err = TreeSession::builder(ForgeTree::default())
            .expressions(FixedExpressions)
            .build()
            .unwrap_err();
        assert!(matches!(err, SessionError::MissingState));

        let err = TreeSession::builder(ForgeTree::default())
            .state(MapState::default())
            .build()
            .unwrap_err();
        assert!(matches!(err, SessionError::MissingExpressionExecutor));
    }

    #[test]
    fn new_session_is_initialized_with_an_id() {
        let session = TreeSession::builder(ForgeTree::default())
            .state(MapState::default())
            .expressions(FixedExpressions)
            .build()
            .unwrap();
        assert_eq!(session.status(), WalkStatus::Initialized);
        assert!(!session.session_id().is_empty());
    }

    #[tokio::test]
    async fn host_token_cancellation_propagates_into_the_session() {
        let parent = CancellationToken::new();
        let session = TreeSession::builder(ForgeTree::default())
            .state(MapState::default())
            .expressions(FixedExpressions)
            .cancellation_token(parent.clone())
            .build()
            .unwrap();

        parent.cancel();
        assert!(session.engine.token.is_cancelled());

        // Engine-internal cancellation does not flip the host's token.
        let parent = CancellationToken::new();
        let session = TreeSession::builder(ForgeTree::default())
            .state(MapState::default())
            .expressions(FixedExpressions)
            .cancellation_token(parent.clone())
            .build()
            .unwrap();
        session.cancel_walk_tree();
        assert!(!parent.is_cancelled());
    }

    #[tokio::test]
    async fn expression_context_exposes_committed_responses() {
        let tree: ForgeTree = serde_json::from_value(serde_json::json!({
            "Root": {
                "type": "Action",
                "actions": { "A1": { "action": "Noop" } }
            }
        }))
        .unwrap();

        let session = TreeSession::builder(tree)
            .state(MapState::default())
            .expressions(FixedExpressions)
            .user_context(serde_json::json!({ "tenant": "acme" }))
            .build()
            .unwrap();

        session
            .engine
            .state
            .commit_response("A1", &ActionResponse::new("Success"))
            .await
            .unwrap();

        let context = session.engine.scope.expression_context().await;
        assert_eq!(context["actions"]["A1"]["status"], "Success");
        assert_eq!(context["last"]["status"], "Success");
        assert_eq!(context["context"]["tenant"], "acme");
        assert_eq!(context["session"]["id"], session.session_id());
    }
}
