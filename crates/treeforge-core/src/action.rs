//! The user action capability and its invocation context.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde_json::Value;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use treeforge_types::error::StateError;
use treeforge_types::response::ActionResponse;

use crate::state::{DynForgeState, intermediate_key};

/// Errors an action can return.
#[derive(Debug, Error)]
pub enum ActionError {
    /// Generic failure; eligible for retry under the action's policy.
    #[error("action failed: {0}")]
    Failed(String),

    /// The action observed cancellation and stopped.
    #[error("action cancelled")]
    Cancelled,
}

/// Everything an action can see while running.
#[derive(Clone)]
pub struct ActionContext {
    /// Session identifier.
    pub session_id: String,
    /// Key of the node the action sits on.
    pub node_key: String,
    /// Key of this action within the node.
    pub action_key: String,
    /// Registered action name.
    pub action_name: String,
    /// Schema `input`, evaluated against the action's declared input type.
    pub input: Value,
    /// Schema `properties`, evaluated with no known type.
    pub properties: Value,
    /// Opaque host value threaded through the session.
    pub user_context: Value,
    /// Cancellation signal for this invocation. With `continuationOnTimeout`
    /// set this is a linked child of the walk token, fired on timeout.
    pub token: CancellationToken,
    /// Durable state handle, for intermediates.
    pub state: DynForgeState,
}

impl ActionContext {
    /// Persist an intermediate value under this action's reserved key.
    pub async fn save_intermediate(&self, value: Value) -> Result<(), StateError> {
        let key = intermediate_key(&self.action_key);
        self.state.set_boxed(&key, value).await
    }

    /// Load this action's persisted intermediate, if any. Read faults
    /// surface as absence.
    pub async fn load_intermediate(&self) -> Option<Value> {
        let key = intermediate_key(&self.action_key);
        match self.state.get_boxed(&key).await {
            Ok(value) => value,
            Err(err) => {
                tracing::debug!(
                    action_key = self.action_key.as_str(),
                    error = %err,
                    "intermediate read failed, treating as absent"
                );
                None
            }
        }
    }
}

/// A host-supplied unit of work bound to Action-type nodes.
///
/// Uses RPITIT for zero-cost async in concrete types. For dynamic dispatch
/// (trait objects), see [`BoxForgeAction`].
pub trait ForgeAction: Send + Sync {
    /// Run to a terminal outcome, observing `ctx.token`.
    fn run_action(
        &self,
        ctx: ActionContext,
    ) -> impl Future<Output = Result<ActionResponse, ActionError>> + Send;
}

/// Object-safe version of [`ForgeAction`] for dynamic dispatch.
///
/// A blanket implementation is provided for all types implementing
/// [`ForgeAction`].
pub trait BoxForgeAction: Send + Sync {
    fn run_action_boxed(
        &self,
        ctx: ActionContext,
    ) -> Pin<Box<dyn Future<Output = Result<ActionResponse, ActionError>> + Send + '_>>;
}

impl<T: ForgeAction> BoxForgeAction for T {
    fn run_action_boxed(
        &self,
        ctx: ActionContext,
    ) -> Pin<Box<dyn Future<Output = Result<ActionResponse, ActionError>> + Send + '_>> {
        Box::pin(self.run_action(ctx))
    }
}

/// Type alias for a dynamically-dispatched action.
pub type DynForgeAction = Arc<dyn BoxForgeAction>;
