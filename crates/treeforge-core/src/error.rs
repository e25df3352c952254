//! Walk error kinds and their terminal-status mapping.

use thiserror::Error;
use treeforge_types::error::StateError;
use treeforge_types::schema::RetryPolicyKind;
use treeforge_types::status::WalkStatus;

use crate::action::ActionError;
use crate::callbacks::CallbackError;
use crate::evaluate::EvaluateError;

/// Errors that terminate a tree walk.
#[derive(Debug, Error)]
pub enum WalkError {
    /// The walk (or an action inside it) observed cancellation.
    #[error("walk cancelled")]
    Cancelled,

    /// A node's action fan-out exceeded the node timeout.
    #[error("node '{node_key}' timed out after {timeout_ms} ms")]
    NodeTimeout { node_key: String, timeout_ms: i64 },

    /// An action ran out of time or retries without a continuation flag.
    #[error(
        "action '{action_key}' ({action_name}) on node '{node_key}' timed out \
         after {retries} retries under {policy} policy"
    )]
    ActionTimeout {
        node_key: String,
        action_key: String,
        action_name: String,
        retries: u32,
        policy: RetryPolicyKind,
        #[source]
        source: Option<Box<WalkError>>,
    },

    /// No child selector matched; treated as successful completion by the
    /// walker.
    #[error("no child matched on node '{node_key}'")]
    NoChildMatched { node_key: String },

    /// Dynamic property evaluation failed.
    #[error("property evaluation failed")]
    Evaluate(#[source] EvaluateError),

    /// An action failed with a generic error.
    #[error("action '{action_key}' failed")]
    Action {
        action_key: String,
        #[source]
        source: ActionError,
    },

    /// A visit callback failed.
    #[error("visit callback failed on node '{node_key}'")]
    Callback {
        node_key: String,
        #[source]
        source: CallbackError,
    },

    /// A state write failed.
    #[error("state commit failed")]
    State(#[from] StateError),

    /// The walk reached a node key the schema does not define.
    #[error("unknown node key '{0}'")]
    UnknownNode(String),

    /// `walk_tree` was called on a session that already walked.
    #[error("session has already walked its tree")]
    AlreadyWalked,

    /// A spawned action task failed to join.
    #[error("action task join failure: {0}")]
    Join(String),
}

impl From<EvaluateError> for WalkError {
    fn from(err: EvaluateError) -> Self {
        match err {
            EvaluateError::Cancelled => WalkError::Cancelled,
            other => WalkError::Evaluate(other),
        }
    }
}

impl WalkError {
    /// Terminal status this error maps to. Cancellation-before-start is
    /// decided by the walker, which never enters the loop in that case.
    pub fn final_status(&self) -> WalkStatus {
        match self {
            WalkError::Cancelled => WalkStatus::Cancelled,
            WalkError::NodeTimeout { .. } => WalkStatus::TimeoutOnNode,
            WalkError::ActionTimeout { .. } => WalkStatus::TimeoutOnAction,
            WalkError::NoChildMatched { .. } => WalkStatus::RanToCompletionNoChildMatched,
            WalkError::Evaluate(_) => WalkStatus::FailedEvaluateDynamicProperty,
            _ => WalkStatus::Failed,
        }
    }

    /// Whether the retry controller may recover from this error.
    /// Cancellation, timeouts, and evaluator failures are rethrown
    /// immediately.
    pub(crate) fn is_retriable(&self) -> bool {
        !matches!(
            self,
            WalkError::Cancelled
                | WalkError::ActionTimeout { .. }
                | WalkError::NodeTimeout { .. }
                | WalkError::Evaluate(_)
        )
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
