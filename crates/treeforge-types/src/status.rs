//! Walker-level statuses.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Status of a tree walk, observable during and after execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WalkStatus {
    /// Session constructed, walk not started.
    Initialized,
    /// Walk in flight.
    Running,
    /// Walk reached a node with no successor.
    RanToCompletion,
    /// A selector matched no child; treated as successful completion.
    RanToCompletionNoChildMatched,
    /// Cancellation observed after the walk started.
    Cancelled,
    /// Cancellation was already requested when the walk was asked to start.
    CancelledBeforeExecution,
    /// A node's action fan-out exceeded the node timeout.
    TimeoutOnNode,
    /// An action ran out of time or retries without a continuation flag.
    TimeoutOnAction,
    /// Dynamic property evaluation failed.
    FailedEvaluateDynamicProperty,
    /// Any other failure.
    Failed,
}

impl WalkStatus {
    /// Whether the walk has reached a terminal status.
    pub fn is_terminal(self) -> bool {
        !matches!(self, WalkStatus::Initialized | WalkStatus::Running)
    }

    /// Whether the status counts as a successful completion.
    pub fn is_success(self) -> bool {
        matches!(
            self,
            WalkStatus::RanToCompletion | WalkStatus::RanToCompletionNoChildMatched
        )
    }
}

impl fmt::Display for WalkStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            WalkStatus::Initialized => "initialized",
            WalkStatus::Running => "running",
            WalkStatus::RanToCompletion => "ran_to_completion",
            WalkStatus::RanToCompletionNoChildMatched => "ran_to_completion_no_child_matched",
            WalkStatus::Cancelled => "cancelled",
            WalkStatus::CancelledBeforeExecution => "cancelled_before_execution",
            WalkStatus::TimeoutOnNode => "timeout_on_node",
            WalkStatus::TimeoutOnAction => "timeout_on_action",
            WalkStatus::FailedEvaluateDynamicProperty => "failed_evaluate_dynamic_property",
            WalkStatus::Failed => "failed",
        };
        f.write_str(name)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_and_success_classification() {
        assert!(!WalkStatus::Initialized.is_terminal());
        assert!(!WalkStatus::Running.is_terminal());
        assert!(WalkStatus::RanToCompletion.is_terminal());
        assert!(WalkStatus::Failed.is_terminal());

        assert!(WalkStatus::RanToCompletion.is_success());
        assert!(WalkStatus::RanToCompletionNoChildMatched.is_success());
        assert!(!WalkStatus::TimeoutOnNode.is_success());
        assert!(!WalkStatus::Cancelled.is_success());
    }

    #[test]
    fn display_matches_serde_spelling() {
        let serialized = serde_json::to_value(WalkStatus::TimeoutOnAction).unwrap();
        assert_eq!(serialized, serde_json::json!("timeout_on_action"));
        assert_eq!(WalkStatus::TimeoutOnAction.to_string(), "timeout_on_action");
    }
}
