//! Schema model for TreeForge decision trees.
//!
//! A `ForgeTree` is a mapping from node key to `TreeNode`. The schema is
//! immutable for the duration of a session; JSON field names use camelCase
//! (`childSelector`, `shouldSelect`, `retryPolicy`, ...) as produced by the
//! authoring layer.

use std::fmt;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Reserved action name for leaf summary commits.
///
/// Only legal on Leaf nodes with exactly one action; the action's `input`
/// (evaluated as a response envelope) *is* the committed response.
pub const LEAF_NODE_SUMMARY_ACTION: &str = "LeafNodeSummaryAction";

/// Milliseconds value that disables a timer.
pub const INFINITE_TIMEOUT_MS: i64 = -1;

// ---------------------------------------------------------------------------
// ForgeTree
// ---------------------------------------------------------------------------

/// A parsed decision tree: node definitions keyed by node key.
///
/// Node keys are unique within a tree. Insertion order is preserved so the
/// schema round-trips byte-stable through serde.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ForgeTree {
    /// Node definitions keyed by node key.
    pub nodes: IndexMap<String, TreeNode>,
}

impl ForgeTree {
    /// Look up a node by key.
    pub fn node(&self, key: &str) -> Option<&TreeNode> {
        self.nodes.get(key)
    }

    /// Number of nodes in the tree.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether the tree has no nodes.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

// ---------------------------------------------------------------------------
// TreeNode
// ---------------------------------------------------------------------------

/// A single node in the tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TreeNode {
    /// The kind of node; determines per-node behavior.
    #[serde(rename = "type")]
    pub node_type: NodeType,
    /// Actions to run when this node is visited (Action nodes), keyed by
    /// action key. Ordered, unique within the node.
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub actions: IndexMap<String, TreeAction>,
    /// Ordered successor selectors, consulted in schema order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub child_selector: Vec<ChildSelector>,
    /// Opaque properties handed to the visit callbacks after evaluation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub properties: Option<Value>,
    /// Node-level timeout in milliseconds; `-1` (the default) is infinite.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<TimeoutSpec>,
}

/// The kind of a tree node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeType {
    /// Terminal node; may carry a single leaf summary action.
    Leaf,
    /// Runs its actions concurrently, then selects a child.
    Action,
    /// Pure branch point; selects a child without running actions.
    Selection,
}

// ---------------------------------------------------------------------------
// TreeAction
// ---------------------------------------------------------------------------

/// One action entry on a node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TreeAction {
    /// Action name, resolved against the session's registry.
    pub action: String,
    /// Opaque input, run through the evaluator with the action's declared
    /// input type before invocation.
    #[serde(default)]
    pub input: Value,
    /// Opaque properties made available to the action via its context.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub properties: Option<Value>,
    /// Action-level timeout in milliseconds; `-1` (the default) is infinite.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<TimeoutSpec>,
    /// Retry policy; absent means no retries.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_policy: Option<RetryPolicy>,
    /// On action timeout, record a synthetic response instead of failing.
    #[serde(default)]
    pub continuation_on_timeout: bool,
    /// On retry exhaustion under the `None` policy, record a synthetic
    /// response instead of failing.
    #[serde(default)]
    pub continuation_on_retry_exhaustion: bool,
}

// ---------------------------------------------------------------------------
// ChildSelector
// ---------------------------------------------------------------------------

/// One successor candidate: an optional guard expression plus a child key.
///
/// An empty (or whitespace) guard selects the child unconditionally.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChildSelector {
    /// Guard expression yielding a boolean; empty means `true`.
    #[serde(default)]
    pub should_select: String,
    /// Successor node key.
    #[serde(default)]
    pub child: String,
}

// ---------------------------------------------------------------------------
// TimeoutSpec
// ---------------------------------------------------------------------------

/// A timeout that is either literal milliseconds or an expression evaluated
/// at visit time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TimeoutSpec {
    /// Literal milliseconds; `-1` disables the timer.
    Millis(i64),
    /// Expression string evaluated to milliseconds.
    Expression(String),
}

// ---------------------------------------------------------------------------
// RetryPolicy
// ---------------------------------------------------------------------------

/// Retry configuration for one action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryPolicy {
    /// Backoff strategy.
    #[serde(rename = "type")]
    pub kind: RetryPolicyKind,
    /// Starting backoff in milliseconds.
    #[serde(default)]
    pub min_backoff_ms: u64,
    /// Backoff ceiling in milliseconds (exponential policy only).
    #[serde(default)]
    pub max_backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            kind: RetryPolicyKind::None,
            min_backoff_ms: 0,
            max_backoff_ms: 0,
        }
    }
}

/// Backoff strategy for a failed action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RetryPolicyKind {
    /// No retries.
    None,
    /// Wait `minBackoffMs` between attempts.
    FixedInterval,
    /// Double the wait each attempt, capped at `maxBackoffMs`.
    ExponentialBackoff,
}

impl fmt::Display for RetryPolicyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RetryPolicyKind::None => "None",
            RetryPolicyKind::FixedInterval => "FixedInterval",
            RetryPolicyKind::ExponentialBackoff => "ExponentialBackoff",
        };
        f.write_str(name)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
