//! Action-node executor: concurrent fan-out of one node's actions raced
//! against the node-level timeout.

use std::time::Duration;

use serde_json::Value;
use tokio::task::JoinSet;
use treeforge_types::schema::{INFINITE_TIMEOUT_MS, TimeoutSpec, TreeNode};

use crate::error::WalkError;
use crate::evaluate::EvaluateError;
use crate::session::TreeSession;
use crate::typing::TypeHint;

impl TreeSession {
    /// Run every action on the node as a sibling task, racing the set
    /// against the node timeout. Actions with a committed response are
    /// skipped (rehydration); unknown action names are skipped as the
    /// registry is authoritative.
    pub(crate) async fn run_node_actions(
        &self,
        node_key: &str,
        node: &TreeNode,
    ) -> Result<(), WalkError> {
        let engine = &self.engine;
        if node.actions.is_empty() {
            return Ok(());
        }

        let mut tasks: JoinSet<Result<(), WalkError>> = JoinSet::new();
        for (action_key, action) in &node.actions {
            if engine.state.response(action_key).await.is_some() {
                tracing::debug!(
                    node_key,
                    action_key = action_key.as_str(),
                    "skipping action with committed response"
                );
                engine.state.repair_last_action(action_key).await?;
                continue;
            }

            let Some(definition) = engine.registry.lookup(&action.action).cloned() else {
                tracing::warn!(
                    node_key,
                    action = action.action.as_str(),
                    "action not in registry, skipping"
                );
                continue;
            };

            let session = self.clone();
            let node_key = node_key.to_owned();
            let action_key = action_key.clone();
            let action = action.clone();
            tasks.spawn(async move {
                session
                    .run_action_with_retry(&node_key, &action_key, &action, &definition)
                    .await
            });
        }

        if tasks.is_empty() {
            return Ok(());
        }

        let timeout_ms = self.evaluate_timeout(node.timeout.as_ref()).await?;
        let node_timer = node_delay(timeout_ms);
        tokio::pin!(node_timer);

        // Drain completions until only the timer would remain. Dropping the
        // set on any exit path aborts stragglers and the timer alike.
        while !tasks.is_empty() {
            tokio::select! {
                _ = engine.token.cancelled() => return Err(WalkError::Cancelled),
                _ = &mut node_timer => {
                    return if engine.token.is_cancelled() {
                        Err(WalkError::Cancelled)
                    } else {
                        Err(WalkError::NodeTimeout {
                            node_key: node_key.to_owned(),
                            timeout_ms,
                        })
                    };
                }
                joined = tasks.join_next() => {
                    match joined {
                        Some(Ok(result)) => result?,
                        Some(Err(join_err)) => return Err(WalkError::Join(join_err.to_string())),
                        None => break,
                    }
                    if engine.token.is_cancelled() {
                        return Err(WalkError::Cancelled);
                    }
                }
            }
        }

        Ok(())
    }

    /// Evaluate a timeout spec to milliseconds; `-1` (and absence) means
    /// infinite.
    pub(crate) async fn evaluate_timeout(
        &self,
        spec: Option<&TimeoutSpec>,
    ) -> Result<i64, WalkError> {
        match spec {
            None => Ok(INFINITE_TIMEOUT_MS),
            Some(TimeoutSpec::Millis(ms)) => Ok(*ms),
            Some(TimeoutSpec::Expression(expr)) => {
                let value = self
                    .engine
                    .evaluator()
                    .evaluate(&Value::String(expr.clone()), Some(&TypeHint::Int))
                    .await?;
                value.as_i64().ok_or_else(|| {
                    WalkError::Evaluate(EvaluateError::Failed {
                        value: expr.clone(),
                        type_name: TypeHint::Int.to_string(),
                        detail: "timeout expression did not yield an integer".to_string(),
                    })
                })
            }
        }
    }
}

/// Delay future for a node timeout; a negative timeout never completes.
async fn node_delay(timeout_ms: i64) {
    if timeout_ms < 0 {
        std::future::pending::<()>().await
    } else {
        tokio::time::sleep(Duration::from_millis(timeout_ms as u64)).await
    }
}
