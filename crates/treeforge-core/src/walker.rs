//! The walk driver: visits nodes, commits progress, interleaves host
//! callbacks, and maps outcomes to terminal statuses.

use serde_json::Value;
use treeforge_types::schema::{LEAF_NODE_SUMMARY_ACTION, NodeType, TreeNode};
use treeforge_types::status::WalkStatus;

use crate::callbacks::NodeVisit;
use crate::error::WalkError;
use crate::evaluate::EvaluateError;
use crate::session::TreeSession;
use crate::typing::{TypeHint, coerce, preview};

impl TreeSession {
    /// Walk the tree from `start_key` to a terminal status.
    ///
    /// On failure the status is updated, the walk token is fired so any
    /// stragglers observe cancellation, and the error is returned. A
    /// no-child-matched outcome is a successful completion and is not an
    /// error. The final status is also observable through
    /// [`TreeSession::status`].
    pub async fn walk_tree(&self, start_key: &str) -> Result<WalkStatus, WalkError> {
        use std::sync::atomic::Ordering;

        let engine = &self.engine;
        if engine.walked.swap(true, Ordering::SeqCst) {
            return Err(WalkError::AlreadyWalked);
        }

        if engine.token.is_cancelled() {
            engine.set_status(WalkStatus::CancelledBeforeExecution);
            return Err(WalkError::Cancelled);
        }

        engine.set_status(WalkStatus::Running);
        tracing::info!(
            session_id = engine.session_id.as_str(),
            start_key,
            "starting tree walk"
        );

        match self.run_walk(start_key).await {
            Ok(()) => {
                engine.set_status(WalkStatus::RanToCompletion);
                tracing::info!(
                    session_id = engine.session_id.as_str(),
                    "walk ran to completion"
                );
                Ok(WalkStatus::RanToCompletion)
            }
            Err(WalkError::NoChildMatched { node_key }) => {
                engine.set_status(WalkStatus::RanToCompletionNoChildMatched);
                tracing::info!(
                    session_id = engine.session_id.as_str(),
                    node_key = node_key.as_str(),
                    "walk completed with no child matched"
                );
                Ok(WalkStatus::RanToCompletionNoChildMatched)
            }
            Err(err) => {
                let status = err.final_status();
                engine.set_status(status);
                engine.token.cancel();
                tracing::warn!(
                    session_id = engine.session_id.as_str(),
                    status = %status,
                    error = %err,
                    "walk terminated"
                );
                Err(err)
            }
        }
    }

    /// The driver loop: commit the current node, run callbacks around the
    /// visit, advance to the selected child.
    async fn run_walk(&self, start_key: &str) -> Result<(), WalkError> {
        let engine = &self.engine;
        let mut current = start_key.to_owned();
        loop {
            engine.state.commit_current_node(&current).await?;

            if engine.token.is_cancelled() {
                return Err(WalkError::Cancelled);
            }

            let node = engine
                .tree
                .node(&current)
                .cloned()
                .ok_or_else(|| WalkError::UnknownNode(current.clone()))?;

            let properties = match &node.properties {
                Some(props) => engine.evaluator().evaluate(props, None).await?,
                None => Value::Null,
            };

            let visit = NodeVisit {
                session_id: &engine.session_id,
                node_key: &current,
                properties: &properties,
                user_context: &engine.user_context,
                token: &engine.token,
            };

            if let Some(callbacks) = &engine.callbacks {
                callbacks
                    .before_visit_node_boxed(&visit)
                    .await
                    .map_err(|source| WalkError::Callback {
                        node_key: current.clone(),
                        source,
                    })?;
            }

            let outcome = self.visit_node(&current, &node).await;

            // The after callback runs on every exit path of the visit.
            if let Some(callbacks) = &engine.callbacks {
                let after = callbacks.after_visit_node_boxed(&visit).await;
                match (&outcome, after) {
                    (Ok(_), Err(source)) => {
                        return Err(WalkError::Callback {
                            node_key: current.clone(),
                            source,
                        });
                    }
                    (Err(_), Err(source)) => {
                        tracing::warn!(
                            node_key = current.as_str(),
                            error = %source,
                            "after-visit callback failed while unwinding"
                        );
                    }
                    _ => {}
                }
            }

            match outcome? {
                Some(next) => {
                    tracing::debug!(from = current.as_str(), to = next.as_str(), "advancing");
                    current = next;
                }
                None => return Ok(()),
            }
        }
    }

    /// Per-node behavior dispatch.
    async fn visit_node(
        &self,
        node_key: &str,
        node: &TreeNode,
    ) -> Result<Option<String>, WalkError> {
        match node.node_type {
            NodeType::Leaf => {
                self.visit_leaf(node_key, node).await?;
                Ok(None)
            }
            NodeType::Action => {
                self.run_node_actions(node_key, node).await?;
                self.select_child(node_key, node).await
            }
            NodeType::Selection => self.select_child(node_key, node).await,
        }
    }

    /// Leaf summary: a single reserved action whose evaluated input *is*
    /// the committed response. Other leaves are plain terminals.
    async fn visit_leaf(&self, node_key: &str, node: &TreeNode) -> Result<(), WalkError> {
        let engine = &self.engine;
        if node.actions.len() != 1 {
            return Ok(());
        }
        let Some((action_key, action)) = node.actions.iter().next() else {
            return Ok(());
        };
        if action.action != LEAF_NODE_SUMMARY_ACTION {
            return Ok(());
        }

        // A committed response means a prior walk already summarized here.
        if engine.state.response(action_key).await.is_some() {
            engine.state.repair_last_action(action_key).await?;
            return Ok(());
        }

        let value = engine
            .evaluator()
            .evaluate(&action.input, Some(&TypeHint::Response))
            .await?;
        let response = serde_json::from_value(value.clone()).map_err(|err| {
            WalkError::Evaluate(EvaluateError::Failed {
                value: preview(&value),
                type_name: "response".to_string(),
                detail: err.to_string(),
            })
        })?;

        engine.state.commit_response(action_key, &response).await?;
        tracing::debug!(
            node_key,
            action_key = action_key.as_str(),
            "committed leaf summary response"
        );
        Ok(())
    }

    /// Pick the successor by evaluating selectors in schema order. An empty
    /// guard selects unconditionally; no match at all is `NoChildMatched`;
    /// an absent selector list is a plain terminal.
    async fn select_child(
        &self,
        node_key: &str,
        node: &TreeNode,
    ) -> Result<Option<String>, WalkError> {
        let engine = &self.engine;
        if node.child_selector.is_empty() {
            return Ok(None);
        }

        for selector in &node.child_selector {
            if selector.should_select.trim().is_empty() {
                if !selector.child.is_empty() {
                    return Ok(Some(selector.child.clone()));
                }
                continue;
            }

            let guard = Value::String(selector.should_select.clone());
            let value = engine
                .evaluator()
                .evaluate(&guard, Some(&TypeHint::Bool))
                .await?;
            let selected = coerce(value, &TypeHint::Bool)
                .map_err(|err| {
                    WalkError::Evaluate(EvaluateError::Failed {
                        value: selector.should_select.clone(),
                        type_name: TypeHint::Bool.to_string(),
                        detail: err.to_string(),
                    })
                })?
                == Value::Bool(true);

            if selected {
                return Ok(Some(selector.child.clone()));
            }
        }

        Err(WalkError::NoChildMatched {
            node_key: node_key.to_owned(),
        })
    }
}
