//! Per-action retry controller and the single-invocation race.
//!
//! The retry controller owns one timer for the whole attempt sequence: the
//! action-level deadline bounds both the retry sleeps and each individual
//! invocation. Continuation flags convert specific terminal failures into
//! synthetic committed responses so the walk can progress.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::time::Instant;
use treeforge_types::response::ActionResponse;
use treeforge_types::schema::{RetryPolicy, RetryPolicyKind, TreeAction};

use crate::action::{ActionContext, ActionError};
use crate::error::WalkError;
use crate::registry::ActionDefinition;
use crate::session::TreeSession;

impl TreeSession {
    /// Drive one action to a committed response under its retry policy and
    /// action-level timeout.
    pub(crate) async fn run_action_with_retry(
        &self,
        node_key: &str,
        action_key: &str,
        action: &TreeAction,
        definition: &ActionDefinition,
    ) -> Result<(), WalkError> {
        let engine = &self.engine;
        let timeout_ms = self.evaluate_timeout(action.timeout.as_ref()).await?;
        let policy = action.retry_policy.clone().unwrap_or_default();
        let deadline =
            (timeout_ms >= 0).then(|| Instant::now() + Duration::from_millis(timeout_ms as u64));

        let mut retries: u32 = 0;
        let mut previous_wait: Option<Duration> = None;
        let mut inner_error: Option<WalkError> = None;

        loop {
            if deadline.is_some_and(|d| Instant::now() >= d) {
                break;
            }
            if engine.token.is_cancelled() {
                return Err(WalkError::Cancelled);
            }

            match self
                .invoke_action_once(node_key, action_key, action, definition, deadline, retries)
                .await
            {
                Ok(()) => return Ok(()),
                Err(err) if !err.is_retriable() => return Err(err),
                Err(err) => {
                    tracing::debug!(
                        node_key,
                        action_key,
                        retries,
                        error = %err,
                        "action attempt failed"
                    );
                    inner_error = Some(err);
                }
            }

            let wait = match policy.kind {
                RetryPolicyKind::FixedInterval | RetryPolicyKind::ExponentialBackoff => {
                    next_backoff(&policy, previous_wait)
                }
                RetryPolicyKind::None => {
                    if action.continuation_on_retry_exhaustion {
                        engine
                            .state
                            .commit_response(
                                action_key,
                                &ActionResponse::retry_exhausted_on_action(),
                            )
                            .await?;
                        tracing::debug!(
                            node_key,
                            action_key,
                            "recorded synthetic retry-exhaustion response"
                        );
                        return Ok(());
                    }
                    break;
                }
            };
            previous_wait = Some(wait);

            // A retry that would overrun the action deadline is not taken.
            if deadline.is_some_and(|d| Instant::now() + wait >= d) {
                if action.continuation_on_timeout {
                    engine
                        .state
                        .commit_response(action_key, &ActionResponse::timeout_on_action())
                        .await?;
                    tracing::debug!(
                        node_key,
                        action_key,
                        "recorded synthetic timeout response before overrun retry"
                    );
                    return Ok(());
                }
                break;
            }

            tokio::select! {
                _ = engine.token.cancelled() => return Err(WalkError::Cancelled),
                _ = tokio::time::sleep(wait) => {}
            }
            retries += 1;
        }

        Err(WalkError::ActionTimeout {
            node_key: node_key.to_owned(),
            action_key: action_key.to_owned(),
            action_name: action.action.clone(),
            retries,
            policy: policy.kind,
            source: inner_error.map(Box::new),
        })
    }

    /// One invocation raced against the action deadline.
    async fn invoke_action_once(
        &self,
        node_key: &str,
        action_key: &str,
        action: &TreeAction,
        definition: &ActionDefinition,
        deadline: Option<Instant>,
        retries: u32,
    ) -> Result<(), WalkError> {
        let engine = &self.engine;

        // With continuation-on-timeout the action gets a linked child token
        // so timeout can stop the in-flight invocation while the walk keeps
        // going; otherwise it shares the walk token.
        let action_token = if action.continuation_on_timeout {
            engine.token.child_token()
        } else {
            engine.token.clone()
        };

        let evaluator = engine.evaluator();
        let input = evaluator
            .evaluate(&action.input, definition.input_hint())
            .await?;
        let properties = match &action.properties {
            Some(props) => evaluator.evaluate(props, None).await?,
            None => Value::Null,
        };

        let ctx = ActionContext {
            session_id: engine.session_id.clone(),
            node_key: node_key.to_owned(),
            action_key: action_key.to_owned(),
            action_name: action.action.clone(),
            input,
            properties,
            user_context: engine.user_context.clone(),
            token: action_token.clone(),
            state: Arc::clone(engine.state.store()),
        };

        let instance = definition.instantiate();
        let mut invocation = instance.run_action_boxed(ctx);
        let timer = action_delay(deadline);
        tokio::pin!(timer);

        tokio::select! {
            result = &mut invocation => match result {
                Ok(response) => {
                    engine.state.commit_response(action_key, &response).await?;
                    Ok(())
                }
                Err(ActionError::Cancelled) => Err(WalkError::Cancelled),
                Err(err) => Err(WalkError::Action {
                    action_key: action_key.to_owned(),
                    source: err,
                }),
            },
            _ = &mut timer => {
                if engine.token.is_cancelled() {
                    return Err(WalkError::Cancelled);
                }
                if action.continuation_on_timeout {
                    action_token.cancel();
                    engine
                        .state
                        .commit_response(action_key, &ActionResponse::timeout_on_action())
                        .await?;
                    tracing::debug!(
                        node_key,
                        action_key,
                        "action timed out, continuing with synthetic response"
                    );
                    Ok(())
                } else {
                    Err(WalkError::ActionTimeout {
                        node_key: node_key.to_owned(),
                        action_key: action_key.to_owned(),
                        action_name: action.action.clone(),
                        retries,
                        policy: action
                            .retry_policy
                            .as_ref()
                            .map_or(RetryPolicyKind::None, |p| p.kind),
                        source: None,
                    })
                }
            }
        }
    }
}

/// Next retry wait under a backoff policy.
///
/// Fixed interval always waits the minimum. Exponential doubles the
/// previous wait (seeded with the minimum) up to the maximum.
fn next_backoff(policy: &RetryPolicy, previous: Option<Duration>) -> Duration {
    match policy.kind {
        RetryPolicyKind::FixedInterval => Duration::from_millis(policy.min_backoff_ms),
        RetryPolicyKind::ExponentialBackoff => {
            let seed = previous.unwrap_or(Duration::from_millis(policy.min_backoff_ms));
            (seed * 2).min(Duration::from_millis(policy.max_backoff_ms))
        }
        RetryPolicyKind::None => Duration::ZERO,
    }
}

/// Delay future for the action deadline; no deadline never completes.
async fn action_delay(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending::<()>().await,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(kind: RetryPolicyKind, min: u64, max: u64) -> RetryPolicy {
        RetryPolicy {
            kind,
            min_backoff_ms: min,
            max_backoff_ms: max,
        }
    }

    #[test]
    fn fixed_interval_is_constant() {
        let p = policy(RetryPolicyKind::FixedInterval, 10, 0);
        assert_eq!(next_backoff(&p, None), Duration::from_millis(10));
        assert_eq!(
            next_backoff(&p, Some(Duration::from_millis(10))),
            Duration::from_millis(10)
        );
    }

    #[test]
    fn exponential_doubles_up_to_the_cap() {
        let p = policy(RetryPolicyKind::ExponentialBackoff, 10, 70);
        let w1 = next_backoff(&p, None);
        assert_eq!(w1, Duration::from_millis(20));
        let w2 = next_backoff(&p, Some(w1));
        assert_eq!(w2, Duration::from_millis(40));
        let w3 = next_backoff(&p, Some(w2));
        assert_eq!(w3, Duration::from_millis(70));
        let w4 = next_backoff(&p, Some(w3));
        assert_eq!(w4, Duration::from_millis(70));
    }
}
