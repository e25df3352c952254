//! Host visit callbacks.
//!
//! The walker invokes `before_visit_node` after committing the current-node
//! marker and `after_visit_node` on every exit path of the visit, success or
//! failure, with the same arguments. Callback errors fail the walk.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde_json::Value;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// A visit callback failed.
#[derive(Debug, Error)]
#[error("visit callback failed: {0}")]
pub struct CallbackError(pub String);

/// Arguments passed to both visit callbacks for one node.
pub struct NodeVisit<'a> {
    /// Session identifier.
    pub session_id: &'a str,
    /// Key of the node being visited.
    pub node_key: &'a str,
    /// The node's `properties`, already run through the evaluator.
    pub properties: &'a Value,
    /// Opaque host value threaded through the session.
    pub user_context: &'a Value,
    /// The walk's cancellation token.
    pub token: &'a CancellationToken,
}

/// Host hooks around each node visit.
///
/// Uses RPITIT for zero-cost async in concrete types. For dynamic dispatch
/// (trait objects), see [`BoxVisitCallbacks`].
pub trait VisitCallbacks: Send + Sync {
    fn before_visit_node(
        &self,
        visit: &NodeVisit<'_>,
    ) -> impl Future<Output = Result<(), CallbackError>> + Send;

    fn after_visit_node(
        &self,
        visit: &NodeVisit<'_>,
    ) -> impl Future<Output = Result<(), CallbackError>> + Send;
}

impl<T: VisitCallbacks> VisitCallbacks for Arc<T> {
    fn before_visit_node(
        &self,
        visit: &NodeVisit<'_>,
    ) -> impl Future<Output = Result<(), CallbackError>> + Send {
        (**self).before_visit_node(visit)
    }

    fn after_visit_node(
        &self,
        visit: &NodeVisit<'_>,
    ) -> impl Future<Output = Result<(), CallbackError>> + Send {
        (**self).after_visit_node(visit)
    }
}

/// Object-safe version of [`VisitCallbacks`] for dynamic dispatch.
///
/// A blanket implementation is provided for all types implementing
/// [`VisitCallbacks`].
pub trait BoxVisitCallbacks: Send + Sync {
    fn before_visit_node_boxed<'a>(
        &'a self,
        visit: &'a NodeVisit<'a>,
    ) -> Pin<Box<dyn Future<Output = Result<(), CallbackError>> + Send + 'a>>;

    fn after_visit_node_boxed<'a>(
        &'a self,
        visit: &'a NodeVisit<'a>,
    ) -> Pin<Box<dyn Future<Output = Result<(), CallbackError>> + Send + 'a>>;
}

impl<T: VisitCallbacks> BoxVisitCallbacks for T {
    fn before_visit_node_boxed<'a>(
        &'a self,
        visit: &'a NodeVisit<'a>,
    ) -> Pin<Box<dyn Future<Output = Result<(), CallbackError>> + Send + 'a>> {
        Box::pin(self.before_visit_node(visit))
    }

    fn after_visit_node_boxed<'a>(
        &'a self,
        visit: &'a NodeVisit<'a>,
    ) -> Pin<Box<dyn Future<Output = Result<(), CallbackError>> + Send + 'a>> {
        Box::pin(self.after_visit_node(visit))
    }
}

/// Type alias for dynamically-dispatched visit callbacks.
pub type DynVisitCallbacks = Arc<dyn BoxVisitCallbacks>;
