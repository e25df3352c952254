//! Prefix-matched external executors.
//!
//! An external executor transforms a schema string into a value without
//! involving the expression compiler: the session holds a prefix table, and
//! any schema string starting with a registered prefix is handed to the
//! matching executor with the prefix stripped.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde_json::Value;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Errors from an external executor.
#[derive(Debug, Error)]
pub enum ExternalError {
    /// The executor failed.
    #[error("external executor failed: {0}")]
    Failed(String),

    /// The executor observed cancellation; not a failure.
    #[error("external executor cancelled")]
    Cancelled,
}

/// A prefix-matched string interpolator.
///
/// Uses RPITIT for zero-cost async in concrete types. For dynamic dispatch
/// (trait objects), see [`BoxExternalExecutor`].
pub trait ExternalExecutor: Send + Sync {
    /// Resolve `payload` (the schema string with the prefix stripped) to a
    /// value, observing `token`.
    fn execute(
        &self,
        payload: &str,
        token: &CancellationToken,
    ) -> impl Future<Output = Result<Value, ExternalError>> + Send;
}

/// Object-safe version of [`ExternalExecutor`] for dynamic dispatch.
///
/// A blanket implementation is provided for all types implementing
/// [`ExternalExecutor`].
pub trait BoxExternalExecutor: Send + Sync {
    fn execute_boxed<'a>(
        &'a self,
        payload: &'a str,
        token: &'a CancellationToken,
    ) -> Pin<Box<dyn Future<Output = Result<Value, ExternalError>> + Send + 'a>>;
}

impl<T: ExternalExecutor> BoxExternalExecutor for T {
    fn execute_boxed<'a>(
        &'a self,
        payload: &'a str,
        token: &'a CancellationToken,
    ) -> Pin<Box<dyn Future<Output = Result<Value, ExternalError>> + Send + 'a>> {
        Box::pin(self.execute(payload, token))
    }
}

/// Type alias for a dynamically-dispatched external executor.
pub type DynExternalExecutor = Arc<dyn BoxExternalExecutor>;

/// Prefix table consulted for schema strings without an expression marker.
///
/// Prefixes are expected to be disjoint; with overlapping prefixes the
/// match picked is unspecified.
pub type ExternalExecutors = HashMap<String, DynExternalExecutor>;
