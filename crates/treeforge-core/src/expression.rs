//! The expression execution capability and the embedded-expression grammar.
//!
//! Schema strings may carry an expression marker:
//! - `C#|<expr>` -- evaluate with the externally known type, or infer.
//! - `C#<Typename>|<expr>` -- evaluate as `Typename` unless a known type is
//!   supplied by the caller; `Typename` must name a built-in primitive.
//!
//! The compiler/evaluator behind the marker is an injected capability. It
//! receives the session scope so expressions can read prior action
//! responses.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde_json::Value;
use thiserror::Error;
use treeforge_types::response::ActionResponse;

use crate::typing::TypeHint;

/// Marker that introduces an embedded expression.
pub const EXPRESSION_MARKER: &str = "C#";

// ---------------------------------------------------------------------------
// Prefix grammar
// ---------------------------------------------------------------------------

/// A parsed embedded expression: optional type name plus the body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EmbeddedExpression<'a> {
    /// Type name from `C#<Typename>|`, if present.
    pub type_name: Option<&'a str>,
    /// Expression source with the marker stripped.
    pub body: &'a str,
}

/// Parse `C#|...` or `C#<Typename>|...`. Returns `None` when `s` carries no
/// well-formed marker, in which case the string is treated as plain data.
pub fn parse_embedded(s: &str) -> Option<EmbeddedExpression<'_>> {
    let rest = s.strip_prefix(EXPRESSION_MARKER)?;
    if let Some(body) = rest.strip_prefix('|') {
        return Some(EmbeddedExpression {
            type_name: None,
            body,
        });
    }
    let inner = rest.strip_prefix('<')?;
    let (name, after) = inner.split_once('>')?;
    let body = after.strip_prefix('|')?;
    Some(EmbeddedExpression {
        type_name: Some(name),
        body,
    })
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors from the expression capability.
#[derive(Debug, Error)]
pub enum ExpressionError {
    /// Compilation or evaluation failed.
    #[error("expression evaluation failed: {0}")]
    Eval(String),

    /// The result did not fit the requested type.
    #[error("expression result does not fit {type_name}: {detail}")]
    Coerce { type_name: String, detail: String },

    /// Evaluation observed cancellation; not a failure.
    #[error("expression evaluation cancelled")]
    Cancelled,
}

// ---------------------------------------------------------------------------
// SessionScope
// ---------------------------------------------------------------------------

/// Read surface a session exposes to expression code.
///
/// Object-safe by construction (`Pin<Box<dyn Future>>` methods); the engine
/// is the only implementor.
pub trait SessionScope: Send + Sync {
    /// Session identifier.
    fn session_id(&self) -> &str;

    /// Committed response for an action key, if any.
    fn response<'a>(
        &'a self,
        action_key: &'a str,
    ) -> Pin<Box<dyn Future<Output = Option<ActionResponse>> + Send + 'a>>;

    /// JSON snapshot of everything expressions may reference: committed
    /// responses, the most recent response, host context, and injected
    /// dependencies.
    fn expression_context<'a>(&'a self) -> Pin<Box<dyn Future<Output = Value> + Send + 'a>>;
}

// ---------------------------------------------------------------------------
// ExpressionExecutor port
// ---------------------------------------------------------------------------

/// Compiles and evaluates one expression source against the session scope,
/// returning a value of the hinted type (or whatever the expression yields
/// when no hint is given).
///
/// Uses RPITIT for zero-cost async in concrete types. For dynamic dispatch
/// (trait objects), see [`BoxExpressionExecutor`].
pub trait ExpressionExecutor: Send + Sync {
    fn execute(
        &self,
        source: &str,
        hint: Option<&TypeHint>,
        scope: &dyn SessionScope,
    ) -> impl Future<Output = Result<Value, ExpressionError>> + Send;
}

/// Object-safe version of [`ExpressionExecutor`] for dynamic dispatch.
///
/// A blanket implementation is provided for all types implementing
/// [`ExpressionExecutor`].
pub trait BoxExpressionExecutor: Send + Sync {
    fn execute_boxed<'a>(
        &'a self,
        source: &'a str,
        hint: Option<&'a TypeHint>,
        scope: &'a dyn SessionScope,
    ) -> Pin<Box<dyn Future<Output = Result<Value, ExpressionError>> + Send + 'a>>;
}

impl<T: ExpressionExecutor> BoxExpressionExecutor for T {
    fn execute_boxed<'a>(
        &'a self,
        source: &'a str,
        hint: Option<&'a TypeHint>,
        scope: &'a dyn SessionScope,
    ) -> Pin<Box<dyn Future<Output = Result<Value, ExpressionError>> + Send + 'a>> {
        Box::pin(self.execute(source, hint, scope))
    }
}

/// Type alias for a dynamically-dispatched expression executor.
pub type DynExpressionExecutor = Arc<dyn BoxExpressionExecutor>;

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
