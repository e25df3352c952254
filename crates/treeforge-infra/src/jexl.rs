//! JEXL-backed expression executor.
//!
//! Evaluates expression bodies against a context built from the session
//! scope: committed responses under `actions.<actionKey>`, the most recent
//! response under `last`, host user context under `context`, and injected
//! dependencies under `deps`. A small set of standard transforms is
//! pre-registered, and the result is coerced to the requested known type.

use serde_json::{Value, json};
use treeforge_core::expression::{ExpressionError, ExpressionExecutor, SessionScope};
use treeforge_core::typing::{TypeHint, coerce};

/// Stateless JEXL executor; the evaluator is rebuilt per call so the
/// executor itself stays `Send + Sync`.
#[derive(Debug, Default, Clone, Copy)]
pub struct JexlExpressionExecutor;

impl JexlExpressionExecutor {
    /// New executor.
    pub fn new() -> Self {
        Self
    }
}

impl ExpressionExecutor for JexlExpressionExecutor {
    async fn execute(
        &self,
        source: &str,
        hint: Option<&TypeHint>,
        scope: &dyn SessionScope,
    ) -> Result<Value, ExpressionError> {
        let context = scope.expression_context().await;
        let value = build_evaluator()
            .eval_in_context(source, &context)
            .map_err(|e| ExpressionError::Eval(e.to_string()))?;

        match hint {
            Some(h) => coerce(value, h).map_err(|e| ExpressionError::Coerce {
                type_name: h.to_string(),
                detail: e.to_string(),
            }),
            None => Ok(value),
        }
    }
}

/// JEXL evaluator with the standard transforms registered.
fn build_evaluator() -> jexl_eval::Evaluator<'static> {
    jexl_eval::Evaluator::new()
        .with_transform("lower", |args: &[Value]| {
            let s = args.first().and_then(|v| v.as_str()).unwrap_or("");
            Ok(json!(s.to_lowercase()))
        })
        .with_transform("upper", |args: &[Value]| {
            let s = args.first().and_then(|v| v.as_str()).unwrap_or("");
            Ok(json!(s.to_uppercase()))
        })
        .with_transform("contains", |args: &[Value]| {
            let subject = args.first().and_then(|v| v.as_str()).unwrap_or("");
            let search = args.get(1).and_then(|v| v.as_str()).unwrap_or("");
            Ok(json!(subject.contains(search)))
        })
        .with_transform("length", |args: &[Value]| {
            let val = args.first().cloned().unwrap_or(Value::Null);
            let len = match &val {
                Value::String(s) => s.len(),
                Value::Array(a) => a.len(),
                Value::Object(o) => o.len(),
                _ => 0,
            };
            Ok(json!(len as f64))
        })
        .with_transform("not", |args: &[Value]| {
            let val = args.first().cloned().unwrap_or(Value::Null);
            let truthy = match &val {
                Value::Bool(b) => *b,
                Value::Null => false,
                Value::Number(n) => n.as_f64().unwrap_or(0.0) != 0.0,
                Value::String(s) => !s.is_empty(),
                Value::Array(_) | Value::Object(_) => true,
            };
            Ok(json!(!truthy))
        })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
