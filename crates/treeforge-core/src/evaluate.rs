//! Dynamic property evaluator.
//!
//! Recursively resolves schema values that may contain embedded expressions
//! or external-executor prefixes, honoring a known target type when one is
//! supplied and inferring one otherwise. Idempotent on already-evaluated
//! scalars; `null` stays `null`.
//!
//! Any failure other than cancellation is wrapped as
//! [`EvaluateError::Failed`] carrying the offending value's string form and
//! the known-type name; cancellation propagates unchanged.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde_json::{Map, Value};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::expression::{
    DynExpressionExecutor, ExpressionError, SessionScope, parse_embedded,
};
use crate::external::{ExternalError, ExternalExecutors};
use crate::typing::{TypeHint, coerce, preview, resolve_primitive};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors from the dynamic property evaluator.
#[derive(Debug, Error)]
pub enum EvaluateError {
    /// Evaluation observed cancellation; propagates unchanged.
    #[error("evaluation cancelled")]
    Cancelled,

    /// Evaluation of a schema value failed.
    #[error("failed to evaluate {value} as {type_name}: {detail}")]
    Failed {
        /// Compact rendering of the offending value.
        value: String,
        /// Display name of the known type, or `inferred`.
        type_name: String,
        /// What went wrong.
        detail: String,
    },
}

impl EvaluateError {
    fn failed(value: &Value, hint: Option<&TypeHint>, detail: impl ToString) -> Self {
        EvaluateError::Failed {
            value: preview(value),
            type_name: hint.map_or_else(|| "inferred".to_string(), ToString::to_string),
            detail: detail.to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// PropertyEvaluator
// ---------------------------------------------------------------------------

/// Evaluates schema values against the session's expression executor,
/// external executors, and cancellation token.
#[derive(Clone)]
pub struct PropertyEvaluator {
    expressions: DynExpressionExecutor,
    externals: Arc<ExternalExecutors>,
    scope: Arc<dyn SessionScope>,
    token: CancellationToken,
}

impl PropertyEvaluator {
    pub(crate) fn new(
        expressions: DynExpressionExecutor,
        externals: Arc<ExternalExecutors>,
        scope: Arc<dyn SessionScope>,
        token: CancellationToken,
    ) -> Self {
        Self {
            expressions,
            externals,
            scope,
            token,
        }
    }

    /// Evaluate a schema value, optionally against a known target type.
    pub async fn evaluate(
        &self,
        value: &Value,
        hint: Option<&TypeHint>,
    ) -> Result<Value, EvaluateError> {
        self.eval_value(value, hint).await
    }

    /// Boxed recursion point: objects and arrays re-enter through here.
    fn eval_value<'a>(
        &'a self,
        value: &'a Value,
        hint: Option<&'a TypeHint>,
    ) -> Pin<Box<dyn Future<Output = Result<Value, EvaluateError>> + Send + 'a>> {
        Box::pin(async move {
            if self.token.is_cancelled() {
                return Err(EvaluateError::Cancelled);
            }
            match value {
                Value::Null => Ok(Value::Null),
                Value::String(s) => self.eval_string(s, hint).await,
                Value::Object(map) => self.eval_object(value, map, hint).await,
                Value::Array(items) => self.eval_array(value, items, hint).await,
                scalar => match hint {
                    Some(h) => {
                        coerce(scalar.clone(), h).map_err(|e| EvaluateError::failed(value, hint, e))
                    }
                    None => Ok(scalar.clone()),
                },
            }
        })
    }

    /// Strings: expression marker first, then external prefixes, else plain.
    async fn eval_string(
        &self,
        s: &str,
        hint: Option<&TypeHint>,
    ) -> Result<Value, EvaluateError> {
        if let Some(expr) = parse_embedded(s) {
            // Effective type priority: caller-known, embedded name, string.
            let effective = match (hint, expr.type_name) {
                (Some(known), _) => known.clone(),
                (None, Some(name)) => resolve_primitive(name).ok_or_else(|| {
                    EvaluateError::Failed {
                        value: s.to_string(),
                        type_name: name.to_string(),
                        detail: "unknown primitive type name".to_string(),
                    }
                })?,
                (None, None) => TypeHint::Str,
            };
            return self
                .expressions
                .execute_boxed(expr.body, Some(&effective), self.scope.as_ref())
                .await
                .map_err(|err| match err {
                    ExpressionError::Cancelled => EvaluateError::Cancelled,
                    other => EvaluateError::failed(
                        &Value::String(s.to_string()),
                        Some(&effective),
                        other,
                    ),
                });
        }

        for (prefix, executor) in self.externals.iter() {
            let Some(payload) = s.strip_prefix(prefix.as_str()) else {
                continue;
            };
            let result = executor
                .execute_boxed(payload, &self.token)
                .await
                .map_err(|err| match err {
                    ExternalError::Cancelled => EvaluateError::Cancelled,
                    other => {
                        EvaluateError::failed(&Value::String(s.to_string()), hint, other)
                    }
                })?;
            return match hint {
                Some(h) => coerce(result, h)
                    .map_err(|e| EvaluateError::failed(&Value::String(s.to_string()), hint, e)),
                None => Ok(result),
            };
        }

        Ok(Value::String(s.to_string()))
    }

    /// Objects: with a record hint each field evaluates against its declared
    /// type; without a hint every value evaluates untyped.
    async fn eval_object(
        &self,
        original: &Value,
        map: &Map<String, Value>,
        hint: Option<&TypeHint>,
    ) -> Result<Value, EvaluateError> {
        match hint {
            None => {
                let mut out = Map::with_capacity(map.len());
                for (key, field) in map {
                    out.insert(key.clone(), self.eval_value(field, None).await?);
                }
                Ok(Value::Object(out))
            }
            Some(TypeHint::Record(schema)) => {
                let mut out = Map::with_capacity(map.len());
                for (key, field) in map {
                    out.insert(key.clone(), self.eval_value(field, schema.field(key)).await?);
                }
                Ok(Value::Object(out))
            }
            Some(TypeHint::Response) => {
                let mut out = Map::with_capacity(map.len());
                for (key, field) in map {
                    let field_hint = (key == "status").then_some(&TypeHint::Str);
                    out.insert(key.clone(), self.eval_value(field, field_hint).await?);
                }
                coerce(Value::Object(out), &TypeHint::Response)
                    .map_err(|e| EvaluateError::failed(original, hint, e))
            }
            Some(other) => Err(EvaluateError::failed(
                original,
                Some(other),
                "object value cannot satisfy a scalar type",
            )),
        }
    }

    /// Arrays: a known type must be list-shaped and types the elements.
    async fn eval_array(
        &self,
        original: &Value,
        items: &[Value],
        hint: Option<&TypeHint>,
    ) -> Result<Value, EvaluateError> {
        let element_hint = match hint {
            None => None,
            Some(TypeHint::List(element)) => Some(element.as_ref()),
            Some(other) => {
                return Err(EvaluateError::failed(
                    original,
                    Some(other),
                    "array value requires a list-shaped type",
                ));
            }
        };
        let mut out = Vec::with_capacity(items.len());
        for item in items {
            out.push(self.eval_value(item, element_hint).await?);
        }
        Ok(Value::Array(out))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expression::{ExpressionExecutor, SessionScope};
    use crate::external::ExternalExecutor;
    use crate::typing::TypeSchema;
    use serde_json::json;
    use std::sync::Mutex;
    use treeforge_types::response::ActionResponse;

    /// Scope with nothing committed.
    struct NullScope;

    impl SessionScope for NullScope {
        fn session_id(&self) -> &str {
            "test-session"
        }

        fn response<'a>(
            &'a self,
            _action_key: &'a str,
        ) -> Pin<Box<dyn Future<Output = Option<ActionResponse>> + Send + 'a>> {
            Box::pin(async { None })
        }

        fn expression_context<'a>(
            &'a self,
        ) -> Pin<Box<dyn Future<Output = Value> + Send + 'a>> {
            Box::pin(async { json!({}) })
        }
    }

    /// Executor that records each call and returns a canned value.
    struct StubExpressions {
        result: Value,
        calls: Mutex<Vec<(String, Option<String>)>>,
    }

    impl StubExpressions {
        fn returning(result: Value) -> Arc<Self> {
            Arc::new(Self {
                result,
                calls: Mutex::new(Vec::new()),
            })
        }

        fn calls(&self) -> Vec<(String, Option<String>)> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl ExpressionExecutor for StubExpressions {
        async fn execute(
            &self,
            source: &str,
            hint: Option<&TypeHint>,
            _scope: &dyn SessionScope,
        ) -> Result<Value, ExpressionError> {
            self.calls
                .lock()
                .unwrap()
                .push((source.to_string(), hint.map(ToString::to_string)));
            Ok(self.result.clone())
        }
    }

    struct UppercaseExternal;

    impl ExternalExecutor for UppercaseExternal {
        async fn execute(
            &self,
            payload: &str,
            _token: &CancellationToken,
        ) -> Result<Value, ExternalError> {
            Ok(Value::String(payload.to_uppercase()))
        }
    }

    fn evaluator_with(
        expressions: Arc<StubExpressions>,
        externals: ExternalExecutors,
        token: CancellationToken,
    ) -> PropertyEvaluator {
        PropertyEvaluator::new(
            expressions,
            Arc::new(externals),
            Arc::new(NullScope),
            token,
        )
    }

    fn evaluator(expressions: Arc<StubExpressions>) -> PropertyEvaluator {
        evaluator_with(expressions, ExternalExecutors::new(), CancellationToken::new())
    }

    // -------------------------------------------------------------------
    // Expression strings
    // -------------------------------------------------------------------

    #[tokio::test]
    async fn known_type_outranks_embedded_type() {
        let stub = StubExpressions::returning(json!(7));
        let result = evaluator(Arc::clone(&stub))
            .evaluate(&json!("C#<Boolean>|count"), Some(&TypeHint::Int))
            .await
            .unwrap();
        assert_eq!(result, json!(7));
        assert_eq!(stub.calls(), [("count".to_string(), Some("int".to_string()))]);
    }

    #[tokio::test]
    async fn embedded_type_applies_when_no_known_type() {
        let stub = StubExpressions::returning(json!(false));
        evaluator(Arc::clone(&stub))
            .evaluate(&json!("C#<Boolean>|false"), None)
            .await
            .unwrap();
        assert_eq!(stub.calls(), [("false".to_string(), Some("bool".to_string()))]);
    }

    #[tokio::test]
    async fn untyped_expression_defaults_to_string() {
        let stub = StubExpressions::returning(json!("hello"));
        evaluator(Arc::clone(&stub))
            .evaluate(&json!("C#|greeting"), None)
            .await
            .unwrap();
        assert_eq!(
            stub.calls(),
            [("greeting".to_string(), Some("string".to_string()))]
        );
    }

    #[tokio::test]
    async fn unknown_embedded_type_name_fails() {
        let stub = StubExpressions::returning(json!(null));
        let err = evaluator(stub)
            .evaluate(&json!("C#<Widget>|x"), None)
            .await
            .unwrap_err();
        assert!(matches!(err, EvaluateError::Failed { .. }));
        assert!(err.to_string().contains("Widget"));
    }

    // -------------------------------------------------------------------
    // External prefixes and plain strings
    // -------------------------------------------------------------------

    #[tokio::test]
    async fn external_prefix_strips_and_delegates() {
        let mut externals = ExternalExecutors::new();
        externals.insert(
            "upper:".to_string(),
            Arc::new(UppercaseExternal) as crate::external::DynExternalExecutor,
        );
        let stub = StubExpressions::returning(json!(null));
        let evaluator = evaluator_with(stub, externals, CancellationToken::new());

        let result = evaluator.evaluate(&json!("upper:abc"), None).await.unwrap();
        assert_eq!(result, json!("ABC"));

        // A known type coerces the external result.
        let result = evaluator
            .evaluate(&json!("upper:true"), Some(&TypeHint::Bool))
            .await
            .unwrap();
        assert_eq!(result, json!(true));
    }

    #[tokio::test]
    async fn plain_strings_pass_through_unchanged() {
        let stub = StubExpressions::returning(json!(null));
        let evaluator = evaluator(Arc::clone(&stub));

        let result = evaluator.evaluate(&json!("just text"), None).await.unwrap();
        assert_eq!(result, json!("just text"));
        assert!(stub.calls().is_empty());
    }

    // -------------------------------------------------------------------
    // Scalars, null, idempotence
    // -------------------------------------------------------------------

    #[tokio::test]
    async fn null_stays_null_even_with_a_hint() {
        let stub = StubExpressions::returning(json!(null));
        let result = evaluator(stub)
            .evaluate(&json!(null), Some(&TypeHint::Int))
            .await
            .unwrap();
        assert_eq!(result, json!(null));
    }

    #[tokio::test]
    async fn scalars_are_idempotent() {
        let stub = StubExpressions::returning(json!(null));
        let evaluator = evaluator(stub);

        // No hint: verbatim.
        assert_eq!(evaluator.evaluate(&json!(5), None).await.unwrap(), json!(5));

        // Hinted: coercing twice yields equal values.
        let once = evaluator
            .evaluate(&json!("5"), Some(&TypeHint::Str))
            .await
            .unwrap();
        let twice = evaluator
            .evaluate(&once, Some(&TypeHint::Str))
            .await
            .unwrap();
        assert_eq!(once, twice);
    }

    // -------------------------------------------------------------------
    // Objects and arrays
    // -------------------------------------------------------------------

    #[tokio::test]
    async fn record_hint_types_declared_fields() {
        let stub = StubExpressions::returning(json!(3));
        let schema = TypeSchema::new().with_field("count", TypeHint::Int);
        let result = evaluator(Arc::clone(&stub))
            .evaluate(
                &json!({ "count": "C#|context.count", "label": "plain" }),
                Some(&TypeHint::Record(schema)),
            )
            .await
            .unwrap();

        assert_eq!(result, json!({ "count": 3, "label": "plain" }));
        assert_eq!(
            stub.calls(),
            [("context.count".to_string(), Some("int".to_string()))]
        );
    }

    #[tokio::test]
    async fn untyped_object_recurses_into_values() {
        let stub = StubExpressions::returning(json!("resolved"));
        let result = evaluator(stub)
            .evaluate(
                &json!({ "a": "C#|x", "b": { "c": 1 }, "d": [true] }),
                None,
            )
            .await
            .unwrap();
        assert_eq!(
            result,
            json!({ "a": "resolved", "b": { "c": 1 }, "d": [true] })
        );
    }

    #[tokio::test]
    async fn list_hint_types_each_element() {
        let stub = StubExpressions::returning(json!(null));
        let result = evaluator(stub)
            .evaluate(&json!(["1", "2"]), Some(&TypeHint::list(TypeHint::Int)))
            .await
            .unwrap();
        assert_eq!(result, json!([1, 2]));
    }

    #[tokio::test]
    async fn array_with_scalar_hint_fails() {
        let stub = StubExpressions::returning(json!(null));
        let err = evaluator(stub)
            .evaluate(&json!([1]), Some(&TypeHint::Int))
            .await
            .unwrap_err();
        assert!(matches!(err, EvaluateError::Failed { .. }));
    }

    #[tokio::test]
    async fn response_hint_validates_the_envelope() {
        let stub = StubExpressions::returning(json!(null));
        let evaluator = evaluator(stub);

        let ok = evaluator
            .evaluate(&json!({ "status": "Done" }), Some(&TypeHint::Response))
            .await
            .unwrap();
        assert_eq!(ok, json!({ "status": "Done" }));

        let err = evaluator
            .evaluate(&json!({ "other": 1 }), Some(&TypeHint::Response))
            .await
            .unwrap_err();
        assert!(matches!(err, EvaluateError::Failed { .. }));
    }

    // -------------------------------------------------------------------
    // Cancellation
    // -------------------------------------------------------------------

    #[tokio::test]
    async fn cancelled_token_short_circuits() {
        let token = CancellationToken::new();
        token.cancel();
        let stub = StubExpressions::returning(json!(null));
        let evaluator = evaluator_with(stub, ExternalExecutors::new(), token);

        let err = evaluator.evaluate(&json!("C#|x"), None).await.unwrap_err();
        assert!(matches!(err, EvaluateError::Cancelled));
    }
}
