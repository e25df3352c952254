//! Known-type descriptors and schema-value coercion.
//!
//! The evaluator resolves schema values against an optional target type. A
//! [`TypeHint`] plays the role a reflected runtime type would: scalars are
//! coerced, records map field names to field hints, and lists type their
//! elements. Descriptors are plain data, built once by the host and shared.

use std::collections::BTreeMap;
use std::fmt;

use serde_json::Value;
use thiserror::Error;
use treeforge_types::response::ActionResponse;

// ---------------------------------------------------------------------------
// TypeHint
// ---------------------------------------------------------------------------

/// Target type for dynamic property evaluation.
#[derive(Debug, Clone, PartialEq)]
pub enum TypeHint {
    /// Boolean scalar.
    Bool,
    /// Integer scalar.
    Int,
    /// Floating-point scalar.
    Float,
    /// String scalar.
    Str,
    /// The action-response envelope (object with a string `status`).
    Response,
    /// Homogeneous list with a typed element.
    List(Box<TypeHint>),
    /// Record with per-field hints.
    Record(TypeSchema),
}

impl TypeHint {
    /// List hint with the given element type.
    pub fn list(element: TypeHint) -> Self {
        TypeHint::List(Box::new(element))
    }
}

impl fmt::Display for TypeHint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypeHint::Bool => f.write_str("bool"),
            TypeHint::Int => f.write_str("int"),
            TypeHint::Float => f.write_str("float"),
            TypeHint::Str => f.write_str("string"),
            TypeHint::Response => f.write_str("response"),
            TypeHint::List(element) => write!(f, "list<{element}>"),
            TypeHint::Record(_) => f.write_str("record"),
        }
    }
}

/// Field-name to field-hint mapping for a record type.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TypeSchema {
    fields: BTreeMap<String, TypeHint>,
}

impl TypeSchema {
    /// Empty schema.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a typed field.
    pub fn with_field(mut self, name: impl Into<String>, hint: TypeHint) -> Self {
        self.fields.insert(name.into(), hint);
        self
    }

    /// Declared hint for a field, if any.
    pub fn field(&self, name: &str) -> Option<&TypeHint> {
        self.fields.get(name)
    }
}

// ---------------------------------------------------------------------------
// Primitive type names
// ---------------------------------------------------------------------------

/// Resolve an embedded `C#<Typename>|` type name against the built-in
/// primitive namespace. Both the host-framework spellings and the Rust
/// spellings are accepted.
pub fn resolve_primitive(name: &str) -> Option<TypeHint> {
    match name {
        "Boolean" | "bool" => Some(TypeHint::Bool),
        "Int16" | "Int32" | "Int64" | "int" | "long" | "i32" | "i64" => Some(TypeHint::Int),
        "Single" | "Double" | "float" | "double" | "f32" | "f64" => Some(TypeHint::Float),
        "String" | "string" | "str" => Some(TypeHint::Str),
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// Coercion
// ---------------------------------------------------------------------------

/// A value could not be represented as the requested type.
#[derive(Debug, Error)]
#[error("cannot represent {value} as {target}")]
pub struct CoerceError {
    /// Compact rendering of the offending value.
    pub value: String,
    /// Display name of the target type.
    pub target: String,
}

fn incompatible(value: &Value, target: &TypeHint) -> CoerceError {
    CoerceError {
        value: preview(value),
        target: target.to_string(),
    }
}

/// Compact, bounded rendering of a value for error messages.
pub(crate) fn preview(value: &Value) -> String {
    let mut text = value.to_string();
    if text.len() > 160 {
        text.truncate(157);
        text.push_str("...");
    }
    text
}

/// Coerce an evaluated value to `hint`. Idempotent on values that already
/// have the target shape.
pub fn coerce(value: Value, hint: &TypeHint) -> Result<Value, CoerceError> {
    match hint {
        TypeHint::Bool => match &value {
            Value::Bool(_) => Ok(value),
            Value::String(s) if s.eq_ignore_ascii_case("true") => Ok(Value::Bool(true)),
            Value::String(s) if s.eq_ignore_ascii_case("false") => Ok(Value::Bool(false)),
            Value::Number(n) => Ok(Value::Bool(n.as_f64().unwrap_or(0.0) != 0.0)),
            _ => Err(incompatible(&value, hint)),
        },
        TypeHint::Int => match &value {
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Ok(Value::from(i))
                } else if let Some(f) = n.as_f64().filter(|f| f.fract() == 0.0) {
                    Ok(Value::from(f as i64))
                } else {
                    Err(incompatible(&value, hint))
                }
            }
            Value::String(s) => s
                .trim()
                .parse::<i64>()
                .map(Value::from)
                .map_err(|_| incompatible(&value, hint)),
            _ => Err(incompatible(&value, hint)),
        },
        TypeHint::Float => match &value {
            Value::Number(n) => {
                let f = n.as_f64().ok_or_else(|| incompatible(&value, hint))?;
                serde_json::Number::from_f64(f)
                    .map(Value::Number)
                    .ok_or_else(|| incompatible(&value, hint))
            }
            Value::String(s) => s
                .trim()
                .parse::<f64>()
                .ok()
                .and_then(serde_json::Number::from_f64)
                .map(Value::Number)
                .ok_or_else(|| incompatible(&value, hint)),
            _ => Err(incompatible(&value, hint)),
        },
        TypeHint::Str => match &value {
            Value::String(_) => Ok(value),
            Value::Bool(b) => Ok(Value::String(b.to_string())),
            Value::Number(n) => Ok(Value::String(n.to_string())),
            _ => Err(incompatible(&value, hint)),
        },
        TypeHint::Response => {
            serde_json::from_value::<ActionResponse>(value.clone())
                .map_err(|_| incompatible(&value, hint))?;
            Ok(value)
        }
        TypeHint::List(element) => match value {
            Value::Array(items) => {
                let coerced = items
                    .into_iter()
                    .map(|item| coerce(item, element))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(Value::Array(coerced))
            }
            other => Err(incompatible(&other, hint)),
        },
        TypeHint::Record(schema) => match value {
            Value::Object(map) => {
                let mut out = serde_json::Map::with_capacity(map.len());
                for (key, field_value) in map {
                    let coerced = match schema.field(&key) {
                        Some(field_hint) => coerce(field_value, field_hint)?,
                        None => field_value,
                    };
                    out.insert(key, coerced);
                }
                Ok(Value::Object(out))
            }
            other => Err(incompatible(&other, hint)),
        },
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
