//! The dynamic value carried on the stack, in scopes, and in literals.
//!
//! Grounded on `bpmn-lite-core/src/types.rs`'s compact tagged `Value`
//! enum, generalized from that VM's fixed register width to the free-form
//! scalar/compound values a dataflow graph's node outputs need to carry.

use std::sync::Arc;

use crate::channel::Channel;
use crate::tasks::TaskId;

/// A runtime value. `Dict` is insertion-ordered (`Vec`, not a map) so that
/// `control_foreach` over a dict and JSON round-tripping preserve the
/// declared key order, so lowering and JSON round-tripping stay
/// order-preserving and deterministic.
#[derive(Clone, Debug)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    List(Vec<Value>),
    Dict(Vec<(String, Value)>),
    /// Opaque handle bound to a variable by `control_spawn`'s `VAR` or a
    /// user opcode that hands back a channel.
    Channel(Arc<Channel>),
    /// Opaque handle bound to a variable by `control_spawn`'s `VAR`.
    Task(TaskId),
}

impl Value {
    /// Zero/empty/false/null are falsy; everything else — including opaque
    /// handles — is truthy.
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Null => false,
            Value::Bool(b) => *b,
            Value::Int(n) => *n != 0,
            Value::Float(f) => *f != 0.0,
            Value::Str(s) => !s.is_empty(),
            Value::List(items) => !items.is_empty(),
            Value::Dict(entries) => !entries.is_empty(),
            Value::Channel(_) | Value::Task(_) => true,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Str(_) => "string",
            Value::List(_) => "list",
            Value::Dict(_) => "dict",
            Value::Channel(_) => "channel",
            Value::Task(_) => "task",
        }
    }

    pub fn tag(&self) -> SemanticTag {
        match self {
            Value::Null => SemanticTag::Any,
            Value::Bool(_) => SemanticTag::Bool,
            Value::Int(_) | Value::Float(_) => SemanticTag::Float,
            Value::Str(_) => SemanticTag::String,
            Value::List(_) => SemanticTag::List,
            Value::Dict(_) => SemanticTag::Dict,
            Value::Channel(_) => SemanticTag::Channel,
            Value::Task(_) => SemanticTag::Task,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(n) => Some(*n),
            Value::Float(f) => Some(*f as i64),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(n) => Some(*n as f64),
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_task(&self) -> Option<TaskId> {
        match self {
            Value::Task(id) => Some(*id),
            _ => None,
        }
    }

    pub fn as_channel(&self) -> Option<&Arc<Channel>> {
        match self {
            Value::Channel(c) => Some(c),
            _ => None,
        }
    }

    /// Items to drive `control_foreach`/`control_async_foreach` over: a
    /// list iterates its elements, a dict iterates its keys as strings.
    pub fn iter_items(&self) -> Option<Vec<Value>> {
        match self {
            Value::List(items) => Some(items.clone()),
            Value::Dict(entries) => {
                Some(entries.iter().map(|(k, _)| Value::Str(k.clone())).collect())
            }
            _ => None,
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::Int(a), Value::Float(b)) | (Value::Float(b), Value::Int(a)) => {
                (*a as f64) == *b
            }
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::List(a), Value::List(b)) => a == b,
            (Value::Dict(a), Value::Dict(b)) => a == b,
            (Value::Channel(a), Value::Channel(b)) => Arc::ptr_eq(a, b),
            (Value::Task(a), Value::Task(b)) => a == b,
            _ => false,
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Int(n)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(s)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.to_string())
    }
}

/// Semantic parameter/return tags used by opcode interfaces
/// and `TypeMismatch` checks.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SemanticTag {
    Int,
    Float,
    String,
    Bool,
    List,
    Dict,
    Any,
    Channel,
    Task,
    Block,
}

impl SemanticTag {
    pub fn accepts(&self, value: &Value) -> bool {
        match self {
            SemanticTag::Any => true,
            SemanticTag::Int => matches!(value, Value::Int(_)),
            SemanticTag::Float => matches!(value, Value::Int(_) | Value::Float(_)),
            SemanticTag::String => matches!(value, Value::Str(_)),
            SemanticTag::Bool => matches!(value, Value::Bool(_)),
            SemanticTag::List => matches!(value, Value::List(_)),
            SemanticTag::Dict => matches!(value, Value::Dict(_)),
            SemanticTag::Channel => matches!(value, Value::Channel(_)),
            SemanticTag::Task => matches!(value, Value::Task(_)),
            SemanticTag::Block => false,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            SemanticTag::Int => "int",
            SemanticTag::Float => "float",
            SemanticTag::String => "string",
            SemanticTag::Bool => "bool",
            SemanticTag::List => "list",
            SemanticTag::Dict => "dict",
            SemanticTag::Any => "any",
            SemanticTag::Channel => "channel",
            SemanticTag::Task => "task",
            SemanticTag::Block => "block",
        }
    }
}

/// Conversion from ingestion-time JSON literals to runtime `Value`s.
impl From<serde_json::Value> for Value {
    fn from(v: serde_json::Value) -> Self {
        match v {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Value::Int(i)
                } else {
                    Value::Float(n.as_f64().unwrap_or(0.0))
                }
            }
            serde_json::Value::String(s) => Value::Str(s),
            serde_json::Value::Array(items) => {
                Value::List(items.into_iter().map(Value::from).collect())
            }
            serde_json::Value::Object(map) => {
                Value::Dict(map.into_iter().map(|(k, v)| (k, Value::from(v))).collect())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truthiness_table() {
        assert!(!Value::Null.is_truthy());
        assert!(!Value::Bool(false).is_truthy());
        assert!(!Value::Int(0).is_truthy());
        assert!(!Value::Float(0.0).is_truthy());
        assert!(!Value::Str(String::new()).is_truthy());
        assert!(!Value::List(vec![]).is_truthy());
        assert!(!Value::Dict(vec![]).is_truthy());

        assert!(Value::Bool(true).is_truthy());
        assert!(Value::Int(1).is_truthy());
        assert!(Value::Int(-1).is_truthy());
        assert!(Value::Str("x".into()).is_truthy());
        assert!(Value::List(vec![Value::Null]).is_truthy());
        assert!(Value::Task(TaskId(1)).is_truthy());
    }

    #[test]
    fn dict_preserves_insertion_order() {
        let json: serde_json::Value =
            serde_json::json!({"name": "Alice", "age": 30, "city": "NYC"});
        let v = Value::from(json);
        match v {
            Value::Dict(entries) => {
                let keys: Vec<&str> = entries.iter().map(|(k, _)| k.as_str()).collect();
                assert_eq!(keys, vec!["name", "age", "city"]);
            }
            _ => panic!("expected dict"),
        }
    }
}
