//! Typed values addressable inside a [`crate::node::Node`].

use std::collections::BTreeMap;
use serde::{Deserialize, Serialize};

/// A typed scalar or structured leaf.
///
/// `Record` and `List` are the structured shapes the URL grammar traverses
/// into: dotted segments descend into a `Record`'s fields, bracketed
/// segments index into a `List` by the key field of its element (see
/// [`crate::url::Url`]).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value")]
pub enum Value {
    Bool(bool),
    Int(i64),
    Str(String),
    Bytes(Vec<u8>),
    /// Symbolic enum value, rendered on the wire by name.
    Enum(String),
    Record(BTreeMap<String, Value>),
    List(Vec<Value>),
}

impl Value {
    /// Stable short name of this value's kind, used in `TypeMismatch` errors.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Str(_) => "str",
            Value::Bytes(_) => "bytes",
            Value::Enum(_) => "enum",
            Value::Record(_) => "record",
            Value::List(_) => "list",
        }
    }

    /// True if `other` has the same kind as `self` (structural kind match,
    /// not value equality — this is what `set_value` checks before writing).
    pub fn same_kind(&self, other: &Value) -> bool {
        std::mem::discriminant(self) == std::mem::discriminant(other)
    }

    /// Partial merge: `incoming`'s fields overwrite `self`'s; fields `self`
    /// has that `incoming` doesn't are preserved. Lists have no per-element
    /// merge key at this layer, so an incoming `List` replaces the stored
    /// one wholesale.
    pub fn merge(&mut self, incoming: &Value) {
        match (self, incoming) {
            (Value::Record(existing), Value::Record(new)) => {
                for (k, v) in new {
                    match existing.get_mut(k) {
                        Some(slot) if slot.same_kind(v) => slot.merge(v),
                        _ => {
                            existing.insert(k.clone(), v.clone());
                        }
                    }
                }
            }
            (slot, new) => {
                *slot = new.clone();
            }
        }
    }

    /// Renders any supported value kind to the stable wire string form:
    /// integers decimal, booleans `true|false`, enums by symbolic name,
    /// bytes base-16, strings verbatim.
    pub fn to_wire_string(&self) -> String {
        match self {
            Value::Bool(b) => b.to_string(),
            Value::Int(i) => i.to_string(),
            Value::Str(s) => s.clone(),
            Value::Enum(name) => name.clone(),
            Value::Bytes(bytes) => bytes.iter().map(|b| format!("{:02x}", b)).collect(),
            Value::Record(_) | Value::List(_) => {
                serde_json::to_string(self).unwrap_or_default()
            }
        }
    }
}

/// Renders a value to its stable wire string form.
pub fn value_to_string(v: &Value) -> String {
    v.to_wire_string()
}

/// Recursively collects the URL suffixes (relative to the record root) whose
/// values differ between `old` and `new`. Used by [`crate::node::Node::diff`].
pub fn diff_values(prefix: &str, old: Option<&Value>, new: Option<&Value>, out: &mut Vec<String>) {
    match (old, new) {
        (Some(Value::Record(a)), Some(Value::Record(b))) => {
            let mut keys: Vec<&String> = a.keys().chain(b.keys()).collect();
            keys.sort();
            keys.dedup();
            for k in keys {
                let child_prefix = if prefix.is_empty() {
                    k.clone()
                } else {
                    format!("{}.{}", prefix, k)
                };
                diff_values(&child_prefix, a.get(k), b.get(k), out);
            }
        }
        (a, b) => {
            if a != b {
                out.push(prefix.to_string());
            }
        }
    }
}
