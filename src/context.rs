//! Per-call parameter context.

use crate::value::Value;
use std::collections::BTreeMap;

/// Variables visible to one `build_query` call.
///
/// The engine works on a call-local copy, so `bind(...)` entries added during
/// a build are visible to later sibling nodes of that call only; the context
/// handed in by the caller is never mutated.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParamContext {
    values: BTreeMap<String, Value>,
}

impl ParamContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<Value>) -> &mut Self {
        self.values.insert(name.into(), value.into());
        self
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    pub fn remove(&mut self, name: &str) -> Option<Value> {
        self.values.remove(name)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.values.iter()
    }

    /// Build a context from a JSON object; non-object input yields an empty
    /// context.
    pub fn from_json(json: serde_json::Value) -> Self {
        let mut ctx = Self::new();
        if let serde_json::Value::Object(map) = json {
            for (k, v) in map {
                ctx.insert(k, Value::from(v));
            }
        }
        ctx
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for ParamContext {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        let mut ctx = Self::new();
        for (k, v) in iter {
            ctx.insert(k, v);
        }
        ctx
    }
}
