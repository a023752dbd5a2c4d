//! Canonical query keys.
//!
//! A key is `(scope, entity, args)` where `args` is any serializable value that
//! turns into a JSON object. Arguments are normalized so that field order never
//! matters and `None`/`null` fields are the same as omitted ones.

use serde::Serialize;
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use crate::error::{QueryError, QueryResult};

/// Structurally comparable identity of a request.
#[derive(Clone)]
pub struct QueryKey {
  scope: Arc<str>,
  entity: Arc<str>,
  args: Arc<Map<String, Value>>,
  /// Sorted, null-free JSON rendering of `args`; equality and hashing use it.
  canonical: Arc<str>,
}

impl QueryKey {
  /// Build a key from a scope (resource route), an entity (operation) and
  /// arguments.
  ///
  /// Fails when the arguments cannot be serialized or do not serialize to an
  /// object, so a bad argument never silently collides with another key.
  pub fn build<A>(scope: &str, entity: &str, args: &A) -> QueryResult<Self>
  where
    A: Serialize + ?Sized,
  {
    if scope.trim().is_empty() {
      return Err(QueryError::invalid_key(scope, entity, "scope is empty"));
    }
    if entity.trim().is_empty() {
      return Err(QueryError::invalid_key(scope, entity, "entity is empty"));
    }

    let value = serde_json::to_value(args)
      .map_err(|e| QueryError::invalid_key(scope, entity, e.to_string()))?;

    let args = match prune_nulls(value) {
      Value::Null => Map::new(),
      Value::Object(map) => map,
      other => {
        return Err(QueryError::invalid_key(
          scope,
          entity,
          format!("arguments must be a map, got {}", json_kind(&other)),
        ))
      }
    };

    let mut canonical = String::new();
    write_object(&args, &mut canonical);

    Ok(Self {
      scope: scope.into(),
      entity: entity.into(),
      args: Arc::new(args),
      canonical: canonical.into(),
    })
  }

  /// Key without arguments.
  pub fn simple(scope: &str, entity: &str) -> QueryResult<Self> {
    Self::build(scope, entity, &())
  }

  pub fn scope(&self) -> &str {
    &self.scope
  }

  pub fn entity(&self) -> &str {
    &self.entity
  }

  /// Normalized arguments.
  pub fn args(&self) -> &Map<String, Value> {
    &self.args
  }

  pub fn arg(&self, name: &str) -> Option<&Value> {
    self.args.get(name)
  }

  /// True when the key belongs to `scope` and, if given, to `entity`.
  pub fn matches(&self, scope: &str, entity: Option<&str>) -> bool {
    &*self.scope == scope && entity.map_or(true, |e| &*self.entity == e)
  }

  /// Stable fixed-length digest of the key, for logs and diagnostics.
  pub fn cache_hash(&self) -> String {
    let mut hasher = Sha256::new();
    hasher.update(self.scope.as_bytes());
    hasher.update([0]);
    hasher.update(self.entity.as_bytes());
    hasher.update([0]);
    hasher.update(self.canonical.as_bytes());
    hex::encode(hasher.finalize())
  }

  /// Human readable form, e.g. `products/list {"limit":50}`.
  pub fn description(&self) -> String {
    if self.args.is_empty() {
      format!("{}/{}", self.scope, self.entity)
    } else {
      format!("{}/{} {}", self.scope, self.entity, self.canonical)
    }
  }
}

impl PartialEq for QueryKey {
  fn eq(&self, other: &Self) -> bool {
    self.scope == other.scope && self.entity == other.entity && self.canonical == other.canonical
  }
}

impl Eq for QueryKey {}

impl Hash for QueryKey {
  fn hash<H: Hasher>(&self, state: &mut H) {
    self.scope.hash(state);
    self.entity.hash(state);
    self.canonical.hash(state);
  }
}

impl fmt::Debug for QueryKey {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.description())
  }
}

impl fmt::Display for QueryKey {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.description())
  }
}

/// Drop `null` object fields, recursively. Array slots are positional and kept.
fn prune_nulls(value: Value) -> Value {
  match value {
    Value::Object(map) => Value::Object(
      map
        .into_iter()
        .map(|(k, v)| (k, prune_nulls(v)))
        .filter(|(_, v)| !v.is_null())
        .collect(),
    ),
    Value::Array(items) => Value::Array(items.into_iter().map(prune_nulls).collect()),
    other => other,
  }
}

fn write_object(map: &Map<String, Value>, out: &mut String) {
  // Sort explicitly: map iteration order depends on serde_json features.
  let mut entries: Vec<(&String, &Value)> = map.iter().collect();
  entries.sort_by(|a, b| a.0.cmp(b.0));

  out.push('{');
  for (i, (name, value)) in entries.into_iter().enumerate() {
    if i > 0 {
      out.push(',');
    }
    out.push_str(&Value::String(name.clone()).to_string());
    out.push(':');
    write_value(value, out);
  }
  out.push('}');
}

fn write_value(value: &Value, out: &mut String) {
  match value {
    Value::Object(map) => write_object(map, out),
    Value::Array(items) => {
      out.push('[');
      for (i, item) in items.iter().enumerate() {
        if i > 0 {
          out.push(',');
        }
        write_value(item, out);
      }
      out.push(']');
    }
    other => out.push_str(&other.to_string()),
  }
}

fn json_kind(value: &Value) -> &'static str {
  match value {
    Value::Null => "null",
    Value::Bool(_) => "a boolean",
    Value::Number(_) => "a number",
    Value::String(_) => "a string",
    Value::Array(_) => "an array",
    Value::Object(_) => "an object",
  }
}
