//! Resource Handles
//!
//! A resolved resource is either a single handle (identifier lookup) or a
//! collection of handles (filter lookup). Matchers only see the [`Inspect`]
//! capability set and branch on [`Resolved`] where arity matters.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

/// Attribute filter used by plural lookups (ordered for stable rendering)
pub type Filter = BTreeMap<String, Value>;

/// How a resource is addressed at the call site
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceReference {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identifier: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub filter: Filter,
}

impl ResourceReference {
    /// Address a single resource by its unique identifier
    pub fn id(identifier: impl Into<String>) -> Self {
        Self {
            identifier: Some(identifier.into()),
            filter: Filter::new(),
        }
    }

    /// Address zero or more resources by attribute filter
    pub fn filter<K, V, I>(pairs: I) -> Self
    where
        K: Into<String>,
        V: Into<Value>,
        I: IntoIterator<Item = (K, V)>,
    {
        Self {
            identifier: None,
            filter: pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    /// Reference with neither identifier nor filter
    pub fn empty() -> Self {
        Self::default()
    }

    /// The identifier, unless it is blank
    pub fn addressed_id(&self) -> Option<&str> {
        self.identifier
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty())
    }

    /// Identifier addressing wins over the filter when both are set
    pub fn is_singular(&self) -> bool {
        self.addressed_id().is_some() || self.filter.is_empty()
    }
}

impl fmt::Display for ResourceReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(id) = self.addressed_id() {
            return write!(f, "{}", id);
        }
        if self.filter.is_empty() {
            return Ok(());
        }
        let parts: Vec<String> = self
            .filter
            .iter()
            .map(|(key, value)| format!("{}={}", key, render_value(value)))
            .collect();
        write!(f, "with {}", parts.join(", "))
    }
}

/// A single resolved entity
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceHandle {
    record: Option<Value>,
}

impl ResourceHandle {
    pub fn found(record: Value) -> Self {
        Self {
            record: Some(record),
        }
    }

    pub fn not_found() -> Self {
        Self { record: None }
    }

    pub fn exists(&self) -> bool {
        self.record.is_some()
    }

    /// Look up an attribute by dot path (`tags.0.value`); `null` counts as absent
    pub fn attribute(&self, path: &str) -> Option<&Value> {
        lookup_path(self.record.as_ref()?, path)
    }

    pub fn record(&self) -> Option<&Value> {
        self.record.as_ref()
    }
}

/// Zero or more resolved entities, in backend order
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResourceHandleCollection {
    handles: Vec<ResourceHandle>,
}

impl ResourceHandleCollection {
    pub fn new(handles: Vec<ResourceHandle>) -> Self {
        Self { handles }
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ResourceHandle> {
        self.handles.iter()
    }
}

impl FromIterator<Value> for ResourceHandleCollection {
    fn from_iter<T: IntoIterator<Item = Value>>(iter: T) -> Self {
        Self::new(iter.into_iter().map(ResourceHandle::found).collect())
    }
}

/// Result of resolving a reference: the tag decides singular vs plural semantics
#[derive(Debug, Clone, PartialEq)]
pub enum Resolved {
    Single(ResourceHandle),
    Collection(ResourceHandleCollection),
}

/// Capabilities matchers are allowed to rely on
pub trait Inspect {
    /// Singular: the entity exists. Plural: at least one match.
    fn exists(&self) -> bool;

    /// Number of entities behind this subject
    fn size(&self) -> usize;

    /// One entry per entity; `None` where the entity lacks the attribute
    fn attribute_values(&self, path: &str) -> Vec<Option<&Value>>;
}

impl Inspect for ResourceHandle {
    fn exists(&self) -> bool {
        ResourceHandle::exists(self)
    }

    fn size(&self) -> usize {
        usize::from(self.exists())
    }

    fn attribute_values(&self, path: &str) -> Vec<Option<&Value>> {
        if self.exists() {
            vec![self.attribute(path)]
        } else {
            Vec::new()
        }
    }
}

impl Inspect for ResourceHandleCollection {
    fn exists(&self) -> bool {
        !self.is_empty()
    }

    fn size(&self) -> usize {
        self.len()
    }

    fn attribute_values(&self, path: &str) -> Vec<Option<&Value>> {
        self.handles.iter().map(|h| h.attribute(path)).collect()
    }
}

impl Inspect for Resolved {
    fn exists(&self) -> bool {
        match self {
            Resolved::Single(handle) => Inspect::exists(handle),
            Resolved::Collection(collection) => collection.exists(),
        }
    }

    fn size(&self) -> usize {
        match self {
            Resolved::Single(handle) => handle.size(),
            Resolved::Collection(collection) => collection.size(),
        }
    }

    fn attribute_values(&self, path: &str) -> Vec<Option<&Value>> {
        match self {
            Resolved::Single(handle) => handle.attribute_values(path),
            Resolved::Collection(collection) => collection.attribute_values(path),
        }
    }
}

/// Walk a dot-notation path through a JSON value (numeric parts index arrays)
pub fn lookup_path<'a>(item: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = item;

    for part in path.split('.') {
        current = match part.parse::<usize>() {
            Ok(idx) if current.is_array() => current.get(idx)?,
            _ => current.get(part)?,
        };
    }

    if current.is_null() {
        None
    } else {
        Some(current)
    }
}

/// Compare an observed value with an expected one.
/// Scalars of different JSON types compare by their string form ("8" == 8).
pub fn loosely_equal(actual: &Value, expected: &Value) -> bool {
    if actual == expected {
        return true;
    }
    match (scalar_text(actual), scalar_text(expected)) {
        (Some(a), Some(e)) => a == e,
        _ => false,
    }
}

fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Render a value for descriptions: strings bare, everything else as JSON
pub fn render_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
