//! Core document types for hybridsearch.
//!
//! A [`Document`] carries an embedding, typed attributes validated against the
//! collection schema, and a schema-free [`MetadataValue`] tree. Attributes are
//! indexed by the attribute store, metadata by the metadata store.

use crate::config::{MAX_ID_LEN, MAX_METADATA_BYTES, MAX_METADATA_DEPTH};
use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

/// Caller-visible document identifier.
///
/// Ordered lexicographically; the scorer uses this order to break score ties.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocId(String);

impl DocId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Random UUID v4 identifier.
    pub fn random() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DocId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DocId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for DocId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<Uuid> for DocId {
    fn from(u: Uuid) -> Self {
        Self(u.to_string())
    }
}

/// A typed scalar stored in a schema-declared attribute column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum AttributeValue {
    Number(f64),
    Text(String),
    Timestamp(DateTime<Utc>),
    /// One of the field's declared variants.
    Enum(String),
}

impl AttributeValue {
    /// Type name used in error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            AttributeValue::Number(_) => "number",
            AttributeValue::Text(_) => "text",
            AttributeValue::Timestamp(_) => "timestamp",
            AttributeValue::Enum(_) => "enum",
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            AttributeValue::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            AttributeValue::Text(s) | AttributeValue::Enum(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_timestamp(&self) -> Option<DateTime<Utc>> {
        match self {
            AttributeValue::Timestamp(t) => Some(*t),
            _ => None,
        }
    }
}

impl From<f64> for AttributeValue {
    fn from(n: f64) -> Self {
        AttributeValue::Number(n)
    }
}

impl From<i64> for AttributeValue {
    fn from(n: i64) -> Self {
        AttributeValue::Number(n as f64)
    }
}

impl From<&str> for AttributeValue {
    fn from(s: &str) -> Self {
        AttributeValue::Text(s.to_string())
    }
}

impl From<String> for AttributeValue {
    fn from(s: String) -> Self {
        AttributeValue::Text(s)
    }
}

impl From<DateTime<Utc>> for AttributeValue {
    fn from(t: DateTime<Utc>) -> Self {
        AttributeValue::Timestamp(t)
    }
}

/// Schema-free nested document value.
///
/// Serializes as plain JSON. Numbers are `f64`; integers beyond 2^53 lose precision.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetadataValue {
    #[default]
    Null,
    Bool(bool),
    Number(f64),
    Text(String),
    Array(Vec<MetadataValue>),
    Object(BTreeMap<String, MetadataValue>),
}

/// Dotted path into a metadata tree, e.g. `specs.memory` or `authors.0`.
///
/// A segment addresses an object key, or an array element when it parses as an index.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct MetadataPath(Vec<String>);

impl MetadataPath {
    /// Parses and validates a dotted path.
    pub fn parse(path: &str) -> Result<Self> {
        let p = Self::from_dotted(path);
        p.validate()?;
        Ok(p)
    }

    /// Splits on `.` without validation. Predicate resolution validates later.
    pub fn from_dotted(path: &str) -> Self {
        Self(path.split('.').map(str::to_string).collect())
    }

    pub fn validate(&self) -> Result<()> {
        if self.0.iter().any(|s| s.is_empty()) {
            return Err(Error::MalformedPredicate(format!(
                "metadata path '{self}' has an empty segment"
            )));
        }
        Ok(())
    }

    pub fn segments(&self) -> &[String] {
        &self.0
    }

    /// `true` if any segment could address an array element. Such paths are not
    /// covered by the inverted index and are answered by scanning.
    pub fn has_index_segment(&self) -> bool {
        self.0.iter().any(|s| s.parse::<usize>().is_ok())
    }
}

impl fmt::Display for MetadataPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.join("."))
    }
}

impl TryFrom<String> for MetadataPath {
    type Error = Error;

    fn try_from(s: String) -> Result<Self> {
        MetadataPath::parse(&s)
    }
}

impl From<MetadataPath> for String {
    fn from(p: MetadataPath) -> Self {
        p.to_string()
    }
}

impl MetadataValue {
    /// Builds an object from `(key, value)` pairs.
    pub fn object<K, I>(entries: I) -> Self
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, MetadataValue)>,
    {
        MetadataValue::Object(entries.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            MetadataValue::Null => "null",
            MetadataValue::Bool(_) => "bool",
            MetadataValue::Number(_) => "number",
            MetadataValue::Text(_) => "text",
            MetadataValue::Array(_) => "array",
            MetadataValue::Object(_) => "object",
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, MetadataValue::Null)
    }

    pub fn is_scalar(&self) -> bool {
        !matches!(self, MetadataValue::Array(_) | MetadataValue::Object(_))
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            MetadataValue::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            MetadataValue::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            MetadataValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Value at `path`, or `None` when any segment is absent.
    pub fn get_path(&self, path: &MetadataPath) -> Option<&MetadataValue> {
        let mut current = self;
        for seg in path.segments() {
            current = match current {
                MetadataValue::Object(map) => map.get(seg)?,
                MetadataValue::Array(items) => items.get(seg.parse::<usize>().ok()?)?,
                _ => return None,
            };
        }
        Some(current)
    }

    /// Structural containment with jsonb `@>` semantics.
    ///
    /// Objects contain objects whose every key is present with a contained value;
    /// arrays contain arrays whose every element is contained by some element;
    /// scalars contain equal scalars. A bare scalar is contained by an array only
    /// at the top level, so `{"tags": ["a"]}` does not contain `{"tags": "a"}`.
    pub fn contains(&self, other: &MetadataValue) -> bool {
        match (self, other) {
            (MetadataValue::Array(a), b) if b.is_scalar() => a.iter().any(|av| av == b),
            _ => self.contains_nested(other),
        }
    }

    fn contains_nested(&self, other: &MetadataValue) -> bool {
        match (self, other) {
            (MetadataValue::Object(a), MetadataValue::Object(b)) => b
                .iter()
                .all(|(k, bv)| a.get(k).is_some_and(|av| av.contains_nested(bv))),
            (MetadataValue::Array(a), MetadataValue::Array(b)) => {
                b.iter().all(|bv| a.iter().any(|av| av.contains_nested(bv)))
            }
            (a, b) if a.is_scalar() && b.is_scalar() => a == b,
            _ => false,
        }
    }

    /// Nesting depth; scalars have depth 0.
    pub fn depth(&self) -> usize {
        match self {
            MetadataValue::Array(items) => 1 + items.iter().map(Self::depth).max().unwrap_or(0),
            MetadataValue::Object(map) => 1 + map.values().map(Self::depth).max().unwrap_or(0),
            _ => 0,
        }
    }

    /// Converts to a `serde_json::Value`. Non-finite numbers become `null`.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            MetadataValue::Null => serde_json::Value::Null,
            MetadataValue::Bool(b) => serde_json::Value::Bool(*b),
            MetadataValue::Number(n) => serde_json::Number::from_f64(*n)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            MetadataValue::Text(s) => serde_json::Value::String(s.clone()),
            MetadataValue::Array(items) => {
                serde_json::Value::Array(items.iter().map(Self::to_json).collect())
            }
            MetadataValue::Object(map) => serde_json::Value::Object(
                map.iter().map(|(k, v)| (k.clone(), v.to_json())).collect(),
            ),
        }
    }

    /// Keeps only the given paths, preserving their nesting. Absent paths are skipped.
    pub fn excerpt(&self, paths: &[MetadataPath]) -> MetadataValue {
        let mut out = MetadataValue::Null;
        for path in paths {
            if let Some(v) = self.get_path(path) {
                out.insert_path(path.segments(), v.clone());
            }
        }
        out
    }

    fn insert_path(&mut self, segments: &[String], value: MetadataValue) {
        let Some((head, rest)) = segments.split_first() else {
            *self = value;
            return;
        };
        if !matches!(self, MetadataValue::Object(_)) {
            *self = MetadataValue::Object(BTreeMap::new());
        }
        if let MetadataValue::Object(map) = self {
            map.entry(head.clone())
                .or_default()
                .insert_path(rest, value);
        }
    }

    fn has_non_finite(&self) -> bool {
        match self {
            MetadataValue::Number(n) => !n.is_finite(),
            MetadataValue::Array(items) => items.iter().any(Self::has_non_finite),
            MetadataValue::Object(map) => map.values().any(Self::has_non_finite),
            _ => false,
        }
    }
}

impl From<serde_json::Value> for MetadataValue {
    fn from(v: serde_json::Value) -> Self {
        match v {
            serde_json::Value::Null => MetadataValue::Null,
            serde_json::Value::Bool(b) => MetadataValue::Bool(b),
            serde_json::Value::Number(n) => {
                n.as_f64().map_or(MetadataValue::Null, MetadataValue::Number)
            }
            serde_json::Value::String(s) => MetadataValue::Text(s),
            serde_json::Value::Array(items) => {
                MetadataValue::Array(items.into_iter().map(MetadataValue::from).collect())
            }
            serde_json::Value::Object(map) => MetadataValue::Object(
                map.into_iter().map(|(k, v)| (k, MetadataValue::from(v))).collect(),
            ),
        }
    }
}

impl From<bool> for MetadataValue {
    fn from(b: bool) -> Self {
        MetadataValue::Bool(b)
    }
}

impl From<f64> for MetadataValue {
    fn from(n: f64) -> Self {
        MetadataValue::Number(n)
    }
}

impl From<i64> for MetadataValue {
    fn from(n: i64) -> Self {
        MetadataValue::Number(n as f64)
    }
}

impl From<&str> for MetadataValue {
    fn from(s: &str) -> Self {
        MetadataValue::Text(s.to_string())
    }
}

impl From<String> for MetadataValue {
    fn from(s: String) -> Self {
        MetadataValue::Text(s)
    }
}

impl<T: Into<MetadataValue>> From<Vec<T>> for MetadataValue {
    fn from(items: Vec<T>) -> Self {
        MetadataValue::Array(items.into_iter().map(Into::into).collect())
    }
}

/// Checks a metadata tree against the shape and size limits.
///
/// The root must be an object or null, numbers must be finite, nesting is capped at
/// [`MAX_METADATA_DEPTH`] and the JSON encoding at [`MAX_METADATA_BYTES`].
pub fn validate_metadata(metadata: &MetadataValue) -> Result<()> {
    match metadata {
        MetadataValue::Null => return Ok(()),
        MetadataValue::Object(_) => {}
        other => {
            return Err(Error::InvalidDocument(format!(
                "metadata root must be an object, got {}",
                other.type_name()
            )))
        }
    }
    let depth = metadata.depth();
    if depth > MAX_METADATA_DEPTH {
        return Err(Error::MetadataTooLarge(format!(
            "nesting depth {depth} exceeds {MAX_METADATA_DEPTH}"
        )));
    }
    if metadata.has_non_finite() {
        return Err(Error::InvalidDocument(
            "metadata numbers must be finite".into(),
        ));
    }
    let bytes = serde_json::to_vec(metadata)
        .map_err(|e| Error::InvalidDocument(e.to_string()))?
        .len();
    if bytes > MAX_METADATA_BYTES {
        return Err(Error::MetadataTooLarge(format!(
            "{bytes} bytes exceeds {MAX_METADATA_BYTES}"
        )));
    }
    Ok(())
}

/// A record handed to the collection for storage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: DocId,
    pub embedding: Vec<f32>,
    #[serde(default)]
    pub attributes: BTreeMap<String, AttributeValue>,
    #[serde(default)]
    pub metadata: MetadataValue,
}

impl Document {
    pub fn new(id: impl Into<DocId>, embedding: Vec<f32>) -> Self {
        Self {
            id: id.into(),
            embedding,
            attributes: BTreeMap::new(),
            metadata: MetadataValue::Null,
        }
    }

    /// Creates a document with a random UUID.
    pub fn with_random_id(embedding: Vec<f32>) -> Self {
        Self::new(DocId::random(), embedding)
    }

    pub fn with_attribute(
        mut self,
        name: impl Into<String>,
        value: impl Into<AttributeValue>,
    ) -> Self {
        self.attributes.insert(name.into(), value.into());
        self
    }

    pub fn with_metadata(mut self, metadata: impl Into<MetadataValue>) -> Self {
        self.metadata = metadata.into();
        self
    }

    /// Checks the id and metadata. Embedding and attributes are checked by the collection.
    pub fn validate(&self) -> Result<()> {
        if self.id.as_str().is_empty() {
            return Err(Error::InvalidDocument("id must not be empty".into()));
        }
        if self.id.as_str().len() > MAX_ID_LEN {
            return Err(Error::InvalidDocument(format!(
                "id exceeds {MAX_ID_LEN} bytes"
            )));
        }
        validate_metadata(&self.metadata)
    }
}
