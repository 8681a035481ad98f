//! Task metadata, specifications and verification
//!
//! A [`Meta`] is the execution context handed to every task. It is an ordered
//! JSON object; fixed-shape records are converted to and from it through serde,
//! so lookups behave the same for both representations.
//!
//! A [`Specification`] declares which keys a task needs and which
//! [`MetaType`]s are accepted for each. Verification is structural only: it
//! checks presence and type, never values.

use std::fmt;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Execution metadata passed to tasks
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Meta(Map<String, Value>);

impl Meta {
    /// Create an empty meta
    pub fn new() -> Self {
        Self(Map::new())
    }

    /// Flatten a fixed-shape record into its field mapping
    pub fn from_record<T: Serialize>(record: &T) -> serde_json::Result<Self> {
        serde_json::from_value(serde_json::to_value(record)?)
    }

    /// Read the meta back as a fixed-shape record
    pub fn to_record<T: DeserializeOwned>(&self) -> serde_json::Result<T> {
        serde_json::from_value(Value::Object(self.0.clone()))
    }

    /// Get a value by key
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// Get a value by key, or `default` if the key is absent
    pub fn get_or(&self, key: &str, default: Value) -> Value {
        self.0.get(key).cloned().unwrap_or(default)
    }

    /// Check whether a key is present
    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    /// Set a key in place, replacing any previous value
    pub fn update(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.0.insert(key.into(), value.into());
    }

    /// Merge another meta into this one; keys from `other` win
    pub fn extend(&mut self, other: Meta) {
        self.0.extend(other.0);
    }

    /// Builder-style [`Meta::update`]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.update(key, value);
        self
    }

    /// The meta slice handed to a dependency: the object stored under `key`,
    /// or an empty meta when the key is absent or not an object.
    pub fn slice(&self, key: &str) -> Meta {
        match self.0.get(key) {
            Some(Value::Object(map)) => Meta(map.clone()),
            Some(other) => {
                tracing::debug!(key, value = %other, "meta slice is not an object, using empty meta");
                Meta::new()
            }
            None => Meta::new(),
        }
    }

    /// Remove a key, returning its value
    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.0.remove(key)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn into_map(self) -> Map<String, Value> {
        self.0
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.0)
    }
}

impl From<Map<String, Value>> for Meta {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

impl TryFrom<Value> for Meta {
    type Error = serde_json::Error;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        serde_json::from_value(value)
    }
}

impl fmt::Display for Meta {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", Value::Object(self.0.clone()))
    }
}

/// Runtime type of a meta value, ordered by a small subtype lattice:
/// `Integer` and `Float` are subtypes of `Number`, everything is a subtype of `Any`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetaType {
    Null,
    Bool,
    Integer,
    Float,
    Number,
    String,
    Array,
    Object,
    Any,
}

impl MetaType {
    /// The most specific type of a value
    pub fn of(value: &Value) -> Self {
        match value {
            Value::Null => MetaType::Null,
            Value::Bool(_) => MetaType::Bool,
            Value::Number(n) if n.is_i64() || n.is_u64() => MetaType::Integer,
            Value::Number(_) => MetaType::Float,
            Value::String(_) => MetaType::String,
            Value::Array(_) => MetaType::Array,
            Value::Object(_) => MetaType::Object,
        }
    }

    /// Whether `self` is `other` or one of its subtypes
    pub fn is_subtype_of(self, other: MetaType) -> bool {
        match (self, other) {
            (_, MetaType::Any) => true,
            (MetaType::Integer | MetaType::Float, MetaType::Number) => true,
            (a, b) => a == b,
        }
    }

    /// Whether a value's type is a subtype of `self`
    pub fn accepts(self, value: &Value) -> bool {
        MetaType::of(value).is_subtype_of(self)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            MetaType::Null => "null",
            MetaType::Bool => "bool",
            MetaType::Integer => "integer",
            MetaType::Float => "float",
            MetaType::Number => "number",
            MetaType::String => "string",
            MetaType::Array => "array",
            MetaType::Object => "object",
            MetaType::Any => "any",
        }
    }
}

impl fmt::Display for MetaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One entry of a [`Specification`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpecEntry {
    /// A required key and the types accepted for it
    Field { key: String, types: Vec<MetaType> },
    /// A nested specification checked against the same meta
    Nested(Specification),
}

/// Required keys and accepted types for a [`Meta`]
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Specification {
    entries: Vec<SpecEntry>,
}

impl Specification {
    pub fn new() -> Self {
        Self::default()
    }

    /// A specification with a single required key
    pub fn field(key: impl Into<String>, ty: MetaType) -> Self {
        Self::new().require(key, ty)
    }

    /// Require `key` to hold a value of type `ty`
    pub fn require(self, key: impl Into<String>, ty: MetaType) -> Self {
        self.require_any(key, [ty])
    }

    /// Require `key` to hold a value of any of `types`
    pub fn require_any(
        mut self,
        key: impl Into<String>,
        types: impl IntoIterator<Item = MetaType>,
    ) -> Self {
        self.entries.push(SpecEntry::Field {
            key: key.into(),
            types: types.into_iter().collect(),
        });
        self
    }

    /// Add a nested specification
    pub fn nest(mut self, spec: Specification) -> Self {
        self.entries.push(SpecEntry::Nested(spec));
        self
    }

    pub fn entries(&self) -> &[SpecEntry] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// All required keys, nested ones included, in declaration order
    pub fn keys(&self) -> Vec<&str> {
        let mut keys = Vec::new();
        for entry in &self.entries {
            match entry {
                SpecEntry::Field { key, .. } => keys.push(key.as_str()),
                SpecEntry::Nested(spec) => keys.extend(spec.keys()),
            }
        }
        keys
    }

    /// Verify `meta` against this specification
    pub fn verify(&self, meta: &Meta) -> MetaVerification {
        verify(meta, self)
    }
}

/// A single verification failure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetaFieldError {
    pub required_key: String,
    pub required_types: Vec<MetaType>,
    /// Type of the value found, `None` when the key is missing
    pub presented_type: Option<MetaType>,
    pub presented_value: Option<Value>,
}

impl fmt::Display for MetaFieldError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let expected: Vec<&str> = self.required_types.iter().map(|t| t.as_str()).collect();
        match (&self.presented_type, &self.presented_value) {
            (Some(ty), Some(value)) => write!(
                f,
                "{}: expected {}, got {} ({})",
                self.required_key,
                expected.join(" | "),
                ty,
                value
            ),
            _ => write!(
                f,
                "{}: expected {}, missing",
                self.required_key,
                expected.join(" | ")
            ),
        }
    }
}

/// Outcome of verifying a meta; success iff there are no errors
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetaVerification {
    errors: Vec<MetaFieldError>,
}

impl MetaVerification {
    pub fn new(errors: Vec<MetaFieldError>) -> Self {
        Self { errors }
    }

    /// Verify against an optional specification; `None` always succeeds
    pub fn verify(meta: &Meta, specification: Option<&Specification>) -> Self {
        specification
            .map(|spec| verify(meta, spec))
            .unwrap_or_default()
    }

    pub fn checked_success(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn errors(&self) -> &[MetaFieldError] {
        &self.errors
    }

    pub fn into_errors(self) -> Vec<MetaFieldError> {
        self.errors
    }
}

impl fmt::Display for MetaVerification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let lines: Vec<String> = self.errors.iter().map(|e| e.to_string()).collect();
        f.write_str(&lines.join("; "))
    }
}

/// Check that every key in `specification` is present in `meta` with an accepted type.
pub fn verify(meta: &Meta, specification: &Specification) -> MetaVerification {
    let mut errors = Vec::new();
    collect_errors(meta, specification, &mut errors);
    MetaVerification { errors }
}

fn collect_errors(meta: &Meta, specification: &Specification, errors: &mut Vec<MetaFieldError>) {
    for entry in &specification.entries {
        match entry {
            SpecEntry::Nested(nested) => collect_errors(meta, nested, errors),
            SpecEntry::Field { key, types } => match meta.get(key) {
                None => errors.push(MetaFieldError {
                    required_key: key.clone(),
                    required_types: types.clone(),
                    presented_type: None,
                    presented_value: None,
                }),
                Some(value) if types.iter().any(|ty| ty.accepts(value)) => {}
                Some(value) => errors.push(MetaFieldError {
                    required_key: key.clone(),
                    required_types: types.clone(),
                    presented_type: Some(MetaType::of(value)),
                    presented_value: Some(value.clone()),
                }),
            },
        }
    }
}
