//! Task outputs and the resolved inputs handed to a transform

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};

use anyhow::anyhow;
use serde_json::Value;

type BoxedIter = Box<dyn Iterator<Item = Value> + Send>;

/// A lazily evaluated, single-pass sequence of values.
///
/// Clones share the same underlying iterator, so once any clone has drained
/// it the sequence stays empty.
#[derive(Clone)]
pub struct LazySeq {
    inner: Arc<Mutex<BoxedIter>>,
}

impl LazySeq {
    pub fn new<I>(items: I) -> Self
    where
        I: IntoIterator<Item = Value>,
        I::IntoIter: Send + 'static,
    {
        Self {
            inner: Arc::new(Mutex::new(Box::new(items.into_iter()))),
        }
    }

    /// Drain whatever is left into a vector
    pub fn collect_values(&self) -> Vec<Value> {
        self.clone().collect()
    }
}

impl Iterator for LazySeq {
    type Item = Value;

    fn next(&mut self) -> Option<Value> {
        let mut guard = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        guard.next()
    }
}

impl fmt::Debug for LazySeq {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("LazySeq { .. }")
    }
}

/// Result of a task transform
#[derive(Debug, Clone)]
pub enum Output {
    /// A fully computed value
    Value(Value),
    /// A lazy sequence (map/filter results)
    Seq(LazySeq),
}

impl Output {
    pub fn value(value: impl Into<Value>) -> Self {
        Output::Value(value.into())
    }

    pub fn seq<I>(items: I) -> Self
    where
        I: IntoIterator<Item = Value>,
        I::IntoIter: Send + 'static,
    {
        Output::Seq(LazySeq::new(items))
    }

    pub fn as_value(&self) -> Option<&Value> {
        match self {
            Output::Value(value) => Some(value),
            Output::Seq(_) => None,
        }
    }

    /// Whether the output can be iterated as a sequence
    pub fn is_iterable(&self) -> bool {
        matches!(self, Output::Seq(_) | Output::Value(Value::Array(_)))
    }

    /// Materialise into a JSON value; sequences become arrays
    pub fn into_value(self) -> Value {
        match self {
            Output::Value(value) => value,
            Output::Seq(seq) => Value::Array(seq.collect()),
        }
    }

    /// Materialise into an ordered list: iterables yield their items,
    /// anything else is wrapped as a single element
    pub fn into_sequence(self) -> Vec<Value> {
        match self {
            Output::Seq(seq) => seq.collect(),
            Output::Value(Value::Array(items)) => items,
            Output::Value(value) => vec![value],
        }
    }

    /// Iterate over a sequence-shaped output without materialising it
    pub fn into_items(self) -> anyhow::Result<BoxedIter> {
        match self {
            Output::Seq(seq) => Ok(Box::new(seq)),
            Output::Value(Value::Array(items)) => Ok(Box::new(items.into_iter())),
            Output::Value(other) => Err(anyhow!("output is not iterable: {}", other)),
        }
    }
}

impl From<Value> for Output {
    fn from(value: Value) -> Self {
        Output::Value(value)
    }
}

/// Dependency outputs keyed by dependency task name
#[derive(Debug, Default)]
pub struct Inputs(HashMap<String, Output>);

impl Inputs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, output: Output) {
        self.0.insert(name.into(), output);
    }

    pub fn get(&self, name: &str) -> Option<&Output> {
        self.0.get(name)
    }

    /// Take ownership of one input
    pub fn take(&mut self, name: &str) -> anyhow::Result<Output> {
        self.0
            .remove(name)
            .ok_or_else(|| anyhow!("missing input '{}'", name))
    }

    /// Take one input materialised as a JSON value
    pub fn value(&mut self, name: &str) -> anyhow::Result<Value> {
        self.take(name).map(Output::into_value)
    }

    pub fn names(&self) -> Vec<&str> {
        self.0.keys().map(String::as_str).collect()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<(String, Output)> for Inputs {
    fn from_iter<I: IntoIterator<Item = (String, Output)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}
