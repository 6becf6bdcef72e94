//! Nested, namespaced parameter records.
//!
//! A [`ParamRecord`] maps parameter names to either a real array (a leaf) or
//! another record. Composite models nest the records of their instances under
//! the instance name, so `record["mirror1"]["t_amp"]` keeps addressing the same
//! leaf however deep the circuit is nested.
//!
//! Records are plain values. Models hand out their defaults read-only and
//! callers work on owned copies ([`ParamRecord::duplicate`]), so nothing a
//! caller does to a record can leak back into a model.

use std::collections::BTreeMap;

use ndarray::{arr0, Array1, ArrayD};

use crate::value::broadcast_shape;
use crate::{EvalError, EvalResult};

/// Errors in the structure of a parameter record.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ParamError {
    #[error("empty parameter name in record `{path}`")]
    EmptyKey { path: String },

    #[error("parameters `{first}` {first_shape:?} and `{second}` {second_shape:?} in record `{path}` cannot be broadcast together")]
    IncompatibleShapes {
        path: String,
        first: String,
        first_shape: Vec<usize>,
        second: String,
        second_shape: Vec<usize>,
    },

    #[error("parameter `{key}` is defined by more than one record")]
    Collision { key: String },

    #[error("no parameter record at `{path}`")]
    UnknownPath { path: String },

    #[error("`{path}` holds a value, not a record")]
    NotARecord { path: String },

    #[error("malformed parameter record: {0}")]
    Malformed(String),
}

/// One entry of a parameter record.
#[derive(Debug, Clone, PartialEq)]
pub enum ParamNode {
    /// A real-valued leaf. Zero-dimensional arrays are scalars.
    Value(ArrayD<f64>),
    /// A nested record, typically the parameters of one instance.
    Record(ParamRecord),
}

impl ParamNode {
    pub fn as_value(&self) -> Option<&ArrayD<f64>> {
        match self {
            ParamNode::Value(array) => Some(array),
            ParamNode::Record(_) => None,
        }
    }

    pub fn as_record(&self) -> Option<&ParamRecord> {
        match self {
            ParamNode::Record(record) => Some(record),
            ParamNode::Value(_) => None,
        }
    }
}

impl From<f64> for ParamNode {
    fn from(value: f64) -> Self {
        ParamNode::Value(arr0(value).into_dyn())
    }
}

impl From<Vec<f64>> for ParamNode {
    fn from(values: Vec<f64>) -> Self {
        ParamNode::Value(Array1::from(values).into_dyn())
    }
}

impl From<Array1<f64>> for ParamNode {
    fn from(values: Array1<f64>) -> Self {
        ParamNode::Value(values.into_dyn())
    }
}

impl From<ArrayD<f64>> for ParamNode {
    fn from(values: ArrayD<f64>) -> Self {
        ParamNode::Value(values)
    }
}

impl From<ParamRecord> for ParamNode {
    fn from(record: ParamRecord) -> Self {
        ParamNode::Record(record)
    }
}

static EMPTY_RECORD: ParamRecord = ParamRecord { entries: BTreeMap::new() };

/// A record of named parameters, possibly nested.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParamRecord {
    entries: BTreeMap<String, ParamNode>,
}

impl ParamRecord {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insertion.
    ///
    /// ```
    /// use sfold::ParamRecord;
    ///
    /// let record = ParamRecord::new()
    ///     .with("wl", vec![1.50, 1.55, 1.60])
    ///     .with("mirror", ParamRecord::new().with("t_amp", 0.5));
    /// assert_eq!(record.len(), 2);
    /// ```
    pub fn with(mut self, key: impl Into<String>, node: impl Into<ParamNode>) -> Self {
        self.entries.insert(key.into(), node.into());
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, node: impl Into<ParamNode>) -> Option<ParamNode> {
        self.entries.insert(key.into(), node.into())
    }

    pub fn remove(&mut self, key: &str) -> Option<ParamNode> {
        self.entries.remove(key)
    }

    pub fn get(&self, key: &str) -> Option<&ParamNode> {
        self.entries.get(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ParamNode)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// The array stored at leaf `name`.
    pub fn value(&self, name: &str) -> EvalResult<&ArrayD<f64>> {
        match self.entries.get(name) {
            Some(ParamNode::Value(array)) => Ok(array),
            Some(ParamNode::Record(_)) => Err(EvalError::NotAValue { name: name.to_string() }),
            None => Err(EvalError::MissingParameter { name: name.to_string() }),
        }
    }

    /// The leaf `name` as a single number.
    pub fn scalar(&self, name: &str) -> EvalResult<f64> {
        let array = self.value(name)?;
        match array.len() {
            1 => array.iter().next().copied().ok_or_else(|| EvalError::NotAValue { name: name.to_string() }),
            _ => Err(EvalError::ShapeMismatch { lhs: array.shape().to_vec(), rhs: Vec::new() }),
        }
    }

    /// The nested record `name`.
    pub fn record(&self, name: &str) -> EvalResult<&ParamRecord> {
        match self.entries.get(name) {
            Some(ParamNode::Record(record)) => Ok(record),
            Some(ParamNode::Value(_)) => Err(EvalError::NotARecord { name: name.to_string() }),
            None => Err(EvalError::MissingParameter { name: name.to_string() }),
        }
    }

    /// The nested record `name` as seen by one circuit instance. An absent
    /// entry reads as an empty record, so parameterless instances need no key.
    pub fn scope(&self, name: &str) -> EvalResult<&ParamRecord> {
        match self.entries.get(name) {
            None => Ok(&EMPTY_RECORD),
            Some(_) => self.record(name),
        }
    }

    /// Follows `path` through nested records.
    pub fn lookup(&self, path: &[&str]) -> EvalResult<&ParamNode> {
        let Some((last, parents)) = path.split_last() else {
            return Err(EvalError::MissingParameter { name: String::new() });
        };
        let mut record = self;
        for step in parents {
            record = record.record(step)?;
        }
        record.entries.get(*last).ok_or_else(|| EvalError::MissingParameter { name: path.join(".") })
    }

    /// Sets the entry at `path`, e.g. `["mirror1", "t_amp"]`. Every parent
    /// record must already exist. Returns the replaced entry, if any.
    pub fn set_path(&mut self, path: &[&str], node: impl Into<ParamNode>) -> Result<Option<ParamNode>, ParamError> {
        let Some((last, parents)) = path.split_last() else {
            return Err(ParamError::EmptyKey { path: String::new() });
        };
        if last.is_empty() {
            return Err(ParamError::EmptyKey { path: parents.join(".") });
        }
        let mut record = self;
        for (depth, step) in parents.iter().enumerate() {
            let here = || parents[..=depth].join(".");
            record = match record.entries.get_mut(*step) {
                Some(ParamNode::Record(inner)) => inner,
                Some(ParamNode::Value(_)) => return Err(ParamError::NotARecord { path: here() }),
                None => return Err(ParamError::UnknownPath { path: here() }),
            };
        }
        Ok(record.entries.insert(last.to_string(), node.into()))
    }

    /// A deep copy sharing nothing with `self`.
    pub fn duplicate(&self) -> ParamRecord {
        self.clone()
    }

    /// Copy of `self` where every leaf named `name`, at any depth, holds
    /// `value`. Records without a `name` leaf are left alone.
    ///
    /// ```
    /// use sfold::ParamRecord;
    ///
    /// let defaults = ParamRecord::new()
    ///     .with("gap", ParamRecord::new().with("wl", 1.55).with("di", 500.0))
    ///     .with("mirror", ParamRecord::new().with("t_amp", 0.5));
    /// let swept = defaults.broadcast_set("wl", vec![1.50, 1.55]);
    ///
    /// assert_eq!(swept.lookup(&["gap", "wl"]).unwrap().as_value().unwrap().len(), 2);
    /// assert!(!swept.record("mirror").unwrap().contains("wl"));
    /// ```
    pub fn broadcast_set(&self, name: &str, value: impl Into<ParamNode>) -> ParamRecord {
        let mut copy = self.duplicate();
        copy.set_global(name, value);
        copy
    }

    /// In-place form of [`broadcast_set`](Self::broadcast_set). Returns the
    /// number of leaves overwritten.
    pub fn set_global(&mut self, name: &str, value: impl Into<ParamNode>) -> usize {
        self.set_global_node(name, &value.into())
    }

    fn set_global_node(&mut self, name: &str, node: &ParamNode) -> usize {
        let mut count = 0;
        for (key, entry) in self.entries.iter_mut() {
            if let ParamNode::Record(inner) = entry {
                count += inner.set_global_node(name, node);
            } else if key == name {
                *entry = node.clone();
                count += 1;
            }
        }
        count
    }

    /// Applies `overrides` to the entries `self` already has, recursing into
    /// records present on both sides. Returns the dotted paths of override
    /// keys that had nothing to apply to.
    pub fn overlay(&mut self, overrides: &ParamRecord) -> Vec<String> {
        let mut ignored = Vec::new();
        for (key, node) in &overrides.entries {
            match (self.entries.get_mut(key), node) {
                (None, _) => ignored.push(key.clone()),
                (Some(ParamNode::Record(inner)), ParamNode::Record(patch)) => {
                    ignored.extend(inner.overlay(patch).into_iter().map(|path| format!("{key}.{path}")));
                }
                (Some(existing), _) => *existing = node.clone(),
            }
        }
        ignored
    }

    /// Moves every entry of `other` into `self`. Fails without modifying
    /// `self` if any key exists on both sides.
    pub fn merge_disjoint(&mut self, other: ParamRecord) -> Result<(), ParamError> {
        if let Some(key) = other.entries.keys().find(|key| self.entries.contains_key(*key)) {
            return Err(ParamError::Collision { key: key.clone() });
        }
        self.entries.extend(other.entries);
        Ok(())
    }

    /// Checks that no key is empty and that the leaves of each record can be
    /// broadcast against each other.
    pub fn validate(&self) -> Result<(), ParamError> {
        self.validate_at("")
    }

    fn validate_at(&self, path: &str) -> Result<(), ParamError> {
        let mut shape: Option<(&str, Vec<usize>)> = None;
        for (key, node) in &self.entries {
            if key.is_empty() {
                return Err(ParamError::EmptyKey { path: path.to_string() });
            }
            match node {
                ParamNode::Record(inner) => {
                    let nested = if path.is_empty() { key.clone() } else { format!("{path}.{key}") };
                    inner.validate_at(&nested)?;
                }
                ParamNode::Value(array) => {
                    shape = match shape {
                        None => Some((key.as_str(), array.shape().to_vec())),
                        Some((first, first_shape)) => match broadcast_shape(&first_shape, array.shape()) {
                            Some(joint) => Some((first, joint)),
                            None => {
                                return Err(ParamError::IncompatibleShapes {
                                    path: path.to_string(),
                                    first: first.to_string(),
                                    first_shape,
                                    second: key.clone(),
                                    second_shape: array.shape().to_vec(),
                                })
                            }
                        },
                    };
                }
            }
        }
        Ok(())
    }

    /// Paths of every leaf, depth first in key order.
    pub fn leaf_paths(&self) -> Vec<Vec<String>> {
        let mut paths = Vec::new();
        for (key, node) in &self.entries {
            match node {
                ParamNode::Value(_) => paths.push(vec![key.clone()]),
                ParamNode::Record(inner) => {
                    paths.extend(inner.leaf_paths().into_iter().map(|mut path| {
                        path.insert(0, key.clone());
                        path
                    }));
                }
            }
        }
        paths
    }
}

impl FromIterator<(String, ParamNode)> for ParamRecord {
    fn from_iter<T: IntoIterator<Item = (String, ParamNode)>>(iter: T) -> Self {
        Self { entries: iter.into_iter().collect() }
    }
}

#[cfg(feature = "serde")]
mod serde_impl {
    use std::collections::BTreeMap;

    use ndarray::{arr0, Array1};
    use serde::de::{Error as _, IgnoredAny};
    use serde::ser::Error as _;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    use super::{ParamError, ParamNode, ParamRecord};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawNode {
        Scalar(f64),
        Vector(Vec<f64>),
        Record(BTreeMap<String, RawNode>),
        Other(IgnoredAny),
    }

    fn into_record(raw: BTreeMap<String, RawNode>, path: &str) -> Result<ParamRecord, ParamError> {
        raw.into_iter()
            .map(|(key, node)| {
                let here = if path.is_empty() { key.clone() } else { format!("{path}.{key}") };
                let node = match node {
                    RawNode::Scalar(x) => ParamNode::Value(arr0(x).into_dyn()),
                    RawNode::Vector(xs) => ParamNode::Value(Array1::from(xs).into_dyn()),
                    RawNode::Record(inner) => ParamNode::Record(into_record(inner, &here)?),
                    RawNode::Other(_) => {
                        return Err(ParamError::Malformed(format!(
                            "`{here}` must be a number, a list of numbers or a record"
                        )))
                    }
                };
                Ok((key, node))
            })
            .collect()
    }

    impl Serialize for ParamNode {
        fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
            match self {
                ParamNode::Record(record) => record.serialize(serializer),
                ParamNode::Value(array) => match array.ndim() {
                    0 => serializer.serialize_f64(array.iter().next().copied().unwrap_or_default()),
                    1 => serializer.collect_seq(array.iter()),
                    n => Err(S::Error::custom(format!("cannot serialize a {n}-dimensional parameter"))),
                },
            }
        }
    }

    impl Serialize for ParamRecord {
        fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
            serializer.collect_map(self.entries.iter())
        }
    }

    impl<'de> Deserialize<'de> for ParamRecord {
        fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
            let raw = BTreeMap::<String, RawNode>::deserialize(deserializer)?;
            into_record(raw, "").map_err(D::Error::custom)
        }
    }
}
