//! Typed attribute storage shared with the host scene.
//!
//! The host keeps solver inputs and outputs as named attributes on a
//! storage node. [`DataStore`] abstracts that node so the solver never
//! depends on a scene-graph API; [`MemoryStore`] is the in-process
//! implementation, serializable to JSON.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::StoreError;

/// One attribute value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum StoreValue {
    Bool(bool),
    Int(i64),
    Double(f64),
    String(String),
    IntArray(Vec<i64>),
    DoubleArray(Vec<f64>),
    StringArray(Vec<String>),
}

impl StoreValue {
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Double(_) => "double",
            Self::String(_) => "string",
            Self::IntArray(_) => "intArray",
            Self::DoubleArray(_) => "doubleArray",
            Self::StringArray(_) => "stringArray",
        }
    }
}

/// Attribute storage capability injected by the host.
///
/// Only `get`/`set` are required; the typed accessors are provided.
pub trait DataStore {
    fn get(&self, key: &str) -> Option<&StoreValue>;

    fn set(&mut self, key: &str, value: StoreValue);

    fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    fn get_bool(&self, key: &str) -> Result<bool, StoreError> {
        match fetch(self, key, "bool")? {
            StoreValue::Bool(v) => Ok(*v),
            StoreValue::Int(v) => Ok(*v != 0),
            other => Err(wrong_type(key, "bool", other)),
        }
    }

    fn get_int(&self, key: &str) -> Result<i64, StoreError> {
        match fetch(self, key, "int")? {
            StoreValue::Int(v) => Ok(*v),
            other => Err(wrong_type(key, "int", other)),
        }
    }

    fn get_double(&self, key: &str) -> Result<f64, StoreError> {
        match fetch(self, key, "double")? {
            StoreValue::Double(v) => Ok(*v),
            #[allow(clippy::cast_precision_loss)]
            StoreValue::Int(v) => Ok(*v as f64),
            other => Err(wrong_type(key, "double", other)),
        }
    }

    fn get_string(&self, key: &str) -> Result<&str, StoreError> {
        match fetch(self, key, "string")? {
            StoreValue::String(v) => Ok(v),
            other => Err(wrong_type(key, "string", other)),
        }
    }

    fn get_int_array(&self, key: &str) -> Result<&[i64], StoreError> {
        match fetch(self, key, "intArray")? {
            StoreValue::IntArray(v) => Ok(v),
            other => Err(wrong_type(key, "intArray", other)),
        }
    }

    fn get_double_array(&self, key: &str) -> Result<&[f64], StoreError> {
        match fetch(self, key, "doubleArray")? {
            StoreValue::DoubleArray(v) => Ok(v),
            other => Err(wrong_type(key, "doubleArray", other)),
        }
    }

    fn get_string_array(&self, key: &str) -> Result<&[String], StoreError> {
        match fetch(self, key, "stringArray")? {
            StoreValue::StringArray(v) => Ok(v),
            other => Err(wrong_type(key, "stringArray", other)),
        }
    }
}

fn fetch<'a, S: DataStore + ?Sized>(
    store: &'a S,
    key: &str,
    kind: &'static str,
) -> Result<&'a StoreValue, StoreError> {
    store.get(key).ok_or_else(|| StoreError::Missing {
        key: key.into(),
        kind,
    })
}

fn wrong_type(key: &str, expected: &'static str, got: &StoreValue) -> StoreError {
    StoreError::WrongType {
        key: key.into(),
        expected,
        got: got.kind(),
    }
}

/// Key of one element of an array-of-arrays attribute, e.g. `weights[12]`.
pub fn element_key(attribute: &str, index: u32) -> String {
    format!("{attribute}[{index}]")
}

// ---------------------------------------------------------------------------
// MemoryStore
// ---------------------------------------------------------------------------

/// In-memory [`DataStore`], ordered by key for stable serialization.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MemoryStore {
    values: BTreeMap<String, StoreValue>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    #[must_use]
    pub fn with(mut self, key: &str, value: StoreValue) -> Self {
        self.values.insert(key.into(), value);
        self
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

impl DataStore for MemoryStore {
    fn get(&self, key: &str) -> Option<&StoreValue> {
        self.values.get(key)
    }

    fn set(&mut self, key: &str, value: StoreValue) {
        self.values.insert(key.into(), value);
    }
}
