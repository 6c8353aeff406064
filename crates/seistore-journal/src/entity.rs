//! Stored entity envelope.

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use seistore_core::error::{Error, Result};

use crate::key::Key;

/// A stored record: identity, optional change tag and a JSON object payload.
///
/// The key and change tag are persisted beside the payload, never inside it,
/// so `data` reads back exactly as it was saved.
#[derive(Debug, Clone, PartialEq)]
pub struct Entity {
    /// Identity of the record.
    pub key: Key,
    /// Opaque change tag for caller-side optimistic concurrency checks.
    pub ctag: Option<String>,
    /// Record payload.
    pub data: Map<String, Value>,
}

impl Entity {
    /// Creates an entity without a change tag.
    #[must_use]
    pub fn new(key: Key, data: Map<String, Value>) -> Self {
        Self {
            key,
            ctag: None,
            data,
        }
    }

    /// Sets the change tag.
    #[must_use]
    pub fn with_ctag(mut self, ctag: impl Into<String>) -> Self {
        self.ctag = Some(ctag.into());
        self
    }

    /// Serializes `model` into the payload.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Serialization`] if `model` does not serialize to a
    /// JSON object.
    pub fn from_model<T: Serialize>(key: Key, model: &T) -> Result<Self> {
        match serde_json::to_value(model)? {
            Value::Object(data) => Ok(Self::new(key, data)),
            other => Err(Error::serialization(format!(
                "entity payload must be a JSON object, got {}",
                json_type(&other)
            ))),
        }
    }

    /// Deserializes the payload into `T`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Serialization`] if the payload does not match `T`.
    pub fn to_model<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_value(Value::Object(self.data.clone()))?)
    }
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
