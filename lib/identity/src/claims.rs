//! Verified identity claims.
//!
//! The identity provider returns an open-ended JSON object. Nothing here
//! assumes a claim is present: every accessor returns an `Option` and the
//! caller decides what a missing value means.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A verified mapping of identity attributes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClaimSet(Map<String, Value>);

impl ClaimSet {
    /// Wraps an already verified claims object.
    #[must_use]
    pub fn new(claims: Map<String, Value>) -> Self {
        Self(claims)
    }

    /// Builds a claim set from a JSON value.
    ///
    /// Returns `None` unless the value is an object.
    #[must_use]
    pub fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::Object(map) => Some(Self(map)),
            _ => None,
        }
    }

    /// Returns a non-empty string claim.
    #[must_use]
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.0
            .get(key)
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
    }

    /// Returns the raw claim value.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// The subject identifier (`sub`).
    #[must_use]
    pub fn subject(&self) -> Option<&str> {
        self.get_str("sub")
    }

    #[must_use]
    pub fn email(&self) -> Option<&str> {
        self.get_str("email")
    }

    #[must_use]
    pub fn preferred_username(&self) -> Option<&str> {
        self.get_str("preferred_username")
    }

    /// Sets a string claim, replacing any previous value.
    #[must_use]
    pub fn with(mut self, key: &str, value: impl Into<String>) -> Self {
        self.0.insert(key.to_string(), Value::String(value.into()));
        self
    }

    #[must_use]
    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }
}

impl From<Map<String, Value>> for ClaimSet {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}
