//! Typed attribute values reported by hosts.

use serde::{Deserialize, Serialize};

use crate::error::ParseError;

/// A single attribute value as decoded from a backend payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttributeValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    Array(Vec<AttributeValue>),
    Json(serde_json::Value),
}

impl AttributeValue {
    /// Short name of the held variant, used in error messages.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Bool(_) => "bool",
            Self::Int(_) => "integer",
            Self::Float(_) => "float",
            Self::String(_) => "string",
            Self::Array(_) => "array",
            Self::Json(_) => "json",
        }
    }
}

impl From<bool> for AttributeValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i64> for AttributeValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<f64> for AttributeValue {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<&str> for AttributeValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl From<String> for AttributeValue {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl<T: Into<AttributeValue>> From<Vec<T>> for AttributeValue {
    fn from(value: Vec<T>) -> Self {
        Self::Array(value.into_iter().map(Into::into).collect())
    }
}

/// Conversion from an [`AttributeValue`] into a concrete Rust type.
pub trait FromAttribute: Sized {
    /// Type name used in [`ParseError::WrongType`].
    const EXPECTED: &'static str;

    /// Convert, or return `None` when the value has an incompatible type.
    fn from_value(value: &AttributeValue) -> Option<Self>;

    /// Convert, reporting `key` on failure.
    ///
    /// # Errors
    ///
    /// Returns [`ParseError::WrongType`] when the value cannot be converted.
    fn from_attribute(key: &str, value: &AttributeValue) -> Result<Self, ParseError> {
        Self::from_value(value).ok_or_else(|| ParseError::WrongType {
            key: key.to_string(),
            expected: Self::EXPECTED,
        })
    }
}

impl FromAttribute for bool {
    const EXPECTED: &'static str = "bool";

    fn from_value(value: &AttributeValue) -> Option<Self> {
        match value {
            AttributeValue::Bool(b) => Some(*b),
            _ => None,
        }
    }
}

impl FromAttribute for i64 {
    const EXPECTED: &'static str = "integer";

    fn from_value(value: &AttributeValue) -> Option<Self> {
        match value {
            AttributeValue::Int(i) => Some(*i),
            _ => None,
        }
    }
}

impl FromAttribute for u64 {
    const EXPECTED: &'static str = "unsigned integer";

    fn from_value(value: &AttributeValue) -> Option<Self> {
        match value {
            AttributeValue::Int(i) => u64::try_from(*i).ok(),
            _ => None,
        }
    }
}

impl FromAttribute for u8 {
    const EXPECTED: &'static str = "integer in 0..=255";

    fn from_value(value: &AttributeValue) -> Option<Self> {
        match value {
            AttributeValue::Int(i) => u8::try_from(*i).ok(),
            _ => None,
        }
    }
}

impl FromAttribute for f64 {
    const EXPECTED: &'static str = "number";

    #[allow(clippy::cast_precision_loss)]
    fn from_value(value: &AttributeValue) -> Option<Self> {
        match value {
            AttributeValue::Float(f) => Some(*f),
            AttributeValue::Int(i) => Some(*i as f64),
            _ => None,
        }
    }
}

impl FromAttribute for String {
    const EXPECTED: &'static str = "string";

    fn from_value(value: &AttributeValue) -> Option<Self> {
        match value {
            AttributeValue::String(s) => Some(s.clone()),
            _ => None,
        }
    }
}

impl FromAttribute for serde_json::Value {
    const EXPECTED: &'static str = "json value";

    fn from_value(value: &AttributeValue) -> Option<Self> {
        serde_json::to_value(value).ok()
    }
}
