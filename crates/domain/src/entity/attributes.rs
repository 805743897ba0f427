//! Semi-structured attribute maps.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::attribute_value::{AttributeValue, FromAttribute};
use crate::error::ParseError;
use crate::naming::WireEnum;

/// Key/value attributes of a device as decoded by a backend adapter.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Attributes(BTreeMap<String, AttributeValue>);

impl Attributes {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<AttributeValue>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<AttributeValue>) {
        self.0.insert(key.into(), value.into());
    }

    #[must_use]
    pub fn raw(&self, key: &str) -> Option<&AttributeValue> {
        self.0.get(key)
    }

    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    /// Typed lookup of a required attribute.
    ///
    /// # Errors
    ///
    /// Returns [`ParseError::MissingAttribute`] when `key` is absent and
    /// [`ParseError::WrongType`] when its value cannot be converted.
    pub fn get<T: FromAttribute>(&self, key: &str) -> Result<T, ParseError> {
        let value = self.0.get(key).ok_or_else(|| ParseError::MissingAttribute {
            key: key.to_string(),
        })?;
        T::from_attribute(key, value)
    }

    /// Typed lookup falling back to `default` when the attribute is absent.
    ///
    /// # Errors
    ///
    /// Returns [`ParseError::WrongType`] when the attribute is present but
    /// holds an incompatible value.
    pub fn get_or_default<T: FromAttribute>(&self, key: &str, default: T) -> Result<T, ParseError> {
        match self.0.get(key) {
            Some(value) => T::from_attribute(key, value),
            None => Ok(default),
        }
    }

    /// Typed lookup of an array attribute. A scalar is treated as a one
    /// element array.
    ///
    /// # Errors
    ///
    /// Returns [`ParseError::MissingAttribute`] when `key` is absent and
    /// [`ParseError::WrongType`] when any element cannot be converted.
    pub fn get_array<T: FromAttribute>(&self, key: &str) -> Result<Vec<T>, ParseError> {
        match self.0.get(key) {
            None => Err(ParseError::MissingAttribute {
                key: key.to_string(),
            }),
            Some(AttributeValue::Array(items)) => items
                .iter()
                .map(|item| T::from_attribute(key, item))
                .collect(),
            Some(value) => Ok(vec![T::from_attribute(key, value)?]),
        }
    }

    /// Lookup of a string attribute mapped onto a closed enumeration.
    ///
    /// # Errors
    ///
    /// Returns [`ParseError::MissingAttribute`], [`ParseError::WrongType`]
    /// when the value is not a string, or [`ParseError::UnknownVariant`].
    pub fn get_enum<E: WireEnum>(&self, key: &str) -> Result<E, ParseError> {
        let token: String = self.get(key)?;
        E::from_wire(&token)
    }

    /// Like [`get_enum`](Self::get_enum) but returns `None` when the key is
    /// absent.
    ///
    /// # Errors
    ///
    /// Same as [`get_enum`](Self::get_enum) for present attributes.
    pub fn get_enum_opt<E: WireEnum>(&self, key: &str) -> Result<Option<E>, ParseError> {
        if self.contains(key) {
            self.get_enum(key).map(Some)
        } else {
            Ok(None)
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &AttributeValue)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }
}

impl<K: Into<String>, V: Into<AttributeValue>> FromIterator<(K, V)> for Attributes {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}
