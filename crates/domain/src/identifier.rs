//! Device identifiers of the form `<domain>.<local-id>`.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::ParseError;

/// Opaque key naming an observable or controllable thing, e.g.
/// `light.kitchen_ceiling`.
///
/// Equality and hashing are by value. Cloning is cheap: the text is shared.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Identifier {
    text: Arc<str>,
    dot: usize,
}

impl Identifier {
    /// Parse `<domain>.<local-id>`.
    ///
    /// The domain is everything before the first `.`; the local id may
    /// itself contain dots.
    ///
    /// # Errors
    ///
    /// Returns [`ParseError::InvalidIdentifier`] when the text has no `.`,
    /// an empty half, or whitespace.
    pub fn parse(input: &str) -> Result<Self, ParseError> {
        let invalid = |reason| ParseError::InvalidIdentifier {
            input: input.to_string(),
            reason,
        };
        if input.chars().any(char::is_whitespace) {
            return Err(invalid("contains whitespace"));
        }
        let dot = input.find('.').ok_or_else(|| invalid("missing `.` separator"))?;
        if dot == 0 {
            return Err(invalid("empty domain"));
        }
        if dot + 1 == input.len() {
            return Err(invalid("empty local id"));
        }
        Ok(Self {
            text: Arc::from(input),
            dot,
        })
    }

    /// The part before the first `.` (e.g. `light`).
    #[must_use]
    pub fn domain(&self) -> &str {
        &self.text[..self.dot]
    }

    /// The part after the first `.` (e.g. `kitchen_ceiling`).
    #[must_use]
    pub fn local_id(&self) -> &str {
        &self.text[self.dot + 1..]
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.text
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

impl fmt::Debug for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Identifier({})", self.text)
    }
}

impl FromStr for Identifier {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Identifier {
    type Error = ParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Identifier> for String {
    fn from(value: Identifier) -> Self {
        value.text.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn should_split_domain_and_local_id() {
        let id = Identifier::parse("light.kitchen_ceiling").unwrap();
        assert_eq!(id.domain(), "light");
        assert_eq!(id.local_id(), "kitchen_ceiling");
    }

    #[test]
    fn should_keep_extra_dots_in_local_id() {
        let id = Identifier::parse("sensor.hall.temperature").unwrap();
        assert_eq!(id.domain(), "sensor");
        assert_eq!(id.local_id(), "hall.temperature");
    }

    #[test]
    fn should_compare_by_value_when_parsed_twice() {
        let a = Identifier::parse("switch.porch").unwrap();
        let b: Identifier = "switch.porch".parse().unwrap();
        assert_eq!(a, b);
        assert_ne!(a, Identifier::parse("switch.garage").unwrap());
    }

    #[test]
    fn should_reject_text_without_separator() {
        let err = Identifier::parse("kitchen").unwrap_err();
        assert!(matches!(
            err,
            ParseError::InvalidIdentifier {
                reason: "missing `.` separator",
                ..
            }
        ));
    }

    #[test]
    fn should_reject_empty_halves() {
        assert!(Identifier::parse(".kitchen").is_err());
        assert!(Identifier::parse("light.").is_err());
    }

    #[test]
    fn should_reject_whitespace() {
        assert!(Identifier::parse("light.living room").is_err());
    }

    #[test]
    fn should_roundtrip_through_serde_json() {
        let id = Identifier::parse("cover.garage_door").unwrap();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"cover.garage_door\"");
        let parsed: Identifier = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, id);
    }

    #[test]
    fn should_fail_deserializing_invalid_identifier() {
        let result = serde_json::from_str::<Identifier>("\"nodot\"");
        assert!(result.is_err());
    }
}
