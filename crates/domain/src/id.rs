//! Typed identifier newtypes.
//!
//! UUID-backed ids name runtime objects (operations, execution contexts) in
//! logs. [`AutomationId`] is a stable, human-chosen name since automations
//! and scenes are declared in configuration.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Error returned when parsing a prefixed runtime id fails.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid {kind} id `{input}`")]
pub struct InvalidId {
    kind: &'static str,
    input: String,
}

/// Runtime ids are random UUIDs rendered as `<prefix>-<hex>` so that log
/// lines say what kind of object they refer to.
macro_rules! runtime_id {
    ($(#[doc = $doc:expr])* $name:ident, $prefix:literal) => {
        $(#[doc = $doc])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(uuid::Uuid);

        impl $name {
            const PREFIX: &'static str = $prefix;

            /// A fresh random id.
            #[must_use]
            pub fn new() -> Self {
                Self(uuid::Uuid::new_v4())
            }

            #[must_use]
            pub fn as_uuid(self) -> uuid::Uuid {
                self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}-{}", Self::PREFIX, self.0.simple())
            }
        }

        impl FromStr for $name {
            type Err = InvalidId;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let invalid = || InvalidId {
                    kind: Self::PREFIX,
                    input: s.to_string(),
                };
                let hex = s
                    .strip_prefix(Self::PREFIX)
                    .and_then(|rest| rest.strip_prefix('-'))
                    .ok_or_else(invalid)?;
                uuid::Uuid::parse_str(hex).map(Self).map_err(|_| invalid())
            }
        }
    };
}

runtime_id!(
    /// Unique identifier of an operation, recorded in its tracing span.
    OperationId,
    "op"
);

runtime_id!(
    /// Unique identifier of an execution context.
    ContextId,
    "ctx"
);

/// Name of an automation or scene, unique within one controller.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AutomationId(String);

impl AutomationId {
    /// Wrap an automation name.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AutomationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for AutomationId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}
