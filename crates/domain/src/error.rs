//! Error taxonomy used across the workspace.
//!
//! Each category is its own typed error; [`TrellisError`] unifies them via
//! `#[from]` so layers can propagate with `?`. Cancellation is deliberately
//! absent: it is a normal way for an operation phase to end, not a failure.

use crate::id::ContextId;
use crate::identifier::Identifier;

/// Top-level error for the trellis workspace.
#[derive(Debug, thiserror::Error)]
pub enum TrellisError {
    /// A structural mistake in how devices or hosts were registered.
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    /// Malformed or missing input data.
    #[error(transparent)]
    Parse(#[from] ParseError),

    /// A programming-contract violation around ambient execution contexts.
    #[error(transparent)]
    ConcurrencyViolation(#[from] ConcurrencyViolation),

    /// A host reported that a command could not be carried out.
    #[error(transparent)]
    CommandFailure(#[from] CommandFailure),
}

impl TrellisError {
    /// Whether the error is a structural mistake that should stop the
    /// process. Command failures are not: the controller keeps running.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::CommandFailure(_))
    }
}

/// Device registration problems. These surface to the direct caller and are
/// never defaulted away.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigurationError {
    /// No registered host answered a bind request.
    #[error("no registered host serves `{shape}` state for {identifier}")]
    UnresolvedIdentifier {
        identifier: Identifier,
        shape: &'static str,
    },

    /// The identifier is already bound with another state shape.
    #[error("{identifier} is bound as `{bound}`, cannot bind it as `{requested}`")]
    ShapeMismatch {
        identifier: Identifier,
        bound: &'static str,
        requested: &'static str,
    },

    /// A command targeted an identifier that was never bound.
    #[error("{identifier} has not been bound to any host")]
    UnboundIdentifier { identifier: Identifier },
}

/// Malformed or missing data.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    /// The text is not a `<domain>.<local-id>` identifier.
    #[error("invalid identifier `{input}`: {reason}")]
    InvalidIdentifier { input: String, reason: &'static str },

    /// A required attribute is absent.
    #[error("missing attribute `{key}`")]
    MissingAttribute { key: String },

    /// An attribute is present but holds a value of another type.
    #[error("attribute `{key}` is not a {expected}")]
    WrongType { key: String, expected: &'static str },

    /// A wire token did not match any variant of a closed enumeration.
    #[error("unknown {enum_name} token `{token}` (normalized to `{normalized}`)")]
    UnknownVariant {
        enum_name: &'static str,
        token: String,
        normalized: String,
    },
}

/// Raised when a second, different execution context is entered while one is
/// already ambient on the current task.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("cannot enter context {requested} while context {active} is ambient")]
pub struct ConcurrencyViolation {
    pub active: ContextId,
    pub requested: ContextId,
}

/// Host-reported command failure.
#[derive(Debug, thiserror::Error)]
pub enum CommandFailure {
    /// The target does not understand the command.
    #[error("{identifier} does not support `{command}`")]
    Unsupported {
        identifier: Identifier,
        command: String,
    },

    /// The target is currently unreachable.
    #[error("{identifier} is unavailable")]
    Unavailable { identifier: Identifier },

    /// The host does not know the target at all.
    #[error("{identifier} is not managed by host `{host}`")]
    UnknownTarget {
        host: String,
        identifier: Identifier,
    },

    /// The backend rejected the command.
    #[error("{identifier} rejected the command")]
    Rejected {
        identifier: Identifier,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}
