//! Errors raised by virtual devices.

use trellis_domain::error::{CommandFailure, TrellisError};
use trellis_domain::identifier::Identifier;

use crate::HOST_NAME;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum VirtualError {
    #[error("{identifier} is not a virtual device")]
    UnknownDevice { identifier: Identifier },
    #[error("virtual device {identifier} does not support `{command}`")]
    Unsupported {
        identifier: Identifier,
        command: String,
    },
    #[error("virtual device {identifier} is unavailable")]
    Unavailable { identifier: Identifier },
}

impl From<VirtualError> for CommandFailure {
    fn from(err: VirtualError) -> Self {
        match err {
            VirtualError::UnknownDevice { identifier } => Self::UnknownTarget {
                host: HOST_NAME.to_string(),
                identifier,
            },
            VirtualError::Unsupported {
                identifier,
                command,
            } => Self::Unsupported {
                identifier,
                command,
            },
            VirtualError::Unavailable { identifier } => Self::Unavailable { identifier },
        }
    }
}

impl From<VirtualError> for TrellisError {
    fn from(err: VirtualError) -> Self {
        Self::CommandFailure(err.into())
    }
}
