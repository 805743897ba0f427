//! Commands — what can be asked of a device.

use serde::{Deserialize, Serialize};

/// A device command, independent of the backend that carries it out.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum Command {
    TurnOn,
    TurnOff,
    Toggle,
    SetBrightness { brightness: u8 },
    /// Cover position, 0 = closed, 100 = open.
    SetPosition { position: u8 },
    Open,
    Close,
    Stop,
    Lock,
    Unlock,
    /// Backend-specific command passed through untouched.
    Custom {
        name: String,
        #[serde(default)]
        data: serde_json::Value,
    },
}

impl Command {
    /// Wire name of the command (e.g. `turn_on`).
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::TurnOn => "turn_on",
            Self::TurnOff => "turn_off",
            Self::Toggle => "toggle",
            Self::SetBrightness { .. } => "set_brightness",
            Self::SetPosition { .. } => "set_position",
            Self::Open => "open",
            Self::Close => "close",
            Self::Stop => "stop",
            Self::Lock => "lock",
            Self::Unlock => "unlock",
            Self::Custom { name, .. } => name,
        }
    }
}

impl std::fmt::Display for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SetBrightness { brightness } => write!(f, "set_brightness({brightness})"),
            Self::SetPosition { position } => write!(f, "set_position({position})"),
            other => f.write_str(other.name()),
        }
    }
}
