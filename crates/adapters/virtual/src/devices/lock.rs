//! Virtual lock — `locking`/`unlocking` until acknowledged.

use trellis_domain::command::Command;
use trellis_domain::entity::{LockState, LockStatus};

use super::Simulated;

impl Simulated for LockState {
    fn apply(&self, command: &Command) -> Option<Self> {
        if self.status == LockStatus::Jammed {
            return None;
        }
        let status = match command {
            Command::Lock => LockStatus::Locking,
            Command::Unlock => LockStatus::Unlocking,
            _ => return None,
        };
        Some(Self { status })
    }

    fn settle(self) -> Self {
        let status = match self.status {
            LockStatus::Locking => LockStatus::Locked,
            LockStatus::Unlocking => LockStatus::Unlocked,
            other => other,
        };
        Self { status }
    }
}
