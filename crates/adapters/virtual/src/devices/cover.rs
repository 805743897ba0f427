//! Virtual cover — moves between 0 (closed) and 100 (open).
//!
//! Accepting a command starts the motion; acknowledgement stops it at the
//! target position.

use trellis_domain::command::Command;
use trellis_domain::entity::{CoverMotion, CoverState};

use super::Simulated;

impl Simulated for CoverState {
    fn apply(&self, command: &Command) -> Option<Self> {
        let target = match command {
            Command::Open => 100,
            Command::Close => 0,
            Command::SetPosition { position } => (*position).min(100),
            Command::Stop => {
                return Some(Self {
                    motion: CoverMotion::Stopped,
                    ..*self
                });
            }
            _ => return None,
        };
        let motion = match target.cmp(&self.position) {
            std::cmp::Ordering::Greater => CoverMotion::Opening,
            std::cmp::Ordering::Less => CoverMotion::Closing,
            std::cmp::Ordering::Equal => CoverMotion::Stopped,
        };
        Some(Self {
            position: target,
            motion,
        })
    }

    fn settle(self) -> Self {
        Self {
            motion: CoverMotion::Stopped,
            ..self
        }
    }
}
