//! Virtual switch — responds to `turn_on`, `turn_off`, `toggle`.

use trellis_domain::command::Command;
use trellis_domain::entity::OnOffState;

use super::Simulated;

impl Simulated for OnOffState {
    fn apply(&self, command: &Command) -> Option<Self> {
        let on = match command {
            Command::TurnOn => true,
            Command::TurnOff => false,
            Command::Toggle => !self.on,
            _ => return None,
        };
        Some(Self { on })
    }
}
