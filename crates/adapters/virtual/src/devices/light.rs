//! Virtual light — on/off plus brightness for dimmable lights.

use trellis_domain::command::Command;
use trellis_domain::entity::LightState;

use super::Simulated;

impl Simulated for LightState {
    fn apply(&self, command: &Command) -> Option<Self> {
        match command {
            Command::TurnOn => Some(Self { on: true, ..*self }),
            Command::TurnOff => Some(Self { on: false, ..*self }),
            Command::Toggle => Some(Self {
                on: !self.on,
                ..*self
            }),
            // Dimming only applies to dimmable lights; zero means off.
            Command::SetBrightness { brightness } => self.brightness.map(|_| Self {
                on: *brightness > 0,
                brightness: Some(*brightness),
            }),
            _ => None,
        }
    }
}
