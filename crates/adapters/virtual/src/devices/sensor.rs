//! Virtual sensor — read-only numeric readings.
//!
//! Sensors are served through the host's generic entry point as raw
//! attributes (`value`, `unit`), the way a hub that only speaks attribute
//! maps would expose them.

use trellis_domain::command::Command;
use trellis_domain::entity::{Attributes, SensorReading};

use super::Simulated;

impl Simulated for SensorReading {
    fn apply(&self, _command: &Command) -> Option<Self> {
        None
    }
}

/// Attribute form of a reading.
#[must_use]
pub fn reading_attributes(reading: &SensorReading) -> Attributes {
    let attrs = Attributes::new().with("value", reading.value);
    match &reading.unit {
        Some(unit) => attrs.with("unit", unit.as_str()),
        None => attrs,
    }
}
