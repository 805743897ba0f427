//! Entity state model — what hosts report about the things they manage.
//!
//! A device's state travels as a [`DeviceState`] snapshot carrying a typed
//! value (a [`StateShape`]), an availability status and a persistence flag.
//! Backends that decode loosely-typed payloads report [`Attributes`], which
//! shapes know how to project.

mod attribute_value;
mod attributes;
mod shapes;
mod state;

pub use attribute_value::{AttributeValue, FromAttribute};
pub use attributes::Attributes;
pub use shapes::{
    CoverMotion, CoverState, LightState, LockState, LockStatus, OnOffState, Power, SensorReading,
    StateShape,
};
pub use state::{Availability, DeviceState, Timestamp};
