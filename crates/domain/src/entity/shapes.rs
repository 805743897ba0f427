//! State shapes — the typed values a [`DeviceState`](super::DeviceState) can carry.
//!
//! Hosts that decode typed values directly serve these shapes as-is. Hosts
//! that only produce raw [`Attributes`] rely on [`StateShape::from_attributes`]
//! to project them.

use serde::{Deserialize, Serialize};

use super::attributes::Attributes;
use crate::error::ParseError;

/// A type usable as the value of a device state snapshot.
pub trait StateShape: Clone + Send + Sync + std::fmt::Debug + 'static {
    /// Stable shape name, used in capability declarations and errors.
    const SHAPE: &'static str;

    /// Project raw attributes into this shape.
    ///
    /// # Errors
    ///
    /// Returns a [`ParseError`] when required attributes are missing or
    /// malformed.
    fn from_attributes(attrs: &Attributes) -> Result<Self, ParseError>;
}

impl StateShape for Attributes {
    const SHAPE: &'static str = "attributes";

    fn from_attributes(attrs: &Attributes) -> Result<Self, ParseError> {
        Ok(attrs.clone())
    }
}

crate::wire_enum! {
    /// Textual power state used by many backends (`"on"` / `"off"`).
    pub enum Power {
        On,
        Off,
    }
}

/// Reads `on` as a bool, or `state` as an `on`/`off` token.
fn read_power(attrs: &Attributes) -> Result<bool, ParseError> {
    if attrs.contains("on") {
        return attrs.get("on");
    }
    Ok(attrs.get_enum::<Power>("state")? == Power::On)
}

/// Binary on/off devices: switches, plugs, fans without speed control.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OnOffState {
    pub on: bool,
}

impl StateShape for OnOffState {
    const SHAPE: &'static str = "on_off";

    fn from_attributes(attrs: &Attributes) -> Result<Self, ParseError> {
        Ok(Self {
            on: read_power(attrs)?,
        })
    }
}

/// Dimmable lights.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LightState {
    pub on: bool,
    /// 0..=255, `None` for non-dimmable lights.
    pub brightness: Option<u8>,
}

impl StateShape for LightState {
    const SHAPE: &'static str = "light";

    fn from_attributes(attrs: &Attributes) -> Result<Self, ParseError> {
        let brightness = if attrs.contains("brightness") {
            Some(attrs.get("brightness")?)
        } else {
            None
        };
        Ok(Self {
            on: read_power(attrs)?,
            brightness,
        })
    }
}

/// Numeric sensor readings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorReading {
    pub value: f64,
    pub unit: Option<String>,
}

impl StateShape for SensorReading {
    const SHAPE: &'static str = "sensor";

    fn from_attributes(attrs: &Attributes) -> Result<Self, ParseError> {
        let unit = if attrs.contains("unit") {
            Some(attrs.get("unit")?)
        } else {
            None
        };
        Ok(Self {
            value: attrs.get("value")?,
            unit,
        })
    }
}

crate::wire_enum! {
    /// Direction a cover is travelling in.
    pub enum CoverMotion {
        Opening,
        Closing,
        Stopped,
    }
}

/// Blinds, shutters, garage doors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoverState {
    /// 0 = closed, 100 = fully open.
    pub position: u8,
    pub motion: CoverMotion,
}

impl StateShape for CoverState {
    const SHAPE: &'static str = "cover";

    fn from_attributes(attrs: &Attributes) -> Result<Self, ParseError> {
        Ok(Self {
            position: attrs.get("position")?,
            motion: attrs
                .get_enum_opt("motion")?
                .unwrap_or(CoverMotion::Stopped),
        })
    }
}

crate::wire_enum! {
    /// Lock bolt status.
    pub enum LockStatus {
        Locked,
        Unlocked,
        Locking,
        Unlocking,
        Jammed,
    }
}

/// Door locks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockState {
    pub status: LockStatus,
}

impl StateShape for LockState {
    const SHAPE: &'static str = "lock";

    fn from_attributes(attrs: &Attributes) -> Result<Self, ParseError> {
        Ok(Self {
            status: attrs.get_enum("state")?,
        })
    }
}
