//! Device state snapshots.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// UTC timestamp of a snapshot.
pub type Timestamp = DateTime<Utc>;

/// Whether the backend can currently reach the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Availability {
    Available,
    Unavailable,
    #[default]
    Unknown,
}

impl Availability {
    /// Anything but [`Unavailable`](Self::Unavailable).
    #[must_use]
    pub fn is_available(self) -> bool {
        !matches!(self, Self::Unavailable)
    }
}

impl std::fmt::Display for Availability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Available => f.write_str("available"),
            Self::Unavailable => f.write_str("unavailable"),
            Self::Unknown => f.write_str("unknown"),
        }
    }
}

/// A typed snapshot of a device's state.
///
/// Persistent snapshots are replayed to late observers as the last known
/// value; transient ones (optimistic echoes, button presses) are delivered
/// only to observers attached when they were emitted. The flag is fixed at
/// construction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceState<T> {
    value: T,
    persistent: bool,
    availability: Availability,
    timestamp: Timestamp,
}

impl<T> DeviceState<T> {
    /// A snapshot that is replayed to late observers.
    #[must_use]
    pub fn persistent(value: T) -> Self {
        Self::new(value, true)
    }

    /// A snapshot that is never replayed.
    #[must_use]
    pub fn transient(value: T) -> Self {
        Self::new(value, false)
    }

    fn new(value: T, persistent: bool) -> Self {
        Self {
            value,
            persistent,
            availability: Availability::Available,
            timestamp: Utc::now(),
        }
    }

    #[must_use]
    pub fn with_availability(mut self, availability: Availability) -> Self {
        self.availability = availability;
        self
    }

    #[must_use]
    pub fn with_timestamp(mut self, timestamp: Timestamp) -> Self {
        self.timestamp = timestamp;
        self
    }

    #[must_use]
    pub fn value(&self) -> &T {
        &self.value
    }

    #[must_use]
    pub fn into_value(self) -> T {
        self.value
    }

    #[must_use]
    pub fn is_persistent(&self) -> bool {
        self.persistent
    }

    #[must_use]
    pub fn availability(&self) -> Availability {
        self.availability
    }

    #[must_use]
    pub fn timestamp(&self) -> Timestamp {
        self.timestamp
    }

    /// Project the value, keeping persistence, availability and timestamp.
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> DeviceState<U> {
        DeviceState {
            value: f(self.value),
            persistent: self.persistent,
            availability: self.availability,
            timestamp: self.timestamp,
        }
    }

    /// Fallible [`map`](Self::map).
    ///
    /// # Errors
    ///
    /// Returns whatever `f` returns.
    pub fn try_map<U, E>(self, f: impl FnOnce(T) -> Result<U, E>) -> Result<DeviceState<U>, E> {
        Ok(DeviceState {
            value: f(self.value)?,
            persistent: self.persistent,
            availability: self.availability,
            timestamp: self.timestamp,
        })
    }
}
