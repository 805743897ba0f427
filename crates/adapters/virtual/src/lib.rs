//! # trellis-adapter-virtual
//!
//! Virtual/demo host that provides simulated devices for testing and
//! demonstration purposes.
//!
//! ## Demo devices
//!
//! | Device | Identifier | Behaviour |
//! |--------|------------|-----------|
//! | Virtual Light | `light.virtual_light` | `turn_on` / `turn_off` / `toggle` / `set_brightness` |
//! | Virtual Sensor | `sensor.virtual_temperature` | Read-only reading of 21.5 °C |
//! | Virtual Switch | `switch.virtual_switch` | `turn_on` / `turn_off` / `toggle` |
//!
//! Further devices (covers, locks, more lights…) are declared through
//! [`VirtualHostBuilder`].
//!
//! ## Command semantics
//!
//! Every command is an [`Operation`] with the three phases a real backend
//! would need:
//!
//! - **commit** applies the change optimistically and emits a transient
//!   snapshot;
//! - **extend** waits the acknowledgement delay on the scheduler, then emits
//!   the settled state as persistent;
//! - **compensate** (only if the command was cancelled before being
//!   acknowledged) restores and re-emits the last confirmed state.
//!
//! ## Dependency rule
//!
//! Depends on `trellis-app` (port traits) and `trellis-domain` only.

mod devices;
mod error;

use std::collections::HashMap;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use futures::StreamExt;

use trellis_app::capability::HostTable;
use trellis_app::operation::{ActionError, Operation, action};
use trellis_app::ports::{Host, Scheduler, StateStream};
use trellis_domain::command::Command;
use trellis_domain::entity::{
    Attributes, CoverState, LightState, LockState, OnOffState, SensorReading, StateShape,
};
use trellis_domain::error::{ParseError, TrellisError};
use trellis_domain::identifier::Identifier;

pub use devices::{Simulated, SimulatedDevice, Ticket, VirtualDevice, reading_attributes};
pub use error::VirtualError;

/// Name under which the virtual host registers.
pub const HOST_NAME: &str = "virtual";

/// Default delay before a simulated device acknowledges a command.
pub const DEFAULT_ACK_DELAY: Duration = Duration::from_millis(250);

type Devices<T> = HashMap<Identifier, Arc<SimulatedDevice<T>>>;

/// Host serving simulated devices.
pub struct VirtualHost {
    scheduler: Arc<dyn Scheduler>,
    ack_delay: Duration,
    lights: Devices<LightState>,
    switches: Devices<OnOffState>,
    sensors: Devices<SensorReading>,
    covers: Devices<CoverState>,
    locks: Devices<LockState>,
    all: HashMap<Identifier, Arc<dyn VirtualDevice>>,
}

/// Declares the devices of a [`VirtualHost`].
pub struct VirtualHostBuilder {
    scheduler: Arc<dyn Scheduler>,
    ack_delay: Duration,
    lights: Devices<LightState>,
    switches: Devices<OnOffState>,
    sensors: Devices<SensorReading>,
    covers: Devices<CoverState>,
    locks: Devices<LockState>,
}

fn declare<T: Simulated>(devices: &mut Devices<T>, identifier: Identifier, initial: T) {
    let device = Arc::new(SimulatedDevice::new(identifier.clone(), initial));
    if devices.insert(identifier.clone(), device).is_some() {
        tracing::warn!(%identifier, "virtual device declared twice, keeping the last one");
    }
}

impl VirtualHostBuilder {
    #[must_use]
    pub fn ack_delay(mut self, delay: Duration) -> Self {
        self.ack_delay = delay;
        self
    }

    #[must_use]
    pub fn light(mut self, identifier: Identifier, initial: LightState) -> Self {
        declare(&mut self.lights, identifier, initial);
        self
    }

    #[must_use]
    pub fn switch(mut self, identifier: Identifier, initial: OnOffState) -> Self {
        declare(&mut self.switches, identifier, initial);
        self
    }

    #[must_use]
    pub fn sensor(mut self, identifier: Identifier, initial: SensorReading) -> Self {
        declare(&mut self.sensors, identifier, initial);
        self
    }

    #[must_use]
    pub fn cover(mut self, identifier: Identifier, initial: CoverState) -> Self {
        declare(&mut self.covers, identifier, initial);
        self
    }

    #[must_use]
    pub fn lock(mut self, identifier: Identifier, initial: LockState) -> Self {
        declare(&mut self.locks, identifier, initial);
        self
    }

    /// Add the demo light, sensor and switch.
    ///
    /// # Errors
    ///
    /// Never in practice; identifiers are parsed from constants.
    pub fn demo_devices(self) -> Result<Self, ParseError> {
        Ok(self
            .light(
                "light.virtual_light".parse()?,
                LightState {
                    on: false,
                    brightness: Some(0),
                },
            )
            .sensor(
                "sensor.virtual_temperature".parse()?,
                SensorReading {
                    value: 21.5,
                    unit: Some("\u{b0}C".to_string()),
                },
            )
            .switch("switch.virtual_switch".parse()?, OnOffState { on: false }))
    }

    #[must_use]
    pub fn build(self) -> VirtualHost {
        let mut all: HashMap<Identifier, Arc<dyn VirtualDevice>> = HashMap::new();
        collect(&mut all, &self.lights);
        collect(&mut all, &self.switches);
        collect(&mut all, &self.sensors);
        collect(&mut all, &self.covers);
        collect(&mut all, &self.locks);
        VirtualHost {
            scheduler: self.scheduler,
            ack_delay: self.ack_delay,
            lights: self.lights,
            switches: self.switches,
            sensors: self.sensors,
            covers: self.covers,
            locks: self.locks,
            all,
        }
    }
}

fn collect<T: Simulated>(all: &mut HashMap<Identifier, Arc<dyn VirtualDevice>>, devices: &Devices<T>) {
    for (identifier, device) in devices {
        let device: Arc<dyn VirtualDevice> = Arc::clone(device) as Arc<dyn VirtualDevice>;
        all.insert(identifier.clone(), device);
    }
}

fn stream_of<T: Simulated>(devices: &Devices<T>, identifier: &Identifier) -> Option<StateStream<T>> {
    devices.get(identifier).map(|device| device.stream())
}

impl VirtualHost {
    #[must_use]
    pub fn builder(scheduler: Arc<dyn Scheduler>) -> VirtualHostBuilder {
        VirtualHostBuilder {
            scheduler,
            ack_delay: DEFAULT_ACK_DELAY,
            lights: HashMap::new(),
            switches: HashMap::new(),
            sensors: HashMap::new(),
            covers: HashMap::new(),
            locks: HashMap::new(),
        }
    }

    /// A host with only the demo devices listed in the crate documentation.
    ///
    /// # Errors
    ///
    /// Never in practice; identifiers are parsed from constants.
    pub fn demo(scheduler: Arc<dyn Scheduler>) -> Result<Self, ParseError> {
        Ok(Self::builder(scheduler).demo_devices()?.build())
    }

    /// Declare this host's capabilities in `table`.
    pub fn register_into(self: &Arc<Self>, table: &mut HostTable) {
        table
            .register(Arc::clone(self))
            .serves::<LightState, _>("light", |host, id| stream_of(&host.lights, id))
            .serves::<OnOffState, _>("switch", |host, id| stream_of(&host.switches, id))
            .serves::<CoverState, _>("cover", |host, id| stream_of(&host.covers, id))
            .serves::<LockState, _>("lock", |host, id| stream_of(&host.locks, id))
            .generic(Self::sensor_attributes);
    }

    /// Generic entry point: sensors as raw attributes.
    fn sensor_attributes(
        &self,
        identifier: &Identifier,
        shape: &'static str,
    ) -> Option<StateStream<Attributes>> {
        if shape != SensorReading::SHAPE && shape != Attributes::SHAPE {
            return None;
        }
        let stream = stream_of(&self.sensors, identifier)?;
        Some(
            stream
                .map(|state| state.map(|reading| reading_attributes(&reading)))
                .boxed(),
        )
    }

    /// Every identifier this host serves.
    pub fn identifiers(&self) -> impl Iterator<Item = &Identifier> {
        self.all.keys()
    }

    #[must_use]
    pub fn light(&self, identifier: &Identifier) -> Option<&Arc<SimulatedDevice<LightState>>> {
        self.lights.get(identifier)
    }

    #[must_use]
    pub fn switch(&self, identifier: &Identifier) -> Option<&Arc<SimulatedDevice<OnOffState>>> {
        self.switches.get(identifier)
    }

    #[must_use]
    pub fn sensor(
        &self,
        identifier: &Identifier,
    ) -> Option<&Arc<SimulatedDevice<SensorReading>>> {
        self.sensors.get(identifier)
    }

    #[must_use]
    pub fn cover(&self, identifier: &Identifier) -> Option<&Arc<SimulatedDevice<CoverState>>> {
        self.covers.get(identifier)
    }

    #[must_use]
    pub fn lock(&self, identifier: &Identifier) -> Option<&Arc<SimulatedDevice<LockState>>> {
        self.locks.get(identifier)
    }

    fn command_device(&self, device: &Arc<dyn VirtualDevice>, command: &Command) -> Operation {
        let scheduler = Arc::clone(&self.scheduler);
        let delay = self.ack_delay;
        let committing = Arc::clone(device);
        let confirming = Arc::clone(device);
        let reverting = Arc::clone(device);
        let command = command.clone();
        // Set by the commit phase once the device accepted the command.
        let ticket = Arc::new(OnceLock::new());
        let (issued, acknowledged) = (Arc::clone(&ticket), Arc::clone(&ticket));

        Operation::builder(format!("{command} {}", device.identifier()))
            .commit(action(move |_| async move {
                let accepted = committing.begin(&command).map_err(TrellisError::from)?;
                let _ = issued.set(accepted);
                Ok::<(), ActionError>(())
            }))
            .extend(action(move |_| async move {
                scheduler.sleep(delay).await;
                if let Some(ticket) = acknowledged.get() {
                    confirming.confirm(*ticket);
                }
                Ok::<(), ActionError>(())
            }))
            .compensate(action(move |_| async move {
                if let Some(ticket) = ticket.get() {
                    reverting.revert(*ticket);
                }
                Ok::<(), ActionError>(())
            }))
            .start()
    }
}

impl Host for VirtualHost {
    fn name(&self) -> &str {
        HOST_NAME
    }

    fn execute(&self, command: &Command, targets: &[Identifier]) -> Operation {
        let mut operations: Vec<Operation> = targets
            .iter()
            .map(|target| match self.all.get(target) {
                Some(device) => self.command_device(device, command),
                None => Operation::failed(
                    format!("{command} {target}"),
                    VirtualError::UnknownDevice {
                        identifier: target.clone(),
                    },
                ),
            })
            .collect();

        if operations.len() == 1 {
            operations.remove(0)
        } else {
            Operation::combine(format!("{command} x{}", operations.len()), operations)
        }
    }
}
