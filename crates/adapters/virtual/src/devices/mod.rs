//! Virtual device implementations — light, switch, sensor, cover, lock.
//!
//! Every device is a [`SimulatedDevice`] over its state shape. The shape
//! decides how commands change it ([`Simulated`]); the cell handles the
//! optimistic / confirmed bookkeeping and the state stream.

mod cover;
mod light;
mod lock;
mod sensor;
mod switch;

pub use sensor::reading_attributes;

use std::sync::{Mutex, MutexGuard, PoisonError};

use futures::StreamExt;
use futures::stream;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;

use trellis_app::ports::StateStream;
use trellis_domain::command::Command;
use trellis_domain::entity::{Availability, DeviceState, StateShape};
use trellis_domain::identifier::Identifier;

use crate::error::VirtualError;

const STREAM_CAPACITY: usize = 32;

/// How a state shape reacts to commands on a simulated device.
pub trait Simulated: StateShape {
    /// The state right after `command` is accepted, before the device
    /// acknowledges it. `None` when the command is not supported.
    fn apply(&self, command: &Command) -> Option<Self>;

    /// The state once the device has acknowledged the change (e.g. a cover
    /// that finished moving).
    #[must_use]
    fn settle(self) -> Self {
        self
    }
}

/// Identifies one command accepted by [`VirtualDevice::begin`] until it is
/// confirmed or reverted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ticket(u64);

/// Object-safe command side of a simulated device, used by the host to
/// drive devices of any shape.
pub trait VirtualDevice: Send + Sync {
    fn identifier(&self) -> &Identifier;

    /// Apply `command` optimistically and emit a transient snapshot.
    ///
    /// # Errors
    ///
    /// Returns [`VirtualError::Unsupported`] or [`VirtualError::Unavailable`].
    fn begin(&self, command: &Command) -> Result<Ticket, VirtualError>;

    /// Acknowledge the state produced by `ticket`'s command and emit it as
    /// persistent. Older pending commands are superseded.
    fn confirm(&self, ticket: Ticket);

    /// Drop `ticket`'s optimistic state. The device falls back to the newest
    /// command still pending, or to the last confirmed state.
    fn revert(&self, ticket: Ticket);
}

struct Cell<T> {
    current: T,
    confirmed: T,
    availability: Availability,
    /// Unacknowledged commands, oldest first, with the state each produced.
    pending: Vec<(Ticket, T)>,
    next_ticket: u64,
}

impl<T: Clone> Cell<T> {
    fn take_pending(&mut self, ticket: Ticket) -> Option<T> {
        let index = self.pending.iter().position(|(t, _)| *t == ticket)?;
        Some(self.pending.remove(index).1)
    }

    fn newest_pending(&self) -> Option<T> {
        self.pending.last().map(|(_, value)| value.clone())
    }
}

/// A simulated device holding its optimistic and confirmed state.
pub struct SimulatedDevice<T> {
    identifier: Identifier,
    cell: Mutex<Cell<T>>,
    sender: broadcast::Sender<DeviceState<T>>,
}

impl<T: Simulated> SimulatedDevice<T> {
    #[must_use]
    pub fn new(identifier: Identifier, initial: T) -> Self {
        let (sender, _) = broadcast::channel(STREAM_CAPACITY);
        Self {
            identifier,
            cell: Mutex::new(Cell {
                current: initial.clone(),
                confirmed: initial,
                availability: Availability::Available,
                pending: Vec::new(),
                next_ticket: 0,
            }),
            sender,
        }
    }

    /// The current state, including unacknowledged changes.
    #[must_use]
    pub fn current(&self) -> T {
        self.lock().current.clone()
    }

    /// The last acknowledged state.
    #[must_use]
    pub fn confirmed(&self) -> T {
        self.lock().confirmed.clone()
    }

    /// Stream starting with the confirmed state, followed by every snapshot
    /// emitted afterwards.
    #[must_use]
    pub fn stream(&self) -> StateStream<T> {
        let (initial, receiver) = {
            let cell = self.lock();
            (Self::snapshot(&cell, cell.confirmed.clone(), true), self.sender.subscribe())
        };
        let identifier = self.identifier.clone();
        let live = BroadcastStream::new(receiver).filter_map(move |item| {
            if item.is_err() {
                tracing::warn!(%identifier, "virtual state stream lagged");
            }
            futures::future::ready(item.ok())
        });
        stream::once(futures::future::ready(initial)).chain(live).boxed()
    }

    /// A change that happened on the device itself (a new sensor reading, a
    /// wall switch being pressed). It is confirmed immediately.
    pub fn report(&self, value: T) {
        let mut cell = self.lock();
        cell.pending.clear();
        cell.current = value.clone();
        cell.confirmed = value.clone();
        self.emit(&cell, value, true);
    }

    /// Mark the device reachable or not. Commands to an unavailable device
    /// fail.
    pub fn set_availability(&self, availability: Availability) {
        let mut cell = self.lock();
        cell.availability = availability;
        let confirmed = cell.confirmed.clone();
        self.emit(&cell, confirmed, true);
    }

    fn lock(&self) -> MutexGuard<'_, Cell<T>> {
        self.cell.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn snapshot(cell: &Cell<T>, value: T, persistent: bool) -> DeviceState<T> {
        let state = if persistent {
            DeviceState::persistent(value)
        } else {
            DeviceState::transient(value)
        };
        state.with_availability(cell.availability)
    }

    /// Emits while the cell is locked so observers see changes in order.
    fn emit(&self, cell: &Cell<T>, value: T, persistent: bool) {
        let _ = self.sender.send(Self::snapshot(cell, value, persistent));
    }
}

impl<T: Simulated> VirtualDevice for SimulatedDevice<T> {
    fn identifier(&self) -> &Identifier {
        &self.identifier
    }

    fn begin(&self, command: &Command) -> Result<Ticket, VirtualError> {
        let mut cell = self.lock();
        if !cell.availability.is_available() {
            return Err(VirtualError::Unavailable {
                identifier: self.identifier.clone(),
            });
        }
        let next = cell
            .current
            .apply(command)
            .ok_or_else(|| VirtualError::Unsupported {
                identifier: self.identifier.clone(),
                command: command.name().to_string(),
            })?;
        tracing::debug!(identifier = %self.identifier, %command, "optimistic update");
        let ticket = Ticket(cell.next_ticket);
        cell.next_ticket += 1;
        cell.pending.push((ticket, next.clone()));
        cell.current = next.clone();
        self.emit(&cell, next, false);
        Ok(ticket)
    }

    fn confirm(&self, ticket: Ticket) {
        let mut cell = self.lock();
        let Some(value) = cell.take_pending(ticket) else {
            tracing::debug!(identifier = %self.identifier, ?ticket, "superseded acknowledgement");
            return;
        };
        cell.pending.retain(|(pending, _)| pending.0 > ticket.0);
        let settled = value.settle();
        cell.confirmed = settled.clone();
        self.emit(&cell, settled.clone(), true);
        match cell.newest_pending() {
            Some(newer) => self.emit(&cell, newer, false),
            None => cell.current = settled,
        }
    }

    fn revert(&self, ticket: Ticket) {
        let mut cell = self.lock();
        if cell.take_pending(ticket).is_none() {
            return;
        }
        tracing::debug!(identifier = %self.identifier, "reverting optimistic update");
        match cell.newest_pending() {
            Some(newer) => {
                cell.current = newer.clone();
                self.emit(&cell, newer, false);
            }
            None => {
                let confirmed = cell.confirmed.clone();
                cell.current = confirmed.clone();
                self.emit(&cell, confirmed, true);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use trellis_domain::entity::OnOffState;

    use super::*;

    fn switch() -> SimulatedDevice<OnOffState> {
        SimulatedDevice::new("switch.test".parse().unwrap(), OnOffState { on: false })
    }

    #[tokio::test]
    async fn should_start_stream_with_confirmed_state() {
        let device = switch();
        let first = device.stream().next().await.unwrap();
        assert!(first.is_persistent());
        assert!(!first.value().on);
    }

    #[tokio::test]
    async fn should_emit_transient_then_persistent_when_command_confirmed() {
        let device = switch();
        let mut states = device.stream();
        states.next().await.unwrap();

        let ticket = device.begin(&Command::TurnOn).unwrap();
        device.confirm(ticket);

        let optimistic = states.next().await.unwrap();
        assert!(!optimistic.is_persistent());
        assert!(optimistic.value().on);
        let confirmed = states.next().await.unwrap();
        assert!(confirmed.is_persistent());
        assert!(device.confirmed().on);
    }

    #[test]
    fn should_restore_confirmed_state_when_reverted() {
        let device = switch();
        let ticket = device.begin(&Command::Toggle).unwrap();
        assert!(device.current().on);

        device.revert(ticket);
        assert!(!device.current().on);
        assert!(!device.confirmed().on);
    }

    #[test]
    fn should_revert_to_acknowledged_state_when_newer_command_reverted() {
        let device = switch();
        let first = device.begin(&Command::TurnOn).unwrap();
        let second = device.begin(&Command::Toggle).unwrap();
        assert!(!device.current().on);

        device.confirm(first);
        assert!(device.confirmed().on);
        assert!(!device.current().on);

        device.revert(second);
        assert!(device.current().on);
        assert!(device.confirmed().on);
    }

    #[test]
    fn should_keep_newer_optimistic_state_when_older_command_reverted() {
        let device = switch();
        let first = device.begin(&Command::TurnOn).unwrap();
        let second = device.begin(&Command::TurnOff).unwrap();

        device.revert(first);
        assert!(!device.current().on);

        device.confirm(second);
        assert!(!device.confirmed().on);
        assert!(!device.current().on);
    }

    #[test]
    fn should_ignore_acknowledgement_superseded_by_newer_command() {
        let device = switch();
        let first = device.begin(&Command::TurnOn).unwrap();
        let second = device.begin(&Command::TurnOff).unwrap();

        device.confirm(second);
        device.confirm(first);
        assert!(!device.confirmed().on);
        device.revert(first);
        assert!(!device.current().on);
    }

    #[tokio::test]
    async fn should_emit_pending_state_after_acknowledging_older_command() {
        let device = switch();
        let mut states = device.stream();
        states.next().await.unwrap();
        let first = device.begin(&Command::TurnOn).unwrap();
        device.begin(&Command::TurnOff).unwrap();
        states.next().await.unwrap();
        states.next().await.unwrap();

        device.confirm(first);
        let acknowledged = states.next().await.unwrap();
        assert!(acknowledged.is_persistent());
        assert!(acknowledged.value().on);
        let pending = states.next().await.unwrap();
        assert!(!pending.is_persistent());
        assert!(!pending.value().on);
    }

    #[test]
    fn should_reject_command_when_unavailable() {
        let device = switch();
        device.set_availability(Availability::Unavailable);
        let err = device.begin(&Command::TurnOn).unwrap_err();
        assert!(matches!(err, VirtualError::Unavailable { .. }));
        assert!(!device.current().on);
    }

    #[test]
    fn should_confirm_reported_change_immediately() {
        let device = switch();
        device.report(OnOffState { on: true });
        assert!(device.confirmed().on);
    }
}
