//! Host port — a backend adapter that supplies live state for, and accepts
//! commands for, a set of identifiers.
//!
//! A host bridges one external protocol (a hub's push API, a message-bus
//! broker, hardware pins, …) into the controller. What it can *observe* is
//! declared at registration time in the
//! [`HostTable`](crate::capability::HostTable); what it can *do* is expressed
//! through [`Host::execute`].

use futures::stream::BoxStream;

use trellis_domain::command::Command;
use trellis_domain::entity::DeviceState;
use trellis_domain::identifier::Identifier;

use crate::operation::Operation;

/// Stream of state snapshots produced by a host for one identifier.
///
/// Building the stream must be free of side effects: hosts start talking to
/// their backend when the stream is first polled.
pub type StateStream<T> = BoxStream<'static, DeviceState<T>>;

/// A pluggable backend adapter.
///
/// Implementations live in adapter crates (e.g. `adapter_virtual`). A host
/// that drives a resource which is not safe to write concurrently (a single
/// hardware pin, a serial line) must serialize access internally.
pub trait Host: Send + Sync + 'static {
    /// Unique name of this host (e.g. `"virtual"`), used in logs.
    fn name(&self) -> &str;

    /// Carry out `command` on every identifier in `targets`.
    ///
    /// All targets belong to this host; the registry batches them so a host
    /// can coalesce a group command into one backend request. Failures are
    /// reported through the returned [`Operation`]'s phases, never by
    /// panicking.
    fn execute(&self, command: &Command, targets: &[Identifier]) -> Operation;
}
