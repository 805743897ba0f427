//! Device registry — one shared [`Device`] per identifier.
//!
//! Binding resolves the identifier through the [`HostTable`] once and caches
//! the result for the lifetime of the process. Each device multicasts its
//! host's state stream to any number of observers, replaying the most recent
//! persistent snapshot to late subscribers.

use std::any::Any;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

use futures::StreamExt;
use futures::stream::{self, BoxStream};
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;

use trellis_domain::command::Command;
use trellis_domain::entity::{DeviceState, StateShape};
use trellis_domain::error::ConfigurationError;
use trellis_domain::identifier::Identifier;

use crate::capability::{HostHandle, HostTable};
use crate::execution_context::ExecutionContext;
use crate::operation::Operation;
use crate::ports::StateStream;

/// Capacity of each device's multicast channel. Observers that fall further
/// behind skip the missed snapshots.
const MULTICAST_CAPACITY: usize = 64;

struct Entry {
    shape: &'static str,
    host: HostHandle,
    /// A `Device<T>` for the shape named by `shape`.
    device: Box<dyn Any + Send + Sync>,
}

/// Binding cell for one identifier. Its lock is held while the host binds,
/// so concurrent binders of that identifier wait for a single bind while
/// other identifiers proceed.
#[derive(Default)]
struct Slot(Mutex<Option<Entry>>);

impl Slot {
    fn lock(&self) -> MutexGuard<'_, Option<Entry>> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn host(&self) -> Option<HostHandle> {
        self.lock().as_ref().map(|entry| entry.host.clone())
    }
}

/// Caches one [`Device`] per identifier and routes commands to hosts.
pub struct DeviceRegistry {
    table: HostTable,
    slots: RwLock<HashMap<Identifier, Arc<Slot>>>,
}

impl DeviceRegistry {
    #[must_use]
    pub fn new(table: HostTable) -> Self {
        Self {
            table,
            slots: RwLock::new(HashMap::new()),
        }
    }

    #[must_use]
    pub fn table(&self) -> &HostTable {
        &self.table
    }

    /// Get the device bound to `identifier`, resolving and caching it on
    /// first use. Every call for the same identifier returns the same
    /// instance, including under concurrent callers.
    ///
    /// Host bind functions run without the registry-wide lock and may bind
    /// other identifiers, but never the one being resolved.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigurationError::UnresolvedIdentifier`] when no host
    /// serves `T` for `identifier`, and [`ConfigurationError::ShapeMismatch`]
    /// when the identifier is already bound under another shape.
    #[tracing::instrument(skip(self), fields(shape = T::SHAPE))]
    pub fn bind<T: StateShape>(
        &self,
        identifier: &Identifier,
    ) -> Result<Device<T>, ConfigurationError> {
        let slot = self.slot_or_insert(identifier);
        let mut entry = slot.lock();
        if let Some(entry) = entry.as_ref() {
            return downcast(identifier, entry);
        }

        let binding = self.table.resolve::<T>(identifier)?;
        tracing::debug!(host = binding.host.name(), "bound device");
        let device = Device::new(identifier.clone(), binding.host.clone(), binding.stream);
        *entry = Some(Entry {
            shape: T::SHAPE,
            host: binding.host,
            device: Box::new(device.clone()),
        });
        Ok(device)
    }

    fn slot(&self, identifier: &Identifier) -> Option<Arc<Slot>> {
        self.slots
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(identifier)
            .cloned()
    }

    fn slot_or_insert(&self, identifier: &Identifier) -> Arc<Slot> {
        if let Some(slot) = self.slot(identifier) {
            return slot;
        }
        let mut slots = self.slots.write().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(slots.entry(identifier.clone()).or_default())
    }

    /// Host of a bound identifier. Slots whose bind failed stay empty.
    fn bound_host(&self, identifier: &Identifier) -> Option<HostHandle> {
        self.slot(identifier).and_then(|slot| slot.host())
    }

    /// # Errors
    ///
    /// Returns [`ConfigurationError::UnboundIdentifier`] when `identifier`
    /// has not been bound yet.
    pub fn ensure_bound(&self, identifier: &Identifier) -> Result<(), ConfigurationError> {
        if self.contains(identifier) {
            Ok(())
        } else {
            Err(ConfigurationError::UnboundIdentifier {
                identifier: identifier.clone(),
            })
        }
    }

    #[must_use]
    pub fn contains(&self, identifier: &Identifier) -> bool {
        self.bound_host(identifier).is_some()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        let slots: Vec<_> = self
            .slots
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();
        slots.iter().filter(|slot| slot.lock().is_some()).count()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Send `command` to every bound device in `targets`.
    ///
    /// Targets are batched per host, so each host receives a single
    /// [`Host::execute`](crate::ports::Host::execute) call; the per-host
    /// operations are joined into one.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigurationError::UnboundIdentifier`] for the first
    /// target that has not been bound. No host is called in that case.
    #[tracing::instrument(skip(self, command, targets), fields(%command, targets = targets.len()))]
    pub fn execute(
        &self,
        command: &Command,
        targets: &[Identifier],
    ) -> Result<Operation, ConfigurationError> {
        let mut batches: BTreeMap<usize, (HostHandle, Vec<Identifier>)> = BTreeMap::new();
        for identifier in targets {
            let host =
                self.bound_host(identifier)
                    .ok_or_else(|| ConfigurationError::UnboundIdentifier {
                        identifier: identifier.clone(),
                    })?;
            batches
                .entry(host.index())
                .or_insert_with(|| (host, Vec::new()))
                .1
                .push(identifier.clone());
        }

        let mut operations: Vec<Operation> = batches
            .into_values()
            .map(|(host, identifiers)| host.host().execute(command, &identifiers))
            .collect();

        Ok(match operations.len() {
            0 => Operation::completed(command.to_string()),
            1 => operations.remove(0),
            _ => Operation::combine(command.to_string(), operations),
        })
    }
}

fn downcast<T: StateShape>(
    identifier: &Identifier,
    entry: &Entry,
) -> Result<Device<T>, ConfigurationError> {
    entry
        .device
        .downcast_ref::<Device<T>>()
        .cloned()
        .ok_or_else(|| ConfigurationError::ShapeMismatch {
            identifier: identifier.clone(),
            bound: entry.shape,
            requested: T::SHAPE,
        })
}

struct DeviceInner<T> {
    identifier: Identifier,
    host: HostHandle,
    /// Host stream, taken by the pump on first subscription.
    source: Mutex<Option<StateStream<T>>>,
    sender: broadcast::Sender<DeviceState<T>>,
    last_persistent: Mutex<Option<DeviceState<T>>>,
}

impl<T: StateShape> DeviceInner<T> {
    fn publish(&self, state: DeviceState<T>) {
        let mut last = self
            .last_persistent
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if state.is_persistent() {
            *last = Some(state.clone());
        }
        // No receivers is fine, the persistent value is kept for replay.
        let _ = self.sender.send(state);
    }
}

/// A bound device: its identifier, serving host, shared state stream and
/// command entry point. Cheap to clone; clones are the same device.
pub struct Device<T> {
    inner: Arc<DeviceInner<T>>,
}

impl<T> Clone for Device<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> std::fmt::Debug for Device<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Device")
            .field("identifier", &self.inner.identifier)
            .field("host", &self.inner.host.name())
            .finish_non_exhaustive()
    }
}

impl<T: StateShape> Device<T> {
    fn new(identifier: Identifier, host: HostHandle, source: StateStream<T>) -> Self {
        let (sender, _) = broadcast::channel(MULTICAST_CAPACITY);
        Self {
            inner: Arc::new(DeviceInner {
                identifier,
                host,
                source: Mutex::new(Some(source)),
                sender,
                last_persistent: Mutex::new(None),
            }),
        }
    }

    #[must_use]
    pub fn identifier(&self) -> &Identifier {
        &self.inner.identifier
    }

    #[must_use]
    pub fn host_name(&self) -> &str {
        self.inner.host.name()
    }

    /// Whether both handles refer to the same registry entry.
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// The most recent persistent snapshot seen so far.
    #[must_use]
    pub fn last_persistent(&self) -> Option<DeviceState<T>> {
        self.inner
            .last_persistent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Observe this device's state.
    ///
    /// The stream starts with the most recent persistent snapshot, if any,
    /// then yields every snapshot the host emits from now on. Transient
    /// snapshots emitted before subscribing are never delivered.
    ///
    /// The first subscription starts forwarding the host stream; this
    /// must happen inside a tokio runtime.
    #[must_use]
    pub fn subscribe(&self) -> BoxStream<'static, DeviceState<T>> {
        let (replay, receiver) = {
            let last = self
                .inner
                .last_persistent
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            (last.clone(), self.inner.sender.subscribe())
        };
        self.start_pump();

        let identifier = self.inner.identifier.clone();
        let live = BroadcastStream::new(receiver).filter_map(move |item| {
            let state = match item {
                Ok(state) => Some(state),
                Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                    tracing::warn!(%identifier, skipped, "observer lagged behind device state");
                    None
                }
            };
            futures::future::ready(state)
        });
        stream::iter(replay).chain(live).boxed()
    }

    /// Send `command` to this device alone.
    #[must_use]
    pub fn execute(&self, command: &Command) -> Operation {
        self.inner
            .host
            .host()
            .execute(command, std::slice::from_ref(&self.inner.identifier))
    }

    fn start_pump(&self) {
        let source = self
            .inner
            .source
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(mut source) = source else {
            return;
        };

        let inner = Arc::clone(&self.inner);
        let span = tracing::debug_span!("device", identifier = %inner.identifier);
        // The pump outlives whichever automation triggered the first
        // subscription, so it must not inherit that automation's context.
        tokio::spawn(tracing::Instrument::instrument(
            ExecutionContext::detached(async move {
                while let Some(state) = source.next().await {
                    inner.publish(state);
                }
                tracing::debug!("host state stream ended");
            }),
            span,
        ));
    }
}
