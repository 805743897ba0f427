//! Host capability table — which host serves which (domain, state shape)
//! pairs.
//!
//! Adapters declare their capabilities once, at registration:
//!
//! ```ignore
//! table
//!     .register(Arc::clone(&host))
//!     .serves::<LightState, _>("light", |host, id| host.light_states(id))
//!     .generic(|host, id, shape| host.raw_states(id, shape));
//! ```
//!
//! Resolution never probes hosts at runtime; it only consults these
//! declarations.

use std::any::{Any, TypeId};
use std::sync::Arc;

use futures::StreamExt;

use trellis_domain::entity::{Attributes, StateShape};
use trellis_domain::error::ConfigurationError;
use trellis_domain::identifier::Identifier;

use crate::ports::{Host, StateStream};

type Binder<T> = Box<dyn Fn(&Identifier) -> Option<StateStream<T>> + Send + Sync>;
type GenericBinder =
    Box<dyn Fn(&Identifier, &'static str) -> Option<StateStream<Attributes>> + Send + Sync>;

struct TypedBinder {
    domain: String,
    shape: TypeId,
    /// A `Binder<T>` for the `T` whose `TypeId` is `shape`.
    bind: Box<dyn Any + Send + Sync>,
}

struct HostEntry {
    host: Arc<dyn Host>,
    typed: Vec<TypedBinder>,
    generic: Option<GenericBinder>,
}

/// Registered hosts and their declared capabilities, in registration order.
#[derive(Default)]
pub struct HostTable {
    entries: Vec<HostEntry>,
}

/// Identifies the host a binding was resolved from. Commands for devices
/// sharing a host are batched on [`HostHandle::index`].
#[derive(Clone)]
pub struct HostHandle {
    index: usize,
    host: Arc<dyn Host>,
}

impl HostHandle {
    /// Registration position of the host in its table.
    #[must_use]
    pub fn index(&self) -> usize {
        self.index
    }

    #[must_use]
    pub fn host(&self) -> &Arc<dyn Host> {
        &self.host
    }

    #[must_use]
    pub fn name(&self) -> &str {
        self.host.name()
    }
}

impl std::fmt::Debug for HostHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostHandle")
            .field("index", &self.index)
            .field("name", &self.host.name())
            .finish()
    }
}

/// A resolved binding: the serving host and the (not yet polled) state
/// stream it produced.
pub struct Binding<T> {
    pub host: HostHandle,
    pub stream: StateStream<T>,
}

/// Builder returned by [`HostTable::register`].
#[must_use]
pub struct HostRegistration<'a, H> {
    entry: &'a mut HostEntry,
    host: Arc<H>,
}

impl<H: Host> HostRegistration<'_, H> {
    /// Declare that the host serves `T` snapshots for identifiers in
    /// `domain`. `bind` may still decline a particular identifier by
    /// returning `None`.
    pub fn serves<T, F>(self, domain: impl Into<String>, bind: F) -> Self
    where
        T: StateShape,
        F: Fn(&H, &Identifier) -> Option<StateStream<T>> + Send + Sync + 'static,
    {
        let host = Arc::clone(&self.host);
        let binder: Binder<T> = Box::new(move |id| bind(&host, id));
        self.entry.typed.push(TypedBinder {
            domain: domain.into(),
            shape: TypeId::of::<T>(),
            bind: Box::new(binder),
        });
        self
    }

    /// Declare a single entry point producing raw attribute snapshots for any
    /// requested shape name. Used only when no host declares the exact shape.
    pub fn generic<F>(self, bind: F) -> Self
    where
        F: Fn(&H, &Identifier, &'static str) -> Option<StateStream<Attributes>>
            + Send
            + Sync
            + 'static,
    {
        let host = Arc::clone(&self.host);
        self.entry.generic = Some(Box::new(move |id, shape| bind(&host, id, shape)));
        self
    }
}

impl HostTable {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a host. Earlier registrations take precedence.
    pub fn register<H: Host>(&mut self, host: Arc<H>) -> HostRegistration<'_, H> {
        let index = self.entries.len();
        tracing::debug!(host = host.name(), index, "registering host");
        self.entries.push(HostEntry {
            host: Arc::clone(&host) as Arc<dyn Host>,
            typed: Vec::new(),
            generic: None,
        });
        HostRegistration {
            entry: &mut self.entries[index],
            host,
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Names of the registered hosts, in registration order.
    pub fn host_names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|entry| entry.host.name())
    }

    /// Find the host serving `T` for `identifier`.
    ///
    /// Hosts are tried in registration order, first through their exact
    /// declarations for `T`, then through their generic entry points. The
    /// first host to return a stream wins.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigurationError::UnresolvedIdentifier`] when no host
    /// answers.
    pub fn resolve<T: StateShape>(
        &self,
        identifier: &Identifier,
    ) -> Result<Binding<T>, ConfigurationError> {
        self.resolve_typed(identifier)
            .or_else(|| self.resolve_generic(identifier))
            .ok_or_else(|| ConfigurationError::UnresolvedIdentifier {
                identifier: identifier.clone(),
                shape: T::SHAPE,
            })
    }

    fn handle(&self, index: usize) -> HostHandle {
        HostHandle {
            index,
            host: Arc::clone(&self.entries[index].host),
        }
    }

    fn resolve_typed<T: StateShape>(&self, identifier: &Identifier) -> Option<Binding<T>> {
        let shape = TypeId::of::<T>();
        self.entries.iter().enumerate().find_map(|(index, entry)| {
            let stream = entry
                .typed
                .iter()
                .filter(|binder| binder.shape == shape && binder.domain == identifier.domain())
                .filter_map(|binder| binder.bind.downcast_ref::<Binder<T>>())
                .find_map(|bind| bind(identifier))?;
            Some(Binding {
                host: self.handle(index),
                stream,
            })
        })
    }

    fn resolve_generic<T: StateShape>(&self, identifier: &Identifier) -> Option<Binding<T>> {
        self.entries.iter().enumerate().find_map(|(index, entry)| {
            let raw = (entry.generic.as_ref()?)(identifier, T::SHAPE)?;
            Some(Binding {
                host: self.handle(index),
                stream: project(identifier.clone(), raw),
            })
        })
    }
}

/// Project raw attribute snapshots into `T`, dropping the ones that do not
/// parse.
fn project<T: StateShape>(identifier: Identifier, raw: StateStream<Attributes>) -> StateStream<T> {
    raw.filter_map(move |state| {
        let projected = state.try_map(|attrs| T::from_attributes(&attrs));
        if let Err(error) = &projected {
            tracing::warn!(%identifier, shape = T::SHAPE, %error, "dropping unparseable snapshot");
        }
        futures::future::ready(projected.ok())
    })
    .boxed()
}

#[cfg(test)]
mod tests {
    use futures::stream;

    use trellis_domain::command::Command;
    use trellis_domain::entity::{DeviceState, OnOffState, SensorReading};

    use super::*;
    use crate::operation::Operation;

    struct FakeHost {
        name: &'static str,
    }

    impl FakeHost {
        fn new(name: &'static str) -> Arc<Self> {
            Arc::new(Self { name })
        }

        fn on_off(&self, on: bool) -> Option<StateStream<OnOffState>> {
            Some(stream::iter([DeviceState::persistent(OnOffState { on })]).boxed())
        }
    }

    impl Host for FakeHost {
        fn name(&self) -> &str {
            self.name
        }

        fn execute(&self, _command: &Command, _targets: &[Identifier]) -> Operation {
            Operation::completed("fake")
        }
    }

    fn id(text: &str) -> Identifier {
        text.parse().unwrap()
    }

    #[tokio::test]
    async fn should_resolve_declared_shape_for_matching_domain() {
        let mut table = HostTable::new();
        table
            .register(FakeHost::new("a"))
            .serves::<OnOffState, _>("switch", |host, _| host.on_off(true));

        let binding = table.resolve::<OnOffState>(&id("switch.porch")).unwrap();
        assert_eq!(binding.host.name(), "a");
        let first = binding.stream.collect::<Vec<_>>().await;
        assert!(first[0].value().on);
    }

    #[test]
    fn should_fail_every_time_when_no_host_serves_identifier() {
        let mut table = HostTable::new();
        table
            .register(FakeHost::new("a"))
            .serves::<OnOffState, _>("switch", |host, _| host.on_off(true));

        for _ in 0..2 {
            let err = table.resolve::<OnOffState>(&id("light.desk")).err().unwrap();
            assert_eq!(
                err,
                ConfigurationError::UnresolvedIdentifier {
                    identifier: id("light.desk"),
                    shape: "on_off",
                }
            );
        }
    }

    #[test]
    fn should_prefer_earlier_registration_when_hosts_overlap() {
        let mut table = HostTable::new();
        table
            .register(FakeHost::new("first"))
            .serves::<OnOffState, _>("switch", |host, _| host.on_off(true));
        table
            .register(FakeHost::new("second"))
            .serves::<OnOffState, _>("switch", |host, _| host.on_off(false));

        let binding = table.resolve::<OnOffState>(&id("switch.a")).unwrap();
        assert_eq!(binding.host.name(), "first");
        assert_eq!(binding.host.index(), 0);
    }

    #[test]
    fn should_fall_through_when_host_declines_identifier() {
        let mut table = HostTable::new();
        table
            .register(FakeHost::new("picky"))
            .serves::<OnOffState, _>("switch", |host, id| {
                (id.local_id() == "known").then(|| host.on_off(true)).flatten()
            });
        table
            .register(FakeHost::new("catch-all"))
            .serves::<OnOffState, _>("switch", |host, _| host.on_off(false));

        let binding = table.resolve::<OnOffState>(&id("switch.other")).unwrap();
        assert_eq!(binding.host.name(), "catch-all");
    }

    #[test]
    fn should_prefer_exact_shape_over_earlier_generic_host() {
        let mut table = HostTable::new();
        table.register(FakeHost::new("generic")).generic(|_, _, _| {
            Some(stream::iter([DeviceState::persistent(Attributes::new().with("on", true))]).boxed())
        });
        table
            .register(FakeHost::new("exact"))
            .serves::<OnOffState, _>("switch", |host, _| host.on_off(true));

        let binding = table.resolve::<OnOffState>(&id("switch.a")).unwrap();
        assert_eq!(binding.host.name(), "exact");
    }

    #[tokio::test]
    async fn should_project_generic_attributes_and_drop_unparseable_snapshots() {
        let mut table = HostTable::new();
        table.register(FakeHost::new("raw")).generic(|_, _, shape| {
            assert_eq!(shape, "sensor");
            Some(
                stream::iter([
                    DeviceState::persistent(Attributes::new().with("unit", "lx")),
                    DeviceState::persistent(Attributes::new().with("value", 420_i64)),
                ])
                .boxed(),
            )
        });

        let binding = table.resolve::<SensorReading>(&id("sensor.lux")).unwrap();
        let readings: Vec<_> = binding.stream.collect().await;
        assert_eq!(readings.len(), 1);
        assert!((readings[0].value().value - 420.0).abs() < f64::EPSILON);
    }
}
