//! Wiring — turns a [`Config`] into a ready-to-run controller.
//!
//! Builds the host table, binds every device the configuration mentions,
//! and registers the configured scenes and schedules with the automation
//! runtime. Nothing runs until [`Controller::runtime`] is driven.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;

use trellis_adapter_virtual::VirtualHost;
use trellis_app::automation_host::InProcessAutomationHost;
use trellis_app::automation_runtime::AutomationRuntime;
use trellis_app::capability::HostTable;
use trellis_app::ports::{AutomationHost, Scheduler};
use trellis_app::registry::{Device, DeviceRegistry};
use trellis_app::scene::{Scene, SceneStep, Schedule};
use trellis_domain::entity::{
    Attributes, CoverMotion, CoverState, LightState, LockState, LockStatus, OnOffState,
    SensorReading, StateShape,
};
use trellis_domain::error::{ConfigurationError, TrellisError};
use trellis_domain::id::AutomationId;
use trellis_domain::identifier::Identifier;

use crate::config::{Config, StepConfig, VirtualConfig, VirtualDeviceConfig};

/// Everything the daemon needs once configuration is applied.
pub struct Controller {
    pub registry: Arc<DeviceRegistry>,
    pub automations: Arc<InProcessAutomationHost>,
    pub runtime: AutomationRuntime,
    pub virtual_host: Option<Arc<VirtualHost>>,
}

/// Assemble the controller described by `config`.
///
/// Must be called within a tokio runtime: each bound device gets a task
/// logging its state changes.
///
/// # Errors
///
/// Returns [`TrellisError::Configuration`] when a configured target cannot
/// be bound, or [`TrellisError::Parse`] if the demo devices cannot be built.
pub fn assemble(config: &Config, scheduler: Arc<dyn Scheduler>) -> Result<Controller, TrellisError> {
    let mut table = HostTable::new();
    let virtual_host = if config.virtual_host.enabled {
        let host = Arc::new(virtual_host(&config.virtual_host, Arc::clone(&scheduler))?);
        host.register_into(&mut table);
        Some(host)
    } else {
        None
    };
    tracing::info!(hosts = ?table.host_names().collect::<Vec<_>>(), "hosts registered");

    let registry = Arc::new(DeviceRegistry::new(table));
    let mut identifiers: BTreeSet<Identifier> = virtual_host
        .iter()
        .flat_map(|host| host.identifiers().cloned())
        .collect();
    identifiers.extend(steps(config).flat_map(|step| step.targets.iter().cloned()));
    for identifier in &identifiers {
        bind(&registry, identifier)?;
    }
    tracing::info!(devices = registry.len(), "devices bound");

    let automations = Arc::new(InProcessAutomationHost::new());
    let mut runtime = AutomationRuntime::new(
        Arc::clone(&automations) as Arc<dyn AutomationHost>,
        scheduler,
    )
    .with_teardown_timeout(config.teardown_timeout());

    for scene in &config.scenes {
        let id = AutomationId::new(&scene.name);
        automations.set_enabled(&id, scene.enabled);
        let steps = scene.steps.iter().map(scene_step).collect();
        runtime = runtime.register(Arc::new(Scene::new(id, Arc::clone(&registry), steps)));
    }
    for schedule in &config.schedules {
        let id = AutomationId::new(&schedule.name);
        automations.set_enabled(&id, schedule.enabled);
        runtime = runtime.register(Arc::new(Schedule::new(
            id,
            Arc::clone(&registry),
            Duration::from_secs(schedule.period_secs),
            scene_step(&schedule.step),
        )));
    }
    tracing::info!(automations = runtime.len(), "automations registered");

    Ok(Controller {
        registry,
        automations,
        runtime,
        virtual_host,
    })
}

fn virtual_host(
    config: &VirtualConfig,
    scheduler: Arc<dyn Scheduler>,
) -> Result<VirtualHost, TrellisError> {
    let mut builder =
        VirtualHost::builder(scheduler).ack_delay(Duration::from_millis(config.ack_delay_ms));
    if config.demo_devices {
        builder = builder.demo_devices()?;
    }
    for device in &config.devices {
        builder = match device.clone() {
            VirtualDeviceConfig::Light { id, dimmable } => builder.light(
                id,
                LightState {
                    on: false,
                    brightness: dimmable.then_some(0),
                },
            ),
            VirtualDeviceConfig::Switch { id } => builder.switch(id, OnOffState { on: false }),
            VirtualDeviceConfig::Sensor { id, value, unit } => {
                builder.sensor(id, SensorReading { value, unit })
            }
            VirtualDeviceConfig::Cover { id, position } => builder.cover(
                id,
                CoverState {
                    position: position.min(100),
                    motion: CoverMotion::Stopped,
                },
            ),
            VirtualDeviceConfig::Lock { id, locked } => builder.lock(
                id,
                LockState {
                    status: if locked {
                        LockStatus::Locked
                    } else {
                        LockStatus::Unlocked
                    },
                },
            ),
        };
    }
    Ok(builder.build())
}

fn steps(config: &Config) -> impl Iterator<Item = &StepConfig> {
    config
        .scenes
        .iter()
        .flat_map(|scene| scene.steps.iter())
        .chain(config.schedules.iter().map(|schedule| &schedule.step))
}

fn scene_step(step: &StepConfig) -> SceneStep {
    SceneStep::new(step.command.clone(), step.targets.clone())
}

/// Bind `identifier` with the state shape its domain implies. Domains
/// without a dedicated shape are bound as raw attributes.
fn bind(registry: &DeviceRegistry, identifier: &Identifier) -> Result<(), ConfigurationError> {
    match identifier.domain() {
        "light" => log_states(&registry.bind::<LightState>(identifier)?),
        "switch" => log_states(&registry.bind::<OnOffState>(identifier)?),
        "cover" => log_states(&registry.bind::<CoverState>(identifier)?),
        "lock" => log_states(&registry.bind::<LockState>(identifier)?),
        "sensor" => log_states(&registry.bind::<SensorReading>(identifier)?),
        _ => log_states(&registry.bind::<Attributes>(identifier)?),
    }
    Ok(())
}

fn log_states<T: StateShape>(device: &Device<T>) {
    let mut states = device.subscribe();
    let identifier = device.identifier().clone();
    let host = device.host_name().to_string();
    tokio::spawn(async move {
        while let Some(state) = states.next().await {
            tracing::info!(
                %identifier,
                %host,
                persistent = state.is_persistent(),
                availability = %state.availability(),
                value = ?state.value(),
                "state changed"
            );
        }
    });
}

#[cfg(test)]
mod tests {
    use trellis_app::scheduler::TokioScheduler;
    use trellis_domain::command::Command;

    use super::*;
    use crate::config::{SceneConfig, ScheduleConfig};

    fn id(text: &str) -> Identifier {
        text.parse().unwrap()
    }

    fn scheduler() -> Arc<dyn Scheduler> {
        Arc::new(TokioScheduler)
    }

    #[tokio::test]
    async fn should_bind_demo_devices_when_default_config() {
        let controller = assemble(&Config::default(), scheduler()).unwrap();

        assert_eq!(controller.registry.len(), 3);
        assert!(controller.registry.contains(&id("light.virtual_light")));
        assert!(controller.registry.contains(&id("sensor.virtual_temperature")));
        assert!(controller.registry.contains(&id("switch.virtual_switch")));
        assert!(controller.runtime.is_empty());
    }

    #[tokio::test]
    async fn should_bind_configured_devices_with_their_shape() {
        let mut config = Config::default();
        config.virtual_host.demo_devices = false;
        config.virtual_host.devices = vec![
            VirtualDeviceConfig::Cover {
                id: id("cover.garage"),
                position: 100,
            },
            VirtualDeviceConfig::Lock {
                id: id("lock.front"),
                locked: true,
            },
        ];

        let controller = assemble(&config, scheduler()).unwrap();

        let cover = controller
            .registry
            .bind::<CoverState>(&id("cover.garage"))
            .unwrap();
        assert_eq!(cover.host_name(), "virtual");
        assert!(controller.registry.bind::<LockState>(&id("lock.front")).is_ok());
        assert_eq!(controller.registry.len(), 2);
    }

    #[tokio::test]
    async fn should_fail_when_scene_targets_unknown_device() {
        let mut config = Config::default();
        config.scenes.push(SceneConfig {
            name: "evening".to_string(),
            enabled: true,
            steps: vec![StepConfig {
                command: Command::TurnOn,
                targets: vec![id("light.nowhere")],
            }],
        });

        let err = assemble(&config, scheduler()).err().unwrap();
        assert!(matches!(err, TrellisError::Configuration(_)));
    }

    #[tokio::test]
    async fn should_register_automations_with_their_enabled_flag() {
        let mut config = Config::default();
        config.scenes.push(SceneConfig {
            name: "evening".to_string(),
            enabled: false,
            steps: vec![StepConfig {
                command: Command::TurnOn,
                targets: vec![id("light.virtual_light")],
            }],
        });
        config.schedules.push(ScheduleConfig {
            name: "pump".to_string(),
            enabled: true,
            period_secs: 60,
            step: StepConfig {
                command: Command::Toggle,
                targets: vec![id("switch.virtual_switch")],
            },
        });

        let controller = assemble(&config, scheduler()).unwrap();

        assert_eq!(controller.runtime.len(), 2);
        assert!(!controller.automations.is_enabled_now(&AutomationId::new("evening")));
        assert!(controller.automations.is_enabled_now(&AutomationId::new("pump")));
    }

    #[tokio::test]
    async fn should_register_no_host_when_virtual_disabled() {
        let mut config = Config::default();
        config.virtual_host.enabled = false;

        let controller = assemble(&config, scheduler()).unwrap();

        assert!(controller.virtual_host.is_none());
        assert!(controller.registry.is_empty());
        assert!(controller.registry.table().is_empty());
    }
}
