//! Configuration loading — TOML file with environment variable overrides.
//!
//! Looks for `trellis.toml` in the working directory, or at the path given
//! by `TRELLIS_CONFIG`. Every field has a sensible default so the file is
//! optional. Environment variables take precedence over file values.
//!
//! ```toml
//! [logging]
//! filter = "info"
//!
//! [runtime]
//! teardown_timeout_secs = 30
//!
//! [virtual]
//! ack_delay_ms = 250
//!
//! [[virtual.devices]]
//! kind = "cover"
//! id = "cover.garage"
//!
//! [[scenes]]
//! name = "evening"
//! enabled = true
//!
//! [[scenes.steps]]
//! command = "set_brightness"
//! brightness = 40
//! targets = ["light.virtual_light"]
//!
//! [[schedules]]
//! name = "pump"
//! period_secs = 900
//! command = "toggle"
//! targets = ["switch.virtual_switch"]
//! ```

use std::collections::HashSet;
use std::time::Duration;

use serde::Deserialize;

use trellis_domain::command::Command;
use trellis_domain::identifier::Identifier;

const DEFAULT_PATH: &str = "trellis.toml";

/// Top-level configuration.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Logging settings.
    pub logging: LoggingConfig,
    /// Automation runtime settings.
    pub runtime: RuntimeConfig,
    /// Simulated devices.
    #[serde(rename = "virtual")]
    pub virtual_host: VirtualConfig,
    /// Scenes, applied once when enabled.
    pub scenes: Vec<SceneConfig>,
    /// Periodic commands.
    pub schedules: Vec<ScheduleConfig>,
}

/// Logging configuration.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter directive (`RUST_LOG` syntax).
    pub filter: String,
}

/// Automation runtime configuration.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// How long disabling an automation waits for in-flight commands to
    /// compensate.
    pub teardown_timeout_secs: u64,
}

/// Virtual host configuration.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct VirtualConfig {
    /// Register the virtual host at all.
    pub enabled: bool,
    /// Include the three demo devices.
    pub demo_devices: bool,
    /// Delay before simulated devices acknowledge a command.
    pub ack_delay_ms: u64,
    /// Additional simulated devices.
    pub devices: Vec<VirtualDeviceConfig>,
}

/// One simulated device and its initial state.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum VirtualDeviceConfig {
    Light {
        id: Identifier,
        #[serde(default)]
        dimmable: bool,
    },
    Switch {
        id: Identifier,
    },
    Sensor {
        id: Identifier,
        #[serde(default)]
        value: f64,
        #[serde(default)]
        unit: Option<String>,
    },
    Cover {
        id: Identifier,
        #[serde(default)]
        position: u8,
    },
    Lock {
        id: Identifier,
        #[serde(default)]
        locked: bool,
    },
}

impl VirtualDeviceConfig {
    #[must_use]
    pub fn id(&self) -> &Identifier {
        match self {
            Self::Light { id, .. }
            | Self::Switch { id }
            | Self::Sensor { id, .. }
            | Self::Cover { id, .. }
            | Self::Lock { id, .. } => id,
        }
    }
}

/// A command sent to a list of devices.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct StepConfig {
    #[serde(flatten)]
    pub command: Command,
    pub targets: Vec<Identifier>,
}

/// A scene: steps applied in order when enabled.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SceneConfig {
    pub name: String,
    #[serde(default)]
    pub enabled: bool,
    pub steps: Vec<StepConfig>,
}

/// A schedule: one step repeated every period while enabled.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ScheduleConfig {
    pub name: String,
    #[serde(default = "enabled_by_default")]
    pub enabled: bool,
    pub period_secs: u64,
    #[serde(flatten)]
    pub step: StepConfig,
}

fn enabled_by_default() -> bool {
    true
}

impl Config {
    /// Load configuration from `trellis.toml` (or `TRELLIS_CONFIG`), then
    /// apply environment-variable overrides and validate.
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML file exists but is malformed, if an
    /// override is malformed, or if validation fails.
    pub fn load() -> Result<Self, ConfigError> {
        let path = std::env::var("TRELLIS_CONFIG").unwrap_or_else(|_| DEFAULT_PATH.to_string());
        let mut config = Self::from_file(&path)?;
        config.apply_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    fn from_file(path: &str) -> Result<Self, ConfigError> {
        match std::fs::read_to_string(path) {
            Ok(content) => toml::from_str(&content).map_err(ConfigError::Parse),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(err) => Err(ConfigError::Io(err)),
        }
    }

    fn apply_overrides(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        if let Some(val) = lookup("TRELLIS_LOG") {
            self.logging.filter = val;
        }
        if let Some(val) = lookup("RUST_LOG") {
            self.logging.filter = val;
        }
        if let Some(val) = lookup("TRELLIS_TEARDOWN_TIMEOUT_SECS") {
            self.runtime.teardown_timeout_secs = val.parse().map_err(|_| {
                ConfigError::Validation(format!(
                    "TRELLIS_TEARDOWN_TIMEOUT_SECS must be a number of seconds, got `{val}`"
                ))
            })?;
        }
        Ok(())
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.runtime.teardown_timeout_secs == 0 {
            return Err(ConfigError::Validation(
                "teardown timeout must be non-zero".to_string(),
            ));
        }

        let mut devices = HashSet::new();
        for device in &self.virtual_host.devices {
            if !devices.insert(device.id()) {
                return Err(ConfigError::Validation(format!(
                    "virtual device {} declared twice",
                    device.id()
                )));
            }
        }

        let mut names = HashSet::new();
        let steps = self
            .scenes
            .iter()
            .map(|scene| (&scene.name, scene.steps.iter().collect::<Vec<_>>()))
            .chain(
                self.schedules
                    .iter()
                    .map(|schedule| (&schedule.name, vec![&schedule.step])),
            );
        for (name, steps) in steps {
            if !names.insert(name) {
                return Err(ConfigError::Validation(format!(
                    "automation `{name}` declared twice"
                )));
            }
            if steps.is_empty() || steps.iter().any(|step| step.targets.is_empty()) {
                return Err(ConfigError::Validation(format!(
                    "automation `{name}` has a step without targets"
                )));
            }
        }

        if let Some(schedule) = self.schedules.iter().find(|s| s.period_secs == 0) {
            return Err(ConfigError::Validation(format!(
                "schedule `{}` must have a non-zero period",
                schedule.name
            )));
        }
        Ok(())
    }

    #[must_use]
    pub fn teardown_timeout(&self) -> Duration {
        Duration::from_secs(self.runtime.teardown_timeout_secs)
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "trellisd=info,trellis_app=info,trellis_adapter_virtual=info".to_string(),
        }
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            teardown_timeout_secs: 30,
        }
    }
}

impl Default for VirtualConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            demo_devices: true,
            ack_delay_ms: 250,
            devices: Vec::new(),
        }
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// TOML parse failure.
    #[error("failed to parse config file")]
    Parse(#[from] toml::de::Error),
    /// File I/O failure.
    #[error("failed to read config file")]
    Io(#[from] std::io::Error),
    /// Semantic validation failure.
    #[error("invalid configuration: {0}")]
    Validation(String),
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn should_produce_sensible_defaults() {
        let config = Config::default();
        assert_eq!(config.teardown_timeout(), Duration::from_secs(30));
        assert!(config.virtual_host.enabled);
        assert!(config.virtual_host.demo_devices);
        assert!(config.scenes.is_empty());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn should_parse_minimal_toml() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.virtual_host.ack_delay_ms, 250);
    }

    #[test]
    fn should_parse_full_toml() {
        let toml = r#"
            [logging]
            filter = "debug"

            [runtime]
            teardown_timeout_secs = 5

            [virtual]
            demo_devices = false
            ack_delay_ms = 10

            [[virtual.devices]]
            kind = "light"
            id = "light.kitchen"
            dimmable = true

            [[virtual.devices]]
            kind = "sensor"
            id = "sensor.lux"
            value = 120.0
            unit = "lx"

            [[scenes]]
            name = "evening"
            enabled = true

            [[scenes.steps]]
            command = "set_brightness"
            brightness = 40
            targets = ["light.kitchen"]

            [[schedules]]
            name = "blink"
            period_secs = 60
            command = "toggle"
            targets = ["light.kitchen"]
        "#;
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.logging.filter, "debug");
        assert_eq!(config.teardown_timeout(), Duration::from_secs(5));
        assert!(!config.virtual_host.demo_devices);
        assert_eq!(
            config.virtual_host.devices[0],
            VirtualDeviceConfig::Light {
                id: "light.kitchen".parse().unwrap(),
                dimmable: true,
            }
        );
        assert_eq!(
            config.scenes[0].steps[0].command,
            Command::SetBrightness { brightness: 40 }
        );
        assert!(config.schedules[0].enabled);
        assert_eq!(config.schedules[0].step.command, Command::Toggle);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn should_return_default_when_file_not_found() {
        let config = Config::from_file("nonexistent.toml").unwrap();
        assert!(config.virtual_host.enabled);
    }

    #[test]
    fn should_reject_malformed_identifier() {
        let toml = r#"
            [[virtual.devices]]
            kind = "switch"
            id = "no-dot"
        "#;
        assert!(toml::from_str::<Config>(toml).is_err());
    }

    #[test]
    fn should_apply_environment_overrides_with_rust_log_last() {
        let mut config = Config::default();
        config
            .apply_overrides(env(&[
                ("TRELLIS_LOG", "warn"),
                ("RUST_LOG", "trace"),
                ("TRELLIS_TEARDOWN_TIMEOUT_SECS", "3"),
            ]))
            .unwrap();
        assert_eq!(config.logging.filter, "trace");
        assert_eq!(config.teardown_timeout(), Duration::from_secs(3));
    }

    #[test]
    fn should_reject_non_numeric_teardown_override() {
        let mut config = Config::default();
        let err = config
            .apply_overrides(env(&[("TRELLIS_TEARDOWN_TIMEOUT_SECS", "soon")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::Validation(_)));
    }

    #[test]
    fn should_reject_zero_teardown_timeout() {
        let mut config = Config::default();
        config.runtime.teardown_timeout_secs = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn should_reject_duplicate_automation_names() {
        let toml = r#"
            [[scenes]]
            name = "same"
            [[scenes.steps]]
            command = "turn_on"
            targets = ["switch.a"]

            [[schedules]]
            name = "same"
            period_secs = 10
            command = "turn_off"
            targets = ["switch.a"]
        "#;
        let config: Config = toml::from_str(toml).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn should_reject_step_without_targets() {
        let toml = r#"
            [[scenes]]
            name = "empty"
            [[scenes.steps]]
            command = "turn_on"
            targets = []
        "#;
        let config: Config = toml::from_str(toml).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn should_reject_zero_schedule_period() {
        let toml = r#"
            [[schedules]]
            name = "busy"
            period_secs = 0
            command = "toggle"
            targets = ["switch.a"]
        "#;
        let config: Config = toml::from_str(toml).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn should_reject_duplicate_virtual_devices() {
        let toml = r#"
            [[virtual.devices]]
            kind = "switch"
            id = "switch.a"
            [[virtual.devices]]
            kind = "lock"
            id = "switch.a"
        "#;
        let config: Config = toml::from_str(toml).unwrap();
        assert!(config.validate().is_err());
    }
}
