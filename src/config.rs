use chrono::NaiveDateTime;
use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use std::time::Duration;
use thiserror::Error;
use validator::{Validate, ValidationError};

use crate::domain::{ScheduleEntry, SensorKind};
use crate::simulation::{AmbientProfile, EnvironmentConfig, SimulationLoopConfig};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    Load(#[from] figment::Error),
    #[error("Malformed peripheral configuration: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(#[from] validator::ValidationErrors),
    #[error("Peripheral '{peripheral}' is missing '{field}'")]
    Missing {
        peripheral: String,
        field: &'static str,
    },
    #[error("Duplicate peripheral name: {0}")]
    DuplicateName(String),
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct Config {
    #[serde(default)]
    #[validate(nested)]
    pub simulation: SimulationConfig,
    #[serde(default)]
    #[validate(nested)]
    pub sensors: Vec<SensorConfig>,
    #[serde(default)]
    #[validate(nested)]
    pub actuators: Vec<HeaterConfig>,
    #[validate(nested)]
    pub camera: Option<CameraConfig>,
}

#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(default)]
pub struct SimulationConfig {
    #[validate(range(min = 1))]
    pub step_interval_ms: u64,
    /// At least a millisecond; the clock advances in whole nanoseconds
    #[validate(range(min = 0.001, max = 3600.0), custom(function = "finite"))]
    pub dtime_s: f64,
    pub start_time: NaiveDateTime,
    pub ambient_profile: AmbientProfile,
    #[validate(range(min = -273.15, max = 1000.0), custom(function = "finite"))]
    pub ambient_temperature: f64,
    #[validate(range(min = 0.0, max = 10000.0), custom(function = "finite"))]
    pub ambient_pressure: f64,
    #[validate(range(min = 0.0, max = 1.0), custom(function = "finite"))]
    pub ambient_specific_humidity: f64,
    #[validate(range(min = -273.15, max = 1000.0), custom(function = "finite"))]
    pub kit_temperature: f64,
    #[validate(range(min = 0.0, max = 10000.0), custom(function = "finite"))]
    pub kit_pressure: f64,
    #[validate(range(min = 0.0, max = 1.0), custom(function = "finite"))]
    pub kit_specific_humidity: f64,
    #[validate(range(min = 1))]
    pub max_consecutive_faults: u32,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        let env = EnvironmentConfig::default();
        let cadence = SimulationLoopConfig::default();
        Self {
            step_interval_ms: cadence.step_interval.as_millis() as u64,
            dtime_s: cadence.dtime_s,
            start_time: env.start_time,
            ambient_profile: env.ambient_profile,
            ambient_temperature: env.ambient_temperature,
            ambient_pressure: env.ambient_pressure,
            ambient_specific_humidity: env.ambient_specific_humidity,
            kit_temperature: env.kit_temperature,
            kit_pressure: env.kit_pressure,
            kit_specific_humidity: env.kit_specific_humidity,
            max_consecutive_faults: cadence.max_consecutive_faults,
        }
    }
}

impl SimulationConfig {
    pub fn environment(&self) -> EnvironmentConfig {
        EnvironmentConfig {
            start_time: self.start_time,
            ambient_profile: self.ambient_profile,
            ambient_temperature: self.ambient_temperature,
            ambient_pressure: self.ambient_pressure,
            ambient_specific_humidity: self.ambient_specific_humidity,
            kit_temperature: self.kit_temperature,
            kit_pressure: self.kit_pressure,
            kit_specific_humidity: self.kit_specific_humidity,
        }
    }

    pub fn cadence(&self) -> SimulationLoopConfig {
        SimulationLoopConfig {
            step_interval: Duration::from_millis(self.step_interval_ms),
            dtime_s: self.dtime_s,
            max_consecutive_faults: self.max_consecutive_faults,
        }
    }
}

/// Polling and aggregation cadence of a sensor, in seconds
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Validate, PartialEq)]
pub struct Intervals {
    #[serde(rename = "measurementInterval")]
    #[validate(range(min = 0.001, max = 604800.0), custom(function = "finite"))]
    pub measurement_interval: f64,
    #[serde(rename = "aggregateInterval")]
    #[validate(range(min = 0.001, max = 604800.0), custom(function = "finite"))]
    pub aggregate_interval: f64,
}

impl Intervals {
    pub fn measurement(&self) -> Duration {
        Duration::from_secs_f64(self.measurement_interval)
    }

    pub fn aggregate(&self) -> Duration {
        Duration::from_secs_f64(self.aggregate_interval)
    }
}

/// The mapping a peripheral is constructed with. Unknown keys are ignored.
#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate, PartialEq)]
pub struct PeripheralConfiguration {
    pub schedule: Option<Vec<ScheduleEntry>>,
    #[validate(nested)]
    pub intervals: Option<Intervals>,
}

impl PeripheralConfiguration {
    pub fn from_value(value: Value) -> Result<Self, ConfigError> {
        let configuration: Self = serde_json::from_value(value)?;
        configuration.validate()?;
        Ok(configuration)
    }

    pub fn schedule(&self, peripheral: &str) -> Result<&[ScheduleEntry], ConfigError> {
        self.schedule
            .as_deref()
            .ok_or_else(|| ConfigError::Missing {
                peripheral: peripheral.to_string(),
                field: "schedule",
            })
    }

    pub fn intervals(&self, peripheral: &str) -> Result<Intervals, ConfigError> {
        self.intervals.ok_or_else(|| ConfigError::Missing {
            peripheral: peripheral.to_string(),
            field: "intervals",
        })
    }
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct SensorConfig {
    pub name: String,
    pub kind: SensorKind,
    /// Simulated acquisition latency
    #[serde(default)]
    pub sleep_ms: u64,
    pub seed: Option<u64>,
    #[validate(nested)]
    pub configuration: PeripheralConfiguration,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct HeaterConfig {
    pub name: String,
    #[validate(range(min = 0.0, max = 100000.0), custom(function = "finite"))]
    pub full_wattage: f64,
    /// `heat` percentage applied once at startup
    #[validate(range(min = 0.0, max = 100.0), custom(function = "finite"))]
    pub initial_heat: Option<f64>,
}

/// Which clock the command scheduler reads its time of day from
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ClockKind {
    #[default]
    System,
    Simulated,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CameraConfig {
    pub name: String,
    #[serde(default)]
    pub clock: ClockKind,
    #[serde(default = "default_command_timeout_s")]
    #[validate(range(min = 0.001, max = 86400.0), custom(function = "finite"))]
    pub command_timeout_s: f64,
    #[serde(default = "default_max_idle_s")]
    #[validate(range(min = 0.001, max = 86400.0), custom(function = "finite"))]
    pub max_idle_s: f64,
    #[serde(default = "default_poll_floor_ms")]
    #[validate(range(min = 1, max = 60000))]
    pub poll_floor_ms: u64,
    #[validate(nested)]
    pub configuration: PeripheralConfiguration,
}

/// NaN slips through range checks, so every float is also checked here
fn finite<T: std::borrow::Borrow<f64>>(value: T) -> Result<(), ValidationError> {
    if value.borrow().is_finite() {
        Ok(())
    } else {
        Err(ValidationError::new("not_finite"))
    }
}

fn default_command_timeout_s() -> f64 {
    60.0
}

fn default_max_idle_s() -> f64 {
    60.0
}

fn default_poll_floor_ms() -> u64 {
    100
}

impl Config {
    pub fn load() -> Result<Self, ConfigError> {
        let figment = Figment::new()
            .merge(Toml::file("config/default.toml"))
            .merge(Env::prefixed("KIT__").split("__"));
        Self::from_figment(figment)
    }

    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        Self::from_figment(Figment::new().merge(Toml::string(raw)))
    }

    fn from_figment(figment: Figment) -> Result<Self, ConfigError> {
        let config: Self = figment.extract()?;
        config.validate()?;
        config.check_names()?;
        Ok(config)
    }

    /// Peripheral names double as actuator identities and must be unique
    fn check_names(&self) -> Result<(), ConfigError> {
        let mut seen = HashSet::new();
        let names = self
            .sensors
            .iter()
            .map(|s| &s.name)
            .chain(self.actuators.iter().map(|a| &a.name))
            .chain(self.camera.iter().map(|c| &c.name));
        for name in names {
            if !seen.insert(name) {
                return Err(ConfigError::DuplicateName(name.clone()));
            }
        }
        Ok(())
    }
}
