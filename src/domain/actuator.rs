use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

use crate::simulation::EnvironmentHandle;

/// Actuator-specific errors
#[derive(Debug, Error, PartialEq)]
pub enum ActuatorError {
    #[error("Invalid value for '{field}': {value}")]
    InvalidValue { field: &'static str, value: String },
    #[error("'{field}' out of range [0, 100]: {value}")]
    OutOfRange { field: &'static str, value: f64 },
}

#[async_trait]
pub trait Actuator: Send + Sync {
    fn name(&self) -> &str;
    /// Apply a command mapping. Unrecognised or absent fields are ignored.
    async fn execute(&self, command: &Value) -> Result<()>;
}

/// Resistive heater injecting a fraction of its full wattage into the kit
#[derive(Debug, Clone)]
pub struct SimulatedHeater {
    name: String,
    full_wattage: f64,
    env: EnvironmentHandle,
}

impl SimulatedHeater {
    pub const HEAT_FIELD: &'static str = "heat";

    pub fn new(name: impl Into<String>, full_wattage: f64, env: EnvironmentHandle) -> Self {
        Self {
            name: name.into(),
            full_wattage,
            env,
        }
    }

    /// Command setting the heater to `percent` of full power
    pub fn heat_command(percent: f64) -> Value {
        serde_json::json!({ "heat": percent })
    }

    pub fn full_wattage(&self) -> f64 {
        self.full_wattage
    }

    /// Percentage requested by the command, if the command carries one
    fn requested_percent(command: &Value) -> Result<Option<f64>, ActuatorError> {
        let Some(raw) = command.get(Self::HEAT_FIELD) else {
            return Ok(None);
        };
        let percent = raw.as_f64().ok_or_else(|| ActuatorError::InvalidValue {
            field: Self::HEAT_FIELD,
            value: raw.to_string(),
        })?;
        if !(0.0..=100.0).contains(&percent) {
            return Err(ActuatorError::OutOfRange {
                field: Self::HEAT_FIELD,
                value: percent,
            });
        }
        Ok(Some(percent))
    }
}

#[async_trait]
impl Actuator for SimulatedHeater {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, command: &Value) -> Result<()> {
        let Some(percent) = Self::requested_percent(command)? else {
            debug!(actuator = %self.name, %command, "no recognised fields, ignoring");
            return Ok(());
        };

        let wattage = self.full_wattage * percent / 100.0;
        self.env.write_contribution(&self.name, wattage);
        debug!(actuator = %self.name, percent, wattage, "heater set");
        Ok(())
    }
}
