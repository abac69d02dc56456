pub mod command;
pub mod control;
pub mod poller;
pub mod scheduler;

use anyhow::Result;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{info, warn};
use validator::Validate;

use crate::config::{Config, ConfigError};
use crate::domain::{
    Actuator, Camera, CommandResult, DataPublisher, PeripheralData, SimulatedHeater,
    SimulatedSensor, UniformNoiseGenerator,
};
use crate::simulation::{EnvironmentHandle, SimulationLoop};

pub use command::CommandController;
pub use control::{ControlError, ControlManager, ControlToken};
pub use poller::{Aggregator, SensorPoller};
pub use scheduler::{
    clock_for, Clock, CommandScheduler, ManualClock, SchedulerConfig, SimulatedClock, SystemClock,
    TaskStatus,
};

#[derive(Debug, Error)]
pub enum KitError {
    #[error("Unknown actuator: {0}")]
    UnknownActuator(String),
    #[error("No camera configured")]
    NoCamera,
}

/// The assembled kit: environment, peripherals and the control token they
/// share.
pub struct Kit {
    simulation: SimulationLoop,
    env: EnvironmentHandle,
    control: ControlManager,
    actuators: HashMap<String, Arc<dyn Actuator>>,
    initial_heat: Vec<(String, f64)>,
    pollers: Vec<SensorPoller>,
    camera: Option<CommandController>,
    camera_scheduler: Option<CommandScheduler>,
}

impl Kit {
    /// Build every peripheral named in `config`. Peripheral data is delivered
    /// on the returned receiver.
    pub fn build(config: &Config) -> Result<(Self, UnboundedReceiver<PeripheralData>)> {
        // configs assembled in code never went through `Config::load`
        config.validate().map_err(ConfigError::Invalid)?;
        let simulation =
            SimulationLoop::new(&config.simulation.environment(), config.simulation.cadence());
        let env = simulation.handle();
        let control = ControlManager::new();
        let (publisher, rx) = DataPublisher::channel();

        let mut pollers = Vec::with_capacity(config.sensors.len());
        for sensor_cfg in &config.sensors {
            let intervals = sensor_cfg.configuration.intervals(&sensor_cfg.name)?;
            let mut sensor = SimulatedSensor::new(
                &sensor_cfg.name,
                sensor_cfg.kind,
                Duration::from_millis(sensor_cfg.sleep_ms),
                env.clone(),
            );
            if let Some(seed) = sensor_cfg.seed {
                sensor = sensor.with_seed(seed);
            }
            pollers.push(SensorPoller::new(Arc::new(sensor), intervals, publisher.clone()));
        }

        let mut actuators: HashMap<String, Arc<dyn Actuator>> = HashMap::new();
        let mut initial_heat = Vec::new();
        for heater_cfg in &config.actuators {
            let heater = SimulatedHeater::new(&heater_cfg.name, heater_cfg.full_wattage, env.clone());
            actuators.insert(heater_cfg.name.clone(), Arc::new(heater));
            if let Some(percent) = heater_cfg.initial_heat {
                initial_heat.push((heater_cfg.name.clone(), percent));
            }
        }

        let (camera, camera_scheduler) = match &config.camera {
            Some(camera_cfg) => {
                let entries = camera_cfg.configuration.schedule(&camera_cfg.name)?.to_vec();
                let handler = Camera::new(
                    &camera_cfg.name,
                    Arc::new(UniformNoiseGenerator::default()),
                    publisher.clone(),
                );
                let controller = CommandController::new(
                    Arc::new(handler),
                    control.clone(),
                    Duration::from_secs_f64(camera_cfg.command_timeout_s),
                );
                let scheduler = CommandScheduler::new(
                    entries,
                    clock_for(camera_cfg.clock, &env, &config.simulation.cadence()),
                    SchedulerConfig {
                        max_idle: Duration::from_secs_f64(camera_cfg.max_idle_s),
                        poll_floor: Duration::from_millis(camera_cfg.poll_floor_ms),
                    },
                );
                (Some(controller), Some(scheduler))
            }
            None => (None, None),
        };

        info!(
            sensors = pollers.len(),
            actuators = actuators.len(),
            camera = camera.is_some(),
            "kit assembled"
        );

        let kit = Self {
            simulation,
            env,
            control,
            actuators,
            initial_heat,
            pollers,
            camera,
            camera_scheduler,
        };
        Ok((kit, rx))
    }

    pub fn environment(&self) -> EnvironmentHandle {
        self.env.clone()
    }

    pub fn control(&self) -> &ControlManager {
        &self.control
    }

    pub fn actuator(&self, name: &str) -> Option<Arc<dyn Actuator>> {
        self.actuators.get(name).cloned()
    }

    pub fn camera(&self) -> Option<&CommandController> {
        self.camera.as_ref()
    }

    /// Send `command` to the named actuator while holding control.
    pub async fn actuate(&self, name: &str, command: &Value) -> Result<()> {
        let actuator = self
            .actuator(name)
            .ok_or_else(|| KitError::UnknownActuator(name.to_string()))?;
        self.control
            .with_control(name, actuator.execute(command))
            .await??;
        Ok(())
    }

    /// Run a camera command now, outside the schedule.
    pub async fn capture(&self, command: Value) -> Result<CommandResult> {
        let camera = self.camera.as_ref().ok_or(KitError::NoCamera)?;
        Ok(camera.execute(command).await)
    }

    /// Apply initial actuator settings, start the simulation thread and spawn
    /// sensor polling and the camera schedule. Pollers and the schedule are
    /// handed out on the first call only.
    pub async fn start(&mut self, cancel: CancellationToken) -> Result<TaskTracker> {
        for (name, percent) in std::mem::take(&mut self.initial_heat) {
            self.actuate(&name, &SimulatedHeater::heat_command(percent))
                .await?;
        }

        if self.simulation.start()?.is_none() {
            warn!("simulation loop was already running");
        }

        let tracker = TaskTracker::new();
        for poller in self.pollers.drain(..) {
            tracker.spawn(poller.run(cancel.clone()));
        }
        if let (Some(camera), Some(scheduler)) = (&self.camera, self.camera_scheduler.take()) {
            tracker.spawn(camera.clone().run(scheduler, cancel.clone()));
        }
        tracker.close();
        info!(tasks = tracker.len(), "kit started");
        Ok(tracker)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const CONFIG: &str = r#"
        [simulation]
        ambient_profile = "constant"

        [[actuators]]
        name = "heater-1"
        full_wattage = 10.0
        initial_heat = 50.0

        [camera]
        name = "camera"
        configuration = { schedule = [] }
    "#;

    #[test]
    fn test_build_rejects_unvalidated_config() {
        let mut config = Config::from_toml_str(CONFIG).unwrap();
        if let Some(camera) = config.camera.as_mut() {
            camera.max_idle_s = f64::INFINITY;
        }
        let err = Kit::build(&config).err().unwrap();
        assert!(matches!(
            err.downcast_ref::<ConfigError>(),
            Some(ConfigError::Invalid(_))
        ));

        let mut config = Config::from_toml_str(CONFIG).unwrap();
        config.simulation.dtime_s = 1e-12;
        assert!(Kit::build(&config).is_err());
    }

    #[tokio::test]
    async fn test_actuate_unknown_actuator() {
        let config = Config::from_toml_str(CONFIG).unwrap();
        let (kit, _rx) = Kit::build(&config).unwrap();
        let err = kit.actuate("fan", &json!({"heat": 10})).await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<KitError>(),
            Some(KitError::UnknownActuator(name)) if name == "fan"
        ));
    }

    #[tokio::test]
    async fn test_actuate_holds_control_and_writes_contribution() {
        let config = Config::from_toml_str(CONFIG).unwrap();
        let (kit, _rx) = Kit::build(&config).unwrap();
        kit.actuate("heater-1", &json!({"heat": 20})).await.unwrap();
        assert_eq!(kit.environment().heat_contribution("heater-1"), Some(2.0));
        assert!(!kit.control().is_held());
    }

    #[test]
    fn test_missing_sensor_intervals_fail_build() {
        let raw = format!(
            "{CONFIG}\n[[sensors]]\nname = \"t\"\nkind = \"temperature\"\nconfiguration = {{}}\n"
        );
        let config = Config::from_toml_str(&raw).unwrap();
        assert!(Kit::build(&config).is_err());
    }
}
