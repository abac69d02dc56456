//! Synchronized access to the kit environment.
//!
//! Every read and write takes the same lock the simulation loop holds for the
//! duration of one step, so readers never see a half-applied step and a
//! contribution written between steps is picked up by exactly the next one.

use chrono::NaiveDateTime;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

use super::environment::{EnvironmentConfig, EnvironmentState, SimulationFault};

/// Derived quantities observed at one instant
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EnvironmentSnapshot {
    pub simulated_clock: NaiveDateTime,
    pub ambient_temperature: f64,
    pub ambient_pressure: f64,
    pub ambient_specific_humidity: f64,
    pub kit_temperature: f64,
    pub kit_pressure: f64,
    pub kit_specific_humidity: f64,
    /// Fraction of saturation
    pub kit_relative_humidity: f64,
    pub total_heating_w: f64,
}

impl From<&EnvironmentState> for EnvironmentSnapshot {
    fn from(state: &EnvironmentState) -> Self {
        Self {
            simulated_clock: state.simulated_clock,
            ambient_temperature: state.ambient_temperature,
            ambient_pressure: state.ambient_pressure,
            ambient_specific_humidity: state.ambient_specific_humidity,
            kit_temperature: state.kit_temperature,
            kit_pressure: state.kit_pressure,
            kit_specific_humidity: state.kit_specific_humidity,
            kit_relative_humidity: state.kit_relative_humidity(),
            total_heating_w: state.total_heating_w(),
        }
    }
}

/// Shared ownership of the one environment instance.
///
/// Only the simulation loop and [`EnvironmentHandle`] hold one of these.
#[derive(Clone)]
pub(crate) struct SharedEnvironment {
    inner: Arc<Mutex<EnvironmentState>>,
}

impl SharedEnvironment {
    pub(crate) fn new(state: EnvironmentState) -> Self {
        Self {
            inner: Arc::new(Mutex::new(state)),
        }
    }

    /// Run one step under the lock. A failed step leaves the state untouched.
    pub(crate) fn step(&self, dtime: f64) -> Result<NaiveDateTime, SimulationFault> {
        let mut state = self.inner.lock();
        let mut next = state.clone();
        next.step(dtime)?;
        *state = next;
        Ok(state.simulated_clock)
    }

    pub(crate) fn handle(&self) -> EnvironmentHandle {
        EnvironmentHandle {
            shared: self.clone(),
        }
    }
}

/// Read/write facade handed to sensors, actuators and clocks
#[derive(Clone)]
pub struct EnvironmentHandle {
    shared: SharedEnvironment,
}

impl std::fmt::Debug for EnvironmentHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EnvironmentHandle").finish_non_exhaustive()
    }
}

impl EnvironmentHandle {
    pub fn read(&self) -> EnvironmentSnapshot {
        EnvironmentSnapshot::from(&*self.shared.inner.lock())
    }

    pub fn simulated_clock(&self) -> NaiveDateTime {
        self.shared.inner.lock().simulated_clock
    }

    /// Last-write-wins per actuator identity
    pub fn write_contribution(&self, actuator: &str, wattage: f64) {
        self.shared.inner.lock().set_heat_contribution(actuator, wattage);
    }

    pub fn heat_contribution(&self, actuator: &str) -> Option<f64> {
        self.shared.inner.lock().heat_contributions.get(actuator).copied()
    }

    pub fn heat_contributions(&self) -> BTreeMap<String, f64> {
        self.shared.inner.lock().heat_contributions.clone()
    }
}

/// An environment advanced by explicit calls instead of a
/// [`SimulationLoop`](super::SimulationLoop).
///
/// Like the loop, it is the sole stepper of its environment; the handles it
/// gives out can read and write contributions but never step.
pub struct ManualEnvironment {
    shared: SharedEnvironment,
}

impl ManualEnvironment {
    pub fn new(config: &EnvironmentConfig) -> Self {
        Self {
            shared: SharedEnvironment::new(EnvironmentState::new(config)),
        }
    }

    pub fn handle(&self) -> EnvironmentHandle {
        self.shared.handle()
    }

    /// Advance one step; returns the new simulated clock.
    pub fn step(&mut self, dtime: f64) -> Result<NaiveDateTime, SimulationFault> {
        self.shared.step(dtime)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulation::environment::heating_rate;
    use std::thread;

    #[test]
    fn test_write_visible_to_next_step() {
        let mut env = ManualEnvironment::new(
            &EnvironmentConfig::default()
                .with_constant_ambient()
                .with_temperatures(20.0, 20.0),
        );
        let handle = env.handle();
        handle.write_contribution("heater-1", 10.0);
        assert_eq!(handle.read().kit_temperature, 20.0);

        env.step(1.0).unwrap();
        let snapshot = handle.read();
        assert!((snapshot.kit_temperature - (20.0 + heating_rate(10.0))).abs() < 1e-12);
        assert_eq!(snapshot.total_heating_w, 10.0);
    }

    #[test]
    fn test_last_write_wins() {
        let handle = ManualEnvironment::new(&EnvironmentConfig::default()).handle();
        handle.write_contribution("heater-1", 10.0);
        handle.write_contribution("heater-1", 3.0);
        handle.write_contribution("heater-2", 1.0);
        assert_eq!(handle.heat_contribution("heater-1"), Some(3.0));
        assert_eq!(handle.heat_contribution("fan"), None);
        assert_eq!(handle.read().total_heating_w, 4.0);
    }

    #[test]
    fn test_failed_step_leaves_state_untouched() {
        let mut env = ManualEnvironment::new(&EnvironmentConfig::default());
        let handle = env.handle();
        let before = handle.read();
        handle.write_contribution("broken", f64::NAN);
        assert!(env.step(1.0).is_err());
        let after = handle.read();
        assert_eq!(after.simulated_clock, before.simulated_clock);
        assert_eq!(after.kit_temperature, before.kit_temperature);
    }

    #[test]
    fn test_concurrent_readers_never_see_torn_state() {
        let mut env = ManualEnvironment::new(&EnvironmentConfig::default());
        let handle = env.handle();
        env.step(1.0).unwrap();
        let start = handle.simulated_clock();

        let stepper = thread::spawn(move || {
            for _ in 0..2_000 {
                env.step(1.0).unwrap();
            }
        });

        let readers: Vec<_> = (0..4)
            .map(|_| {
                let handle = handle.clone();
                thread::spawn(move || {
                    for _ in 0..2_000 {
                        let snapshot = handle.read();
                        // kit humidity is copied from ambient at the end of every step
                        assert_eq!(
                            snapshot.kit_specific_humidity,
                            snapshot.ambient_specific_humidity
                        );
                        assert!(snapshot.simulated_clock >= start);
                    }
                })
            })
            .collect();

        stepper.join().unwrap();
        for reader in readers {
            reader.join().unwrap();
        }
        assert_eq!(
            handle.simulated_clock() - start,
            chrono::Duration::seconds(2_000)
        );
    }

    #[test]
    fn test_handles_share_one_environment() {
        let mut env = ManualEnvironment::new(&EnvironmentConfig::default());
        let writer = env.handle();
        let reader = env.handle();
        writer.write_contribution("heater-1", 5.0);
        let clock = env.step(2.0).unwrap();
        assert_eq!(reader.simulated_clock(), clock);
        assert_eq!(reader.heat_contribution("heater-1"), Some(5.0));
    }
}
