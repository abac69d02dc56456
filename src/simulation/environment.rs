//! # Kit Environment
//!
//! Physical state of the growth kit and the surrounding air, plus the pure
//! step function that advances it.
//!
//! Units: temperature in degrees Celsius, pressure in hPa, specific humidity in
//! kg moisture per kg air, relative humidity as a fraction of saturation.

use chrono::{Duration, NaiveDate, NaiveDateTime, Timelike};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::f64::consts::PI;
use thiserror::Error;

pub const SECONDS_PER_HOUR: f64 = 60.0 * 60.0;

/// Kit interior volume (m^3)
pub const KIT_VOLUME_M3: f64 = 0.5 * 1.0 * 2.0;
/// Mass of the air inside the kit (kg)
pub const KIT_AIR_MASS_KG: f64 = 1.293 * KIT_VOLUME_M3;
/// Specific heat of air (J/kg/K)
pub const AIR_SPECIFIC_HEAT: f64 = 1000.0;

/// Without other forces, kit and ambient temperature equalise with this time constant.
pub const LEAKAGE_TIME_CONSTANT_S: f64 = 2.0 * SECONDS_PER_HOUR;

/// Saturation specific humidity at a given air temperature.
///
/// Doubles every 10 °C and is 0.051 kg/kg at 40 °C.
pub fn dew_point(air_temperature_c: f64) -> f64 {
    0.051 * 2f64.powf((air_temperature_c - 40.0) / 10.0)
}

/// Fraction of the saturation humidity at the given temperature.
pub fn relative_humidity(specific_humidity: f64, air_temperature_c: f64) -> f64 {
    specific_humidity / dew_point(air_temperature_c)
}

/// Temperature rise rate (K/s) caused by injecting `wattage` into the kit air.
pub fn heating_rate(wattage: f64) -> f64 {
    wattage / (KIT_AIR_MASS_KG * AIR_SPECIFIC_HEAT)
}

/// How the ambient temperature evolves over simulated time
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum AmbientProfile {
    /// Sinusoidal day/night cycle, warming from 06:00 and cooling from 18:00
    #[default]
    Diurnal,
    /// Ambient temperature held where it starts
    Constant,
}

impl AmbientProfile {
    /// Ambient temperature change per simulated second at the given time.
    pub fn dtemperature_dsecond(&self, at: NaiveDateTime) -> f64 {
        match self {
            AmbientProfile::Diurnal => {
                let hour = at.hour() as f64;
                ((hour - 6.0) / 24.0 * PI * 2.0).sin() / 4.0 / SECONDS_PER_HOUR
            }
            AmbientProfile::Constant => 0.0,
        }
    }
}

/// Initial conditions for the environment
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnvironmentConfig {
    pub start_time: NaiveDateTime,
    pub ambient_profile: AmbientProfile,
    pub ambient_temperature: f64,
    pub ambient_pressure: f64,
    pub ambient_specific_humidity: f64,
    pub kit_temperature: f64,
    pub kit_pressure: f64,
    pub kit_specific_humidity: f64,
}

impl Default for EnvironmentConfig {
    fn default() -> Self {
        Self {
            start_time: default_start_time(),
            ambient_profile: AmbientProfile::Diurnal,
            ambient_temperature: 20.0,
            ambient_pressure: 1000.0,
            ambient_specific_humidity: 0.006,
            kit_temperature: 24.0,
            kit_pressure: 1000.0,
            kit_specific_humidity: 0.008,
        }
    }
}

impl EnvironmentConfig {
    /// Hold the ambient temperature fixed
    pub fn with_constant_ambient(mut self) -> Self {
        self.ambient_profile = AmbientProfile::Constant;
        self
    }

    pub fn with_start_time(mut self, start_time: NaiveDateTime) -> Self {
        self.start_time = start_time;
        self
    }

    pub fn with_temperatures(mut self, ambient: f64, kit: f64) -> Self {
        self.ambient_temperature = ambient;
        self.kit_temperature = kit;
        self
    }
}

pub(crate) fn default_start_time() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2017, 11, 16)
        .and_then(|d| d.and_hms_opt(8, 0, 0))
        .unwrap_or_default()
}

/// A step left the state in a condition the physics cannot represent
#[derive(Debug, Clone, Error, PartialEq)]
pub enum SimulationFault {
    #[error("Invalid time step: {0}s")]
    InvalidTimeStep(f64),
    #[error("Non-finite {field} after step: {value}")]
    NonFinite { field: &'static str, value: f64 },
    #[error("Simulated clock overflowed")]
    ClockOverflow,
    #[error("Simulation step panicked")]
    Panicked,
}

/// Mutable physical state of the kit and its surroundings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EnvironmentState {
    pub simulated_clock: NaiveDateTime,
    pub ambient_profile: AmbientProfile,

    pub ambient_temperature: f64,
    pub ambient_pressure: f64,
    pub ambient_specific_humidity: f64,

    pub kit_temperature: f64,
    pub kit_pressure: f64,
    pub kit_specific_humidity: f64,

    /// Wattage currently injected per actuator. A missing key means zero.
    pub heat_contributions: BTreeMap<String, f64>,
}

impl EnvironmentState {
    pub fn new(config: &EnvironmentConfig) -> Self {
        Self {
            simulated_clock: config.start_time,
            ambient_profile: config.ambient_profile,
            ambient_temperature: config.ambient_temperature,
            ambient_pressure: config.ambient_pressure,
            ambient_specific_humidity: config.ambient_specific_humidity,
            kit_temperature: config.kit_temperature,
            kit_pressure: config.kit_pressure,
            kit_specific_humidity: config.kit_specific_humidity,
            heat_contributions: BTreeMap::new(),
        }
    }

    /// Relative humidity inside the kit, clamped to be non-negative.
    pub fn kit_relative_humidity(&self) -> f64 {
        relative_humidity(self.kit_specific_humidity, self.kit_temperature).max(0.0)
    }

    /// Sum of all actuator contributions (W)
    pub fn total_heating_w(&self) -> f64 {
        self.heat_contributions.values().sum()
    }

    /// Upsert an actuator's wattage. The value persists until overwritten.
    pub fn set_heat_contribution(&mut self, actuator: &str, wattage: f64) {
        self.heat_contributions.insert(actuator.to_string(), wattage);
    }

    /// Advance the environment by `dtime` simulated seconds.
    ///
    /// The clock moves first, then ambient factors, then the kit (which
    /// depends on the ambient values). On error the state may be partially
    /// updated; callers that need atomicity keep a copy.
    pub fn step(&mut self, dtime: f64) -> Result<(), SimulationFault> {
        if !dtime.is_finite() || dtime <= 0.0 {
            return Err(SimulationFault::InvalidTimeStep(dtime));
        }

        let delta = Duration::nanoseconds((dtime * 1e9).round() as i64);
        self.simulated_clock = self
            .simulated_clock
            .checked_add_signed(delta)
            .ok_or(SimulationFault::ClockOverflow)?;

        self.step_ambient(dtime);
        self.step_kit(dtime);
        self.check_finite()
    }

    fn step_ambient(&mut self, dtime: f64) {
        self.ambient_temperature +=
            self.ambient_profile.dtemperature_dsecond(self.simulated_clock) * dtime;
    }

    fn step_kit(&mut self, dtime: f64) {
        let leakage = (self.ambient_temperature - self.kit_temperature) / LEAKAGE_TIME_CONSTANT_S;
        let heating: f64 = self.heat_contributions.values().copied().map(heating_rate).sum();

        self.kit_temperature += (leakage + heating) * dtime;

        let saturation = dew_point(self.ambient_temperature);
        if self.ambient_specific_humidity > saturation {
            self.ambient_specific_humidity = saturation;
        }
        self.ambient_specific_humidity = self.ambient_specific_humidity.max(0.0);

        self.kit_pressure = self.ambient_pressure;
        self.kit_specific_humidity = self.ambient_specific_humidity;
    }

    fn check_finite(&self) -> Result<(), SimulationFault> {
        let fields = [
            ("ambient_temperature", self.ambient_temperature),
            ("ambient_pressure", self.ambient_pressure),
            ("ambient_specific_humidity", self.ambient_specific_humidity),
            ("kit_temperature", self.kit_temperature),
            ("kit_pressure", self.kit_pressure),
            ("kit_specific_humidity", self.kit_specific_humidity),
        ];
        match fields.iter().find(|(_, v)| !v.is_finite()) {
            Some(&(field, value)) => Err(SimulationFault::NonFinite { field, value }),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn constant_env(ambient: f64, kit: f64) -> EnvironmentState {
        EnvironmentState::new(
            &EnvironmentConfig::default()
                .with_constant_ambient()
                .with_temperatures(ambient, kit),
        )
    }

    #[test]
    fn test_dew_point_doubles_every_ten_degrees() {
        assert!((dew_point(40.0) - 0.051).abs() < 1e-12);
        assert!((dew_point(30.0) * 2.0 - dew_point(40.0)).abs() < 1e-12);
        assert!((relative_humidity(0.051, 40.0) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_step_advances_clock_exactly() {
        let mut env = EnvironmentState::new(&EnvironmentConfig::default());
        let before = env.simulated_clock;
        env.step(0.1).unwrap();
        assert_eq!(env.simulated_clock - before, Duration::milliseconds(100));
        env.step(50.0).unwrap();
        assert_eq!(env.simulated_clock - before, Duration::milliseconds(50_100));
    }

    #[test]
    fn test_step_rejects_non_positive_dtime() {
        let mut env = EnvironmentState::new(&EnvironmentConfig::default());
        let before = env.clone();
        assert_eq!(env.step(0.0), Err(SimulationFault::InvalidTimeStep(0.0)));
        assert!(env.step(f64::NAN).is_err());
        assert_eq!(env, before);
    }

    #[test]
    fn test_kit_decays_toward_ambient_over_two_hours() {
        let mut env = constant_env(20.0, 24.0);
        for _ in 0..144 {
            env.step(50.0).unwrap();
        }
        let analytic = 20.0 + 4.0 * (-7200.0f64 / LEAKAGE_TIME_CONSTANT_S).exp();
        assert!(
            (env.kit_temperature - analytic).abs() < 0.01,
            "kit {} vs analytic {}",
            env.kit_temperature,
            analytic
        );
    }

    #[test]
    fn test_heating_raises_kit_temperature() {
        let mut env = constant_env(20.0, 20.0);
        env.set_heat_contribution("heater-1", 10.0);
        env.step(1.0).unwrap();
        let expected = 20.0 + 10.0 / (KIT_AIR_MASS_KG * AIR_SPECIFIC_HEAT);
        assert!((env.kit_temperature - expected).abs() < 1e-12);
        assert_eq!(env.heat_contributions["heater-1"], 10.0);
    }

    #[test]
    fn test_contribution_persists_without_decay() {
        let mut env = constant_env(20.0, 20.0);
        env.set_heat_contribution("heater-1", 5.0);
        for _ in 0..100 {
            env.step(10.0).unwrap();
        }
        assert_eq!(env.total_heating_w(), 5.0);
        env.set_heat_contribution("heater-1", 0.0);
        assert_eq!(env.total_heating_w(), 0.0);
    }

    #[test]
    fn test_diurnal_profile_warms_in_the_morning() {
        let morning = default_start_time();
        let evening = morning.with_hour(20).unwrap();
        assert!(AmbientProfile::Diurnal.dtemperature_dsecond(morning) > 0.0);
        assert!(AmbientProfile::Diurnal.dtemperature_dsecond(evening) < 0.0);
        assert_eq!(AmbientProfile::Constant.dtemperature_dsecond(morning), 0.0);
    }

    #[test]
    fn test_kit_tracks_ambient_pressure_and_humidity() {
        let mut env = EnvironmentState::new(&EnvironmentConfig::default());
        env.ambient_pressure = 990.0;
        env.step(1.0).unwrap();
        assert_eq!(env.kit_pressure, 990.0);
        assert_eq!(env.kit_specific_humidity, env.ambient_specific_humidity);
    }

    #[test]
    fn test_non_finite_state_is_reported() {
        let mut env = constant_env(20.0, 20.0);
        env.set_heat_contribution("heater-1", f64::INFINITY);
        assert!(matches!(
            env.step(1.0),
            Err(SimulationFault::NonFinite { field: "kit_temperature", .. })
        ));
    }

    proptest! {
        #[test]
        fn prop_clock_advances_by_dtime(dtime_ms in 1i64..3_600_000, steps in 1usize..20) {
            let mut env = EnvironmentState::new(&EnvironmentConfig::default());
            let start = env.simulated_clock;
            let dtime = dtime_ms as f64 / 1000.0;
            for _ in 0..steps {
                let before = env.simulated_clock;
                env.step(dtime).unwrap();
                prop_assert_eq!(env.simulated_clock - before, Duration::milliseconds(dtime_ms));
            }
            prop_assert_eq!(env.simulated_clock - start, Duration::milliseconds(dtime_ms * steps as i64));
        }

        #[test]
        fn prop_ambient_humidity_never_exceeds_saturation(
            humidity in 0.0f64..0.2,
            ambient in -20.0f64..45.0,
            dtime in 0.1f64..600.0,
            steps in 1usize..50,
        ) {
            let mut env = EnvironmentState::new(&EnvironmentConfig {
                ambient_temperature: ambient,
                ambient_specific_humidity: humidity,
                ..Default::default()
            });
            for _ in 0..steps {
                env.step(dtime).unwrap();
                prop_assert!(env.ambient_specific_humidity <= dew_point(env.ambient_temperature));
            }
        }

        #[test]
        fn prop_kit_converges_without_overshoot(
            ambient in -10.0f64..40.0,
            kit in -10.0f64..40.0,
            dtime in 0.1f64..600.0,
            steps in 1usize..100,
        ) {
            let mut env = constant_env(ambient, kit);
            let mut gap = (env.kit_temperature - ambient).abs();
            let sign = (kit - ambient).signum();
            for _ in 0..steps {
                env.step(dtime).unwrap();
                let new_gap = (env.kit_temperature - ambient).abs();
                prop_assert!(new_gap <= gap + 1e-12);
                if new_gap > 1e-9 {
                    prop_assert_eq!((env.kit_temperature - ambient).signum(), sign);
                }
                gap = new_gap;
            }
        }
    }
}
