use anyhow::Result;
use async_trait::async_trait;
use parking_lot::Mutex;
use rand::{rngs::StdRng, Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::time::{sleep, Duration};

use super::peripheral::Measurement;
use crate::simulation::{EnvironmentHandle, EnvironmentSnapshot};

/// Sensor-specific errors
#[derive(Debug, Error)]
pub enum SensorError {
    #[error("Non-finite {quantity} reading: {value}")]
    NonFinite { quantity: &'static str, value: f64 },
}

#[async_trait]
pub trait Sensor: Send + Sync {
    fn name(&self) -> &str;
    /// Take one reading. Combined sensors return one measurement per channel.
    async fn measure(&self) -> Result<Vec<Measurement>>;
}

/// Kinds of simulated sensor
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display, strum::EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum SensorKind {
    Temperature,
    Pressure,
    /// Temperature, humidity and pressure in one device
    Barometer,
}

/// One quantity a sensor reports, with its noise band
#[derive(Debug, Clone, Copy)]
struct Channel {
    quantity: &'static str,
    unit: &'static str,
    noise: f64,
    read: fn(&EnvironmentSnapshot) -> f64,
    clamp: Option<(f64, f64)>,
}

fn kit_temperature(s: &EnvironmentSnapshot) -> f64 {
    s.kit_temperature
}

fn kit_pressure(s: &EnvironmentSnapshot) -> f64 {
    s.kit_pressure
}

fn kit_humidity_percent(s: &EnvironmentSnapshot) -> f64 {
    s.kit_relative_humidity * 100.0
}

const TEMPERATURE: Channel = Channel {
    quantity: "Temperature",
    unit: "Degrees Celsius",
    noise: 0.02,
    read: kit_temperature,
    clamp: None,
};

const PRESSURE: Channel = Channel {
    quantity: "Pressure",
    unit: "Hectopascal",
    noise: 0.75,
    read: kit_pressure,
    clamp: Some((0.0, f64::MAX)),
};

static TEMPERATURE_CHANNELS: [Channel; 1] = [TEMPERATURE];
static PRESSURE_CHANNELS: [Channel; 1] = [PRESSURE];
static BAROMETER_CHANNELS: [Channel; 3] = [
    Channel {
        noise: 0.035,
        ..TEMPERATURE
    },
    Channel {
        quantity: "Humidity",
        unit: "Percent",
        noise: 0.95,
        read: kit_humidity_percent,
        clamp: Some((0.0, 100.0)),
    },
    Channel {
        noise: 0.95,
        ..PRESSURE
    },
];

impl SensorKind {
    fn channels(&self) -> &'static [Channel] {
        match self {
            SensorKind::Temperature => &TEMPERATURE_CHANNELS,
            SensorKind::Pressure => &PRESSURE_CHANNELS,
            SensorKind::Barometer => &BAROMETER_CHANNELS,
        }
    }
}

/// Sensor reading the simulated kit through the environment facade
#[derive(Debug)]
pub struct SimulatedSensor {
    name: String,
    kind: SensorKind,
    acquisition_delay: Duration,
    env: EnvironmentHandle,
    rng: Mutex<StdRng>,
}

impl SimulatedSensor {
    pub fn new(
        name: impl Into<String>,
        kind: SensorKind,
        acquisition_delay: Duration,
        env: EnvironmentHandle,
    ) -> Self {
        Self {
            name: name.into(),
            kind,
            acquisition_delay,
            env,
            rng: Mutex::new(StdRng::from_entropy()),
        }
    }

    /// Deterministic noise, for reproducible runs
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = Mutex::new(StdRng::seed_from_u64(seed));
        self
    }

    pub fn kind(&self) -> SensorKind {
        self.kind
    }

    fn sample(&self) -> Result<Vec<Measurement>, SensorError> {
        let snapshot = self.env.read();
        let mut rng = self.rng.lock();

        self.kind
            .channels()
            .iter()
            .map(|channel| {
                let mut value = (channel.read)(&snapshot);
                if !value.is_finite() {
                    return Err(SensorError::NonFinite {
                        quantity: channel.quantity,
                        value,
                    });
                }
                value += rng.gen_range(-channel.noise..=channel.noise);
                if let Some((low, high)) = channel.clamp {
                    value = value.clamp(low, high);
                }
                Ok(Measurement::new(&self.name, channel.quantity, channel.unit, value))
            })
            .collect()
    }
}

#[async_trait]
impl Sensor for SimulatedSensor {
    fn name(&self) -> &str {
        &self.name
    }

    async fn measure(&self) -> Result<Vec<Measurement>> {
        // values are taken at read time; the delay only models acquisition latency
        let measurements = self.sample()?;
        sleep(self.acquisition_delay).await;
        Ok(measurements)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulation::{EnvironmentConfig, ManualEnvironment};
    use rstest::rstest;

    fn env() -> EnvironmentHandle {
        ManualEnvironment::new(&EnvironmentConfig::default()).handle()
    }

    #[rstest]
    #[case(SensorKind::Temperature, &["Temperature"])]
    #[case(SensorKind::Pressure, &["Pressure"])]
    #[case(SensorKind::Barometer, &["Temperature", "Humidity", "Pressure"])]
    #[tokio::test]
    async fn test_sensor_reports_its_channels(
        #[case] kind: SensorKind,
        #[case] quantities: &[&str],
    ) {
        let sensor = SimulatedSensor::new("s", kind, Duration::ZERO, env());
        let measurements = sensor.measure().await.unwrap();
        let got: Vec<_> = measurements.iter().map(|m| m.quantity.as_str()).collect();
        assert_eq!(got, quantities);
        assert!(measurements.iter().all(|m| m.peripheral == "s"));
    }

    #[tokio::test]
    async fn test_noise_stays_within_band() {
        let env = env();
        let truth = env.read();
        let sensor = SimulatedSensor::new("baro", SensorKind::Barometer, Duration::ZERO, env)
            .with_seed(7);
        for _ in 0..200 {
            let m = sensor.measure().await.unwrap();
            assert!((m[0].value - truth.kit_temperature).abs() <= 0.035 + 1e-9);
            assert!((m[1].value - truth.kit_relative_humidity * 100.0).abs() <= 0.95 + 1e-9);
            assert!((m[2].value - truth.kit_pressure).abs() <= 0.95 + 1e-9);
        }
    }

    #[tokio::test]
    async fn test_humidity_is_clamped_at_zero() {
        let env = ManualEnvironment::new(&EnvironmentConfig {
            ambient_specific_humidity: 0.0,
            kit_specific_humidity: 0.0,
            ..Default::default()
        })
        .handle();
        let sensor = SimulatedSensor::new("baro", SensorKind::Barometer, Duration::ZERO, env);
        for _ in 0..50 {
            let m = sensor.measure().await.unwrap();
            assert!(m[1].value >= 0.0);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_measure_waits_for_acquisition_delay() {
        let sensor = SimulatedSensor::new(
            "t",
            SensorKind::Temperature,
            Duration::from_millis(250),
            env(),
        );
        let started = tokio::time::Instant::now();
        sensor.measure().await.unwrap();
        assert!(started.elapsed() >= Duration::from_millis(250));
    }

    #[tokio::test]
    async fn test_measure_does_not_mutate_environment() {
        let env = env();
        let before = env.read();
        let sensor = SimulatedSensor::new("p", SensorKind::Pressure, Duration::ZERO, env.clone());
        sensor.measure().await.unwrap();
        assert_eq!(env.read(), before);
    }

    #[test]
    fn test_kind_parses_from_config_string() {
        assert_eq!("barometer".parse::<SensorKind>().unwrap(), SensorKind::Barometer);
        assert_eq!(SensorKind::Pressure.to_string(), "pressure");
    }
}
