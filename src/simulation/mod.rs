//! # Kit Environment Simulation
//!
//! A single enclosed air volume (the growth kit) leaking heat to the ambient
//! air, warmed by actuators and observed by sensors.
//!
//! ## Components
//!
//! - **Environment**: the physical state and its step function
//! - **Handle**: the locked read/write facade every consumer goes through
//! - **ManualEnvironment**: an environment stepped by hand rather than by the loop
//! - **Runner**: the background thread stepping the environment forever
//!
//! ## Usage
//!
//! ```rust,no_run
//! use kit_simulator::simulation::{EnvironmentConfig, SimulationLoop, SimulationLoopConfig};
//!
//! let sim = SimulationLoop::new(&EnvironmentConfig::default(), SimulationLoopConfig::default());
//! let env = sim.handle();
//! sim.start().expect("spawn simulation thread");
//!
//! env.write_contribution("heater-1", 10.0);
//! let snapshot = env.read();
//! println!("kit at {:.2} °C", snapshot.kit_temperature);
//! ```

pub mod environment;
pub mod handle;
pub mod runner;

pub use environment::{
    dew_point, heating_rate, relative_humidity, AmbientProfile, EnvironmentConfig,
    EnvironmentState, SimulationFault, AIR_SPECIFIC_HEAT, KIT_AIR_MASS_KG,
};
pub use handle::{EnvironmentHandle, EnvironmentSnapshot, ManualEnvironment};
pub use runner::{SimulationLoop, SimulationLoopConfig};
