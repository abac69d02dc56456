//! Background driver that steps the environment on a fixed wall-clock cadence.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error, info, warn};

use super::environment::{EnvironmentConfig, EnvironmentState, SimulationFault};
use super::handle::{EnvironmentHandle, SharedEnvironment};

/// Cadence of the simulation loop
#[derive(Debug, Clone)]
pub struct SimulationLoopConfig {
    /// Wall-clock sleep between steps
    pub step_interval: Duration,
    /// Simulated seconds advanced per step
    pub dtime_s: f64,
    /// Consecutive faulty steps tolerated before the process is aborted
    pub max_consecutive_faults: u32,
}

impl Default for SimulationLoopConfig {
    fn default() -> Self {
        Self {
            step_interval: Duration::from_millis(100),
            dtime_s: 0.1,
            max_consecutive_faults: 10,
        }
    }
}

/// Owns the environment and the thread that advances it.
///
/// The loop is started at most once; there is no stop. It ends with the process.
pub struct SimulationLoop {
    environment: SharedEnvironment,
    config: SimulationLoopConfig,
    started: Arc<AtomicBool>,
}

impl SimulationLoop {
    pub fn new(environment: &EnvironmentConfig, config: SimulationLoopConfig) -> Self {
        Self {
            environment: SharedEnvironment::new(EnvironmentState::new(environment)),
            config,
            started: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Facade for consumers of the environment
    pub fn handle(&self) -> EnvironmentHandle {
        self.environment.handle()
    }

    pub fn is_running(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    /// Spawn the simulation thread. Returns `None` if it was already started.
    pub fn start(&self) -> std::io::Result<Option<JoinHandle<()>>> {
        if self.started.swap(true, Ordering::SeqCst) {
            debug!("simulation loop already running");
            return Ok(None);
        }

        let environment = self.environment.clone();
        let config = self.config.clone();
        let spawned = thread::Builder::new()
            .name("kit-simulation".into())
            .spawn(move || run_forever(environment, config));

        match spawned {
            Ok(handle) => Ok(Some(handle)),
            Err(e) => {
                self.started.store(false, Ordering::SeqCst);
                Err(e)
            }
        }
    }
}

fn run_forever(environment: SharedEnvironment, config: SimulationLoopConfig) {
    info!(
        dtime_s = config.dtime_s,
        step_interval_ms = config.step_interval.as_millis() as u64,
        "simulation loop started"
    );

    let mut consecutive_faults = 0u32;
    loop {
        match guarded_step(&environment, config.dtime_s) {
            Ok(()) => consecutive_faults = 0,
            Err(fault) => {
                consecutive_faults += 1;
                warn!(
                    error = %fault,
                    consecutive_faults,
                    "simulation step failed, state rolled back"
                );
                if consecutive_faults >= config.max_consecutive_faults {
                    error!(
                        error = %fault,
                        "simulation cannot make progress, aborting"
                    );
                    std::process::abort();
                }
            }
        }
        thread::sleep(config.step_interval);
    }
}

/// A panic inside a step is reported like any other fault.
fn guarded_step(environment: &SharedEnvironment, dtime: f64) -> Result<(), SimulationFault> {
    match panic::catch_unwind(AssertUnwindSafe(|| environment.step(dtime))) {
        Ok(result) => result.map(|_| ()),
        Err(_) => Err(SimulationFault::Panicked),
    }
}
