use parking_lot::Mutex;
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::time::{timeout, Duration};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{info, warn};

use super::control::ControlManager;
use super::scheduler::{CommandScheduler, TaskStatus};
use crate::domain::{CommandHandler, CommandResult};

/// Runs commands against one peripheral, one at a time.
///
/// Every command holds the kit's control token for its whole duration and is
/// bounded by a timeout. Failures and timeouts are logged and turned into an
/// empty result so the caller never has to handle them.
#[derive(Clone)]
pub struct CommandController {
    handler: Arc<dyn CommandHandler>,
    control: ControlManager,
    command_timeout: Duration,
    tracker: TaskTracker,
    status: Arc<Mutex<TaskStatus>>,
    timeouts: Arc<AtomicU64>,
}

impl CommandController {
    pub fn new(
        handler: Arc<dyn CommandHandler>,
        control: ControlManager,
        command_timeout: Duration,
    ) -> Self {
        Self {
            handler,
            control,
            command_timeout,
            tracker: TaskTracker::new(),
            status: Arc::new(Mutex::new(TaskStatus::default())),
            timeouts: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn status(&self) -> TaskStatus {
        self.status.lock().clone()
    }

    /// Commands abandoned because they ran past the timeout
    pub fn timeouts(&self) -> u64 {
        self.timeouts.load(Ordering::Relaxed)
    }

    pub fn tracker(&self) -> &TaskTracker {
        &self.tracker
    }

    /// Wait for control, run `command` and release control.
    pub async fn execute(&self, command: Value) -> CommandResult {
        let owner = self.handler.name().to_string();
        let _token = match self.control.acquire(&owner).await {
            Ok(token) => token,
            Err(e) => {
                warn!(peripheral = %owner, %command, error = %e, "command dropped");
                return CommandResult::empty();
            }
        };

        self.status.lock().record_start();
        match timeout(self.command_timeout, self.handler.handle(&command)).await {
            Ok(Ok(result)) => {
                self.status.lock().record_success();
                result
            }
            Ok(Err(e)) => {
                warn!(peripheral = %owner, %command, error = %e, "command failed");
                self.status.lock().record_error(&e);
                CommandResult::empty()
            }
            Err(_) => {
                warn!(
                    peripheral = %owner,
                    %command,
                    timeout_s = self.command_timeout.as_secs_f64(),
                    "command timed out"
                );
                self.timeouts.fetch_add(1, Ordering::Relaxed);
                self.status.lock().record_error("timed out");
                CommandResult::empty()
            }
        }
    }

    /// Fire-and-forget [`execute`](Self::execute) on the controller's tracker
    pub fn spawn_command(&self, command: Value) {
        let controller = self.clone();
        self.tracker.spawn(async move {
            controller.execute(command).await;
        });
    }

    /// Drive `scheduler` until cancelled, then wait for in-flight commands.
    pub async fn run(self, scheduler: CommandScheduler, cancel: CancellationToken) {
        let dispatcher = self.clone();
        scheduler
            .run(move |command| dispatcher.spawn_command(command), cancel)
            .await;
        self.tracker.close();
        self.tracker.wait().await;
        info!(peripheral = %self.handler.name(), "command controller stopped");
    }
}
