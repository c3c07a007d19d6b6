//! Process supervisor
//!
//! Keeps the stdio server alive: launches it with inherited stdio, restarts it
//! after a crash with exponential backoff, and stops for good once too many
//! restarts land inside the rate-limit window. A clean exit of the server, or a
//! shutdown request to the supervisor, ends supervision without a restart.
//!
//! ```text
//! Idle -> Running -> CrashDetected -> Idle (restart) | Terminated (gave up)
//!                 -> CleanExit -> Terminated
//!                 -> ShuttingDown -> Terminated
//! ```

mod policy;
mod process;

pub use policy::{BackoffState, Clock, RestartDecision, RestartHistory, RestartPolicy, SystemClock};
pub use process::{
    classify_exit, is_executable, set_executable, spawn_server, terminate_child, ExitKind,
};

use std::path::PathBuf;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::SupervisorConfig;
use crate::error::{OcrMcpError, Result};

/// Exit code used when the restart budget is exhausted.
pub const GAVE_UP_EXIT_CODE: i32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorState {
    Idle,
    Running,
    CrashDetected,
    CleanExit,
    ShuttingDown,
    Terminated,
}

enum RunOutcome {
    Clean(i32),
    Crash(String),
    Shutdown,
}

pub struct Supervisor {
    binary: PathBuf,
    args: Vec<String>,
    config: SupervisorConfig,
    policy: RestartPolicy,
    state: SupervisorState,
    permissions_healed: bool,
}

impl Supervisor {
    pub fn new(binary: PathBuf, args: Vec<String>, config: SupervisorConfig) -> Self {
        Self::with_clock(binary, args, config, Arc::new(SystemClock))
    }

    pub fn with_clock(
        binary: PathBuf,
        args: Vec<String>,
        config: SupervisorConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let policy = RestartPolicy::new(&config, clock);
        Self {
            binary,
            args,
            config,
            policy,
            state: SupervisorState::Idle,
            permissions_healed: false,
        }
    }

    pub fn state(&self) -> SupervisorState {
        self.state
    }

    fn transition(&mut self, next: SupervisorState) {
        debug!(from = ?self.state, to = ?next, "Supervisor state change");
        self.state = next;
    }

    /// Supervise until the server exits cleanly, the restart budget runs out,
    /// or `shutdown` fires. Returns the exit code for the supervisor process.
    pub async fn run(&mut self, shutdown: CancellationToken) -> i32 {
        info!(
            binary = %self.binary.display(),
            max_restarts = self.config.max_restarts,
            window_secs = self.config.window_secs,
            "Supervisor starting"
        );

        loop {
            if shutdown.is_cancelled() {
                return self.finish_shutdown();
            }

            match self.run_once(&shutdown).await {
                RunOutcome::Clean(code) => {
                    self.transition(SupervisorState::CleanExit);
                    info!(code, "Server exited cleanly");
                    self.transition(SupervisorState::Terminated);
                    return code;
                }
                RunOutcome::Shutdown => return self.finish_shutdown(),
                RunOutcome::Crash(reason) => {
                    self.transition(SupervisorState::CrashDetected);
                    match self.policy.on_crash() {
                        RestartDecision::GiveUp { recent } => {
                            error!(
                                reason = %reason,
                                recent,
                                window_secs = self.config.window_secs,
                                "Server keeps crashing, giving up"
                            );
                            self.transition(SupervisorState::Terminated);
                            return GAVE_UP_EXIT_CODE;
                        }
                        RestartDecision::Restart { delay, attempt } => {
                            warn!(
                                reason = %reason,
                                attempt,
                                delay_ms = delay.as_millis() as u64,
                                "Server crashed, scheduling restart"
                            );
                            tokio::select! {
                                _ = tokio::time::sleep(delay) => {}
                                _ = shutdown.cancelled() => return self.finish_shutdown(),
                            }
                            self.transition(SupervisorState::Idle);
                        }
                    }
                }
            }
        }
    }

    async fn run_once(&mut self, shutdown: &CancellationToken) -> RunOutcome {
        if let Err(e) = self.prepare_binary() {
            return RunOutcome::Crash(e.to_string());
        }

        let mut child = match spawn_server(&self.binary, &self.args) {
            Ok(child) => child,
            Err(e) => return RunOutcome::Crash(e.to_string()),
        };
        self.transition(SupervisorState::Running);
        info!(pid = child.id(), "Server started");

        let waited = tokio::select! {
            status = child.wait() => Some(status),
            _ = shutdown.cancelled() => None,
        };

        match waited {
            Some(Ok(status)) => match classify_exit(status) {
                ExitKind::Clean(code) => RunOutcome::Clean(code),
                ExitKind::Crash(reason) => RunOutcome::Crash(reason),
            },
            Some(Err(e)) => RunOutcome::Crash(format!("failed to wait for server: {e}")),
            None => {
                self.transition(SupervisorState::ShuttingDown);
                match terminate_child(&mut child, self.config.shutdown_grace()).await {
                    Ok(status) => info!(%status, "Server stopped"),
                    Err(e) => warn!(error = %e, "Failed to stop server"),
                }
                RunOutcome::Shutdown
            }
        }
    }

    /// Restore a missing execute bit, once per supervisor lifetime.
    fn prepare_binary(&mut self) -> Result<()> {
        if !self.binary.is_file() || is_executable(&self.binary) {
            return Ok(());
        }
        if self.permissions_healed {
            return Err(OcrMcpError::Spawn(format!(
                "{} is not executable",
                self.binary.display()
            )));
        }

        self.permissions_healed = true;
        warn!(binary = %self.binary.display(), "Server binary is not executable, fixing permissions");
        set_executable(&self.binary)
    }

    fn finish_shutdown(&mut self) -> i32 {
        if self.state != SupervisorState::ShuttingDown {
            self.transition(SupervisorState::ShuttingDown);
        }
        info!("Supervisor shutting down");
        self.transition(SupervisorState::Terminated);
        0
    }
}

impl std::fmt::Debug for Supervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Supervisor")
            .field("binary", &self.binary)
            .field("args", &self.args)
            .field("state", &self.state)
            .field("policy", &self.policy)
            .finish()
    }
}
