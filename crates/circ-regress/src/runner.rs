//! Simulator process execution and teardown.

use std::fs::File;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::{Duration, Instant};

use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

use crate::cancel::CancelToken;
use crate::config::{Project, SimulatorConfig, TerminationPolicy};
use crate::error::RunnerError;
use crate::paths;

/// Fully resolved simulator command line, minus the circuit path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimulatorInvocation {
    /// Executable.
    pub program: String,

    /// Arguments placed before the circuit path.
    pub args: Vec<String>,

    /// Working directory for the child.
    pub working_dir: PathBuf,
}

impl SimulatorInvocation {
    /// Build `<command...> <headless flag> <format>` from config.
    pub fn from_config(config: &SimulatorConfig, working_dir: &Path) -> Option<Self> {
        let (program, rest) = config.command.split_first()?;
        let mut args = rest.to_vec();
        args.push(config.headless_flag.clone());
        args.push(config.table_format.clone());
        Some(Self {
            program: program.clone(),
            args,
            working_dir: working_dir.to_path_buf(),
        })
    }
}

/// Runs one simulator process per call and guarantees it is gone afterwards.
#[derive(Debug, Clone)]
pub struct ProcessRunner {
    invocation: SimulatorInvocation,
    termination: TerminationPolicy,
    timeout: Option<Duration>,
}

enum Waited {
    Exited(std::io::Result<ExitStatus>),
    Cancelled,
    TimedOut,
}

impl ProcessRunner {
    pub fn new(invocation: SimulatorInvocation, termination: TerminationPolicy) -> Self {
        Self {
            invocation,
            termination,
            timeout: None,
        }
    }

    /// Runner for `project`'s simulator settings.
    ///
    /// Returns `None` when the simulator command is empty, which
    /// [`Project::new`] already rejects.
    pub fn for_project(project: &Project) -> Option<Self> {
        let invocation = SimulatorInvocation::from_config(&project.simulator, project.root())?;
        Some(
            Self::new(invocation, project.termination)
                .with_timeout(project.simulator.timeout_secs.map(Duration::from_secs)),
        )
    }

    /// Limit each run to `timeout` of wall-clock time.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn invocation(&self) -> &SimulatorInvocation {
        &self.invocation
    }

    /// Simulate `input`, streaming the child's stdout into `sink`.
    ///
    /// `input` is resolved against the current directory, not the child's
    /// working directory. Blocks until the child exits. If `cancel` fires or
    /// the timeout elapses first, the child is terminated before returning.
    pub async fn run(
        &self,
        input: &Path,
        sink: File,
        cancel: &CancelToken,
    ) -> Result<ExitStatus, RunnerError> {
        if cancel.is_cancelled() {
            return Err(RunnerError::Cancelled);
        }
        let resolved = paths::normalize(input).map_err(|source| RunnerError::Input {
            path: input.to_path_buf(),
            source,
        })?;
        let input = resolved.as_path();

        let start = Instant::now();
        let mut child = Command::new(&self.invocation.program)
            .args(&self.invocation.args)
            .arg(input)
            .current_dir(&self.invocation.working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::from(sink))
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| RunnerError::Spawn {
                program: self.invocation.program.clone(),
                source,
            })?;

        debug!(pid = ?child.id(), input = %input.display(), "Simulator started");

        let waited = tokio::select! {
            status = child.wait() => Waited::Exited(status),
            _ = cancel.cancelled() => Waited::Cancelled,
            _ = deadline(self.timeout) => Waited::TimedOut,
        };

        match waited {
            Waited::Exited(Ok(status)) => {
                debug!(
                    status = %status,
                    duration_ms = start.elapsed().as_millis() as u64,
                    "Simulator exited"
                );
                Ok(status)
            }
            Waited::Exited(Err(e)) => {
                self.terminate_logged(&mut child).await;
                Err(RunnerError::Wait(e))
            }
            Waited::Cancelled => {
                info!(input = %input.display(), "Cancelling simulator");
                self.terminate_logged(&mut child).await;
                Err(RunnerError::Cancelled)
            }
            Waited::TimedOut => {
                let limit = self.timeout.unwrap_or_default();
                warn!(input = %input.display(), limit_ms = limit.as_millis() as u64, "Simulator timed out");
                self.terminate_logged(&mut child).await;
                Err(RunnerError::TimedOut(limit))
            }
        }
    }

    /// Ask `child` to exit, wait a bounded time, then kill it.
    ///
    /// On return the child has exited and been reaped.
    pub async fn terminate(&self, child: &mut Child) -> std::io::Result<()> {
        if child.try_wait()?.is_some() {
            return Ok(());
        }

        request_exit(child);
        for _ in 0..self.termination.max_polls {
            if child.try_wait()?.is_some() {
                return Ok(());
            }
            tokio::time::sleep(self.termination.poll_interval()).await;
        }

        if child.try_wait()?.is_none() {
            warn!(pid = ?child.id(), "Simulator ignored termination request, killing");
            child.kill().await?;
        }
        Ok(())
    }

    async fn terminate_logged(&self, child: &mut Child) {
        if let Err(e) = self.terminate(child).await {
            // kill_on_drop still applies when the handle goes away.
            warn!(error = %e, "Failed to terminate simulator");
        }
    }
}

async fn deadline(timeout: Option<Duration>) {
    match timeout {
        Some(limit) => tokio::time::sleep(limit).await,
        None => std::future::pending().await,
    }
}

#[cfg(unix)]
fn request_exit(child: &mut Child) {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    let Some(pid) = child.id().and_then(|id| i32::try_from(id).ok()) else {
        return;
    };
    if let Err(e) = kill(Pid::from_raw(pid), Signal::SIGTERM) {
        debug!(pid, error = %e, "SIGTERM failed");
    }
}

#[cfg(not(unix))]
fn request_exit(child: &mut Child) {
    if let Err(e) = child.start_kill() {
        debug!(error = %e, "Kill request failed");
    }
}
