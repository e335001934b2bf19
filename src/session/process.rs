//! Child process handles.
//!
//! Each spawned process is owned by one supervision task. The task publishes a
//! single terminal [`ProcessState`] on a watch channel, so a process that both
//! fails and exits is only ever observed finishing once.

use crate::error::RunError;
use std::io;
use std::process::ExitStatus;
use std::sync::Arc;
use std::time::Duration;
use tokio::process::{Child, Command};
use tokio::sync::{watch, Notify};
use tokio::time::timeout;
use tracing::{debug, warn};

/// How long `kill` waits for the process to be reaped.
const KILL_TIMEOUT_SECS: u64 = 10;

/// How long a process gets to exit after SIGTERM before it is force killed.
const TERM_GRACE_SECS: u64 = 5;

/// Lifecycle of a supervised process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessState {
    Running,
    ExitedOk,
    /// Non-zero exit, signal, wait failure or kill.
    ExitedError(String),
}

impl ProcessState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ProcessState::Running)
    }

    fn from_wait(result: io::Result<ExitStatus>) -> Self {
        match result {
            Ok(status) if status.success() => ProcessState::ExitedOk,
            Ok(status) => ProcessState::ExitedError(status.to_string()),
            Err(e) => ProcessState::ExitedError(e.to_string()),
        }
    }
}

/// Ask the process to stop with SIGTERM, then force kill it after
/// [`TERM_GRACE_SECS`].
async fn terminate(child: &mut Child, pid: u32, name: &'static str) -> ProcessState {
    #[cfg(unix)]
    {
        use nix::sys::signal::{kill, Signal};
        use nix::unistd::Pid;

        #[allow(clippy::cast_possible_wrap)]
        let target = Pid::from_raw(pid as i32);
        match kill(target, Signal::SIGTERM) {
            Ok(()) => {
                let grace = Duration::from_secs(TERM_GRACE_SECS);
                if timeout(grace, child.wait()).await.is_ok() {
                    return ProcessState::ExitedError("killed".to_string());
                }
                warn!(pid = pid, process = name, "Process ignored SIGTERM; killing");
            }
            Err(e) => debug!(pid = pid, process = name, error = %e, "SIGTERM failed"),
        }
    }

    match child.kill().await {
        Ok(()) => ProcessState::ExitedError("killed".to_string()),
        Err(e) => {
            warn!(pid = pid, process = name, error = %e, "Kill failed");
            ProcessState::ExitedError(format!("kill failed: {}", e))
        }
    }
}

impl std::fmt::Display for ProcessState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProcessState::Running => write!(f, "running"),
            ProcessState::ExitedOk => write!(f, "exited ok"),
            ProcessState::ExitedError(reason) => write!(f, "exited with error ({})", reason),
        }
    }
}

/// Handle to a supervised child process.
pub struct ProcessHandle {
    pid: u32,
    name: &'static str,
    state: watch::Receiver<ProcessState>,
    kill: Arc<Notify>,
}

impl ProcessHandle {
    /// Spawn `command` and start supervising it.
    pub fn spawn(name: &'static str, mut command: Command) -> Result<Self, RunError> {
        let spawn_failure = |reason: String| RunError::SpawnFailure {
            process: name.to_string(),
            reason,
        };

        let mut child = command
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| spawn_failure(e.to_string()))?;
        let pid = child
            .id()
            .ok_or_else(|| spawn_failure("exited before reporting a pid".to_string()))?;

        let (tx, rx) = watch::channel(ProcessState::Running);
        let kill = Arc::new(Notify::new());
        let kill_requested = kill.clone();

        tokio::spawn(async move {
            let state = tokio::select! {
                result = child.wait() => ProcessState::from_wait(result),
                _ = kill_requested.notified() => terminate(&mut child, pid, name).await,
            };
            debug!(pid = pid, process = name, state = %state, "Process finished");
            tx.send_replace(state);
        });

        Ok(Self {
            pid,
            name,
            state: rx,
            kill,
        })
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Current state without waiting.
    pub fn state(&self) -> ProcessState {
        self.state.borrow().clone()
    }

    pub fn is_running(&self) -> bool {
        !self.state.borrow().is_terminal()
    }

    /// A detached watcher that resolves once the process finishes.
    pub fn watch(&self) -> ProcessWatch {
        ProcessWatch {
            pid: self.pid,
            name: self.name,
            state: self.state.clone(),
        }
    }

    /// Wait for the terminal state.
    pub async fn wait(&self) -> ProcessState {
        self.watch().finished().await
    }

    /// Kill the process if it is still running and wait for it to be reaped.
    pub async fn kill(&self) {
        if !self.is_running() {
            return;
        }
        self.kill.notify_one();
        if timeout(Duration::from_secs(KILL_TIMEOUT_SECS), self.wait())
            .await
            .is_err()
        {
            warn!(pid = self.pid, process = self.name, "Process did not stop after kill");
        }
    }
}

impl std::fmt::Debug for ProcessHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessHandle")
            .field("pid", &self.pid)
            .field("name", &self.name)
            .field("state", &*self.state.borrow())
            .finish()
    }
}

/// Completion notification for one process, detached from its handle.
pub struct ProcessWatch {
    pid: u32,
    name: &'static str,
    state: watch::Receiver<ProcessState>,
}

impl ProcessWatch {
    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Resolve with the terminal state. Fires once per watcher.
    pub async fn finished(mut self) -> ProcessState {
        match self.state.wait_for(ProcessState::is_terminal).await {
            Ok(state) => state.clone(),
            Err(_) => ProcessState::ExitedError("supervision task ended".to_string()),
        }
    }
}

#[cfg(test)]
pub(crate) use manual::ProcessControl;


#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn sh(script: &str) -> Command {
        let mut cmd = Command::new("sh");
        cmd.args(["-c", script]);
        cmd
    }

    #[tokio::test]
    async fn successful_exit() {
        let handle = ProcessHandle::spawn("test", sh("exit 0")).expect("spawn");
        assert_eq!(handle.wait().await, ProcessState::ExitedOk);
        assert!(!handle.is_running());
    }

    #[tokio::test]
    async fn failing_exit() {
        let handle = ProcessHandle::spawn("test", sh("exit 3")).expect("spawn");
        assert!(matches!(handle.wait().await, ProcessState::ExitedError(_)));
    }

    #[tokio::test]
    async fn kill_running_process() {
        let handle = ProcessHandle::spawn("test", sh("sleep 30")).expect("spawn");
        assert!(handle.is_running());
        handle.kill().await;
        assert_eq!(handle.state(), ProcessState::ExitedError("killed".to_string()));
    }

    #[tokio::test]
    async fn kill_lets_process_handle_sigterm() {
        let dir = tempfile::tempdir().expect("tempdir");
        let marker = dir.path().join("terminated");
        let script = format!(
            "trap 'touch {}; exit 0' TERM; while true; do sleep 0.1; done",
            marker.display()
        );
        let handle = ProcessHandle::spawn("test", sh(&script)).expect("spawn");
        tokio::time::sleep(Duration::from_millis(200)).await;

        handle.kill().await;
        assert_eq!(handle.state(), ProcessState::ExitedError("killed".to_string()));
        assert!(marker.exists(), "SIGTERM trap should have run");
    }

    #[tokio::test]
    async fn kill_after_exit_is_noop() {
        let handle = ProcessHandle::spawn("test", sh("exit 0")).expect("spawn");
        handle.wait().await;
        handle.kill().await;
        assert_eq!(handle.state(), ProcessState::ExitedOk);
    }

    #[tokio::test]
    async fn every_watcher_sees_the_same_terminal_state() {
        let handle = ProcessHandle::spawn("test", sh("exit 0")).expect("spawn");
        let first = handle.watch();
        let second = handle.watch();
        assert_eq!(first.finished().await, ProcessState::ExitedOk);
        assert_eq!(second.finished().await, ProcessState::ExitedOk);
    }

    #[tokio::test]
    async fn missing_binary_is_spawn_failure() {
        let err = ProcessHandle::spawn("test", Command::new("/nonexistent/binary")).unwrap_err();
        assert!(matches!(err, RunError::SpawnFailure { .. }));
    }

    #[tokio::test]
    async fn manual_handle_counts_kills() {
        let (handle, control) = ProcessHandle::manual("fake", 42);
        handle.kill().await;
        handle.kill().await;
        assert_eq!(control.kill_count(), 1);
        assert!(!handle.is_running());
    }
}
