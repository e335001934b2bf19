//! Error types for the farm runner.
//!
//! Every error carries a policy describing how far it propagates: a device
//! failure skips that device, a run failure aborts before any device work, and
//! farm bookkeeping failures are logged and swallowed so the run continues.

use thiserror::Error;

/// How an error is handled once it reaches the pipeline boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorPolicy {
    /// Abort this device's pipeline and continue with the next device.
    SkipDevice,
    /// Abort the whole run before any device pipeline starts.
    AbortRun,
    /// Log and continue; the caller does not observe a failure.
    LogAndContinue,
}

/// Errors raised while orchestrating a test run.
#[derive(Error, Debug)]
pub enum RunError {
    #[error("Device ({0}) is not available")]
    DeviceUnavailable(String),

    #[error("Wrong port range: {0}")]
    PortRange(String),

    #[error("I/O error: {0}")]
    Io(String),

    #[error("Failed to spawn {process}: {reason}")]
    SpawnFailure { process: String, reason: String },

    #[error("Could not reserve device {serial}: {reason}")]
    ReservationFailed { serial: String, reason: String },

    #[error("Bridge connection to {0} failed")]
    BridgeConnectFailed(String),

    #[error("Device farm API error: {0}")]
    FarmApi(String),

    #[error("Device {0} already has a running process pair")]
    AlreadyRunning(String),

    #[error("No devices to run on")]
    NoDevices,

    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl RunError {
    /// The propagation policy for this error.
    pub fn policy(&self) -> ErrorPolicy {
        match self {
            RunError::PortRange(_) | RunError::NoDevices | RunError::Config(_) => {
                ErrorPolicy::AbortRun
            }
            RunError::FarmApi(_) => ErrorPolicy::LogAndContinue,
            RunError::DeviceUnavailable(_)
            | RunError::Io(_)
            | RunError::SpawnFailure { .. }
            | RunError::ReservationFailed { .. }
            | RunError::BridgeConnectFailed(_)
            | RunError::AlreadyRunning(_) => ErrorPolicy::SkipDevice,
        }
    }

    pub(crate) fn io(context: impl std::fmt::Display, err: std::io::Error) -> Self {
        RunError::Io(format!("{}: {}", context, err))
    }
}

impl From<reqwest::Error> for RunError {
    fn from(e: reqwest::Error) -> Self {
        RunError::FarmApi(e.to_string())
    }
}

impl From<serde_json::Error> for RunError {
    fn from(e: serde_json::Error) -> Self {
        RunError::Config(e.to_string())
    }
}
