//! Per-device run types.

use super::process::{ProcessHandle, ProcessState};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use uuid::Uuid;

/// Stage of a device pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceState {
    Pending,
    CheckingAvailability,
    /// Dropped from the run; terminal.
    Skipped,
    Admitted,
    DirectoryCreated,
    Reserved,
    BridgeConnected,
    ServerStarted,
    ClientStarted,
    /// Both processes recorded; admission for this device is over.
    Registered,
    Running,
    ExitedOk,
    ExitedWithError,
}

impl DeviceState {
    /// State a running device ends in once its test runner finishes.
    pub fn after_exit(state: &ProcessState) -> Self {
        match state {
            ProcessState::ExitedOk => DeviceState::ExitedOk,
            _ => DeviceState::ExitedWithError,
        }
    }
}

impl std::fmt::Display for DeviceState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            DeviceState::Pending => "pending",
            DeviceState::CheckingAvailability => "checking_availability",
            DeviceState::Skipped => "skipped",
            DeviceState::Admitted => "admitted",
            DeviceState::DirectoryCreated => "directory_created",
            DeviceState::Reserved => "reserved",
            DeviceState::BridgeConnected => "bridge_connected",
            DeviceState::ServerStarted => "server_started",
            DeviceState::ClientStarted => "client_started",
            DeviceState::Registered => "registered",
            DeviceState::Running => "running",
            DeviceState::ExitedOk => "exited_ok",
            DeviceState::ExitedWithError => "exited_with_error",
        };
        f.write_str(name)
    }
}

/// Fixed inputs of one device run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunContext {
    pub serial: String,
    pub automation_port: u16,
    pub bootstrap_port: u16,
    pub session_dir: PathBuf,
}

impl RunContext {
    pub fn device_path(&self) -> PathBuf {
        self.session_dir.join(&self.serial)
    }
}

/// Registry key of a process pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PairKey {
    pub run_id: Uuid,
    pub client_pid: u32,
}

impl std::fmt::Display for PairKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.run_id, self.client_pid)
    }
}

/// Automation server and test runner of one device, supervised together.
#[derive(Debug)]
pub struct ProcessPair {
    pub run_id: Uuid,
    pub serial: String,
    pub device_path: PathBuf,
    pub remote_connect_url: String,
    pub server: ProcessHandle,
    pub client: ProcessHandle,
}

impl ProcessPair {
    pub fn key(&self) -> PairKey {
        PairKey {
            run_id: self.run_id,
            client_pid: self.client.pid(),
        }
    }

    /// Kill whichever of the two processes is still alive.
    pub async fn kill(&self) {
        self.client.kill().await;
        self.server.kill().await;
    }
}

/// Outcome of one device's admission.
#[derive(Debug, Clone, Serialize)]
pub struct DeviceReport {
    pub serial: String,
    pub automation_port: u16,
    pub bootstrap_port: u16,
    /// `Registered` or `Skipped`.
    pub state: DeviceState,
    /// Last stage completed before the pipeline stopped.
    pub reached: DeviceState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_pid: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Result of admitting every device in the list.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub session_dir: PathBuf,
    pub devices: Vec<DeviceReport>,
}

impl RunReport {
    pub fn registered(&self) -> impl Iterator<Item = &DeviceReport> {
        self.devices
            .iter()
            .filter(|d| d.state == DeviceState::Registered)
    }

    pub fn skipped(&self) -> impl Iterator<Item = &DeviceReport> {
        self.devices.iter().filter(|d| d.state == DeviceState::Skipped)
    }
}
