//! Launching the automation server and the test runner.

use super::process::ProcessHandle;
use crate::config::LaunchConfig;
use crate::error::RunError;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::fs::OpenOptions;
use tokio::process::Command;
use tracing::info;

pub const SERVER_PROCESS: &str = "automation server";
pub const CLIENT_PROCESS: &str = "test runner";

/// Everything needed to start an automation server for one device.
#[derive(Debug, Clone)]
pub struct ServerLaunch {
    pub serial: String,
    pub address: String,
    pub port: u16,
    pub bootstrap_port: u16,
    pub work_dir: PathBuf,
}

/// Everything needed to start the test runner for one device.
#[derive(Debug, Clone)]
pub struct ClientLaunch {
    pub serial: String,
    pub test_artifact: PathBuf,
    pub remote_connect_url: String,
    pub platform: String,
    pub version: String,
    pub server_address: String,
    pub server_port: u16,
    pub apk_path: String,
    pub work_dir: PathBuf,
}

/// Starts the two processes of a device run.
#[async_trait]
pub trait ProcessLauncher: Send + Sync {
    async fn spawn_server(&self, launch: &ServerLaunch) -> Result<ProcessHandle, RunError>;
    async fn spawn_client(&self, launch: &ClientLaunch) -> Result<ProcessHandle, RunError>;
}

/// [`ProcessLauncher`] that starts real executables with logs under
/// `<work_dir>/log`.
pub struct CommandLauncher {
    config: LaunchConfig,
}

impl CommandLauncher {
    pub fn new(config: LaunchConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl ProcessLauncher for CommandLauncher {
    async fn spawn_server(&self, launch: &ServerLaunch) -> Result<ProcessHandle, RunError> {
        let log_dir = launch.work_dir.join("log");
        let stdout = open_log(&log_dir.join("serverOut.log")).await?;
        let stderr = open_log(&log_dir.join("serverErr.log")).await?;

        let (program, args) = server_command(&self.config, launch, std::env::consts::OS);
        let mut command = Command::new(program);
        command
            .args(args)
            .stdin(Stdio::null())
            .stdout(stdout)
            .stderr(stderr);
        if let Some(android_home) = &self.config.android_home {
            command.env("ANDROID_HOME", android_home);
        }

        let handle = ProcessHandle::spawn(SERVER_PROCESS, command)?;
        info!(
            serial = %launch.serial,
            port = launch.port,
            pid = handle.pid(),
            "Automation server spawned"
        );
        Ok(handle)
    }

    async fn spawn_client(&self, launch: &ClientLaunch) -> Result<ProcessHandle, RunError> {
        let log_dir = launch.work_dir.join("log");
        let stdout = open_log(&log_dir.join("testOut.log")).await?;
        let stderr = open_log(&log_dir.join("testErr.log")).await?;

        let mut command = Command::new(&self.config.java_path);
        command
            .args(client_args(launch))
            .current_dir(&launch.work_dir)
            .stdin(Stdio::null())
            .stdout(stdout)
            .stderr(stderr);

        let handle = ProcessHandle::spawn(CLIENT_PROCESS, command)?;
        info!(serial = %launch.serial, pid = handle.pid(), "Test runner spawned");
        Ok(handle)
    }
}

/// Program and arguments for the automation server on the given OS.
fn server_command(config: &LaunchConfig, launch: &ServerLaunch, os: &str) -> (String, Vec<String>) {
    let mut args = Vec::new();
    let program = match (os, &config.windows_server_script) {
        ("windows", Some(script)) => {
            args.push(script.clone());
            "node".to_string()
        }
        _ => config.server_path.clone(),
    };
    args.extend([
        "--local-timezone".to_string(),
        "--address".to_string(),
        launch.address.clone(),
        "--port".to_string(),
        launch.port.to_string(),
        "--bootstrap-port".to_string(),
        launch.bootstrap_port.to_string(),
    ]);
    (program, args)
}

fn client_args(launch: &ClientLaunch) -> Vec<String> {
    vec![
        "-jar".to_string(),
        launch.test_artifact.display().to_string(),
        launch.remote_connect_url.clone(),
        launch.platform.clone(),
        launch.version.clone(),
        launch.server_address.clone(),
        launch.server_port.to_string(),
        launch.apk_path.clone(),
    ]
}

async fn open_log(path: &Path) -> Result<Stdio, RunError> {
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await
        .map_err(|e| RunError::io(path.display(), e))?;
    Ok(Stdio::from(file.into_std().await))
}
