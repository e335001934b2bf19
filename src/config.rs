//! Run configuration.
//!
//! A [`RunConfig`] is assembled once at startup from the command line and the
//! optional JSON config file, then shared by reference for the whole run.

use crate::error::RunError;
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Default port range for the automation server REST interface.
pub const DEFAULT_REST_PORTS: PortRange = PortRange {
    min: 4723,
    max: 4823,
};
/// Default port range for the automation server bootstrap channel.
pub const DEFAULT_BOOTSTRAP_PORTS: PortRange = PortRange {
    min: 5723,
    max: 5823,
};

/// Inclusive port range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct PortRange {
    pub min: u16,
    pub max: u16,
}

/// Port ranges for both automation server listeners.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct ServerPorts {
    pub rest: PortRange,
    pub bootstrap: PortRange,
}

impl Default for ServerPorts {
    fn default() -> Self {
        Self {
            rest: DEFAULT_REST_PORTS,
            bootstrap: DEFAULT_BOOTSTRAP_PORTS,
        }
    }
}

/// Contents of the JSON config file. Every field is optional.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileConfig {
    #[serde(alias = "appiumPath")]
    pub server_path: Option<String>,
    #[serde(alias = "appiumAddress")]
    pub server_address: Option<String>,
    pub java_path: Option<String>,
    pub adb_path: Option<String>,
    #[serde(rename = "ANDROID_HOME", alias = "androidHome")]
    pub android_home: Option<String>,
    pub windows_server_script: Option<String>,
    pub output_path: Option<PathBuf>,
    #[serde(default)]
    pub devices_list: Vec<String>,
    #[serde(alias = "appiumPorts")]
    pub server_ports: Option<ServerPorts>,
}

impl FileConfig {
    /// Parse a config file from disk.
    pub fn load(path: &Path) -> Result<Self, RunError> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| RunError::Config(format!("{}: {}", path.display(), e)))?;
        Self::parse(&text)
    }

    /// Parse config file contents.
    pub fn parse(text: &str) -> Result<Self, RunError> {
        Ok(serde_json::from_str(text)?)
    }
}

/// Connection settings for the device farm.
#[derive(Debug, Clone)]
pub struct FarmConfig {
    pub address: String,
    pub auth_token: String,
    pub accept_self_signed: bool,
}

/// How the automation server and test runner are launched.
#[derive(Debug, Clone)]
pub struct LaunchConfig {
    pub server_path: String,
    pub server_address: String,
    pub java_path: String,
    pub android_home: Option<String>,
    /// Script passed to `node` when launching the server on Windows.
    pub windows_server_script: Option<String>,
    pub test_artifact: PathBuf,
    /// Empty when no APK is given; the test runner still receives the argument.
    pub apk_path: String,
}

/// Values taken from the command line.
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub output_path: Option<PathBuf>,
    pub devices: Vec<String>,
    pub apk_path: Option<String>,
}

/// Fully resolved configuration for one run.
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub farm: FarmConfig,
    pub launch: LaunchConfig,
    pub adb_path: String,
    pub output_path: PathBuf,
    pub devices: Vec<String>,
    pub ports: ServerPorts,
}

impl RunConfig {
    /// Merge command-line values over the config file.
    pub fn resolve(
        farm: FarmConfig,
        test_artifact: PathBuf,
        file: FileConfig,
        cli: CliOverrides,
    ) -> Self {
        let devices = if cli.devices.is_empty() {
            file.devices_list
        } else {
            cli.devices
        };

        Self {
            farm,
            launch: LaunchConfig {
                server_path: file.server_path.unwrap_or_else(|| "appium".to_string()),
                server_address: file
                    .server_address
                    .unwrap_or_else(|| "127.0.0.1".to_string()),
                java_path: file.java_path.unwrap_or_else(|| "java".to_string()),
                android_home: file.android_home,
                windows_server_script: file.windows_server_script,
                test_artifact,
                apk_path: cli.apk_path.unwrap_or_default(),
            },
            adb_path: file.adb_path.unwrap_or_else(|| "adb".to_string()),
            output_path: cli
                .output_path
                .or(file.output_path)
                .unwrap_or_else(|| PathBuf::from("output")),
            devices,
            ports: file.server_ports.unwrap_or_default(),
        }
    }
}

/// Split a comma separated device list, dropping blanks.
pub fn parse_device_list(list: &str) -> Vec<String> {
    list.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}
