//! Local device bridge (`adb connect` / `adb disconnect`).

use crate::error::RunError;
use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info};

/// Connects the local machine to a farm-provided device endpoint.
#[async_trait]
pub trait DeviceBridge: Send + Sync {
    async fn connect(&self, remote_connect_url: &str) -> Result<(), RunError>;
    async fn disconnect(&self, remote_connect_url: &str) -> Result<(), RunError>;
}

/// [`DeviceBridge`] that shells out to the `adb` binary.
pub struct AdbBridge {
    adb_path: String,
}

impl AdbBridge {
    pub fn new(adb_path: impl Into<String>) -> Self {
        Self {
            adb_path: adb_path.into(),
        }
    }

    async fn run(&self, verb: &str, remote_connect_url: &str) -> Result<String, RunError> {
        let output = Command::new(&self.adb_path)
            .args([verb, remote_connect_url])
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| RunError::io(format!("{} {}", self.adb_path, verb), e))?;

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        debug!(
            verb = verb,
            url = %remote_connect_url,
            status = %output.status,
            stdout = %stdout.trim(),
            "adb finished"
        );
        if !output.status.success() {
            return Err(RunError::BridgeConnectFailed(remote_connect_url.to_string()));
        }
        Ok(stdout)
    }
}

#[async_trait]
impl DeviceBridge for AdbBridge {
    async fn connect(&self, remote_connect_url: &str) -> Result<(), RunError> {
        let stdout = self.run("connect", remote_connect_url).await?;
        if !confirms_connection(&stdout, remote_connect_url) {
            return Err(RunError::BridgeConnectFailed(remote_connect_url.to_string()));
        }
        info!(url = %remote_connect_url, "ADB connection established");
        Ok(())
    }

    async fn disconnect(&self, remote_connect_url: &str) -> Result<(), RunError> {
        self.run("disconnect", remote_connect_url).await?;
        info!(url = %remote_connect_url, "ADB connection closed");
        Ok(())
    }
}

/// True if some output line is exactly `connected to <url>`.
pub fn confirms_connection(stdout: &str, remote_connect_url: &str) -> bool {
    let expected = format!("connected to {}", remote_connect_url);
    stdout.lines().any(|line| line.trim() == expected)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matches_exact_line() {
        let out = "* daemon started successfully *\nconnected to farm.local:7401\n";
        assert!(confirms_connection(out, "farm.local:7401"));
    }

    #[test]
    fn ignores_other_endpoints_and_failures() {
        assert!(!confirms_connection("connected to farm.local:7402\n", "farm.local:7401"));
        assert!(!confirms_connection(
            "failed to connect to farm.local:7401\n",
            "farm.local:7401"
        ));
        assert!(!confirms_connection(
            "already connected to farm.local:7401\n",
            "farm.local:7401"
        ));
        assert!(!confirms_connection("", "farm.local:7401"));
    }

    #[tokio::test]
    async fn missing_binary_is_an_io_error() {
        let bridge = AdbBridge::new("/nonexistent/adb-for-tests");
        let err = bridge.connect("farm.local:7401").await.unwrap_err();
        assert!(matches!(err, RunError::Io(_)));
    }
}
