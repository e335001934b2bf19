//! Process supervisor for device runs.
//!
//! Owns the [`ChildRegistry`] and tears a pair down when its test runner
//! finishes: release the device, close the bridge, kill what is left.

use super::launcher::{ClientLaunch, ProcessLauncher, ServerLaunch};
use super::process::{ProcessHandle, ProcessState};
use super::registry::ChildRegistry;
use super::types::{DeviceState, PairKey, ProcessPair};
use crate::bridge::DeviceBridge;
use crate::error::RunError;
use crate::farm::{DeviceFarm, ReleaseOutcome};
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Spawns, registers and tears down process pairs for one run.
pub struct ProcessSupervisor {
    run_id: Uuid,
    registry: ChildRegistry,
    launcher: Arc<dyn ProcessLauncher>,
    farm: Arc<dyn DeviceFarm>,
    bridge: Arc<dyn DeviceBridge>,
}

impl ProcessSupervisor {
    pub fn new(
        launcher: Arc<dyn ProcessLauncher>,
        farm: Arc<dyn DeviceFarm>,
        bridge: Arc<dyn DeviceBridge>,
    ) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            registry: ChildRegistry::new(),
            launcher,
            farm,
            bridge,
        }
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn registry(&self) -> &ChildRegistry {
        &self.registry
    }

    pub async fn spawn_server(&self, launch: &ServerLaunch) -> Result<ProcessHandle, RunError> {
        self.launcher.spawn_server(launch).await
    }

    pub async fn spawn_client(&self, launch: &ClientLaunch) -> Result<ProcessHandle, RunError> {
        self.launcher.spawn_client(launch).await
    }

    /// Record a pair. If the serial already has a live pair, the new pair's
    /// processes are killed and the registration fails.
    pub async fn register(&self, pair: ProcessPair) -> Result<PairKey, RunError> {
        match self.registry.insert(pair) {
            Ok(key) => {
                debug!(key = %key, "Process pair registered");
                Ok(key)
            }
            Err((e, rejected)) => {
                rejected.kill().await;
                Err(e)
            }
        }
    }

    /// Tear the pair down when its test runner exits or fails.
    ///
    /// Returns `false` if the pair is not registered any more.
    pub fn on_terminal(self: &Arc<Self>, key: PairKey) -> bool {
        let Some((client, server)) = self
            .registry
            .with_pair(&key, |pair| (pair.client.watch(), pair.server.watch()))
        else {
            return false;
        };

        tokio::spawn(async move {
            let (pid, name) = (server.pid(), server.name());
            let state = server.finished().await;
            debug!(pid = pid, state = %state, "{} exited", name);
        });

        let supervisor = Arc::clone(self);
        tokio::spawn(async move {
            let state = client.finished().await;
            supervisor.handle_terminal(&key, state).await;
        });
        true
    }

    /// Attach terminal handling to every registered pair.
    pub fn watch_all(self: &Arc<Self>) -> usize {
        self.registry
            .keys()
            .into_iter()
            .filter(|key| self.on_terminal(*key))
            .count()
    }

    /// Handle a terminal event of a pair's test runner.
    ///
    /// Only the first event for a key does anything; later ones return `false`.
    /// The pair counts as live until release, disconnect and kill are done.
    pub async fn handle_terminal(&self, key: &PairKey, state: ProcessState) -> bool {
        let Some(pair) = self.registry.claim(key) else {
            debug!(key = %key, state = %state, "Terminal event for unregistered pair ignored");
            return false;
        };

        match &state {
            ProcessState::ExitedOk => info!(
                serial = %pair.serial,
                pid = key.client_pid,
                folder = %pair.device_path.display(),
                "Test finished"
            ),
            other => warn!(
                serial = %pair.serial,
                pid = key.client_pid,
                folder = %pair.device_path.display(),
                state = %other,
                "Test runner failed"
            ),
        }

        self.release_device(&pair.serial).await;
        if let Err(e) = self.bridge.disconnect(&pair.remote_connect_url).await {
            debug!(serial = %pair.serial, error = %e, "Bridge disconnect failed");
        }
        pair.kill().await;
        self.registry.complete(key);

        debug!(
            serial = %pair.serial,
            state = %DeviceState::after_exit(&state),
            "Device run complete"
        );
        true
    }

    /// Kill every registered pair and wait for teardowns already in
    /// progress. Used only at global teardown.
    pub async fn kill_all(&self) -> usize {
        let pairs = self.registry.drain();
        if !pairs.is_empty() {
            info!(count = pairs.len(), "Killing all child processes");
        }
        for pair in &pairs {
            pair.kill().await;
        }
        self.registry.wait_until_empty().await;
        pairs.len()
    }

    /// Wait until every registered pair has been fully torn down.
    pub async fn wait_until_idle(&self) {
        self.registry.wait_until_empty().await;
    }

    /// Release a device, logging instead of failing.
    pub(crate) async fn release_device(&self, serial: &str) {
        match self.farm.release(serial).await {
            Ok(ReleaseOutcome::Released) => {}
            Ok(outcome) => debug!(serial = %serial, outcome = ?outcome, "Device not released"),
            Err(e) => error!(serial = %serial, error = %e, "Releasing device failed; continuing"),
        }
    }
}
