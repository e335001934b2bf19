//! Per-device admission pipeline and global teardown.
//!
//! Devices are admitted one at a time in list order. Admission ends when a
//! device's process pair is registered; from then on the pair runs on its own
//! while the next device is admitted. A failing device is skipped and never
//! stops the run.

use super::directory::SessionDirectories;
use super::launcher::{ClientLaunch, ProcessLauncher, ServerLaunch};
use super::port_allocator::PortAllocator;
use super::process::ProcessHandle;
use super::supervisor::ProcessSupervisor;
use super::types::{DeviceReport, DeviceState, PairKey, ProcessPair, RunContext, RunReport};
use crate::bridge::DeviceBridge;
use crate::config::RunConfig;
use crate::error::RunError;
use crate::farm::DeviceFarm;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// User name used for the session directory if the farm cannot tell us.
const UNKNOWN_USER: &str = "unknown";

/// Drives a whole test run.
pub struct Orchestrator {
    config: Arc<RunConfig>,
    farm: Arc<dyn DeviceFarm>,
    bridge: Arc<dyn DeviceBridge>,
    directories: SessionDirectories,
    ports: PortAllocator,
    supervisor: Arc<ProcessSupervisor>,
}

/// Tracks how far one device got, for logging and the run report.
struct Pipeline<'a> {
    serial: &'a str,
    state: DeviceState,
}

impl<'a> Pipeline<'a> {
    fn new(serial: &'a str) -> Self {
        Self {
            serial,
            state: DeviceState::Pending,
        }
    }

    fn advance(&mut self, next: DeviceState) {
        debug!(serial = %self.serial, from = %self.state, to = %next, "Pipeline transition");
        self.state = next;
    }
}

impl Orchestrator {
    pub fn new(
        config: Arc<RunConfig>,
        farm: Arc<dyn DeviceFarm>,
        bridge: Arc<dyn DeviceBridge>,
        launcher: Arc<dyn ProcessLauncher>,
    ) -> Self {
        let supervisor = Arc::new(ProcessSupervisor::new(
            launcher,
            farm.clone(),
            bridge.clone(),
        ));
        Self {
            config,
            farm,
            bridge,
            directories: SessionDirectories::new(),
            ports: PortAllocator::new(),
            supervisor,
        }
    }

    pub fn supervisor(&self) -> &Arc<ProcessSupervisor> {
        &self.supervisor
    }

    /// Admit every configured device, then attach terminal handling to every
    /// registered pair.
    ///
    /// Returns once admission is over; the registered pairs keep running.
    /// Errors are run-level only: an empty device list, a bad port range or an
    /// unusable output directory.
    pub async fn run(&self) -> Result<RunReport, RunError> {
        let serials = &self.config.devices;
        if serials.is_empty() {
            return Err(RunError::NoDevices);
        }

        let ranges = self.config.ports;
        let rest_ports = self
            .ports
            .allocate(serials.len(), ranges.rest.min, ranges.rest.max)?;
        let bootstrap_ports =
            self.ports
                .allocate(serials.len(), ranges.bootstrap.min, ranges.bootstrap.max)?;

        let user_name = match self.farm.current_user().await {
            Ok(user) => user.name,
            Err(e) => {
                warn!(error = %e, "Could not look up current user");
                UNKNOWN_USER.to_string()
            }
        };
        let session_dir = self
            .directories
            .create_session_root(&self.config.output_path, &user_name)
            .await?;
        info!(path = %session_dir.display(), "Directory for this session");

        let mut devices = Vec::with_capacity(serials.len());
        for (i, serial) in serials.iter().enumerate() {
            let context = RunContext {
                serial: serial.clone(),
                automation_port: rest_ports[i],
                bootstrap_port: bootstrap_ports[i],
                session_dir: session_dir.clone(),
            };
            devices.push(self.admit(&context).await);
        }
        info!("Iterating devices list done");

        let watched = self.supervisor.watch_all();
        debug!(pairs = watched, "Terminal listeners attached");

        Ok(RunReport {
            run_id: self.supervisor.run_id(),
            session_dir,
            devices,
        })
    }

    /// Wait until every registered pair has finished.
    pub async fn wait_for_completion(&self) {
        self.supervisor.wait_until_idle().await;
    }

    /// Kill every tracked process, then release every device held by the user.
    pub async fn teardown(&self) {
        let killed = self.supervisor.kill_all().await;
        let released = self.farm.release_all().await;
        info!(killed = killed, released = released, "Exiting");
    }

    /// Run one device through admission. Never fails the run.
    async fn admit(&self, context: &RunContext) -> DeviceReport {
        let mut pipeline = Pipeline::new(&context.serial);
        let result = self.admit_device(context, &mut pipeline).await;

        let mut report = DeviceReport {
            serial: context.serial.clone(),
            automation_port: context.automation_port,
            bootstrap_port: context.bootstrap_port,
            state: DeviceState::Skipped,
            reached: pipeline.state,
            client_pid: None,
            error: None,
        };

        match result {
            Ok(key) => {
                report.state = DeviceState::Registered;
                report.client_pid = Some(key.client_pid);
            }
            Err(e) => {
                match (&e, pipeline.state) {
                    (RunError::DeviceUnavailable(_), _) => {
                        info!(serial = %context.serial, "Omitting device")
                    }
                    (_, DeviceState::BridgeConnected) => error!(
                        serial = %context.serial,
                        port = context.automation_port,
                        error = %e,
                        "Automation server could not be started"
                    ),
                    (_, reached) => warn!(
                        serial = %context.serial,
                        reached = %reached,
                        error = %e,
                        "Device pipeline aborted"
                    ),
                }
                report.error = Some(e.to_string());
            }
        }
        report
    }

    async fn admit_device(
        &self,
        context: &RunContext,
        pipeline: &mut Pipeline<'_>,
    ) -> Result<PairKey, RunError> {
        let serial = context.serial.as_str();
        pipeline.advance(DeviceState::CheckingAvailability);
        if self.supervisor.registry().contains_serial(serial) {
            return Err(RunError::AlreadyRunning(serial.to_string()));
        }
        self.farm.check_availability(serial).await?;
        pipeline.advance(DeviceState::Admitted);

        let device_path = self
            .directories
            .create_device_dir(&context.session_dir, serial)
            .await?;
        info!(serial = %serial, "Directory structure for device created");
        pipeline.advance(DeviceState::DirectoryCreated);

        let remote_connect_url = self.farm.reserve(serial).await?;
        pipeline.advance(DeviceState::Reserved);

        match self
            .start_pair(context, &device_path, &remote_connect_url, pipeline)
            .await
        {
            Ok(key) => Ok(key),
            Err(e) => {
                if !matches!(e, RunError::AlreadyRunning(_)) {
                    self.supervisor.release_device(serial).await;
                }
                Err(e)
            }
        }
    }

    async fn start_pair(
        &self,
        context: &RunContext,
        device_path: &Path,
        remote_connect_url: &str,
        pipeline: &mut Pipeline<'_>,
    ) -> Result<PairKey, RunError> {
        let serial = context.serial.as_str();

        self.bridge.connect(remote_connect_url).await?;
        pipeline.advance(DeviceState::BridgeConnected);

        let server = self
            .supervisor
            .spawn_server(&ServerLaunch {
                serial: serial.to_string(),
                address: self.config.launch.server_address.clone(),
                port: context.automation_port,
                bootstrap_port: context.bootstrap_port,
                work_dir: device_path.to_path_buf(),
            })
            .await?;
        info!(serial = %serial, port = context.automation_port, "Automation server started");
        pipeline.advance(DeviceState::ServerStarted);

        let (client, client_url) = match self.start_client(context, device_path).await {
            Ok(started) => started,
            Err(e) => {
                server.kill().await;
                return Err(e);
            }
        };
        pipeline.advance(DeviceState::ClientStarted);

        let key = self
            .supervisor
            .register(ProcessPair {
                run_id: self.supervisor.run_id(),
                serial: serial.to_string(),
                device_path: device_path.to_path_buf(),
                remote_connect_url: client_url,
                server,
                client,
            })
            .await?;
        pipeline.advance(DeviceState::Registered);
        Ok(key)
    }

    async fn start_client(
        &self,
        context: &RunContext,
        device_path: &Path,
    ) -> Result<(ProcessHandle, String), RunError> {
        let info = self.farm.device_info(&context.serial).await?;
        let launch = self.config.launch.clone();
        let client = self
            .supervisor
            .spawn_client(&ClientLaunch {
                serial: context.serial.clone(),
                test_artifact: launch.test_artifact,
                remote_connect_url: info.remote_connect_url.clone(),
                platform: info.platform,
                version: info.version,
                server_address: launch.server_address,
                server_port: context.automation_port,
                apk_path: launch.apk_path,
                work_dir: PathBuf::from(device_path),
            })
            .await?;
        Ok((client, info.remote_connect_url))
    }
}
