//! In-memory farm, bridge and launcher used by unit tests.

use crate::bridge::DeviceBridge;
use crate::error::RunError;
use crate::farm::{DeviceFarm, DeviceInfo, ReleaseOutcome, User};
use crate::session::{
    is_port_free, ClientLaunch, ProcessControl, ProcessHandle, ProcessLauncher, ServerLaunch,
};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// First range `[start, start + len]`, at or above `start`, whose ports are
/// all free at the moment.
pub fn free_port_range(start: u16, len: u16) -> (u16, u16) {
    let mut start = start;
    loop {
        if (start..=start + len).all(is_port_free) {
            return (start, start + len);
        }
        start += len + 1;
    }
}

/// Ordered log of calls made into the fakes, shared between them.
pub type Events = Arc<Mutex<Vec<String>>>;

fn record(events: &Events, event: String) {
    events.lock().unwrap_or_else(|e| e.into_inner()).push(event);
}

#[derive(Default)]
pub struct FakeFarm {
    events: Events,
    unavailable: Mutex<HashSet<String>>,
    rejected: Mutex<HashSet<String>>,
    held: Mutex<HashSet<String>>,
    releases: Mutex<HashMap<String, usize>>,
    release_calls: Mutex<HashMap<String, usize>>,
    release_delay: Mutex<Option<Duration>>,
    fail_releases: AtomicBool,
}

impl FakeFarm {
    pub fn with_events(events: Events) -> Self {
        Self {
            events,
            ..Default::default()
        }
    }

    pub fn mark_unavailable(&self, serial: &str) {
        self.unavailable.lock().unwrap().insert(serial.to_string());
    }

    pub fn reject_reservation(&self, serial: &str) {
        self.rejected.lock().unwrap().insert(serial.to_string());
    }

    pub fn hold(&self, serial: &str) {
        self.held.lock().unwrap().insert(serial.to_string());
    }

    pub fn is_held(&self, serial: &str) -> bool {
        self.held.lock().unwrap().contains(serial)
    }

    pub fn fail_releases(&self) {
        self.fail_releases.store(true, Ordering::SeqCst);
    }

    /// Delay every release call, like a slow farm.
    pub fn slow_releases(&self, delay: Duration) {
        *self.release_delay.lock().unwrap() = Some(delay);
    }

    /// Release calls made for `serial`, held or not.
    pub fn release_calls(&self, serial: &str) -> usize {
        self.release_calls
            .lock()
            .unwrap()
            .get(serial)
            .copied()
            .unwrap_or(0)
    }

    /// Releases that actually gave a held device back.
    pub fn release_count(&self, serial: &str) -> usize {
        self.releases
            .lock()
            .unwrap()
            .get(serial)
            .copied()
            .unwrap_or(0)
    }
}

#[async_trait]
impl DeviceFarm for FakeFarm {
    async fn check_availability(&self, serial: &str) -> Result<(), RunError> {
        record(&self.events, format!("check:{}", serial));
        if self.unavailable.lock().unwrap().contains(serial) || self.is_held(serial) {
            return Err(RunError::DeviceUnavailable(serial.to_string()));
        }
        Ok(())
    }

    async fn reserve(&self, serial: &str) -> Result<String, RunError> {
        record(&self.events, format!("reserve:{}", serial));
        if self.rejected.lock().unwrap().contains(serial) {
            return Err(RunError::ReservationFailed {
                serial: serial.to_string(),
                reason: "rejected".to_string(),
            });
        }
        self.hold(serial);
        Ok(format!("{}.farm:7401", serial))
    }

    async fn device_info(&self, serial: &str) -> Result<DeviceInfo, RunError> {
        Ok(DeviceInfo {
            serial: serial.to_string(),
            platform: "Android".to_string(),
            version: "10".to_string(),
            remote_connect_url: format!("{}.farm:7401", serial),
        })
    }

    async fn release(&self, serial: &str) -> Result<ReleaseOutcome, RunError> {
        record(&self.events, format!("release:{}", serial));
        *self
            .release_calls
            .lock()
            .unwrap()
            .entry(serial.to_string())
            .or_insert(0) += 1;
        let delay = *self.release_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_releases.load(Ordering::SeqCst) {
            return Err(RunError::FarmApi("farm unreachable".to_string()));
        }
        if !self.held.lock().unwrap().remove(serial) {
            return Ok(ReleaseOutcome::NotHeld);
        }
        *self
            .releases
            .lock()
            .unwrap()
            .entry(serial.to_string())
            .or_insert(0) += 1;
        Ok(ReleaseOutcome::Released)
    }

    async fn current_user(&self) -> Result<User, RunError> {
        Ok(User {
            name: "tester".to_string(),
            email: "tester@example.com".to_string(),
        })
    }

    async fn held_devices(&self) -> Result<Vec<String>, RunError> {
        let mut held: Vec<String> = self.held.lock().unwrap().iter().cloned().collect();
        held.sort();
        Ok(held)
    }
}

#[derive(Default)]
pub struct FakeBridge {
    events: Events,
    failing: Mutex<HashSet<String>>,
    hanging: Mutex<HashSet<String>>,
    disconnects: Mutex<Vec<String>>,
}

impl FakeBridge {
    pub fn with_events(events: Events) -> Self {
        Self {
            events,
            ..Default::default()
        }
    }

    pub fn fail_for(&self, url: &str) {
        self.failing.lock().unwrap().insert(url.to_string());
    }

    /// Never finish connecting to `url`.
    pub fn hang_for(&self, url: &str) {
        self.hanging.lock().unwrap().insert(url.to_string());
    }

    pub fn disconnects(&self) -> Vec<String> {
        self.disconnects.lock().unwrap().clone()
    }
}

#[async_trait]
impl DeviceBridge for FakeBridge {
    async fn connect(&self, remote_connect_url: &str) -> Result<(), RunError> {
        record(&self.events, format!("connect:{}", remote_connect_url));
        let hangs = self.hanging.lock().unwrap().contains(remote_connect_url);
        if hangs {
            std::future::pending::<()>().await;
        }
        if self.failing.lock().unwrap().contains(remote_connect_url) {
            return Err(RunError::BridgeConnectFailed(remote_connect_url.to_string()));
        }
        Ok(())
    }

    async fn disconnect(&self, remote_connect_url: &str) -> Result<(), RunError> {
        self.disconnects
            .lock()
            .unwrap()
            .push(remote_connect_url.to_string());
        Ok(())
    }
}

pub struct FakeLauncher {
    events: Events,
    next_pid: AtomicU32,
    failing_servers: Mutex<HashSet<String>>,
    failing_clients: Mutex<HashSet<String>>,
    servers: Mutex<HashMap<String, ProcessControl>>,
    clients: Mutex<HashMap<String, ProcessControl>>,
    server_launches: Mutex<Vec<ServerLaunch>>,
}

impl Default for FakeLauncher {
    fn default() -> Self {
        Self::with_events(Events::default())
    }
}

impl FakeLauncher {
    pub fn with_events(events: Events) -> Self {
        Self {
            events,
            next_pid: AtomicU32::new(1000),
            failing_servers: Mutex::default(),
            failing_clients: Mutex::default(),
            servers: Mutex::default(),
            clients: Mutex::default(),
            server_launches: Mutex::default(),
        }
    }

    pub fn fail_server_for(&self, serial: &str) {
        self.failing_servers.lock().unwrap().insert(serial.to_string());
    }

    pub fn fail_client_for(&self, serial: &str) {
        self.failing_clients.lock().unwrap().insert(serial.to_string());
    }

    /// (server, client) controls of the latest pair started for `serial`.
    pub fn controls(&self, serial: &str) -> (ProcessControl, ProcessControl) {
        let server = self.server_control(serial).expect("server started");
        let client = self.clients.lock().unwrap()[serial].clone();
        (server, client)
    }

    pub fn server_control(&self, serial: &str) -> Option<ProcessControl> {
        self.servers.lock().unwrap().get(serial).cloned()
    }

    pub fn server_launches(&self) -> Vec<ServerLaunch> {
        self.server_launches.lock().unwrap().clone()
    }

    fn next_pid(&self) -> u32 {
        self.next_pid.fetch_add(1, Ordering::SeqCst)
    }
}

#[async_trait]
impl ProcessLauncher for FakeLauncher {
    async fn spawn_server(&self, launch: &ServerLaunch) -> Result<ProcessHandle, RunError> {
        record(&self.events, format!("server:{}", launch.serial));
        if self.failing_servers.lock().unwrap().contains(&launch.serial) {
            return Err(RunError::SpawnFailure {
                process: "automation server".to_string(),
                reason: "not found".to_string(),
            });
        }
        let (handle, control) = ProcessHandle::manual("automation server", self.next_pid());
        self.servers
            .lock()
            .unwrap()
            .insert(launch.serial.clone(), control);
        self.server_launches.lock().unwrap().push(launch.clone());
        Ok(handle)
    }

    async fn spawn_client(&self, launch: &ClientLaunch) -> Result<ProcessHandle, RunError> {
        record(&self.events, format!("client:{}", launch.serial));
        if self.failing_clients.lock().unwrap().contains(&launch.serial) {
            return Err(RunError::SpawnFailure {
                process: "test runner".to_string(),
                reason: "not found".to_string(),
            });
        }
        let (handle, control) = ProcessHandle::manual("test runner", self.next_pid());
        self.clients
            .lock()
            .unwrap()
            .insert(launch.serial.clone(), control);
        Ok(handle)
    }
}
