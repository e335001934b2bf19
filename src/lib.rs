//! Parallel mobile test runs on a device farm.
//!
//! Given a list of device serials, the runner leases each device from the
//! farm, attaches it to the local debug bridge, and starts an automation server
//! plus a test runner bound to that device. Devices are admitted one at a time;
//! once admitted, their tests run in parallel. When a test runner finishes the
//! device is released and its processes are killed.
//!
//! # Layout
//!
//! - [`farm`]: REST client for the device farm behind the [`DeviceFarm`] trait.
//! - [`bridge`]: debug bridge connect/disconnect behind [`DeviceBridge`].
//! - [`session`]: port allocation, session directories, process pairs,
//!   the [`Orchestrator`] pipeline and teardown.
//! - [`config`]: config file parsing and command-line merging.
//! - [`error`]: [`RunError`] and its propagation policy.

pub mod bridge;
pub mod config;
pub mod error;
pub mod farm;
pub mod session;

#[cfg(test)]
mod testing;

pub use bridge::{AdbBridge, DeviceBridge};
pub use config::{CliOverrides, FarmConfig, FileConfig, RunConfig};
pub use error::{ErrorPolicy, RunError};
pub use farm::{DeviceFarm, HttpDeviceFarm};
pub use session::{CommandLauncher, Orchestrator, RunReport};
