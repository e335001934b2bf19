//! Device farm facade.
//!
//! The orchestrator only talks to the farm through [`DeviceFarm`], so tests can
//! swap the HTTP client for an in-memory farm.

mod client;
mod types;

pub use client::{HttpDeviceFarm, LEASE_TIMEOUT_MS};
pub use types::{Device, DeviceInfo, DeviceOwner, ReleaseOutcome, User};

use crate::error::RunError;
use async_trait::async_trait;

/// Operations the runner needs from the device farm.
#[async_trait]
pub trait DeviceFarm: Send + Sync {
    /// Fail with [`RunError::DeviceUnavailable`] unless the device is present,
    /// ready, unused and unowned.
    async fn check_availability(&self, serial: &str) -> Result<(), RunError>;

    /// Lease the device and return its remote connect URL.
    async fn reserve(&self, serial: &str) -> Result<String, RunError>;

    /// Fetch platform, version and remote connect URL of a device.
    async fn device_info(&self, serial: &str) -> Result<DeviceInfo, RunError>;

    /// Give the device back. Releasing a device we do not hold is a no-op.
    async fn release(&self, serial: &str) -> Result<ReleaseOutcome, RunError>;

    /// The user the auth token belongs to.
    async fn current_user(&self) -> Result<User, RunError>;

    /// Serials of every device currently leased by the user.
    async fn held_devices(&self) -> Result<Vec<String>, RunError>;

    /// Release every device held by the current user.
    ///
    /// Best-effort: a failure on one device is logged and the rest are still
    /// released. Returns the number of devices actually released.
    async fn release_all(&self) -> usize {
        let serials = match self.held_devices().await {
            Ok(serials) => serials,
            Err(e) => {
                tracing::warn!(error = %e, "Could not list held devices; nothing released");
                return 0;
            }
        };

        tracing::info!(count = serials.len(), "Removing all devices from user");
        let mut released = 0;
        for serial in serials {
            match self.release(&serial).await {
                Ok(ReleaseOutcome::Released) => released += 1,
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!(serial = %serial, error = %e, "Release failed; continuing");
                }
            }
        }
        released
    }
}
