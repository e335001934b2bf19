//! HTTP client for the device farm REST API.

use super::types::{
    AddDeviceRequest, DeviceInfo, DeviceResponse, DevicesResponse, ReleaseOutcome,
    RemoteConnectResponse, SuccessResponse, User, UserResponse,
};
use super::DeviceFarm;
use crate::config::FarmConfig;
use crate::error::RunError;
use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Lease time-to-live requested when reserving a device.
pub const LEASE_TIMEOUT_MS: u64 = 900_000;
/// Timeout for a single farm API request.
const FARM_REQUEST_TIMEOUT_SECS: u64 = 30;
const AVAILABILITY_FIELDS: &str = "serial,present,ready,using,owner";

/// [`DeviceFarm`] backed by the farm's REST API.
pub struct HttpDeviceFarm {
    http_client: Client,
    base_url: String,
    auth_token: String,
}

impl HttpDeviceFarm {
    /// Build a client for the configured farm address.
    pub fn new(config: &FarmConfig) -> Result<Self, RunError> {
        let (base_url, https) = normalize_address(&config.address);

        let mut builder = Client::builder().timeout(Duration::from_secs(FARM_REQUEST_TIMEOUT_SECS));
        if https {
            info!("Running in https mode");
            if config.accept_self_signed {
                info!("Accepting self-signed certificates");
                builder = builder.danger_accept_invalid_certs(true);
            } else {
                info!("Accepting only trusted certificates");
            }
        } else {
            info!("Running in http mode");
        }

        Ok(Self {
            http_client: builder.build()?,
            base_url,
            auth_token: config.auth_token.trim().to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/api/v1{}", self.base_url, path)
    }

    async fn get_device(
        &self,
        serial: &str,
        fields: Option<&str>,
    ) -> Result<DeviceResponse, RunError> {
        let mut request = self
            .http_client
            .get(self.url(&format!("/devices/{}", serial)))
            .bearer_auth(&self.auth_token);
        if let Some(fields) = fields {
            request = request.query(&[("fields", fields)]);
        }
        let response = request.send().await?.error_for_status()?;
        Ok(response.json().await?)
    }

    async fn user_devices(&self, fields: &str) -> Result<DevicesResponse, RunError> {
        let response = self
            .http_client
            .get(self.url("/user/devices"))
            .bearer_auth(&self.auth_token)
            .query(&[("fields", fields)])
            .send()
            .await?
            .error_for_status()?;
        Ok(response.json().await?)
    }

    async fn add_user_device(&self, serial: &str) -> Result<(), RunError> {
        let failed = |reason: String| RunError::ReservationFailed {
            serial: serial.to_string(),
            reason,
        };

        let response = self
            .http_client
            .post(self.url("/user/devices"))
            .bearer_auth(&self.auth_token)
            .json(&AddDeviceRequest {
                serial,
                timeout: LEASE_TIMEOUT_MS,
            })
            .send()
            .await
            .map_err(|e| failed(e.to_string()))?;

        let status = response.status();
        let body: SuccessResponse = response.json().await.map_err(|e| failed(e.to_string()))?;
        if !body.success {
            return Err(failed(
                body.description
                    .unwrap_or_else(|| format!("farm answered {}", status)),
            ));
        }
        Ok(())
    }

    async fn remote_connect(&self, serial: &str) -> Result<String, RunError> {
        let response = self
            .http_client
            .post(self.url(&format!("/user/devices/{}/remoteConnect", serial)))
            .bearer_auth(&self.auth_token)
            .send()
            .await?
            .error_for_status()?;
        let body: RemoteConnectResponse = response.json().await?;
        Ok(body.remote_connect_url)
    }
}

#[async_trait]
impl DeviceFarm for HttpDeviceFarm {
    async fn check_availability(&self, serial: &str) -> Result<(), RunError> {
        let device = self.get_device(serial, Some(AVAILABILITY_FIELDS)).await?.device;
        if !device.is_available() {
            info!(serial = %serial, "Device is not available");
            return Err(RunError::DeviceUnavailable(serial.to_string()));
        }
        Ok(())
    }

    async fn reserve(&self, serial: &str) -> Result<String, RunError> {
        self.add_user_device(serial).await?;
        debug!(serial = %serial, ttl_ms = LEASE_TIMEOUT_MS, "Device added to user");

        self.remote_connect(serial)
            .await
            .map_err(|e| RunError::ReservationFailed {
                serial: serial.to_string(),
                reason: e.to_string(),
            })
    }

    async fn device_info(&self, serial: &str) -> Result<DeviceInfo, RunError> {
        let device = self.get_device(serial, None).await?.device;
        Ok(DeviceInfo {
            serial: device.serial,
            platform: device.platform.unwrap_or_default(),
            version: device.version.unwrap_or_default(),
            remote_connect_url: device.remote_connect_url.ok_or_else(|| {
                RunError::FarmApi(format!("device {} has no remote connect URL", serial))
            })?,
        })
    }

    async fn release(&self, serial: &str) -> Result<ReleaseOutcome, RunError> {
        let held = self.user_devices(AVAILABILITY_FIELDS).await?;
        if !held.devices.iter().any(|d| d.serial == serial) {
            info!(serial = %serial, "Device not held by current user; not removing");
            return Ok(ReleaseOutcome::NotHeld);
        }

        let response = self
            .http_client
            .delete(self.url(&format!("/user/devices/{}", serial)))
            .bearer_auth(&self.auth_token)
            .send()
            .await?;
        let body: SuccessResponse = response.json().await?;
        if !body.success {
            warn!(serial = %serial, "Could not disconnect device");
            return Ok(ReleaseOutcome::Rejected);
        }

        info!(serial = %serial, "Device released");
        Ok(ReleaseOutcome::Released)
    }

    async fn current_user(&self) -> Result<User, RunError> {
        let response = self
            .http_client
            .get(self.url("/user"))
            .bearer_auth(&self.auth_token)
            .query(&[("fields", "name,email")])
            .send()
            .await?
            .error_for_status()?;
        let body: UserResponse = response.json().await?;
        info!(name = %body.user.name, email = %body.user.email, "Current user");
        Ok(body.user)
    }

    async fn held_devices(&self) -> Result<Vec<String>, RunError> {
        let held = self.user_devices("serial,using").await?;
        Ok(held.devices.into_iter().map(|d| d.serial).collect())
    }
}

/// Strip trailing slashes and default the scheme to http.
///
/// Returns the base URL and whether it uses https.
pub(crate) fn normalize_address(address: &str) -> (String, bool) {
    let trimmed = address.trim().trim_end_matches('/');
    if trimmed.starts_with("https://") {
        (trimmed.to_string(), true)
    } else if trimmed.starts_with("http://") {
        (trimmed.to_string(), false)
    } else {
        (format!("http://{}", trimmed), false)
    }
}
