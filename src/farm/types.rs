//! Farm API payloads. Only the fields the runner consumes are modelled.

use serde::{Deserialize, Serialize};

/// Owner record attached to a leased device.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceOwner {
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
}

/// Snapshot of a device record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Device {
    pub serial: String,
    #[serde(default)]
    pub present: bool,
    #[serde(default)]
    pub ready: bool,
    #[serde(default)]
    pub using: bool,
    #[serde(default)]
    pub owner: Option<DeviceOwner>,
    #[serde(default)]
    pub platform: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub remote_connect_url: Option<String>,
}

impl Device {
    /// A device can be leased only when present, ready, unused and unowned.
    pub fn is_available(&self) -> bool {
        self.present && self.ready && !self.using && self.owner.is_none()
    }
}

/// What the test runner needs to know about a leased device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    pub serial: String,
    pub platform: String,
    pub version: String,
    pub remote_connect_url: String,
}

/// The farm user owning the auth token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub name: String,
    #[serde(default)]
    pub email: String,
}

/// Result of a release request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseOutcome {
    /// The lease was held and has been dropped.
    Released,
    /// The current user did not hold the device.
    NotHeld,
    /// The farm answered but refused the release.
    Rejected,
}

#[derive(Debug, Deserialize)]
pub(crate) struct DeviceResponse {
    pub device: Device,
}

#[derive(Debug, Deserialize)]
pub(crate) struct DevicesResponse {
    #[serde(default)]
    pub devices: Vec<Device>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct UserResponse {
    pub user: User,
}

#[derive(Debug, Deserialize)]
pub(crate) struct SuccessResponse {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct RemoteConnectResponse {
    pub remote_connect_url: String,
}

#[derive(Debug, Serialize)]
pub(crate) struct AddDeviceRequest<'a> {
    pub serial: &'a str,
    pub timeout: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn device(json: &str) -> Device {
        serde_json::from_str(json).expect("device should parse")
    }

    #[test]
    fn available_device() {
        let d = device(r#"{"serial":"A","present":true,"ready":true,"using":false,"owner":null}"#);
        assert!(d.is_available());
    }

    #[test]
    fn owned_device_is_unavailable() {
        let d = device(
            r#"{"serial":"A","present":true,"ready":true,"using":false,
                "owner":{"email":"someone@example.com","name":"someone"}}"#,
        );
        assert!(!d.is_available());
    }

    #[test]
    fn missing_flags_mean_unavailable() {
        assert!(!device(r#"{"serial":"A"}"#).is_available());
        assert!(!device(r#"{"serial":"A","present":true,"ready":false}"#).is_available());
        let in_use = r#"{"serial":"A","present":true,"ready":true,"using":true}"#;
        assert!(!device(in_use).is_available());
    }
}
