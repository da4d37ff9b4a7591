use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// One upstream network seen in a scan
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkInfo {
    pub ssid: String,
    pub security: String,
    pub signal_strength: i32,
}

/// Uniform envelope for every mutating operation
/// (connection, VPN, hotspot and system actions).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionResult {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl ActionResult {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
            details: None,
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        let details = details.into();
        if !details.trim().is_empty() {
            self.details = Some(details.trim().to_string());
        }
        self
    }
}

pub type ConnectionResult = ActionResult;
pub type VpnResult = ActionResult;
pub type SystemActionResult = ActionResult;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceState {
    pub state: String,
    pub connection: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CurrentNetwork {
    pub ssid: String,
    pub signal_strength: i32,
    pub security: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct NetworkStatus {
    pub success: bool,
    pub connected: bool,
    pub current_network: Option<CurrentNetwork>,
    pub device_status: BTreeMap<String, DeviceState>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

// Request bodies

#[derive(Debug, Deserialize)]
pub struct ConnectRequest {
    pub ssid: String,
    #[serde(default)]
    pub password: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct HotspotUpdateRequest {
    pub ssid: String,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub visible: Option<bool>,
    #[serde(default)]
    pub enabled: Option<bool>,
}

#[derive(Debug, Deserialize)]
pub struct QrGenerateRequest {
    pub ssid: String,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub security: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct QrParseRequest {
    pub qr_data: String,
}

#[derive(Debug, Deserialize)]
pub struct VpnConnectRequest {
    pub config_name: String,
}

#[derive(Debug, Deserialize)]
pub struct VpnUploadRequest {
    pub config_name: String,
    pub config_content: String,
}

#[derive(Debug, Deserialize)]
pub struct LogsQuery {
    #[serde(rename = "type", default)]
    pub log_type: Option<String>,
    #[serde(default)]
    pub lines: Option<u32>,
}
