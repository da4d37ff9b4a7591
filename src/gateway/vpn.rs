use serde::Serialize;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use super::{CommandRunner, CommandSpec, Failure, classify, write_private};
use crate::error::ApiError;
use crate::models::VpnResult;
use crate::validation::require_config_name;

const WHICH_TIMEOUT: Duration = Duration::from_secs(5);
const SHOW_TIMEOUT: Duration = Duration::from_secs(10);
const COPY_TIMEOUT: Duration = Duration::from_secs(10);
const CHMOD_TIMEOUT: Duration = Duration::from_secs(5);
const UP_TIMEOUT: Duration = Duration::from_secs(30);
const DOWN_TIMEOUT: Duration = Duration::from_secs(20);

pub const MAX_CONFIG_BYTES: usize = 64 * 1024;
const TUNNEL_INTERFACE: &str = "wg0";

// Hash of a config's contents, used to recognise which stored config is live
pub fn fingerprint(content: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content);
    format!("{:x}", hasher.finalize())
}

// Lines inside `[name]`, up to the next section header
fn section<'a>(content: &'a str, name: &str) -> Vec<&'a str> {
    let mut inside = false;
    let mut lines = Vec::new();
    for line in content.lines().map(str::trim) {
        if line.starts_with('[') && line.ends_with(']') {
            if inside {
                break;
            }
            inside = line == name;
            continue;
        }
        if inside {
            lines.push(line);
        }
    }
    lines
}

fn has_key(lines: &[&str], key: &str) -> bool {
    lines
        .iter()
        .filter_map(|l| l.split_once('='))
        .any(|(k, v)| k.trim() == key && !v.trim().is_empty())
}

/// `[Interface]` with a PrivateKey and `[Peer]` with PublicKey and Endpoint.
pub fn validate_wireguard_config(content: &str) -> bool {
    if !content.contains("[Interface]") || !content.contains("[Peer]") {
        return false;
    }
    let interface = section(content, "[Interface]");
    let peer = section(content, "[Peer]");
    has_key(&interface, "PrivateKey") && has_key(&peer, "PublicKey") && has_key(&peer, "Endpoint")
}

fn vpn_error_message(error_text: &str) -> &'static str {
    match classify(error_text) {
        Failure::PermissionDenied => "Permission denied. Please check sudo access.",
        Failure::NotFound => "Configuration file not found.",
        Failure::AlreadyExists => "VPN connection already active.",
        Failure::Timeout => "Connection timed out. Check your internet connection.",
        Failure::Unreachable => "VPN server unreachable. Check endpoint address.",
        Failure::Authentication => "Authentication failed. Check your configuration.",
        _ => "VPN operation failed. Please check your configuration.",
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct WgInterface {
    pub interface: String,
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub allowed_ips: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct InterfaceDetails {
    pub endpoint: Option<String>,
    pub allowed_ips: Option<String>,
    pub last_handshake: Option<String>,
    pub transfer: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CurrentVpn {
    pub interface: String,
    pub status: &'static str,
    pub config_name: Option<String>,
    #[serde(flatten)]
    pub details: InterfaceDetails,
}

#[derive(Debug, Clone, Serialize)]
pub struct VpnStatus {
    pub success: bool,
    pub connected: bool,
    pub current_connection: Option<CurrentVpn>,
    pub active_interfaces: Vec<WgInterface>,
    pub available_configs: Vec<String>,
    pub wireguard_installed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Parse `wg show` output into its interfaces.
pub fn parse_wg_show(stdout: &str) -> Vec<WgInterface> {
    let mut interfaces: Vec<WgInterface> = Vec::new();
    for line in stdout.lines().map(str::trim) {
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let value = value.trim().to_string();
        match (key.trim(), interfaces.last_mut()) {
            ("interface", _) => interfaces.push(WgInterface {
                interface: value,
                status: "connected",
                ..Default::default()
            }),
            ("endpoint", Some(current)) => current.endpoint = Some(value),
            ("allowed ips", Some(current)) => current.allowed_ips = Some(value),
            _ => {}
        }
    }
    interfaces
}

pub fn parse_interface_details(stdout: &str) -> InterfaceDetails {
    let mut details = InterfaceDetails::default();
    for line in stdout.lines().map(str::trim) {
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let value = Some(value.trim().to_string());
        match key.trim() {
            "endpoint" => details.endpoint = value,
            "allowed ips" => details.allowed_ips = value,
            "latest handshake" => details.last_handshake = value,
            "transfer" => details.transfer = value,
            _ => {}
        }
    }
    details
}

pub struct VpnService {
    runner: Arc<dyn CommandRunner>,
    config_dir: PathBuf,
    wireguard_dir: PathBuf,
}

impl VpnService {
    pub fn new(runner: Arc<dyn CommandRunner>, config_dir: PathBuf, wireguard_dir: PathBuf) -> Self {
        Self {
            runner,
            config_dir,
            wireguard_dir,
        }
    }

    fn config_path(&self, name: &str) -> PathBuf {
        self.config_dir.join(format!("{}.conf", name))
    }

    fn system_config_path(&self, interface: &str) -> String {
        self.wireguard_dir
            .join(format!("{}.conf", interface))
            .display()
            .to_string()
    }

    async fn wireguard_installed(&self) -> bool {
        let cmd = CommandSpec::new("which", WHICH_TIMEOUT).arg("wg");
        matches!(self.runner.run(&cmd).await, Ok(out) if out.success())
    }

    async fn active_interfaces(&self) -> Vec<WgInterface> {
        let cmd = CommandSpec::sudo("wg", SHOW_TIMEOUT).arg("show");
        match self.runner.run(&cmd).await {
            Ok(output) if output.success() => parse_wg_show(&output.stdout),
            Ok(output) => {
                warn!("wg show failed: {}", output.error_text());
                Vec::new()
            }
            Err(e) => {
                error!("Error getting active WireGuard interfaces: {}", e);
                Vec::new()
            }
        }
    }

    /// Stored config names, sorted.
    pub async fn list_configs(&self) -> Vec<String> {
        let mut entries = match tokio::fs::read_dir(&self.config_dir).await {
            Ok(entries) => entries,
            Err(e) => {
                warn!("Could not list {}: {}", self.config_dir.display(), e);
                return Vec::new();
            }
        };

        let mut names = Vec::new();
        while let Ok(Some(entry)) = entries.next_entry().await {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("conf") {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                names.push(stem.to_string());
            }
        }
        names.sort();
        names
    }

    async fn interface_details(&self, interface: &str) -> InterfaceDetails {
        let cmd = CommandSpec::sudo("wg", SHOW_TIMEOUT).args(["show", interface]);
        match self.runner.run(&cmd).await {
            Ok(output) if output.success() => parse_interface_details(&output.stdout),
            _ => InterfaceDetails::default(),
        }
    }

    // Which stored config the running interface was brought up from
    async fn config_for_interface(&self, interface: &str, configs: &[String]) -> Option<String> {
        let cmd = CommandSpec::sudo("cat", SHOW_TIMEOUT).arg(self.system_config_path(interface));
        let output = self.runner.run(&cmd).await.ok().filter(|o| o.success())?;
        let live = fingerprint(output.stdout.as_bytes());

        for name in configs {
            match tokio::fs::read(self.config_path(name)).await {
                Ok(content) if fingerprint(&content) == live => return Some(name.clone()),
                Ok(_) => {}
                Err(e) => warn!("Could not read VPN config {}: {}", name, e),
            }
        }
        None
    }

    pub async fn status(&self) -> VpnStatus {
        if !self.wireguard_installed().await {
            return VpnStatus {
                success: false,
                connected: false,
                current_connection: None,
                active_interfaces: Vec::new(),
                available_configs: self.list_configs().await,
                wireguard_installed: false,
                error: Some("WireGuard not installed".into()),
            };
        }

        let active_interfaces = self.active_interfaces().await;
        let available_configs = self.list_configs().await;

        let current_connection = match active_interfaces.first() {
            Some(first) => Some(CurrentVpn {
                interface: first.interface.clone(),
                status: "connected",
                config_name: self
                    .config_for_interface(&first.interface, &available_configs)
                    .await,
                details: self.interface_details(&first.interface).await,
            }),
            None => None,
        };

        VpnStatus {
            success: true,
            connected: !active_interfaces.is_empty(),
            current_connection,
            active_interfaces,
            available_configs,
            wireguard_installed: true,
            error: None,
        }
    }

    pub async fn connect(&self, name: &str) -> Result<VpnResult, ApiError> {
        require_config_name(name)?;

        let config_path = self.config_path(name);
        if !tokio::fs::try_exists(&config_path).await.unwrap_or(false) {
            return Err(ApiError::NotFound(format!("Configuration '{}' not found", name)));
        }
        if !self.wireguard_installed().await {
            return Err(ApiError::Vpn(
                "WireGuard is not installed. Please install it first.".into(),
            ));
        }

        let previous = self.disconnect().await;
        if !previous.success {
            warn!("Could not tear down previous tunnel: {}", previous.message);
        }

        info!("Connecting to VPN using config: {}", name);
        let system_path = self.system_config_path(TUNNEL_INTERFACE);

        let copy = CommandSpec::sudo("cp", COPY_TIMEOUT)
            .args([config_path.display().to_string(), system_path.clone()]);
        match self.runner.run(&copy).await {
            Ok(out) if out.success() => {}
            Ok(out) => {
                error!("Failed to copy config to system location: {}", out.error_text());
                return Ok(VpnResult::failed("Failed to prepare VPN configuration"));
            }
            Err(e) => {
                error!("Failed to copy config to system location: {}", e);
                return Ok(VpnResult::failed("Failed to prepare VPN configuration"));
            }
        }

        let chmod = CommandSpec::sudo("chmod", CHMOD_TIMEOUT).args(["600", system_path.as_str()]);
        if let Err(e) = self.runner.run(&chmod).await {
            warn!("chmod on {} failed: {}", system_path, e);
        }

        let up = CommandSpec::sudo("wg-quick", UP_TIMEOUT).args(["up", TUNNEL_INTERFACE]);
        let result = match self.runner.run(&up).await {
            Ok(out) if out.success() => {
                info!("Successfully connected to VPN: {}", name);
                VpnResult::ok(format!("Successfully connected to VPN '{}'", name))
                    .with_details(out.stdout.trim())
            }
            Ok(out) => {
                error!("Failed to connect to VPN {}: {}", name, out.error_text());
                VpnResult::failed(vpn_error_message(out.error_text()))
            }
            Err(e) if e.is_timeout() => {
                error!("VPN connection to {} timed out", name);
                VpnResult::failed("VPN connection attempt timed out. Please try again.")
            }
            Err(e) => {
                error!("Unexpected error connecting to VPN: {}", e);
                VpnResult::failed("An unexpected error occurred during VPN connection.")
            }
        };
        Ok(result)
    }

    async fn disconnect_interface(&self, interface: &str) -> VpnResult {
        info!("Disconnecting VPN interface: {}", interface);
        let down = CommandSpec::sudo("wg-quick", DOWN_TIMEOUT).args(["down", interface]);
        let outcome = self.runner.run(&down).await;

        let cleanup = CommandSpec::sudo("rm", CHMOD_TIMEOUT).args(["-f".to_string(), self.system_config_path(interface)]);
        if let Err(e) = self.runner.run(&cleanup).await {
            warn!("Could not remove system config for {}: {}", interface, e);
        }

        match outcome {
            Ok(out) if out.success() => {
                VpnResult::ok("Successfully disconnected from VPN").with_details(out.stdout.trim())
            }
            Ok(out) => {
                error!("Failed to disconnect VPN interface {}: {}", interface, out.error_text());
                VpnResult::failed(vpn_error_message(out.error_text()))
            }
            Err(e) if e.is_timeout() => {
                VpnResult::failed("VPN disconnection timed out. Please try again.")
            }
            Err(e) => {
                error!("Unexpected error disconnecting VPN: {}", e);
                VpnResult::failed("An unexpected error occurred during VPN disconnection.")
            }
        }
    }

    /// Bring down every active tunnel.
    pub async fn disconnect(&self) -> VpnResult {
        let active = self.active_interfaces().await;
        if active.is_empty() {
            return VpnResult::ok("No active VPN connections to disconnect");
        }

        let mut succeeded = 0;
        let mut errors = Vec::new();
        for iface in &active {
            let result = self.disconnect_interface(&iface.interface).await;
            if result.success {
                succeeded += 1;
            } else {
                errors.push(format!("{}: {}", iface.interface, result.message));
            }
        }

        if succeeded == active.len() {
            VpnResult::ok(format!("Successfully disconnected {} VPN connection(s)", succeeded))
        } else if succeeded > 0 {
            VpnResult::ok(format!(
                "Disconnected {}/{} connections. Errors: {}",
                succeeded,
                active.len(),
                errors.join("; ")
            ))
        } else {
            VpnResult::failed(format!("Failed to disconnect VPN connections: {}", errors.join("; ")))
        }
    }

    pub async fn upload(&self, name: &str, content: &str) -> Result<VpnResult, ApiError> {
        require_config_name(name)?;
        if content.len() > MAX_CONFIG_BYTES {
            return Err(ApiError::invalid_field(
                "config_content",
                "Configuration exceeds the 64 KiB limit",
            ));
        }
        if !validate_wireguard_config(content) {
            return Err(ApiError::invalid_field(
                "config_content",
                "Invalid WireGuard configuration format",
            ));
        }

        let path = self.config_path(name);
        write_private(&path, content.as_bytes())
            .await
            .map_err(|e| anyhow::anyhow!("writing {}: {}", path.display(), e))?;

        info!("Successfully uploaded VPN config: {}", name);
        Ok(VpnResult::ok(format!("Configuration '{}' uploaded successfully", name)))
    }

    pub async fn delete(&self, name: &str) -> Result<VpnResult, ApiError> {
        require_config_name(name)?;

        let path = self.config_path(name);
        if !tokio::fs::try_exists(&path).await.unwrap_or(false) {
            return Err(ApiError::NotFound(format!("Configuration '{}' not found", name)));
        }

        let status = self.status().await;
        let active = status
            .current_connection
            .as_ref()
            .and_then(|c| c.config_name.as_deref());
        if status.connected && active == Some(name) {
            return Err(ApiError::Conflict(
                "Cannot delete active VPN configuration. Disconnect first.".into(),
            ));
        }

        tokio::fs::remove_file(&path)
            .await
            .map_err(|e| anyhow::anyhow!("removing {}: {}", path.display(), e))?;

        info!("Successfully deleted VPN config: {}", name);
        Ok(VpnResult::ok(format!("Configuration '{}' deleted successfully", name)))
    }
}
