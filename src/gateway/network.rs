use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use super::{CommandRunner, CommandSpec, Failure, classify};
use crate::error::ApiError;
use crate::models::{ConnectionResult, CurrentNetwork, DeviceState, NetworkInfo, NetworkStatus};
use crate::validation::{check_optional_password, sanitize_ssid};

const SCAN_TIMEOUT: Duration = Duration::from_secs(30);
const DETAILS_TIMEOUT: Duration = Duration::from_secs(15);
const SAVED_PROFILE_TIMEOUT: Duration = Duration::from_secs(30);
const DELETE_PROFILE_TIMEOUT: Duration = Duration::from_secs(10);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(45);
const DISCONNECT_TIMEOUT: Duration = Duration::from_secs(30);
const STATUS_TIMEOUT: Duration = Duration::from_secs(10);

// Used when the current association can't be found in a fresh scan
const FALLBACK_SIGNAL: i32 = -60;
const FALLBACK_SECURITY: &str = "WPA2";
const UNPARSEABLE_SIGNAL: i32 = -70;

/// Split one line of `nmcli -t` output on unescaped colons, undoing the
/// `\:` and `\\` escapes nmcli applies inside values.
pub fn split_terse(line: &str) -> Vec<String> {
    let mut fields = Vec::new();
    let mut current = String::new();
    let mut chars = line.chars();

    while let Some(c) = chars.next() {
        match c {
            '\\' => match chars.next() {
                Some(next) => current.push(next),
                None => current.push('\\'),
            },
            ':' => fields.push(std::mem::take(&mut current)),
            _ => current.push(c),
        }
    }
    fields.push(current);
    fields
}

/// Parse `SSID:SECURITY:SIGNAL` rows: drop hidden/excluded SSIDs, keep the
/// strongest entry per SSID, strongest first.
pub fn parse_scan(stdout: &str, exclude: Option<&str>) -> Vec<NetworkInfo> {
    let mut seen: HashMap<String, NetworkInfo> = HashMap::new();

    for line in stdout.lines().filter(|l| !l.trim().is_empty()) {
        let parts = split_terse(line);
        if parts.len() < 3 {
            continue;
        }

        let ssid = parts[0].trim();
        if ssid.is_empty() || Some(ssid) == exclude {
            continue;
        }

        let signal = parts[2].trim().parse::<i32>().unwrap_or(0);
        let security = match parts[1].trim() {
            "" | "--" => "Open".to_string(),
            s => s.to_string(),
        };

        let stronger = seen
            .get(ssid)
            .is_none_or(|existing| signal > existing.signal_strength);
        if stronger {
            seen.insert(
                ssid.to_string(),
                NetworkInfo {
                    ssid: ssid.to_string(),
                    security,
                    signal_strength: signal,
                },
            );
        }
    }

    let mut networks: Vec<NetworkInfo> = seen.into_values().collect();
    networks.sort_by(|a, b| {
        b.signal_strength
            .cmp(&a.signal_strength)
            .then_with(|| a.ssid.cmp(&b.ssid))
    });
    networks
}

/// `DEVICE:STATE:CONNECTION` rows into a device map.
pub fn parse_device_status(stdout: &str) -> BTreeMap<String, DeviceState> {
    stdout
        .lines()
        .filter(|l| !l.trim().is_empty())
        .filter_map(|line| {
            let parts = split_terse(line);
            if parts.len() < 3 {
                return None;
            }
            let connection = match parts[2].trim() {
                "" | "--" => None,
                c => Some(c.to_string()),
            };
            Some((
                parts[0].clone(),
                DeviceState {
                    state: parts[1].clone(),
                    connection,
                },
            ))
        })
        .collect()
}

fn connection_error_message(error_text: &str) -> &'static str {
    match classify(error_text) {
        Failure::Authentication => "Authentication failed. Please check the password.",
        Failure::NotFound => "Network not found. Please scan for networks again.",
        Failure::AlreadyExists => "Connection profile already exists. Please try again.",
        Failure::Timeout => "Connection timed out. Network may be out of range.",
        Failure::DeviceMissing => "WiFi adapter not available.",
        Failure::Unreachable => "Network unreachable. Please try again.",
        Failure::PermissionDenied => "Permission denied. Please check sudo access.",
        Failure::NotConnected | Failure::Other => "Connection failed. Please try again.",
    }
}

fn disconnection_error_message(error_text: &str) -> &'static str {
    match classify(error_text) {
        Failure::NotConnected => "No active connection to disconnect from.",
        Failure::DeviceMissing => "WiFi adapter not available.",
        Failure::Timeout => "Disconnection timed out. Please try again.",
        _ => "Disconnection failed. Please try again.",
    }
}

/// What a disconnect request turned into.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisconnectOutcome {
    NothingToDisconnect,
    Finished(ConnectionResult),
}

pub struct NetworkService {
    runner: Arc<dyn CommandRunner>,
    wifi_interface: String,
    hotspot_ssid: String,
}

impl NetworkService {
    pub fn new(runner: Arc<dyn CommandRunner>, wifi_interface: &str, hotspot_ssid: &str) -> Self {
        Self {
            runner,
            wifi_interface: wifi_interface.to_string(),
            hotspot_ssid: hotspot_ssid.to_string(),
        }
    }

    fn scan_command(&self, timeout: Duration) -> CommandSpec {
        CommandSpec::new("nmcli", timeout).args([
            "--colors",
            "no",
            "-t",
            "-f",
            "SSID,SECURITY,SIGNAL",
            "dev",
            "wifi",
            "list",
            "ifname",
            self.wifi_interface.as_str(),
        ])
    }

    /// Scan upstream networks. Failures propagate: there is no useful
    /// partial result.
    pub async fn scan(&self) -> Result<Vec<NetworkInfo>, ApiError> {
        info!("Starting WiFi network scan");

        let output = self.runner.run(&self.scan_command(SCAN_TIMEOUT)).await.map_err(|e| {
            error!("WiFi scan failed: {}", e);
            if e.is_timeout() {
                ApiError::Network("Network scan timed out. Please try again.".into())
            } else {
                ApiError::Network("Failed to scan for networks. Please check your WiFi adapter.".into())
            }
        })?;

        if !output.success() {
            error!("WiFi scan exited with {:?}: {}", output.code, output.error_text());
            return Err(ApiError::Network(
                "Failed to scan for networks. Please check your WiFi adapter.".into(),
            ));
        }

        let networks = parse_scan(&output.stdout, Some(self.hotspot_ssid.as_str()));
        info!("Found {} unique networks", networks.len());
        Ok(networks)
    }

    pub async fn connect(
        &self,
        ssid: &str,
        password: Option<&str>,
    ) -> Result<ConnectionResult, ApiError> {
        let ssid = sanitize_ssid(ssid)
            .ok_or_else(|| ApiError::invalid_field("ssid", "Invalid SSID format"))?;
        let password = check_optional_password(password.map(str::trim))?;

        info!("Attempting to connect to network: {}", ssid);

        if password.is_none() {
            if let Some(result) = self.try_saved_profile(&ssid).await {
                return Ok(result);
            }
            debug!("No usable saved profile for {}, creating a new connection", ssid);
        }

        self.delete_profile(&ssid).await;

        let mut cmd = CommandSpec::new("nmcli", CONNECT_TIMEOUT).args(["device", "wifi", "connect", ssid.as_str()]);
        if let Some(pw) = password {
            cmd = cmd.args(["password", pw]);
        }
        cmd = cmd.args(["ifname", self.wifi_interface.as_str()]);

        let output = match self.runner.run(&cmd).await {
            Ok(output) => output,
            Err(e) if e.is_timeout() => {
                warn!("Connection to {} timed out", ssid);
                return Ok(ConnectionResult::failed(
                    "Connection attempt timed out. Please try again.",
                ));
            }
            Err(e) => {
                error!("Could not run nmcli: {}", e);
                return Ok(ConnectionResult::failed("WiFi adapter not available."));
            }
        };

        if output.success() {
            info!("Successfully connected to {}", ssid);
            Ok(ConnectionResult::ok(format!("Successfully connected to {}", ssid))
                .with_details(output.stdout.trim()))
        } else {
            warn!("Failed to connect to {}: {}", ssid, output.error_text());
            Ok(ConnectionResult::failed(connection_error_message(output.error_text())))
        }
    }

    async fn try_saved_profile(&self, ssid: &str) -> Option<ConnectionResult> {
        let cmd = CommandSpec::new("nmcli", SAVED_PROFILE_TIMEOUT)
            .args(["connection", "up", ssid, "ifname", self.wifi_interface.as_str()]);

        match self.runner.run(&cmd).await {
            Ok(output) if output.success() => {
                info!("Connected to {} using saved profile", ssid);
                Some(
                    ConnectionResult::ok(format!("Connected to {} using saved credentials", ssid))
                        .with_details(output.stdout.trim()),
                )
            }
            Ok(output) => {
                debug!("Saved profile for {} unusable: {}", ssid, output.error_text());
                None
            }
            Err(e) => {
                debug!("Saved profile attempt for {} failed: {}", ssid, e);
                None
            }
        }
    }

    // Best effort: a missing profile is the common case
    async fn delete_profile(&self, ssid: &str) {
        let cmd = CommandSpec::new("nmcli", DELETE_PROFILE_TIMEOUT).args(["connection", "delete", ssid]);
        if let Err(e) = self.runner.run(&cmd).await {
            warn!("Deleting stale profile for {} failed: {}", ssid, e);
        }
    }

    pub async fn disconnect(&self) -> Result<DisconnectOutcome, ApiError> {
        info!("Attempting to disconnect from WiFi");

        let status = self.status().await;
        if !status.success {
            return Err(ApiError::Network(
                "Failed to read the current connection status.".into(),
            ));
        }
        let Some(current) = status.current_network else {
            return Ok(DisconnectOutcome::NothingToDisconnect);
        };

        let cmd = CommandSpec::new("nmcli", DISCONNECT_TIMEOUT)
            .args(["device", "disconnect", self.wifi_interface.as_str()]);

        let result = match self.runner.run(&cmd).await {
            Ok(output) if output.success() => {
                info!("Successfully disconnected from {}", current.ssid);
                ConnectionResult::ok(format!("Successfully disconnected from {}", current.ssid))
                    .with_details(output.stdout.trim())
            }
            Ok(output) => {
                warn!("Failed to disconnect: {}", output.error_text());
                ConnectionResult::failed(disconnection_error_message(output.error_text()))
            }
            Err(e) if e.is_timeout() => {
                ConnectionResult::failed("Disconnection attempt timed out. Please try again.")
            }
            Err(e) => {
                error!("Could not run nmcli: {}", e);
                ConnectionResult::failed("WiFi adapter not available.")
            }
        };
        Ok(DisconnectOutcome::Finished(result))
    }

    pub async fn status(&self) -> NetworkStatus {
        let cmd = CommandSpec::new("nmcli", STATUS_TIMEOUT).args([
            "--colors",
            "no",
            "-t",
            "-f",
            "DEVICE,STATE,CONNECTION",
            "device",
            "status",
        ]);

        let output = match self.runner.run(&cmd).await {
            Ok(output) if output.success() => output,
            Ok(output) => return Self::status_error(output.error_text()),
            Err(e) => return Self::status_error(&e.to_string()),
        };

        let device_status = parse_device_status(&output.stdout);
        let mut current_network = None;

        let active = device_status
            .get(&self.wifi_interface)
            .filter(|d| d.state == "connected")
            .and_then(|d| d.connection.clone());
        if let Some(ssid) = active {
            let (signal_strength, security) = self.current_network_details(&ssid).await;
            current_network = Some(CurrentNetwork {
                ssid,
                signal_strength,
                security,
            });
        }

        NetworkStatus {
            success: true,
            connected: current_network.is_some(),
            current_network,
            device_status,
            error: None,
        }
    }

    fn status_error(detail: &str) -> NetworkStatus {
        error!("Error getting connection status: {}", detail);
        NetworkStatus {
            success: false,
            connected: false,
            current_network: None,
            device_status: BTreeMap::new(),
            error: Some("Failed to retrieve connection status".into()),
        }
    }

    // Signal/security of the associated network, estimated when not in the scan
    async fn current_network_details(&self, ssid: &str) -> (i32, String) {
        let fallback = (FALLBACK_SIGNAL, FALLBACK_SECURITY.to_string());

        let output = match self.runner.run(&self.scan_command(DETAILS_TIMEOUT)).await {
            Ok(output) if output.success() => output,
            Ok(_) => return fallback,
            Err(e) => {
                warn!("Error getting current network details: {}", e);
                return fallback;
            }
        };

        output
            .stdout
            .lines()
            .map(split_terse)
            .find(|parts| parts.len() >= 3 && parts[0].trim() == ssid)
            .map(|parts| {
                let signal = parts[2].trim().parse().unwrap_or(UNPARSEABLE_SIGNAL);
                let security = match parts[1].trim() {
                    "" | "--" => "Open".to_string(),
                    s => s.to_string(),
                };
                (signal, security)
            })
            .unwrap_or(fallback)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::fake::FakeRunner;

    fn service(fake: FakeRunner) -> (NetworkService, Arc<FakeRunner>) {
        let fake = Arc::new(fake);
        (NetworkService::new(fake.clone(), "wlan1", "TravelNet-Portal"), fake)
    }

    #[test]
    fn terse_split_honours_escapes() {
        assert_eq!(split_terse("My\\:Net:WPA2:70"), vec!["My:Net", "WPA2", "70"]);
        assert_eq!(split_terse("a\\\\b::1"), vec!["a\\b", "", "1"]);
    }

    #[test]
    fn scan_dedup_keeps_strongest() {
        let raw = "Cafe:WPA2:-70\nCafe:WPA2:-50\nLibrary::-80\n:WPA2:90\n";
        let networks = parse_scan(raw, None);
        assert_eq!(networks.len(), 2);
        assert_eq!(
            networks[0],
            NetworkInfo {
                ssid: "Cafe".into(),
                security: "WPA2".into(),
                signal_strength: -50
            }
        );
        assert_eq!(networks[1].security, "Open");
    }

    #[test]
    fn scan_sorts_and_excludes_own_hotspot() {
        let raw = "A:WPA2:40\nTravelNet-Portal:WPA2:99\nB:WPA1:80\nC:WPA2:n/a\n";
        let networks = parse_scan(raw, Some("TravelNet-Portal"));
        let names: Vec<_> = networks.iter().map(|n| n.ssid.as_str()).collect();
        assert_eq!(names, vec!["B", "A", "C"]);
        assert_eq!(networks[2].signal_strength, 0);
    }

    #[tokio::test]
    async fn scan_failure_propagates() {
        let (svc, _) = service(FakeRunner::new().fail("nmcli", 10, "Error: Device not found"));
        let err = svc.scan().await.unwrap_err();
        assert_eq!(err.kind(), "network_error");

        let (svc, _) = service(FakeRunner::new().timeout("nmcli"));
        assert!(svc.scan().await.unwrap_err().to_string().contains("timed out"));
    }

    #[tokio::test]
    async fn connect_without_password_uses_saved_profile() {
        let (svc, fake) = service(FakeRunner::new().on("nmcli connection up Cafe", "activated"));
        let result = svc.connect("Cafe", None).await.unwrap();
        assert!(result.success);
        assert!(result.message.contains("saved credentials"));
        assert!(!fake.called("nmcli device wifi connect"));
    }

    #[tokio::test]
    async fn connect_falls_back_to_fresh_profile() {
        let (svc, fake) = service(
            FakeRunner::new()
                .fail("nmcli connection up", 10, "Error: unknown connection 'Cafe'")
                .on("nmcli device wifi connect", "Device 'wlan1' successfully activated"),
        );
        let result = svc.connect("Cafe", Some("")).await.unwrap();
        assert!(result.success);

        let calls = fake.calls();
        assert_eq!(calls[0], "nmcli connection up Cafe ifname wlan1");
        assert_eq!(calls[1], "nmcli connection delete Cafe");
        assert_eq!(calls[2], "nmcli device wifi connect Cafe ifname wlan1");
    }

    #[tokio::test]
    async fn connect_with_password_skips_saved_profile() {
        let (svc, fake) = service(FakeRunner::new().fail(
            "nmcli device wifi connect",
            4,
            "Error: Connection activation failed: Secrets were required, but not provided.",
        ));
        let result = svc.connect("Cafe", Some("hunter2hunter2")).await.unwrap();
        assert!(!result.success);
        assert_eq!(result.message, "Authentication failed. Please check the password.");
        assert!(!fake.called("nmcli connection up"));
        assert!(fake.called("nmcli device wifi connect Cafe password hunter2hunter2 ifname wlan1"));
    }

    #[tokio::test]
    async fn connect_sanitizes_and_validates() {
        let (svc, fake) = service(FakeRunner::new());
        assert!(svc.connect(";;;", None).await.is_err());
        assert!(svc.connect("Cafe", Some("short")).await.is_err());
        assert!(fake.calls().is_empty());

        svc.connect("Cafe$(reboot)", Some("longenough")).await.unwrap();
        assert!(fake.called("nmcli connection delete Cafereboot"));
    }

    #[tokio::test]
    async fn connect_timeout_is_a_failed_result() {
        let (svc, _) = service(FakeRunner::new().timeout("nmcli device wifi connect"));
        let result = svc.connect("Cafe", Some("password123")).await.unwrap();
        assert!(!result.success);
        assert!(result.message.contains("timed out"));
    }

    #[tokio::test]
    async fn status_cross_references_scan() {
        let (svc, _) = service(
            FakeRunner::new()
                .on("nmcli --colors no -t -f DEVICE", "wlan1:connected:Cafe\nwlan0:connected:Hotspot\nlo:unmanaged:\n")
                .on("nmcli --colors no -t -f SSID", "Cafe:WPA2:64\nOther:WPA2:10\n"),
        );
        let status = svc.status().await;
        assert!(status.success && status.connected);
        let current = status.current_network.unwrap();
        assert_eq!(current.signal_strength, 64);
        assert_eq!(current.security, "WPA2");
        assert_eq!(status.device_status["lo"].connection, None);
    }

    #[tokio::test]
    async fn status_falls_back_when_not_in_scan() {
        let (svc, _) = service(
            FakeRunner::new()
                .on("nmcli --colors no -t -f DEVICE", "wlan1:connected:Hidden\n")
                .on("nmcli --colors no -t -f SSID", "Cafe:WPA2:64\n"),
        );
        let current = svc.status().await.current_network.unwrap();
        assert_eq!((current.signal_strength, current.security.as_str()), (-60, "WPA2"));
    }

    #[tokio::test]
    async fn disconnect_reports_nothing_to_do() {
        let (svc, fake) = service(FakeRunner::new().on("nmcli --colors no -t -f DEVICE", "wlan1:disconnected:\n"));
        assert_eq!(svc.disconnect().await.unwrap(), DisconnectOutcome::NothingToDisconnect);
        assert!(!fake.called("nmcli device disconnect"));
    }

    #[tokio::test]
    async fn disconnect_active_network() {
        let (svc, _) = service(
            FakeRunner::new()
                .on("nmcli --colors no -t -f DEVICE", "wlan1:connected:Cafe\n")
                .fail("nmcli device disconnect", 6, "Error: device not found"),
        );
        match svc.disconnect().await.unwrap() {
            DisconnectOutcome::Finished(result) => {
                assert!(!result.success);
                assert_eq!(result.message, "WiFi adapter not available.");
            }
            other => panic!("unexpected {:?}", other),
        }
    }
}
