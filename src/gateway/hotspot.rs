use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use super::network::split_terse;
use super::{CommandRunner, CommandSpec, write_private};
use crate::config::Args;
use crate::error::ApiError;
use crate::models::{ActionResult, HotspotUpdateRequest};
use crate::validation::{is_valid_password, sanitize_ssid};

const PROBE_TIMEOUT: Duration = Duration::from_secs(5);
const READ_TIMEOUT: Duration = Duration::from_secs(10);
const FILE_TIMEOUT: Duration = Duration::from_secs(10);
const RESTART_TIMEOUT: Duration = Duration::from_secs(30);

const STAGED_FILE: &str = "hostapd.conf.staged";

/// How the hotspot is driven on this device, decided once at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HotspotBackend {
    Hostapd { conf_path: PathBuf },
    NetworkManager { interface: String, connection: String },
}

impl HotspotBackend {
    /// hostapd wins when its service is running, NetworkManager otherwise.
    pub async fn probe(runner: &dyn CommandRunner, args: &Args) -> Self {
        let cmd = CommandSpec::new("systemctl", PROBE_TIMEOUT).args(["is-active", "hostapd"]);
        let hostapd_active = match runner.run(&cmd).await {
            Ok(output) => output.stdout.trim() == "active",
            Err(e) => {
                warn!("Could not probe hostapd: {}", e);
                false
            }
        };

        if hostapd_active {
            HotspotBackend::Hostapd {
                conf_path: args.hostapd_conf.clone(),
            }
        } else {
            HotspotBackend::NetworkManager {
                interface: args.ap_interface.clone(),
                connection: args.hotspot_connection.clone(),
            }
        }
    }

    pub fn mode(&self) -> &'static str {
        match self {
            HotspotBackend::Hostapd { .. } => "hostapd",
            HotspotBackend::NetworkManager { .. } => "network-manager",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HotspotConfig {
    pub ssid: String,
    #[serde(skip_serializing)]
    pub password: String,
    pub password_set: bool,
    pub security: String,
    pub visible: bool,
    pub enabled: bool,
    pub mode: &'static str,
}

impl HotspotConfig {
    fn new(ssid: String, password: String, visible: bool, enabled: bool, mode: &'static str) -> Self {
        let security = if password.is_empty() { "Open" } else { "WPA" };
        Self {
            password_set: !password.is_empty(),
            security: security.to_string(),
            ssid,
            password,
            visible,
            enabled,
            mode,
        }
    }
}

/// What a hotspot update does to the passphrase.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PasswordChange {
    Keep,
    Clear,
    Set(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HotspotUpdate {
    pub ssid: String,
    pub password: PasswordChange,
    pub visible: bool,
    pub enabled: bool,
}

impl HotspotUpdate {
    pub fn from_request(req: HotspotUpdateRequest) -> Result<Self, ApiError> {
        let ssid = sanitize_ssid(&req.ssid)
            .ok_or_else(|| ApiError::invalid_field("ssid", "Invalid SSID format"))?;

        let password = match req.password.as_deref() {
            None => PasswordChange::Keep,
            Some("") => PasswordChange::Clear,
            Some(pw) if is_valid_password(pw) => PasswordChange::Set(pw.to_string()),
            Some(_) => {
                return Err(ApiError::invalid_field(
                    "password",
                    "Invalid password format or length",
                ));
            }
        };

        Ok(Self {
            ssid,
            password,
            visible: req.visible.unwrap_or(true),
            enabled: req.enabled.unwrap_or(true),
        })
    }
}

/// Pull `ssid`, `wpa_passphrase` and visibility out of a hostapd.conf.
pub fn parse_hostapd(text: &str) -> (Option<String>, Option<String>, bool) {
    let mut ssid = None;
    let mut password = None;
    let mut visible = true;

    for line in text.lines().map(str::trim) {
        if let Some(v) = line.strip_prefix("ssid=") {
            ssid = Some(v.to_string());
        } else if let Some(v) = line.strip_prefix("wpa_passphrase=") {
            password = Some(v.to_string());
        } else if let Some(v) = line.strip_prefix("ignore_broadcast_ssid=") {
            visible = v.trim() == "0";
        }
    }
    (ssid, password, visible)
}

/// Apply an update to hostapd.conf text, keeping every unrelated line.
pub fn rewrite_hostapd(text: &str, update: &HotspotUpdate) -> String {
    let hidden = if update.visible { "0" } else { "1" };
    let clearing = update.password == PasswordChange::Clear;

    let mut lines: Vec<String> = Vec::new();
    let (mut has_ssid, mut has_hidden, mut has_pass, mut has_wpa, mut has_mgmt) =
        (false, false, false, false, false);

    for line in text.lines() {
        let key = line.trim().split('=').next().unwrap_or("");
        match key {
            "ssid" => {
                has_ssid = true;
                lines.push(format!("ssid={}", update.ssid));
            }
            "ignore_broadcast_ssid" => {
                has_hidden = true;
                lines.push(format!("ignore_broadcast_ssid={}", hidden));
            }
            "wpa_passphrase" | "wpa" | "wpa_key_mgmt" if clearing => {}
            "wpa_passphrase" => {
                has_pass = true;
                match &update.password {
                    PasswordChange::Set(pw) => lines.push(format!("wpa_passphrase={}", pw)),
                    _ => lines.push(line.to_string()),
                }
            }
            "wpa" => {
                has_wpa = true;
                lines.push(line.to_string());
            }
            "wpa_key_mgmt" => {
                has_mgmt = true;
                lines.push(line.to_string());
            }
            _ => lines.push(line.to_string()),
        }
    }

    if !has_ssid {
        lines.push(format!("ssid={}", update.ssid));
    }
    if !has_hidden {
        lines.push(format!("ignore_broadcast_ssid={}", hidden));
    }
    if let PasswordChange::Set(pw) = &update.password {
        if !has_wpa {
            lines.push("wpa=2".to_string());
        }
        if !has_mgmt {
            lines.push("wpa_key_mgmt=WPA-PSK".to_string());
        }
        if !has_pass {
            lines.push(format!("wpa_passphrase={}", pw));
        }
    }

    let mut out = lines.join("\n");
    out.push('\n');
    out
}

pub struct HotspotService {
    runner: Arc<dyn CommandRunner>,
    backend: HotspotBackend,
    staging_dir: PathBuf,
    default_ssid: String,
    default_password: String,
}

impl HotspotService {
    pub fn new(runner: Arc<dyn CommandRunner>, backend: HotspotBackend, args: &Args) -> Self {
        Self {
            runner,
            backend,
            staging_dir: args.data_dir.clone(),
            default_ssid: args.default_ap_ssid.clone(),
            default_password: args.default_ap_password.clone(),
        }
    }

    fn defaults(&self) -> HotspotConfig {
        warn!("Could not detect actual hotspot configuration, using defaults");
        HotspotConfig::new(
            self.default_ssid.clone(),
            self.default_password.clone(),
            true,
            false,
            self.backend.mode(),
        )
    }

    /// Current hotspot settings; falls back to the configured defaults.
    pub async fn read(&self) -> HotspotConfig {
        let found = match &self.backend {
            HotspotBackend::Hostapd { conf_path } => self.read_hostapd(conf_path).await,
            HotspotBackend::NetworkManager {
                interface,
                connection,
            } => self.read_network_manager(interface, connection).await,
        };
        found.unwrap_or_else(|| self.defaults())
    }

    async fn service_active(&self, unit: &str) -> bool {
        let cmd = CommandSpec::new("systemctl", PROBE_TIMEOUT).args(["is-active", unit]);
        matches!(self.runner.run(&cmd).await, Ok(out) if out.stdout.trim() == "active")
    }

    async fn read_hostapd(&self, conf_path: &Path) -> Option<HotspotConfig> {
        let cmd = CommandSpec::sudo("cat", READ_TIMEOUT).arg(conf_path.display().to_string());
        let output = match self.runner.run(&cmd).await {
            Ok(output) if output.success() => output,
            Ok(output) => {
                warn!("Could not read {}: {}", conf_path.display(), output.error_text());
                return None;
            }
            Err(e) => {
                warn!("Could not read {}: {}", conf_path.display(), e);
                return None;
            }
        };

        let (ssid, password, visible) = parse_hostapd(&output.stdout);
        let ssid = ssid.filter(|s| !s.is_empty())?;
        let enabled = self.service_active("hostapd").await;
        Some(HotspotConfig::new(
            ssid,
            password.unwrap_or_default(),
            visible,
            enabled,
            self.backend.mode(),
        ))
    }

    // Active connection on the AP interface, if any
    async fn active_connection(&self, interface: &str) -> Option<String> {
        let cmd = CommandSpec::new("nmcli", READ_TIMEOUT)
            .args(["-t", "-f", "NAME,TYPE,DEVICE", "connection", "show", "--active"]);
        let output = self.runner.run(&cmd).await.ok().filter(|o| o.success())?;

        output
            .stdout
            .lines()
            .map(split_terse)
            .find(|parts| parts.len() >= 3 && parts[2] == interface)
            .map(|parts| parts[0].clone())
    }

    async fn read_network_manager(&self, interface: &str, connection: &str) -> Option<HotspotConfig> {
        let active = self.active_connection(interface).await;
        let enabled = active.is_some();
        let name = active.unwrap_or_else(|| connection.to_string());

        let cmd = CommandSpec::sudo("nmcli", READ_TIMEOUT).args([
            "-s",
            "-g",
            "802-11-wireless.ssid,802-11-wireless-security.psk,802-11-wireless.hidden",
            "connection",
            "show",
            name.as_str(),
        ]);
        let output = match self.runner.run(&cmd).await {
            Ok(output) if output.success() => output,
            Ok(output) => {
                warn!("Could not read hotspot connection {}: {}", name, output.error_text());
                return None;
            }
            Err(e) => {
                warn!("Could not read hotspot connection {}: {}", name, e);
                return None;
            }
        };

        let mut values = output.stdout.lines().map(str::trim);
        let ssid = values.next().filter(|s| !s.is_empty())?.to_string();
        let password = values.next().unwrap_or("").to_string();
        let hidden = values.next().unwrap_or("no");

        Some(HotspotConfig::new(
            ssid,
            password,
            hidden != "yes",
            enabled,
            self.backend.mode(),
        ))
    }

    pub async fn update(&self, update: &HotspotUpdate) -> Result<ActionResult, ApiError> {
        info!("Updating hotspot configuration: SSID={}", update.ssid);
        match &self.backend {
            HotspotBackend::Hostapd { conf_path } => self.update_hostapd(conf_path, update).await,
            HotspotBackend::NetworkManager {
                interface,
                connection,
            } => self.update_network_manager(interface, connection, update).await,
        }
    }

    // Runs a step and turns any failure into a system error
    async fn step(&self, cmd: CommandSpec, what: &str) -> Result<String, ApiError> {
        match self.runner.run(&cmd).await {
            Ok(output) if output.success() => Ok(output.stdout),
            Ok(output) => {
                warn!("{} failed: {}", what, output.error_text());
                Err(ApiError::System(format!("Failed to {}", what)))
            }
            Err(e) if e.is_timeout() => Err(ApiError::System(format!(
                "Timed out while trying to {}",
                what
            ))),
            Err(e) => {
                warn!("{} failed: {}", what, e);
                Err(ApiError::System(format!("Failed to {}", what)))
            }
        }
    }

    async fn update_hostapd(&self, conf_path: &Path, update: &HotspotUpdate) -> Result<ActionResult, ApiError> {
        let conf = conf_path.display().to_string();
        let current = self
            .step(CommandSpec::sudo("cat", READ_TIMEOUT).arg(&conf), "read hotspot configuration")
            .await?;

        // the staged copy holds the passphrase: it never outlives this call
        let staged = self.staging_dir.join(STAGED_FILE);
        let installed = self
            .install_staged(&staged, &rewrite_hostapd(&current, update), &conf)
            .await;
        if let Err(e) = tokio::fs::remove_file(&staged).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!("Could not remove staged hotspot config: {}", e);
            }
        }
        installed?;

        let verb = if update.enabled { "restart" } else { "stop" };
        self.step(
            CommandSpec::sudo("systemctl", RESTART_TIMEOUT).args([verb, "hostapd"]),
            "apply hotspot configuration",
        )
        .await?;

        Ok(Self::applied(update))
    }

    async fn install_staged(&self, staged: &Path, text: &str, conf: &str) -> Result<(), ApiError> {
        write_private(staged, text.as_bytes())
            .await
            .map_err(|e| anyhow::anyhow!("staging {}: {}", staged.display(), e))?;

        let staged = staged.display().to_string();
        self.step(
            CommandSpec::sudo("cp", FILE_TIMEOUT).args([staged.as_str(), conf]),
            "install hotspot configuration",
        )
        .await?;
        self.step(
            CommandSpec::sudo("chmod", FILE_TIMEOUT).args(["600", conf]),
            "secure hotspot configuration",
        )
        .await?;
        Ok(())
    }

    async fn update_network_manager(
        &self,
        interface: &str,
        connection: &str,
        update: &HotspotUpdate,
    ) -> Result<ActionResult, ApiError> {
        let name = self
            .active_connection(interface)
            .await
            .unwrap_or_else(|| connection.to_string());

        let hidden = if update.visible { "no" } else { "yes" };
        let mut modify = CommandSpec::sudo("nmcli", FILE_TIMEOUT).args([
            "connection",
            "modify",
            name.as_str(),
            "802-11-wireless.ssid",
            update.ssid.as_str(),
            "802-11-wireless.hidden",
            hidden,
        ]);
        if let PasswordChange::Set(pw) = &update.password {
            modify = modify.args(["wifi-sec.key-mgmt", "wpa-psk", "wifi-sec.psk", pw.as_str()]);
        }
        self.step(modify, "update hotspot connection").await?;

        if update.password == PasswordChange::Clear {
            self.step(
                CommandSpec::sudo("nmcli", FILE_TIMEOUT).args([
                    "connection",
                    "modify",
                    name.as_str(),
                    "remove",
                    "802-11-wireless-security",
                ]),
                "remove hotspot password",
            )
            .await?;
        }

        let verb = if update.enabled { "up" } else { "down" };
        self.step(
            CommandSpec::sudo("nmcli", RESTART_TIMEOUT).args(["connection", verb, name.as_str()]),
            "apply hotspot configuration",
        )
        .await?;

        Ok(Self::applied(update))
    }

    fn applied(update: &HotspotUpdate) -> ActionResult {
        info!("Hotspot configuration applied: SSID={}", update.ssid);
        if update.enabled {
            ActionResult::ok(format!("Hotspot updated. Broadcasting as {}", update.ssid))
        } else {
            ActionResult::ok("Hotspot configuration saved and hotspot disabled")
        }
    }
}
