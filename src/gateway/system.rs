use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use super::{CommandRunner, CommandSpec};
use crate::config::Args;
use crate::error::ApiError;
use crate::logging;
use crate::models::SystemActionResult;

const REBOOT_TIMEOUT: Duration = Duration::from_secs(5);
const SERVICE_TIMEOUT: Duration = Duration::from_secs(15);
const RESTART_NETWORK_TIMEOUT: Duration = Duration::from_secs(30);
const QUERY_TIMEOUT: Duration = Duration::from_secs(5);
const LOGS_TIMEOUT: Duration = Duration::from_secs(15);
const CONNECTIVITY_TIMEOUT: Duration = Duration::from_secs(3);

pub const DEFAULT_LOG_LINES: u32 = 100;
pub const MAX_LOG_LINES: u32 = 500;
const UPDATE_TAIL_LINES: usize = 20;

const UPDATE_PID: &str = "update.pid";
const UPDATE_STATUS: &str = "update.status";
const UPDATE_LOG: &str = "update.log";

/// Which privileged endpoints are switched on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FeatureFlags {
    pub ssh_management_enabled: bool,
    pub reboot_enabled: bool,
    pub qr_generation_enabled: bool,
    pub vpn_enabled: bool,
    pub update_enabled: bool,
}

impl FeatureFlags {
    pub fn from_args(args: &Args) -> Self {
        Self {
            ssh_management_enabled: args.enable_ssh_management,
            reboot_enabled: args.enable_system_reboot,
            qr_generation_enabled: args.enable_qr_generation,
            vpn_enabled: args.enable_vpn_tunnel,
            update_enabled: args.enable_system_update,
        }
    }
}

/// Fails with a security error (and an audit line) when `enabled` is off.
pub fn require_feature(enabled: bool, what: &str) -> Result<(), ApiError> {
    if enabled {
        Ok(())
    } else {
        warn!(target: "security", "{} attempted while the feature is disabled", what);
        Err(ApiError::Security(format!("{} is not enabled", what)))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SshAction {
    Enable,
    Disable,
}

impl std::str::FromStr for SshAction {
    type Err = ApiError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "enable" => Ok(SshAction::Enable),
            "disable" => Ok(SshAction::Disable),
            _ => Err(ApiError::validation("Invalid SSH action")),
        }
    }
}

/// journalctl unit for each log type; `None` is the whole journal.
pub fn log_unit<'a>(log_type: &str, app_service: &'a str) -> Result<Option<&'a str>, ApiError> {
    match log_type {
        "system" => Ok(None),
        "app" => Ok(Some(app_service)),
        "network" => Ok(Some("NetworkManager")),
        "hotspot" => Ok(Some("hostapd")),
        "ssh" => Ok(Some("ssh")),
        "vpn" => Ok(Some("wg-quick@wg0")),
        _ => Err(ApiError::invalid_field("type", "Invalid log type")),
    }
}

pub fn clamp_lines(lines: Option<u32>) -> u32 {
    lines.unwrap_or(DEFAULT_LOG_LINES).clamp(1, MAX_LOG_LINES)
}

// First field of /proc/uptime, whole seconds
pub fn parse_uptime(text: &str) -> Option<u64> {
    let secs: f64 = text.split_whitespace().next()?.parse().ok()?;
    Some(secs as u64)
}

pub fn human_uptime(secs: u64) -> String {
    let days = secs / 86_400;
    let hours = (secs % 86_400) / 3_600;
    let minutes = (secs % 3_600) / 60;
    if days > 0 {
        format!("{}d {}h {}m", days, hours, minutes)
    } else if hours > 0 {
        format!("{}h {}m", hours, minutes)
    } else {
        format!("{}m", minutes)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MemoryInfo {
    pub total: u64,
    pub available: u64,
    pub used: u64,
}

// MemTotal / MemAvailable from /proc/meminfo, in bytes
pub fn parse_meminfo(text: &str) -> Option<MemoryInfo> {
    let field = |name: &str| -> Option<u64> {
        text.lines()
            .find_map(|l| l.strip_prefix(name))
            .and_then(|rest| rest.trim_start_matches(':').split_whitespace().next())
            .and_then(|kb| kb.parse::<u64>().ok())
            .map(|kb| kb * 1024)
    };
    let total = field("MemTotal")?;
    let available = field("MemAvailable")?;
    Some(MemoryInfo {
        total,
        available,
        used: total.saturating_sub(available),
    })
}

// Single-quote for sh
fn shell_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', r"'\''"))
}

#[derive(Debug, Clone, Serialize)]
pub struct ServiceState {
    pub active: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct Services {
    pub ssh: ServiceState,
    pub hostapd: ServiceState,
    pub network_manager: ServiceState,
}

#[derive(Debug, Clone, Serialize)]
pub struct Uptime {
    pub seconds: u64,
    pub human: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct SystemInfo {
    #[serde(flatten)]
    pub features: FeatureFlags,
    pub hotspot_mode: &'static str,
    pub uptime: Option<Uptime>,
    pub memory: Option<MemoryInfo>,
    pub internet_connected: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct SystemStatus {
    pub success: bool,
    pub timestamp: String,
    pub services: Services,
    pub system: SystemInfo,
}

#[derive(Debug, Clone, Serialize)]
pub struct LogsResponse {
    pub success: bool,
    pub log_type: String,
    pub lines: u32,
    pub logs: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct UpdateStarted {
    pub success: bool,
    pub message: String,
    pub pid: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum UpdateState {
    Idle,
    Running,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Serialize)]
pub struct UpdateStatus {
    pub success: bool,
    pub state: UpdateState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    pub log_tail: String,
}

pub struct SystemService {
    runner: Arc<dyn CommandRunner>,
    client: reqwest::Client,
    flags: FeatureFlags,
    hotspot_mode: &'static str,
    data_dir: PathBuf,
    update_command: String,
    app_service: String,
    connectivity_url: String,
}

impl SystemService {
    pub fn new(runner: Arc<dyn CommandRunner>, args: &Args, hotspot_mode: &'static str) -> Self {
        Self {
            runner,
            client: reqwest::Client::new(),
            flags: FeatureFlags::from_args(args),
            hotspot_mode,
            data_dir: args.data_dir.clone(),
            update_command: args.update_command.clone(),
            app_service: args.app_service.clone(),
            connectivity_url: args.connectivity_url.clone(),
        }
    }

    pub async fn reboot(&self) -> Result<SystemActionResult, ApiError> {
        require_feature(self.flags.reboot_enabled, "System reboot")?;
        warn!(target: "security", "System reboot initiated");

        let cmd = CommandSpec::sudo("reboot", REBOOT_TIMEOUT);
        let result = match self.runner.run(&cmd).await {
            Ok(out) if out.success() => {
                SystemActionResult::ok("System reboot initiated. The system will restart shortly.")
            }
            // the machine is going down under us
            Err(e) if e.is_timeout() => SystemActionResult::ok("System reboot initiated"),
            Ok(out) => {
                error!("Error rebooting system: {}", out.error_text());
                SystemActionResult::failed("Failed to initiate system reboot")
            }
            Err(e) => {
                error!("Error rebooting system: {}", e);
                SystemActionResult::failed("Failed to initiate system reboot")
            }
        };
        Ok(result)
    }

    async fn systemctl(&self, verb: &str, unit: &str, timeout: Duration) -> Result<(), String> {
        let cmd = CommandSpec::sudo("systemctl", timeout).args([verb, unit]);
        match self.runner.run(&cmd).await {
            Ok(out) if out.success() => Ok(()),
            Ok(out) => Err(out.error_text().to_string()),
            Err(e) => Err(e.to_string()),
        }
    }

    pub async fn ssh(&self, action: SshAction) -> Result<SystemActionResult, ApiError> {
        require_feature(self.flags.ssh_management_enabled, "SSH management")?;

        let (steps, done, label) = match action {
            SshAction::Enable => (["enable", "start"], "SSH service enabled and started", "enable"),
            SshAction::Disable => (["stop", "disable"], "SSH service stopped and disabled", "disable"),
        };
        warn!(target: "security", "SSH {} requested", label);

        for verb in steps {
            if let Err(detail) = self.systemctl(verb, "ssh", SERVICE_TIMEOUT).await {
                error!("systemctl {} ssh failed: {}", verb, detail);
                return Ok(SystemActionResult::failed(format!("SSH {} operation failed", label)));
            }
        }
        info!("{}", done);
        Ok(SystemActionResult::ok(done))
    }

    pub async fn restart_network(&self) -> SystemActionResult {
        warn!(target: "security", "NetworkManager restart requested");
        match self
            .systemctl("restart", "NetworkManager", RESTART_NETWORK_TIMEOUT)
            .await
        {
            Ok(()) => SystemActionResult::ok("Network services restarted"),
            Err(detail) => {
                error!("Failed to restart NetworkManager: {}", detail);
                SystemActionResult::failed("Failed to restart network services")
            }
        }
    }

    fn update_file(&self, name: &str) -> PathBuf {
        self.data_dir.join(name)
    }

    async fn read_pid(&self) -> Option<u32> {
        let text = tokio::fs::read_to_string(self.update_file(UPDATE_PID)).await.ok()?;
        text.trim().parse().ok()
    }

    async fn pid_alive(&self, pid: u32) -> bool {
        let cmd = CommandSpec::new("ps", QUERY_TIMEOUT).args(["-p".to_string(), pid.to_string()]);
        matches!(self.runner.run(&cmd).await, Ok(out) if out.success())
    }

    pub async fn start_update(&self) -> Result<UpdateStarted, ApiError> {
        require_feature(self.flags.update_enabled, "System update")?;

        if let Some(pid) = self.read_pid().await {
            if self.pid_alive(pid).await {
                return Err(ApiError::Conflict(format!(
                    "A system update is already running (pid {})",
                    pid
                )));
            }
        }

        let status_file = self.update_file(UPDATE_STATUS);
        if let Err(e) = tokio::fs::remove_file(&status_file).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!("Could not clear previous update status: {}", e);
            }
        }

        let script = format!(
            "{} > {} 2>&1; echo $? > {}",
            self.update_command,
            shell_quote(&self.update_file(UPDATE_LOG).display().to_string()),
            shell_quote(&status_file.display().to_string()),
        );
        let cmd = CommandSpec::new("sh", Duration::ZERO).args(["-c".to_string(), script]);
        let pid = self.runner.spawn_detached(&cmd).map_err(|e| {
            error!("Could not start update: {}", e);
            ApiError::System("Failed to start system update".into())
        })?;

        tokio::fs::write(self.update_file(UPDATE_PID), pid.to_string())
            .await
            .map_err(|e| anyhow::anyhow!("recording update pid: {}", e))?;

        warn!(target: "security", "System update started (pid {})", pid);
        Ok(UpdateStarted {
            success: true,
            message: "System update started".into(),
            pid,
        })
    }

    async fn update_log_tail(&self) -> String {
        let Ok(text) = tokio::fs::read_to_string(self.update_file(UPDATE_LOG)).await else {
            return String::new();
        };
        let lines: Vec<&str> = text.lines().collect();
        let start = lines.len().saturating_sub(UPDATE_TAIL_LINES);
        logging::redact_text(&lines[start..].join("\n"))
    }

    pub async fn update_status(&self) -> UpdateStatus {
        let pid = self.read_pid().await;
        let running = match pid {
            Some(pid) => self.pid_alive(pid).await,
            None => false,
        };

        let exit_code = if running {
            None
        } else {
            tokio::fs::read_to_string(self.update_file(UPDATE_STATUS))
                .await
                .ok()
                .and_then(|s| s.trim().parse::<i32>().ok())
        };

        let state = match (running, exit_code, pid) {
            (true, _, _) => UpdateState::Running,
            (false, Some(0), _) => UpdateState::Completed,
            (false, Some(_), _) => UpdateState::Failed,
            // started but died without recording an exit code
            (false, None, Some(_)) => UpdateState::Failed,
            (false, None, None) => UpdateState::Idle,
        };

        UpdateStatus {
            success: true,
            state,
            pid,
            exit_code,
            log_tail: self.update_log_tail().await,
        }
    }

    pub async fn logs(&self, log_type: Option<&str>, lines: Option<u32>) -> Result<LogsResponse, ApiError> {
        let log_type = log_type.unwrap_or("system");
        let unit = log_unit(log_type, &self.app_service)?;
        let lines = clamp_lines(lines);

        let mut cmd = CommandSpec::sudo("journalctl", LOGS_TIMEOUT);
        if let Some(unit) = unit {
            cmd = cmd.args(["-u", unit]);
        }
        cmd = cmd.args(["-n".to_string(), lines.to_string(), "--no-pager".to_string()]);

        let output = self.runner.run(&cmd).await.map_err(|e| {
            error!("Reading {} logs failed: {}", log_type, e);
            ApiError::System("Failed to read logs".into())
        })?;
        if !output.success() {
            error!("Reading {} logs failed: {}", log_type, output.error_text());
            return Err(ApiError::System("Failed to read logs".into()));
        }

        Ok(LogsResponse {
            success: true,
            log_type: log_type.to_string(),
            lines,
            logs: logging::redact_text(&output.stdout),
        })
    }

    async fn unit_active(&self, unit: &str) -> bool {
        let cmd = CommandSpec::new("systemctl", QUERY_TIMEOUT).args(["is-active", unit]);
        matches!(self.runner.run(&cmd).await, Ok(out) if out.stdout.trim() == "active")
    }

    async fn read_proc(&self, path: &str) -> Option<String> {
        let cmd = CommandSpec::new("cat", QUERY_TIMEOUT).arg(path);
        self.runner
            .run(&cmd)
            .await
            .ok()
            .filter(|o| o.success())
            .map(|o| o.stdout)
    }

    async fn internet_connected(&self) -> bool {
        match self
            .client
            .get(&self.connectivity_url)
            .timeout(CONNECTIVITY_TIMEOUT)
            .send()
            .await
        {
            Ok(res) => res.status().is_success(),
            Err(e) => {
                info!("Connectivity probe failed: {}", e);
                false
            }
        }
    }

    pub async fn status(&self) -> SystemStatus {
        let (ssh, hostapd, network_manager) = tokio::join!(
            self.unit_active("ssh"),
            self.unit_active("hostapd"),
            self.unit_active("NetworkManager"),
        );
        let (uptime, meminfo, internet_connected) = tokio::join!(
            self.read_proc("/proc/uptime"),
            self.read_proc("/proc/meminfo"),
            self.internet_connected(),
        );

        let uptime = uptime.as_deref().and_then(parse_uptime).map(|seconds| Uptime {
            seconds,
            human: human_uptime(seconds),
        });

        SystemStatus {
            success: true,
            timestamp: chrono::Utc::now().to_rfc3339(),
            services: Services {
                ssh: ServiceState { active: ssh },
                hostapd: ServiceState { active: hostapd },
                network_manager: ServiceState {
                    active: network_manager,
                },
            },
            system: SystemInfo {
                features: self.flags,
                hotspot_mode: self.hotspot_mode,
                uptime,
                memory: meminfo.as_deref().and_then(parse_meminfo),
                internet_connected,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::fake::FakeRunner;
    use clap::Parser;

    fn args(dir: &std::path::Path, extra: &[&str]) -> Args {
        let mut argv = vec![
            "travelnet-portal",
            "--data-dir",
            dir.to_str().unwrap(),
            "--connectivity-url",
            "http://127.0.0.1:9/generate_204",
        ];
        argv.extend_from_slice(extra);
        Args::parse_from(argv)
    }

    fn service(fake: FakeRunner, a: &Args) -> (SystemService, Arc<FakeRunner>) {
        let fake = Arc::new(fake);
        (SystemService::new(fake.clone(), a, "hostapd"), fake)
    }

    #[test]
    fn parses_proc_files() {
        assert_eq!(parse_uptime("93784.55 12345.00\n"), Some(93784));
        assert_eq!(human_uptime(93784), "1d 2h 3m");
        assert_eq!(human_uptime(125), "2m");

        let mem = parse_meminfo("MemTotal:        1000 kB\nMemFree:  10 kB\nMemAvailable:     250 kB\n").unwrap();
        assert_eq!(mem.total, 1_024_000);
        assert_eq!(mem.used, 750 * 1024);
        assert!(parse_meminfo("garbage").is_none());
    }

    #[test]
    fn log_types_and_lines() {
        assert_eq!(log_unit("app", "travelnet").unwrap(), Some("travelnet"));
        assert_eq!(log_unit("system", "x").unwrap(), None);
        assert_eq!(log_unit("kernel", "x").unwrap_err().kind(), "validation_error");
        assert_eq!(clamp_lines(None), 100);
        assert_eq!(clamp_lines(Some(0)), 1);
        assert_eq!(clamp_lines(Some(10_000)), 500);
    }

    #[test]
    fn ssh_action_parsing() {
        assert_eq!("enable".parse::<SshAction>().unwrap(), SshAction::Enable);
        assert!("restart".parse::<SshAction>().is_err());
    }

    #[tokio::test]
    async fn reboot_timeout_counts_as_success() {
        let dir = tempfile::tempdir().unwrap();
        let a = args(dir.path(), &[]);
        let (svc, _) = service(FakeRunner::new().timeout("sudo reboot"), &a);
        let result = svc.reboot().await.unwrap();
        assert!(result.success);
        assert_eq!(result.message, "System reboot initiated");
    }

    #[tokio::test]
    async fn disabled_features_are_refused() {
        let dir = tempfile::tempdir().unwrap();
        let a = args(
            dir.path(),
            &["--enable-system-reboot", "false", "--enable-ssh-management", "false"],
        );
        let (svc, fake) = service(FakeRunner::new(), &a);
        assert_eq!(svc.reboot().await.unwrap_err().kind(), "security_error");
        assert_eq!(svc.ssh(SshAction::Enable).await.unwrap_err().kind(), "security_error");
        assert!(fake.calls().is_empty());
    }

    #[tokio::test]
    async fn ssh_runs_steps_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let a = args(dir.path(), &[]);
        let (svc, fake) = service(FakeRunner::new(), &a);
        assert!(svc.ssh(SshAction::Disable).await.unwrap().success);
        assert_eq!(
            fake.calls(),
            vec!["sudo systemctl stop ssh", "sudo systemctl disable ssh"]
        );

        let (svc, fake) = service(FakeRunner::new().fail("sudo systemctl enable", 1, "Access denied"), &a);
        assert!(!svc.ssh(SshAction::Enable).await.unwrap().success);
        assert!(!fake.called("sudo systemctl start"));
    }

    #[tokio::test]
    async fn update_lifecycle() {
        let dir = tempfile::tempdir().unwrap();
        let a = args(dir.path(), &[]);

        let (svc, fake) = service(FakeRunner::new(), &a);
        assert_eq!(svc.update_status().await.state, UpdateState::Idle);

        let started = svc.start_update().await.unwrap();
        assert_eq!(started.pid, 4242);
        assert!(fake.called("sh -c /opt/travelnet/update.sh > "));
        assert_eq!(std::fs::read_to_string(dir.path().join("update.pid")).unwrap(), "4242");

        // ps -p succeeds by default: still running
        assert_eq!(svc.update_status().await.state, UpdateState::Running);
        assert_eq!(svc.start_update().await.unwrap_err().kind(), "conflict");

        let (svc, _) = service(FakeRunner::new().fail("ps -p", 1, ""), &a);
        std::fs::write(dir.path().join("update.status"), "0\n").unwrap();
        std::fs::write(dir.path().join("update.log"), "step 1\ntoken=abc\ndone\n").unwrap();
        let status = svc.update_status().await;
        assert_eq!(status.state, UpdateState::Completed);
        assert_eq!(status.exit_code, Some(0));
        assert_eq!(status.log_tail, "step 1\ntoken=[REDACTED]\ndone");

        std::fs::write(dir.path().join("update.status"), "2\n").unwrap();
        assert_eq!(svc.update_status().await.state, UpdateState::Failed);
    }

    #[tokio::test]
    async fn update_that_died_without_status_is_failed() {
        let dir = tempfile::tempdir().unwrap();
        let a = args(dir.path(), &[]);
        std::fs::write(dir.path().join("update.pid"), "5150\n").unwrap();

        let (svc, fake) = service(FakeRunner::new().fail("ps -p 5150", 1, ""), &a);
        let status = svc.update_status().await;
        assert_eq!(status.state, UpdateState::Failed);
        assert_eq!(status.pid, Some(5150));
        assert_eq!(status.exit_code, None);
        assert!(fake.called("ps -p 5150"));

        // a dead update no longer blocks a new one
        assert_eq!(svc.start_update().await.unwrap().pid, 4242);
    }

    #[tokio::test]
    async fn logs_are_redacted() {
        let dir = tempfile::tempdir().unwrap();
        let a = args(dir.path(), &[]);
        let (svc, fake) = service(
            FakeRunner::new().on("sudo journalctl", "hostapd: wpa_passphrase=hunter22\nok\n"),
            &a,
        );
        let logs = svc.logs(Some("hotspot"), Some(5)).await.unwrap();
        assert_eq!(logs.logs, "hostapd: wpa_passphrase=[REDACTED]\nok");
        assert!(fake.called("sudo journalctl -u hostapd -n 5 --no-pager"));
    }

    #[tokio::test]
    async fn status_collects_everything() {
        let dir = tempfile::tempdir().unwrap();
        let a = args(dir.path(), &[]);
        let (svc, _) = service(
            FakeRunner::new()
                .on("systemctl is-active ssh", "active\n")
                .fail("systemctl is-active hostapd", 3, "inactive")
                .on("systemctl is-active NetworkManager", "active\n")
                .on("cat /proc/uptime", "3600.1 1.0\n")
                .on("cat /proc/meminfo", "MemTotal: 2048 kB\nMemAvailable: 1024 kB\n"),
            &a,
        );
        let status = svc.status().await;
        assert!(status.services.ssh.active);
        assert!(!status.services.hostapd.active);
        assert_eq!(status.system.uptime.unwrap().human, "1h 0m");
        assert_eq!(status.system.memory.unwrap().available, 1024 * 1024);
        assert!(!status.system.internet_connected);
        assert!(status.system.features.reboot_enabled);
    }
}
