use clap::{ArgAction, Parser};
use std::path::PathBuf;
use std::time::Duration;

// CLI argument structure, every option can also come from the environment
#[derive(Parser, Debug, Clone)]
#[command(name = "travelnet-portal")]
#[command(about = "Local control panel for a portable travel router")]
pub struct Args {
    // Address to bind the portal on
    #[arg(long, env = "HOST", default_value = "0.0.0.0")]
    pub host: String,

    // Port to run the server on
    #[arg(short, long, env = "PORT", default_value_t = 80)]
    pub port: u16,

    // Interface used to join upstream networks
    #[arg(long, env = "WIFI_INTERFACE", default_value = "wlan1")]
    pub wifi_interface: String,

    // Interface broadcasting the router's own hotspot
    #[arg(long, env = "AP_INTERFACE", default_value = "wlan0")]
    pub ap_interface: String,

    // Hotspot credentials used when the system config can't be read
    #[arg(long, env = "DEFAULT_AP_SSID", default_value = "TravelNet-Portal")]
    pub default_ap_ssid: String,

    #[arg(long, env = "DEFAULT_AP_PASSWORD", default_value = "TravelNet2026!", hide_env_values = true)]
    pub default_ap_password: String,

    #[arg(long, env = "HOSTAPD_CONF", default_value = "/etc/hostapd/hostapd.conf")]
    pub hostapd_conf: PathBuf,

    // NetworkManager connection name for the hotspot (network-manager mode)
    #[arg(long, env = "HOTSPOT_CONNECTION", default_value = "Hotspot")]
    pub hotspot_connection: String,

    // Where VPN configs, staged files and update bookkeeping live
    #[arg(long, env = "DATA_DIR", default_value = "/opt/travelnet")]
    pub data_dir: PathBuf,

    #[arg(long, env = "WIREGUARD_DIR", default_value = "/etc/wireguard")]
    pub wireguard_dir: PathBuf,

    // Feature flags
    #[arg(long, env = "ENABLE_SSH_MANAGEMENT", default_value_t = true, action = ArgAction::Set)]
    pub enable_ssh_management: bool,

    #[arg(long, env = "ENABLE_SYSTEM_REBOOT", default_value_t = true, action = ArgAction::Set)]
    pub enable_system_reboot: bool,

    #[arg(long, env = "ENABLE_QR_GENERATION", default_value_t = true, action = ArgAction::Set)]
    pub enable_qr_generation: bool,

    #[arg(long, env = "ENABLE_VPN_TUNNEL", default_value_t = true, action = ArgAction::Set)]
    pub enable_vpn_tunnel: bool,

    #[arg(long, env = "ENABLE_SYSTEM_UPDATE", default_value_t = true, action = ArgAction::Set)]
    pub enable_system_update: bool,

    // Rate limit ceilings per severity tier (requests per window)
    #[arg(long, env = "RATE_LIMIT_POLLING", default_value_t = 1000)]
    pub rate_limit_polling: u32,

    #[arg(long, env = "RATE_LIMIT_READ", default_value_t = 100)]
    pub rate_limit_read: u32,

    #[arg(long, env = "RATE_LIMIT_ACTION", default_value_t = 30)]
    pub rate_limit_action: u32,

    #[arg(long, env = "RATE_LIMIT_SENSITIVE", default_value_t = 10)]
    pub rate_limit_sensitive: u32,

    #[arg(long, env = "RATE_LIMIT_CRITICAL", default_value_t = 2)]
    pub rate_limit_critical: u32,

    // Rate limit window in seconds
    #[arg(long, env = "RATE_WINDOW_SECS", default_value_t = 60)]
    pub rate_window: u64,

    // How long a client stays blocked after tripping a limit
    #[arg(long, env = "BLOCK_DURATION_SECS", default_value_t = 120)]
    pub block_duration: u64,

    // Command run (detached) by POST /system/update
    #[arg(long, env = "UPDATE_COMMAND", default_value = "/opt/travelnet/update.sh")]
    pub update_command: String,

    // systemd unit of the portal itself, used for the "app" log type
    #[arg(long, env = "APP_SERVICE", default_value = "travelnet")]
    pub app_service: String,

    // Probed to decide whether the router has internet access
    #[arg(long, env = "CONNECTIVITY_URL", default_value = "http://connectivitycheck.gstatic.com/generate_204")]
    pub connectivity_url: String,
}

impl Args {
    pub fn rate_window(&self) -> Duration {
        Duration::from_secs(self.rate_window)
    }

    pub fn block_duration(&self) -> Duration {
        Duration::from_secs(self.block_duration)
    }

    pub fn vpn_dir(&self) -> PathBuf {
        self.data_dir.join("vpn_configs")
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
