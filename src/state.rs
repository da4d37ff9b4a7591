use std::sync::Arc;

use crate::config::Args;
use crate::gateway::CommandRunner;
use crate::gateway::hotspot::{HotspotBackend, HotspotService};
use crate::gateway::network::NetworkService;
use crate::gateway::system::{FeatureFlags, SystemService};
use crate::gateway::vpn::VpnService;
use crate::policy::PolicyTable;
use crate::rate_limit::RateLimiter;

// app's shared state
pub struct AppState {
    pub limiter: RateLimiter,
    pub policies: PolicyTable,
    pub features: FeatureFlags,
    pub network: NetworkService,
    pub hotspot: HotspotService,
    pub vpn: VpnService,
    pub system: SystemService,
}

impl AppState {
    pub fn new(config: &Args, runner: Arc<dyn CommandRunner>, backend: HotspotBackend) -> Self {
        let hotspot_mode = backend.mode();
        Self {
            limiter: RateLimiter::new(config.rate_window(), config.block_duration()),
            policies: PolicyTable::from_args(config),
            features: FeatureFlags::from_args(config),
            network: NetworkService::new(
                runner.clone(),
                &config.wifi_interface,
                &config.default_ap_ssid,
            ),
            hotspot: HotspotService::new(runner.clone(), backend, config),
            vpn: VpnService::new(runner.clone(), config.vpn_dir(), config.wireguard_dir.clone()),
            system: SystemService::new(runner, config, hotspot_mode),
        }
    }
}
