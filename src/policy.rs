use axum::http::Method;
use std::collections::HashMap;

use crate::config::Args;

// Rate-limit severity tiers, graded by blast radius
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tier {
    Polling,
    Read,
    Action,
    Sensitive,
    Critical,
}

impl Tier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Polling => "polling",
            Tier::Read => "read",
            Tier::Action => "action",
            Tier::Sensitive => "sensitive",
            Tier::Critical => "critical",
        }
    }

    // Requests on these tiers are written to the security audit log
    pub fn is_privileged(&self) -> bool {
        matches!(self, Tier::Sensitive | Tier::Critical)
    }
}

// Every API route and the tier it is limited under; paths are relative to /api/v1
pub const ROUTE_TIERS: &[(&str, &str, Tier)] = &[
    ("GET", "/networks/scan", Tier::Read),
    ("POST", "/networks/connect", Tier::Action),
    ("POST", "/networks/disconnect", Tier::Action),
    ("GET", "/networks/status", Tier::Polling),
    ("GET", "/system/status", Tier::Polling),
    ("POST", "/system/reboot", Tier::Critical),
    ("POST", "/system/restart-network", Tier::Sensitive),
    ("POST", "/system/update", Tier::Sensitive),
    ("GET", "/system/update/status", Tier::Polling),
    ("GET", "/system/logs", Tier::Read),
    ("POST", "/system/ssh/{action}", Tier::Sensitive),
    ("GET", "/hotspot/config", Tier::Read),
    ("POST", "/hotspot/config", Tier::Action),
    ("GET", "/qr/hotspot", Tier::Read),
    ("POST", "/qr/generate", Tier::Action),
    ("POST", "/qr/parse", Tier::Action),
    ("GET", "/vpn/status", Tier::Polling),
    ("POST", "/vpn/connect", Tier::Action),
    ("POST", "/vpn/disconnect", Tier::Action),
    ("GET", "/vpn/configs", Tier::Read),
    ("POST", "/vpn/configs", Tier::Sensitive),
    ("DELETE", "/vpn/configs/{name}", Tier::Sensitive),
];

/// Resolved policy for one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutePolicy {
    pub key: String,
    pub tier: Tier,
    pub ceiling: u32,
}

/// Route -> ceiling table, built once at startup from configuration.
#[derive(Debug, Clone)]
pub struct PolicyTable {
    routes: HashMap<(Method, String), Tier>,
    ceilings: HashMap<Tier, u32>,
    default_tier: Tier,
}

impl PolicyTable {
    pub fn from_args(args: &Args) -> Self {
        let ceilings = HashMap::from([
            (Tier::Polling, args.rate_limit_polling),
            (Tier::Read, args.rate_limit_read),
            (Tier::Action, args.rate_limit_action),
            (Tier::Sensitive, args.rate_limit_sensitive),
            (Tier::Critical, args.rate_limit_critical),
        ]);

        let routes = ROUTE_TIERS
            .iter()
            .filter_map(|(method, path, tier)| {
                let method = Method::from_bytes(method.as_bytes()).ok()?;
                Some(((method, path.to_string()), *tier))
            })
            .collect();

        Self {
            routes,
            ceilings,
            default_tier: Tier::Read,
        }
    }

    pub fn ceiling(&self, tier: Tier) -> u32 {
        self.ceilings.get(&tier).copied().unwrap_or(0)
    }

    // Unknown routes fall back to the read tier
    pub fn resolve(&self, method: &Method, path: &str) -> RoutePolicy {
        let tier = self
            .routes
            .get(&(method.clone(), path.to_string()))
            .copied()
            .unwrap_or(self.default_tier);

        RoutePolicy {
            key: format!("{} {}", method, path),
            tier,
            ceiling: self.ceiling(tier),
        }
    }
}
