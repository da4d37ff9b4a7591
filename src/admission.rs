//! The gate every `/api/v1` request passes before reaching a handler:
//! block check, then the sliding-window rate check for the route's tier.

use axum::{
    extract::{ConnectInfo, MatchedPath, Request, State},
    http::HeaderMap,
    middleware::Next,
    response::Response,
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::error::ApiError;
use crate::metrics::{BLOCKED, RATE_LIMITED, REQUEST_TOTAL};
use crate::rate_limit::Admission;
use crate::state::AppState;

pub const API_PREFIX: &str = "/api/v1";
pub const PURGE_INTERVAL: Duration = Duration::from_secs(300);

fn first_header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

/// X-Forwarded-For, then X-Real-IP, then the peer address.
pub fn client_id(req: &Request) -> String {
    if let Some(ip) = first_header(req.headers(), "x-forwarded-for") {
        return ip.to_string();
    }
    if let Some(ip) = first_header(req.headers(), "x-real-ip") {
        return ip.to_string();
    }
    req.extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

// Whole seconds, rounded up so clients never retry early
fn retry_secs(d: Duration) -> u64 {
    d.as_secs() + u64::from(d.subsec_nanos() > 0)
}

pub async fn admission_gate(
    State(state): State<Arc<AppState>>,
    req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    REQUEST_TOTAL.inc();

    let client = client_id(&req);
    let path = req
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| req.uri().path().to_string());
    let route = path.strip_prefix(API_PREFIX).unwrap_or(&path);
    let policy = state.policies.resolve(req.method(), route);

    match state.limiter.check(&client, policy.ceiling) {
        Admission::Allowed { remaining } => {
            if policy.tier.is_privileged() {
                warn!(
                    target: "security",
                    "{} request to {} from {}",
                    policy.tier.as_str(),
                    policy.key,
                    client
                );
            } else {
                debug!("{} admitted for {} ({} left)", policy.key, client, remaining);
            }
            Ok(next.run(req).await)
        }
        Admission::RateLimited => {
            RATE_LIMITED.inc();
            warn!(
                target: "security",
                "Rate limit exceeded for {} on {} ({} tier, {} per {:?}); blocking",
                client,
                policy.key,
                policy.tier.as_str(),
                policy.ceiling,
                state.limiter.window()
            );
            Err(ApiError::RateLimited {
                retry_after: retry_secs(state.limiter.block_duration()),
            })
        }
        Admission::Blocked { retry_after } => {
            BLOCKED.inc();
            warn!(target: "security", "Blocked client {} attempted {}", client, policy.key);
            Err(ApiError::IpBlocked {
                retry_after: retry_secs(retry_after),
            })
        }
    }
}

/// Periodically drop idle, unblocked client records.
pub fn spawn_purge_task(state: Arc<AppState>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(PURGE_INTERVAL);
        // the first tick fires immediately
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let removed = state.limiter.purge_idle(Instant::now());
            if removed > 0 {
                debug!(
                    "Purged {} idle clients, {} still tracked",
                    removed,
                    state.limiter.tracked_clients()
                );
            }
        }
    })
}
