pub mod admission;
pub mod config;
pub mod error;
pub mod gateway;
pub mod handlers;
pub mod logging;
pub mod metrics;
pub mod models;
pub mod policy;
pub mod qr;
pub mod rate_limit;
pub mod state;
pub mod validation;

use axum::{
    Router,
    http::{HeaderName, HeaderValue},
    middleware,
    routing::{delete, get, post},
};
use std::sync::Arc;
use tower_http::{set_header::SetResponseHeaderLayer, trace::TraceLayer};

use crate::state::AppState;

const SECURITY_HEADERS: &[(&str, &str)] = &[
    ("x-content-type-options", "nosniff"),
    ("x-frame-options", "DENY"),
    ("x-xss-protection", "1; mode=block"),
    ("referrer-policy", "no-referrer"),
];

fn api_routes(state: Arc<AppState>) -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/v1/networks/scan", get(handlers::scan_handler))
        .route("/api/v1/networks/connect", post(handlers::connect_handler))
        .route("/api/v1/networks/disconnect", post(handlers::disconnect_handler))
        .route("/api/v1/networks/status", get(handlers::network_status_handler))
        .route("/api/v1/system/status", get(handlers::system_status_handler))
        .route("/api/v1/system/reboot", post(handlers::reboot_handler))
        .route("/api/v1/system/restart-network", post(handlers::restart_network_handler))
        .route("/api/v1/system/update", post(handlers::update_handler))
        .route("/api/v1/system/update/status", get(handlers::update_status_handler))
        .route("/api/v1/system/logs", get(handlers::logs_handler))
        .route("/api/v1/system/ssh/{action}", post(handlers::ssh_handler))
        .route(
            "/api/v1/hotspot/config",
            get(handlers::hotspot_config_handler).post(handlers::hotspot_update_handler),
        )
        .route("/api/v1/qr/hotspot", get(handlers::hotspot_qr_handler))
        .route("/api/v1/qr/generate", post(handlers::qr_generate_handler))
        .route("/api/v1/qr/parse", post(handlers::qr_parse_handler))
        .route("/api/v1/vpn/status", get(handlers::vpn_status_handler))
        .route("/api/v1/vpn/connect", post(handlers::vpn_connect_handler))
        .route("/api/v1/vpn/disconnect", post(handlers::vpn_disconnect_handler))
        .route(
            "/api/v1/vpn/configs",
            get(handlers::vpn_list_configs_handler).post(handlers::vpn_upload_config_handler),
        )
        .route("/api/v1/vpn/configs/{name}", delete(handlers::vpn_delete_config_handler))
        // admission runs for every matched API route
        .route_layer(middleware::from_fn_with_state(state, admission::admission_gate))
}

/// The full application router.
pub fn app(state: Arc<AppState>) -> Router {
    let mut router = Router::new()
        .route("/health", get(handlers::health_handler))
        .route("/metrics", get(handlers::metrics_handler))
        .merge(api_routes(state.clone()))
        .with_state(state);

    for &(name, value) in SECURITY_HEADERS {
        router = router.layer(SetResponseHeaderLayer::overriding(
            HeaderName::from_static(name),
            HeaderValue::from_static(value),
        ));
    }
    router.layer(TraceLayer::new_for_http())
}
