mod health;
mod hotspot;
mod metrics;
mod networks;
mod qr;
mod system;
mod vpn;

pub use health::health_handler;
pub use hotspot::{hotspot_config_handler, hotspot_update_handler};
pub use metrics::metrics_handler;
pub use networks::{connect_handler, disconnect_handler, network_status_handler, scan_handler};
pub use qr::{hotspot_qr_handler, qr_generate_handler, qr_parse_handler};
pub use system::{
    logs_handler, reboot_handler, restart_network_handler, ssh_handler, system_status_handler,
    update_handler, update_status_handler,
};
pub use vpn::{
    vpn_connect_handler, vpn_delete_config_handler, vpn_disconnect_handler, vpn_list_configs_handler,
    vpn_status_handler, vpn_upload_config_handler,
};

use axum::Json;

use crate::error::ApiError;
use crate::models::ActionResult;

// A failed action becomes a typed 500 carrying its user-facing message
fn action_response(
    result: ActionResult,
    failure: fn(String) -> ApiError,
) -> Result<Json<ActionResult>, ApiError> {
    if result.success {
        Ok(Json(result))
    } else {
        Err(failure(result.message))
    }
}
