use axum::{
    Json,
    extract::{Path, State},
};
use serde::Serialize;
use std::sync::Arc;

use super::action_response;
use crate::error::ApiError;
use crate::gateway::system::require_feature;
use crate::gateway::vpn::VpnStatus;
use crate::models::{ActionResult, VpnConnectRequest, VpnUploadRequest};
use crate::state::AppState;
use crate::validation::ValidatedJson;

#[derive(Serialize)]
pub struct ConfigList {
    success: bool,
    configs: Vec<String>,
}

fn vpn_enabled(state: &AppState) -> Result<(), ApiError> {
    require_feature(state.features.vpn_enabled, "VPN tunnel")
}

pub async fn vpn_status_handler(State(state): State<Arc<AppState>>) -> Result<Json<VpnStatus>, ApiError> {
    vpn_enabled(&state)?;
    Ok(Json(state.vpn.status().await))
}

pub async fn vpn_connect_handler(
    State(state): State<Arc<AppState>>,
    ValidatedJson(payload): ValidatedJson<VpnConnectRequest>,
) -> Result<Json<ActionResult>, ApiError> {
    vpn_enabled(&state)?;
    let result = state.vpn.connect(&payload.config_name).await?;
    action_response(result, ApiError::Vpn)
}

pub async fn vpn_disconnect_handler(State(state): State<Arc<AppState>>) -> Result<Json<ActionResult>, ApiError> {
    vpn_enabled(&state)?;
    action_response(state.vpn.disconnect().await, ApiError::Vpn)
}

pub async fn vpn_list_configs_handler(State(state): State<Arc<AppState>>) -> Result<Json<ConfigList>, ApiError> {
    vpn_enabled(&state)?;
    Ok(Json(ConfigList {
        success: true,
        configs: state.vpn.list_configs().await,
    }))
}

pub async fn vpn_upload_config_handler(
    State(state): State<Arc<AppState>>,
    ValidatedJson(payload): ValidatedJson<VpnUploadRequest>,
) -> Result<Json<ActionResult>, ApiError> {
    vpn_enabled(&state)?;
    let result = state
        .vpn
        .upload(&payload.config_name, &payload.config_content)
        .await?;
    Ok(Json(result))
}

pub async fn vpn_delete_config_handler(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> Result<Json<ActionResult>, ApiError> {
    vpn_enabled(&state)?;
    Ok(Json(state.vpn.delete(&name).await?))
}
