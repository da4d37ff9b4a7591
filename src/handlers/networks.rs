use axum::{Json, extract::State};
use serde::Serialize;
use std::sync::Arc;

use super::action_response;
use crate::error::ApiError;
use crate::gateway::network::DisconnectOutcome;
use crate::models::{ActionResult, ConnectRequest, NetworkInfo, NetworkStatus};
use crate::state::AppState;
use crate::validation::ValidatedJson;

#[derive(Serialize)]
pub struct ScanResponse {
    success: bool,
    count: usize,
    networks: Vec<NetworkInfo>,
}

pub async fn scan_handler(State(state): State<Arc<AppState>>) -> Result<Json<ScanResponse>, ApiError> {
    let networks = state.network.scan().await?;
    Ok(Json(ScanResponse {
        success: true,
        count: networks.len(),
        networks,
    }))
}

pub async fn connect_handler(
    State(state): State<Arc<AppState>>,
    ValidatedJson(payload): ValidatedJson<ConnectRequest>,
) -> Result<Json<ActionResult>, ApiError> {
    let result = state
        .network
        .connect(&payload.ssid, payload.password.as_deref())
        .await?;
    action_response(result, ApiError::Network)
}

pub async fn disconnect_handler(State(state): State<Arc<AppState>>) -> Result<Json<ActionResult>, ApiError> {
    match state.network.disconnect().await? {
        DisconnectOutcome::NothingToDisconnect => Ok(Json(ActionResult::failed(
            "No active WiFi connection to disconnect from",
        ))),
        DisconnectOutcome::Finished(result) => action_response(result, ApiError::Network),
    }
}

pub async fn network_status_handler(State(state): State<Arc<AppState>>) -> Json<NetworkStatus> {
    Json(state.network.status().await)
}
