use axum::{
    Json,
    extract::{Path, Query, State, rejection::QueryRejection},
};
use std::sync::Arc;

use super::action_response;
use crate::error::ApiError;
use crate::gateway::system::{LogsResponse, SshAction, SystemStatus, UpdateStarted, UpdateStatus};
use crate::models::{ActionResult, LogsQuery};
use crate::state::AppState;

pub async fn system_status_handler(State(state): State<Arc<AppState>>) -> Json<SystemStatus> {
    Json(state.system.status().await)
}

pub async fn reboot_handler(State(state): State<Arc<AppState>>) -> Result<Json<ActionResult>, ApiError> {
    let result = state.system.reboot().await?;
    action_response(result, ApiError::System)
}

pub async fn restart_network_handler(
    State(state): State<Arc<AppState>>,
) -> Result<Json<ActionResult>, ApiError> {
    action_response(state.system.restart_network().await, ApiError::System)
}

pub async fn ssh_handler(
    State(state): State<Arc<AppState>>,
    Path(action): Path<String>,
) -> Result<Json<ActionResult>, ApiError> {
    let action: SshAction = action.parse()?;
    let result = state.system.ssh(action).await?;
    action_response(result, ApiError::System)
}

pub async fn update_handler(State(state): State<Arc<AppState>>) -> Result<Json<UpdateStarted>, ApiError> {
    Ok(Json(state.system.start_update().await?))
}

pub async fn update_status_handler(State(state): State<Arc<AppState>>) -> Json<UpdateStatus> {
    Json(state.system.update_status().await)
}

pub async fn logs_handler(
    State(state): State<Arc<AppState>>,
    query: Result<Query<LogsQuery>, QueryRejection>,
) -> Result<Json<LogsResponse>, ApiError> {
    let Query(query) = query.map_err(|_| ApiError::validation("Invalid query parameters"))?;
    let logs = state
        .system
        .logs(query.log_type.as_deref(), query.lines)
        .await?;
    Ok(Json(logs))
}
