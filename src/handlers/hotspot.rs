use axum::{Json, extract::State};
use std::sync::Arc;

use crate::error::ApiError;
use crate::gateway::hotspot::{HotspotConfig, HotspotUpdate};
use crate::models::{ActionResult, HotspotUpdateRequest};
use crate::state::AppState;
use crate::validation::ValidatedJson;

pub async fn hotspot_config_handler(State(state): State<Arc<AppState>>) -> Json<HotspotConfig> {
    Json(state.hotspot.read().await)
}

pub async fn hotspot_update_handler(
    State(state): State<Arc<AppState>>,
    ValidatedJson(payload): ValidatedJson<HotspotUpdateRequest>,
) -> Result<Json<ActionResult>, ApiError> {
    let update = HotspotUpdate::from_request(payload)?;
    Ok(Json(state.hotspot.update(&update).await?))
}
