use axum::{Json, extract::State};
use serde::Serialize;
use std::sync::Arc;
use tracing::info;

use crate::error::ApiError;
use crate::gateway::system::require_feature;
use crate::models::{QrGenerateRequest, QrParseRequest};
use crate::qr::{self, QrCodeResult, WifiCredentials};
use crate::state::AppState;
use crate::validation::ValidatedJson;

#[derive(Serialize)]
pub struct ParseResponse {
    success: bool,
    network: WifiCredentials,
}

pub async fn hotspot_qr_handler(State(state): State<Arc<AppState>>) -> Result<Json<QrCodeResult>, ApiError> {
    require_feature(state.features.qr_generation_enabled, "QR code generation")?;

    let hotspot = state.hotspot.read().await;
    let result = qr::generate(
        &hotspot.ssid,
        Some(hotspot.password.as_str()),
        Some(hotspot.security.as_str()),
        !hotspot.visible,
    )?;
    Ok(Json(result))
}

pub async fn qr_generate_handler(
    State(state): State<Arc<AppState>>,
    ValidatedJson(payload): ValidatedJson<QrGenerateRequest>,
) -> Result<Json<QrCodeResult>, ApiError> {
    require_feature(state.features.qr_generation_enabled, "QR code generation")?;

    let result = qr::generate(
        &payload.ssid,
        payload.password.as_deref(),
        payload.security.as_deref(),
        false,
    )?;
    Ok(Json(result))
}

pub async fn qr_parse_handler(
    ValidatedJson(payload): ValidatedJson<QrParseRequest>,
) -> Result<Json<ParseResponse>, ApiError> {
    let network = qr::parse(&payload.qr_data)
        .ok_or_else(|| ApiError::invalid_field("qr_data", "Invalid WiFi QR code format"))?;
    info!("Parsed WiFi QR code for SSID: {}", network.ssid);
    Ok(Json(ParseResponse {
        success: true,
        network,
    }))
}
