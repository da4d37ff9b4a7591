//! WiFi-join QR payloads: `WIFI:T:<auth>;S:<ssid>;P:<password>;[H:true;];`
//!
//! Field values escape `\ ; , " :` with a backslash. Parsing is
//! escape-aware and accepts the fields in any order.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use image::{ImageFormat, Luma};
use qrcode::{EcLevel, QrCode};
use serde::Serialize;
use std::io::Cursor;
use tracing::{error, info};

use crate::error::ApiError;
use crate::validation::{check_optional_password, sanitize_ssid};

const SECURITY_TYPES: &[&str] = &["OPEN", "WPA", "WPA2", "WEP"];
const NOPASS: &str = "nopass";
const MODULE_PX: u32 = 10;

pub fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        if matches!(c, '\\' | ';' | ',' | '"' | ':') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// Normalised security label: upper-cased, unknown values become `WPA`.
pub fn normalize_security(security: Option<&str>) -> String {
    let upper = security.unwrap_or("WPA").trim().to_uppercase();
    if SECURITY_TYPES.contains(&upper.as_str()) {
        upper
    } else {
        "WPA".to_string()
    }
}

pub fn wifi_string(ssid: &str, password: &str, security: &str, hidden: bool) -> String {
    let hidden = if hidden { "H:true;" } else { "" };
    if security == "OPEN" || password.is_empty() {
        format!("WIFI:T:{};S:{};P:;{};", NOPASS, escape(ssid), hidden)
    } else {
        format!(
            "WIFI:T:{};S:{};P:{};{};",
            security,
            escape(ssid),
            escape(password),
            hidden
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WifiCredentials {
    pub ssid: String,
    pub password: String,
    pub security: String,
    pub hidden: bool,
}

// Split on unescaped `;`, unescaping as we go
fn fields(body: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut current = String::new();
    let mut chars = body.chars();
    while let Some(c) = chars.next() {
        match c {
            '\\' => {
                if let Some(next) = chars.next() {
                    current.push(next);
                }
            }
            ';' => out.push(std::mem::take(&mut current)),
            _ => current.push(c),
        }
    }
    if !current.is_empty() {
        out.push(current);
    }
    out
}

/// Parse a `WIFI:` payload. `None` when it isn't one or has no SSID.
pub fn parse(data: &str) -> Option<WifiCredentials> {
    let body = data.trim().strip_prefix("WIFI:")?;

    let mut ssid = None;
    let mut password = String::new();
    let mut security = None;
    let mut hidden = false;

    for field in fields(body) {
        // keys are single letters; values may contain (unescaped) colons now
        let Some((key, value)) = field.split_once(':') else {
            continue;
        };
        match key {
            "S" => ssid = Some(value.to_string()),
            "P" => password = value.to_string(),
            "T" => security = Some(value.to_string()),
            "H" => hidden = value.eq_ignore_ascii_case("true"),
            _ => {}
        }
    }

    let ssid = ssid.filter(|s| !s.is_empty())?;
    let security = security.filter(|s| !s.is_empty()).unwrap_or_else(|| NOPASS.to_string());
    if security == NOPASS {
        password.clear();
    }

    Some(WifiCredentials {
        ssid,
        password,
        security,
        hidden,
    })
}

/// Render `data` as a PNG and wrap it in a `data:` URL.
pub fn render_data_url(data: &str) -> anyhow::Result<String> {
    let code = QrCode::with_error_correction_level(data.as_bytes(), EcLevel::M)?;
    let image = code
        .render::<Luma<u8>>()
        .module_dimensions(MODULE_PX, MODULE_PX)
        .quiet_zone(true)
        .build();

    let mut png = Vec::new();
    image.write_to(&mut Cursor::new(&mut png), ImageFormat::Png)?;
    Ok(format!("data:image/png;base64,{}", STANDARD.encode(&png)))
}

#[derive(Debug, Clone, Serialize)]
pub struct QrCodeResult {
    pub success: bool,
    pub qr_code: String,
    pub ssid: String,
    pub security: String,
}

/// Validate, build and render a WiFi QR code.
pub fn generate(
    ssid: &str,
    password: Option<&str>,
    security: Option<&str>,
    hidden: bool,
) -> Result<QrCodeResult, ApiError> {
    let ssid = sanitize_ssid(ssid).ok_or_else(|| ApiError::invalid_field("ssid", "Invalid SSID format"))?;
    let password = check_optional_password(password)?.unwrap_or("");
    let security = normalize_security(security);

    info!("QR code generation requested for SSID: {}", ssid);
    let payload = wifi_string(&ssid, password, &security, hidden);
    let qr_code = render_data_url(&payload).map_err(|e| {
        error!("Error generating QR code: {}", e);
        ApiError::System("QR code generation failed".into())
    })?;

    Ok(QrCodeResult {
        success: true,
        qr_code,
        ssid,
        security,
    })
}
