use axum::{
    body::Bytes,
    extract::{FromRequest, Request},
    http::header,
};
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::error::ApiError;
use crate::metrics::VALIDATION_FAILURES;

pub const SSID_MAX_LEN: usize = 32;
pub const PASSWORD_MIN_LEN: usize = 8;
pub const PASSWORD_MAX_LEN: usize = 63;
pub const CONFIG_NAME_MAX_LEN: usize = 50;

fn is_ssid_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, ' ' | '_' | '.' | '-')
}

fn is_config_name_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '_' | '-')
}

// ^[A-Za-z0-9 _.-]{1,32}$
pub fn is_valid_ssid(ssid: &str) -> bool {
    !ssid.is_empty() && ssid.len() <= SSID_MAX_LEN && ssid.chars().all(is_ssid_char)
}

// WPA passphrase bounds, counted in characters; no control characters
pub fn is_valid_password(password: &str) -> bool {
    (PASSWORD_MIN_LEN..=PASSWORD_MAX_LEN).contains(&password.chars().count())
        && !password.chars().any(char::is_control)
}

// ^[A-Za-z0-9_-]{1,50}$
pub fn is_valid_config_name(name: &str) -> bool {
    !name.is_empty() && name.len() <= CONFIG_NAME_MAX_LEN && name.chars().all(is_config_name_char)
}

/// Strip everything outside the SSID alphabet and cap the length.
///
/// Returns `None` when nothing usable is left.
pub fn sanitize_ssid(ssid: &str) -> Option<String> {
    let sanitized: String = ssid
        .chars()
        .filter(|c| is_ssid_char(*c))
        .take(SSID_MAX_LEN)
        .collect();

    if sanitized.is_empty() {
        None
    } else {
        Some(sanitized)
    }
}

/// Optional password: absent or empty means an open network.
pub fn check_optional_password(password: Option<&str>) -> Result<Option<&str>, ApiError> {
    match password {
        None | Some("") => Ok(None),
        Some(pw) if is_valid_password(pw) => Ok(Some(pw)),
        Some(_) => Err(ApiError::invalid_field(
            "password",
            "Invalid password format or length",
        )),
    }
}

pub fn require_config_name(name: &str) -> Result<(), ApiError> {
    if is_valid_config_name(name) {
        Ok(())
    } else {
        Err(ApiError::invalid_field(
            "config_name",
            "Invalid configuration name format",
        ))
    }
}

/// Field rules applied to every structured request body.
pub fn validate_fields(body: &Map<String, Value>) -> Result<(), ApiError> {
    if let Some(ssid) = body.get("ssid") {
        if !ssid.as_str().is_some_and(is_valid_ssid) {
            return Err(ApiError::invalid_field("ssid", "Invalid SSID format"));
        }
    }

    match body.get("password") {
        None | Some(Value::Null) => {}
        Some(Value::String(pw)) if pw.is_empty() => {}
        Some(Value::String(pw)) if is_valid_password(pw) => {}
        Some(_) => {
            return Err(ApiError::invalid_field(
                "password",
                "Invalid password format or length",
            ));
        }
    }

    if let Some(name) = body.get("config_name") {
        if !name.as_str().is_some_and(is_valid_config_name) {
            debug!("Config name validation failed");
            return Err(ApiError::invalid_field(
                "config_name",
                "Invalid configuration name format",
            ));
        }
    }

    Ok(())
}

fn is_json_content_type(req: &Request) -> bool {
    req.headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| ct.trim_start().to_ascii_lowercase().starts_with("application/json"))
}

/// JSON body extractor that runs the field rules before deserializing.
///
/// Handlers that take a structured body use this instead of `Json<T>`, so
/// every body passes the same gate.
pub struct ValidatedJson<T>(pub T);

impl<S, T> FromRequest<S> for ValidatedJson<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let result = extract(req, state).await;
        if let Err(e) = &result {
            VALIDATION_FAILURES.inc();
            warn!("Validation error: {}", e);
        }
        result.map(ValidatedJson)
    }
}

async fn extract<S, T>(req: Request, state: &S) -> Result<T, ApiError>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    if !is_json_content_type(&req) {
        return Err(ApiError::validation("Content-Type must be application/json"));
    }

    let bytes = Bytes::from_request(req, state)
        .await
        .map_err(|_| ApiError::validation("Invalid request body"))?;

    let value: Value =
        serde_json::from_slice(&bytes).map_err(|_| ApiError::validation("Invalid JSON data"))?;

    let body = match &value {
        Value::Object(map) if !map.is_empty() => map,
        _ => return Err(ApiError::validation("Invalid JSON data")),
    };
    validate_fields(body)?;

    serde_json::from_value(value).map_err(|e| ApiError::validation(format!("Invalid request: {}", e)))
}
