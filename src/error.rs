use axum::{
    Json,
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use serde::Serialize;
use tracing::{error, warn};

/// Every rejection the API can hand back to a client.
///
/// Each variant maps onto a stable `error` tag and an HTTP status; messages
/// are safe to show to users (raw command output never ends up here).
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{message}")]
    Validation {
        message: String,
        field: Option<&'static str>,
    },

    #[error("{0}")]
    Security(String),

    #[error("Rate limit exceeded. Please try again later.")]
    RateLimited { retry_after: u64 },

    #[error("IP temporarily blocked due to excessive requests")]
    IpBlocked { retry_after: u64 },

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    Network(String),

    #[error("{0}")]
    Vpn(String),

    #[error("{0}")]
    System(String),

    #[error("An unexpected error occurred")]
    Unexpected(#[from] anyhow::Error),
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    success: bool,
    error: &'static str,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    field: Option<&'a str>,
}

impl ApiError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
            field: None,
        }
    }

    pub fn invalid_field(field: &'static str, message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
            field: Some(field),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation { .. } => "validation_error",
            Self::Security(_) => "security_error",
            Self::RateLimited { .. } => "rate_limit_exceeded",
            Self::IpBlocked { .. } => "ip_blocked",
            Self::NotFound(_) => "not_found",
            Self::Conflict(_) => "conflict",
            Self::Network(_) => "network_error",
            Self::Vpn(_) => "vpn_error",
            Self::System(_) => "system_error",
            Self::Unexpected(_) => "unexpected_error",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Self::Validation { .. } => StatusCode::BAD_REQUEST,
            Self::Security(_) => StatusCode::FORBIDDEN,
            Self::RateLimited { .. } | Self::IpBlocked { .. } => StatusCode::TOO_MANY_REQUESTS,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::Network(_) | Self::Vpn(_) | Self::System(_) | Self::Unexpected(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match &self {
            Self::Unexpected(e) => error!("Unexpected error: {:#}", e),
            Self::Security(msg) => warn!(target: "security", "Security error: {}", msg),
            Self::Network(msg) | Self::Vpn(msg) | Self::System(msg) => {
                error!("{}: {}", self.kind(), msg)
            }
            _ => {}
        }

        let field = match &self {
            Self::Validation { field, .. } => *field,
            _ => None,
        };
        let retry_after = match &self {
            Self::RateLimited { retry_after } | Self::IpBlocked { retry_after } => {
                Some(*retry_after)
            }
            _ => None,
        };

        let body = ErrorBody {
            success: false,
            error: self.kind(),
            message: self.to_string(),
            field,
        };
        let mut response = (self.status(), Json(body)).into_response();

        if let Some(secs) = retry_after {
            if let Ok(value) = HeaderValue::from_str(&secs.to_string()) {
                response.headers_mut().insert(header::RETRY_AFTER, value);
            }
        }
        response
    }
}
