use std::time::Duration;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("timed out after {}s without a terminal event", .0.as_secs())]
    Timeout(Duration),
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },
    #[error("upstream error code {code}: {message}")]
    Code { code: i64, message: String },
    #[error("connection error: {0}")]
    Connection(String),
}

impl GatewayError {
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Configuration(_) => "configuration",
            Self::Transport(_) => "transport",
            Self::Timeout(_) => "timeout",
        }
    }
}

impl From<reqwest::Error> for TransportError {
    fn from(error: reqwest::Error) -> Self {
        Self::Connection(error.to_string())
    }
}

impl From<reqwest::Error> for GatewayError {
    fn from(error: reqwest::Error) -> Self {
        Self::Transport(error.into())
    }
}

#[derive(Debug, Serialize)]
pub struct ErrorEnvelope {
    pub error: ErrorBody,
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub message: String,
    #[serde(rename = "type")]
    pub error_type: String,
}

impl ErrorEnvelope {
    pub fn new(error_type: &str, message: String) -> Self {
        Self {
            error: ErrorBody {
                message,
                error_type: error_type.to_owned(),
            },
        }
    }

    pub fn from_gateway(error: &GatewayError) -> Self {
        Self::new(error_type(error), error.to_string())
    }
}

fn error_type(error: &GatewayError) -> &'static str {
    match error {
        GatewayError::Configuration(_) => "configuration_error",
        GatewayError::Transport(_) => "backend_error",
        GatewayError::Timeout(_) => "timeout_error",
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = match &self {
            GatewayError::Configuration(_) => StatusCode::BAD_REQUEST,
            GatewayError::Transport(_) => StatusCode::BAD_GATEWAY,
            GatewayError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
        };
        (status, Json(ErrorEnvelope::from_gateway(&self))).into_response()
    }
}

/// Error raised by the HTTP surface before the gateway is involved.
#[derive(Debug, Error)]
#[error("{0}")]
pub struct BadRequest(pub String);

impl IntoResponse for BadRequest {
    fn into_response(self) -> Response {
        (
            StatusCode::BAD_REQUEST,
            Json(ErrorEnvelope::new("invalid_request_error", self.0)),
        )
            .into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_status_renders_status_and_body() {
        let error = GatewayError::from(TransportError::Status {
            status: 401,
            body: "invalid key".to_owned(),
        });
        assert_eq!(error.to_string(), "HTTP 401: invalid key");
        assert_eq!(error.kind(), "transport");
    }

    #[test]
    fn timeout_maps_to_gateway_timeout() {
        let response = GatewayError::Timeout(Duration::from_secs(30)).into_response();
        assert_eq!(response.status(), StatusCode::GATEWAY_TIMEOUT);
    }
}
