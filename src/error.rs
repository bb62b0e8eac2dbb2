//! Error types for the SOAP gateway.

use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Gateway errors.
#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Malformed XML from remote service: {0}")]
    InvalidXml(String),

    #[error("Remote call timed out after {}ms", .0.as_millis())]
    Timeout(Duration),

    #[error("Remote fault [{code}]: {message}")]
    RemoteFault { code: String, message: String },

    #[error("Invalid request: {0}")]
    Decoding(String),

    #[error("Method {method} not allowed, expected {allowed}")]
    MethodNotAllowed { method: String, allowed: String },

    #[error("Unknown remote operation: {0}")]
    UnknownOperation(String),
}

impl GatewayError {
    /// Classify this error for callers.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Config(_) => ErrorKind::Configuration,
            Self::Transport(_) | Self::InvalidXml(_) | Self::Timeout(_) => ErrorKind::Transport,
            Self::RemoteFault { .. } => ErrorKind::RemoteFault,
            Self::Decoding(_) => ErrorKind::Decoding,
            Self::MethodNotAllowed { .. } => ErrorKind::MethodNotAllowed,
            Self::UnknownOperation(_) => ErrorKind::UnknownOperation,
        }
    }

    /// HTTP status used when this error reaches the inbound boundary.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::MethodNotAllowed { .. } => StatusCode::METHOD_NOT_ALLOWED,
            _ => StatusCode::BAD_REQUEST,
        }
    }

    /// JSON body returned to the caller.
    pub fn to_body(&self) -> ErrorBody {
        ErrorBody {
            error: self.to_string(),
            kind: self.kind(),
        }
    }
}

impl From<reqwest::Error> for GatewayError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Transport(format!("request timed out: {}", err))
        } else if err.is_connect() {
            Self::Transport(format!("connection failed: {}", err))
        } else {
            Self::Transport(err.to_string())
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let allow = match &self {
            Self::MethodNotAllowed { allowed, .. } => HeaderValue::from_str(allowed).ok(),
            _ => None,
        };

        let mut response = (status, Json(self.to_body())).into_response();
        if let Some(allow) = allow {
            response.headers_mut().insert(header::ALLOW, allow);
        }
        response
    }
}

/// Error kinds surfaced to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorKind {
    /// Credentials or settings missing/invalid
    #[serde(rename = "CONFIGURATION")]
    Configuration,
    /// Remote service unreachable or answered garbage
    #[serde(rename = "TRANSPORT")]
    Transport,
    /// Remote service rejected the request
    #[serde(rename = "REMOTE_FAULT")]
    RemoteFault,
    /// Inbound request could not be decoded
    #[serde(rename = "DECODING")]
    Decoding,
    /// HTTP method not permitted for the route
    #[serde(rename = "METHOD_NOT_ALLOWED")]
    MethodNotAllowed,
    /// Operation absent from the service description
    #[serde(rename = "UNKNOWN_OPERATION")]
    UnknownOperation,
}

impl ErrorKind {
    /// Get the string code for this kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Configuration => "CONFIGURATION",
            Self::Transport => "TRANSPORT",
            Self::RemoteFault => "REMOTE_FAULT",
            Self::Decoding => "DECODING",
            Self::MethodNotAllowed => "METHOD_NOT_ALLOWED",
            Self::UnknownOperation => "UNKNOWN_OPERATION",
        }
    }

    /// Whether the caller can fix this by changing the request.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::RemoteFault | Self::Decoding | Self::MethodNotAllowed | Self::UnknownOperation
        )
    }
}

/// Error body: `{"error": "...", "kind": "..."}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    /// Human-readable description
    pub error: String,
    /// Error classification
    pub kind: ErrorKind,
}

pub type Result<T> = std::result::Result<T, GatewayError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kind_as_str() {
        assert_eq!(ErrorKind::Transport.as_str(), "TRANSPORT");
        assert_eq!(ErrorKind::RemoteFault.as_str(), "REMOTE_FAULT");
        assert_eq!(
            serde_json::to_value(ErrorKind::MethodNotAllowed).unwrap(),
            serde_json::json!("METHOD_NOT_ALLOWED")
        );
    }

    #[test]
    fn test_transport_family_collapses() {
        assert_eq!(GatewayError::InvalidXml("x".into()).kind(), ErrorKind::Transport);
        assert_eq!(
            GatewayError::Timeout(Duration::from_secs(3)).kind(),
            ErrorKind::Transport
        );
        assert!(!ErrorKind::Transport.is_client_error());
        assert!(ErrorKind::RemoteFault.is_client_error());
    }

    #[test]
    fn test_timeout_message_keeps_subsecond_precision() {
        let err = GatewayError::Timeout(Duration::from_millis(200));
        assert_eq!(err.to_string(), "Remote call timed out after 200ms");
    }

    #[test]
    fn test_status_codes() {
        let err = GatewayError::MethodNotAllowed {
            method: "POST".into(),
            allowed: "GET".into(),
        };
        assert_eq!(err.status_code(), StatusCode::METHOD_NOT_ALLOWED);
        assert_eq!(
            GatewayError::Transport("down".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
    }

    #[test]
    fn test_error_body() {
        let err = GatewayError::RemoteFault {
            code: "soap:Server".into(),
            message: "Order not found".into(),
        };
        let body = serde_json::to_value(err.to_body()).unwrap();
        assert_eq!(body["error"], "Remote fault [soap:Server]: Order not found");
        assert_eq!(body["kind"], "REMOTE_FAULT");
    }

    #[test]
    fn test_method_not_allowed_response_has_allow_header() {
        let response = GatewayError::MethodNotAllowed {
            method: "GET".into(),
            allowed: "POST".into(),
        }
        .into_response();
        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
        assert_eq!(response.headers()[header::ALLOW], "POST");
    }
}
