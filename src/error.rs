//! Error handling for the agent softphone
//!
//! `ApiError` classifies backend REST failures by HTTP status so each
//! category carries its own user-facing message and suggested action.
//! `SoftphoneError` is what service operations return; it maps onto HTTP
//! responses for the local control API.

use crate::models::{AgentStatus, CallState};
use crate::sdk::SdkError;
use actix_web::{http::StatusCode, HttpResponse, ResponseError};
use serde_json::json;
use thiserror::Error;

/// Backend REST API failure, categorised by HTTP status
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ApiError {
    #[error("Not authenticated: {0}")]
    Unauthenticated(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Server error (status {status}): {message}")]
    Server { status: u16, message: String },

    #[error("Unexpected HTTP status {status}: {message}")]
    Unexpected { status: u16, message: String },

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Timeout: request took longer than {0}ms")]
    Timeout(u64),

    #[error("Parse error: {0}")]
    Parse(String),
}

impl ApiError {
    /// Classify a non-success HTTP response
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        match status {
            401 => ApiError::Unauthenticated(message),
            403 => ApiError::PermissionDenied(message),
            404 => ApiError::NotFound(message),
            409 => ApiError::Conflict(message),
            400 | 422 => ApiError::Validation(message),
            500..=599 => ApiError::Server { status, message },
            _ => ApiError::Unexpected { status, message },
        }
    }

    pub fn user_message(&self) -> &'static str {
        match self {
            ApiError::Unauthenticated(_) => "Your session has expired.",
            ApiError::PermissionDenied(_) => "You do not have permission to perform this action.",
            ApiError::NotFound(_) => "The requested record no longer exists.",
            ApiError::Conflict(_) => "This record was changed by someone else.",
            ApiError::Validation(_) => "Some of the submitted values are invalid.",
            ApiError::Server { .. } | ApiError::Unexpected { .. } => {
                "The server could not complete the request."
            }
            ApiError::Connection(_) | ApiError::Timeout(_) => "The server could not be reached.",
            ApiError::Parse(_) => "The server sent a response that could not be read.",
        }
    }

    pub fn suggested_action(&self) -> &'static str {
        match self {
            ApiError::Unauthenticated(_) => "Sign in again.",
            ApiError::PermissionDenied(_) => "Contact your administrator.",
            ApiError::NotFound(_) | ApiError::Conflict(_) => "Refresh and try again.",
            ApiError::Validation(_) => "Correct the highlighted fields and resubmit.",
            ApiError::Server { .. }
            | ApiError::Unexpected { .. }
            | ApiError::Connection(_)
            | ApiError::Timeout(_)
            | ApiError::Parse(_) => "Try again later.",
        }
    }

    /// 409s are worth a retry prompt rather than a hard failure
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ApiError::Conflict(_)
                | ApiError::Server { .. }
                | ApiError::Connection(_)
                | ApiError::Timeout(_)
        )
    }

    pub fn error_code(&self) -> &'static str {
        match self {
            ApiError::Unauthenticated(_) => "unauthenticated",
            ApiError::PermissionDenied(_) => "permission_denied",
            ApiError::NotFound(_) => "not_found",
            ApiError::Conflict(_) => "conflict",
            ApiError::Validation(_) => "validation_error",
            ApiError::Server { .. } => "server_error",
            ApiError::Unexpected { .. } => "unexpected_status",
            ApiError::Connection(_) => "connection_error",
            ApiError::Timeout(_) => "timeout",
            ApiError::Parse(_) => "parse_error",
        }
    }
}

/// Main error type of softphone operations
#[derive(Error, Debug)]
pub enum SoftphoneError {
    // ==================== Telephony ====================
    #[error("Softphone connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Softphone is not connected")]
    NotReady,

    #[error("Telephony error: {0}")]
    Sdk(#[from] SdkError),

    // ==================== Call lifecycle ====================
    #[error("A call is already in progress")]
    CallInProgress,

    #[error("No active call")]
    NoActiveCall,

    #[error("No incoming call to {0}")]
    NoIncomingCall(&'static str),

    #[error("Cannot {action} while {state}")]
    InvalidTransition { action: &'static str, state: CallState },

    // ==================== Agent status ====================
    #[error("Status '{0}' cannot be selected manually")]
    StatusNotSelectable(AgentStatus),

    #[error("Status cannot change while a call is active")]
    StatusLocked,

    // ==================== Backend ====================
    #[error("Backend error: {0}")]
    Api(#[from] ApiError),

    // ==================== Local ====================
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl SoftphoneError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            SoftphoneError::Validation(_) => StatusCode::BAD_REQUEST,

            SoftphoneError::StatusNotSelectable(_) => StatusCode::UNPROCESSABLE_ENTITY,

            SoftphoneError::CallInProgress
            | SoftphoneError::NoActiveCall
            | SoftphoneError::NoIncomingCall(_)
            | SoftphoneError::InvalidTransition { .. }
            | SoftphoneError::StatusLocked => StatusCode::CONFLICT,

            SoftphoneError::ConnectionFailed(_) | SoftphoneError::NotReady => {
                StatusCode::SERVICE_UNAVAILABLE
            }

            SoftphoneError::Sdk(_) => StatusCode::BAD_GATEWAY,

            SoftphoneError::Api(api) => match api {
                ApiError::Unauthenticated(_) => StatusCode::UNAUTHORIZED,
                ApiError::PermissionDenied(_) => StatusCode::FORBIDDEN,
                ApiError::NotFound(_) => StatusCode::NOT_FOUND,
                ApiError::Conflict(_) => StatusCode::CONFLICT,
                ApiError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
                ApiError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
                _ => StatusCode::BAD_GATEWAY,
            },

            SoftphoneError::Config(_) | SoftphoneError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    pub fn error_code(&self) -> &'static str {
        match self {
            SoftphoneError::ConnectionFailed(_) => "connection_failed",
            SoftphoneError::NotReady => "not_ready",
            SoftphoneError::Sdk(_) => "telephony_error",
            SoftphoneError::CallInProgress => "call_in_progress",
            SoftphoneError::NoActiveCall => "no_active_call",
            SoftphoneError::NoIncomingCall(_) => "no_incoming_call",
            SoftphoneError::InvalidTransition { .. } => "invalid_transition",
            SoftphoneError::StatusNotSelectable(_) => "status_not_selectable",
            SoftphoneError::StatusLocked => "status_locked",
            SoftphoneError::Api(api) => api.error_code(),
            SoftphoneError::Validation(_) => "validation_error",
            SoftphoneError::Config(_) => "config_error",
            SoftphoneError::Internal(_) => "internal_error",
        }
    }
}

impl ResponseError for SoftphoneError {
    fn status_code(&self) -> StatusCode {
        SoftphoneError::status_code(self)
    }

    fn error_response(&self) -> HttpResponse {
        let status = self.status_code();
        let mut body = json!({
            "error": self.error_code(),
            "message": self.to_string(),
            "status": status.as_u16(),
        });

        if let SoftphoneError::Api(api) = self {
            body["user_message"] = json!(api.user_message());
            body["suggested_action"] = json!(api.suggested_action());
            body["retryable"] = json!(api.is_retryable());
        }

        HttpResponse::build(status).json(body)
    }
}

// ==================== From implementations ====================

impl From<validator::ValidationErrors> for SoftphoneError {
    fn from(err: validator::ValidationErrors) -> Self {
        SoftphoneError::Validation(err.to_string())
    }
}

impl From<config::ConfigError> for SoftphoneError {
    fn from(err: config::ConfigError) -> Self {
        SoftphoneError::Config(err.to_string())
    }
}
