//! Centralized error types for the Watchroom core library.
//!
//! This module provides a unified error handling system that:
//! - Defines structured error types using `thiserror`
//! - Separates transient channel failures from session-ending ones
//! - Implements `IntoResponse` so relay handlers can return errors directly

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;

use crate::channel::ChannelError;
use crate::collaborators::CollaboratorError;

/// Trait for error types that provide machine-readable error codes.
///
/// Implement this trait to provide consistent error codes across different
/// error conversion paths.
pub trait ErrorCode {
    /// Returns a machine-readable error code for API responses.
    fn code(&self) -> &'static str;
}

impl ErrorCode for ChannelError {
    fn code(&self) -> &'static str {
        match self {
            Self::Connect(_) => "channel_connect_failed",
            Self::Closed => "channel_closed",
            Self::Publish(_) => "channel_publish_failed",
            Self::Protocol(_) => "channel_protocol_error",
        }
    }
}

impl ErrorCode for CollaboratorError {
    fn code(&self) -> &'static str {
        match self {
            Self::Http(_) => "http_request_failed",
            Self::HttpStatus(_) => "http_error_status",
            Self::Decode(_) => "response_decode_failed",
            Self::Cancelled => "request_cancelled",
        }
    }
}

/// Application-wide error type for room synchronization.
#[derive(Debug, Error, Serialize, Clone, PartialEq)]
#[serde(tag = "type", content = "details")]
pub enum RoomError {
    /// Transient transport failure (disconnect, publish failure).
    ///
    /// Recovered locally by the session's reconnect loop; no state is discarded.
    #[error("Channel error: {0}")]
    Channel(String),

    /// A non-owner attempted an owner-only action.
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// An inbound message could not be parsed or lacked required fields.
    #[error("Malformed message: {0}")]
    MalformedMessage(String),

    /// The room owner left; the session is over for followers.
    #[error("Room owner left: {0}")]
    OwnerLost(String),

    /// No queue item matches the requested key or index.
    #[error("Queue item not found: {0}")]
    QueueItemNotFound(String),

    /// The operation is not valid in the engine's current state.
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Requested room does not exist in the directory.
    #[error("Room not found: {0}")]
    RoomNotFound(String),

    /// Client sent an invalid or malformed request.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// A request/response collaborator (room directory, catalog) failed.
    #[error("Collaborator request failed: {0}")]
    Collaborator(String),

    /// Reading or writing the local queue cache failed.
    #[error("Queue cache error: {0}")]
    Cache(String),

    /// Invalid configuration values.
    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl RoomError {
    /// Returns a machine-readable error code for API responses.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Channel(_) => "channel_error",
            Self::PermissionDenied(_) => "permission_denied",
            Self::MalformedMessage(_) => "malformed_message",
            Self::OwnerLost(_) => "owner_lost",
            Self::QueueItemNotFound(_) => "queue_item_not_found",
            Self::InvalidState(_) => "invalid_state",
            Self::RoomNotFound(_) => "room_not_found",
            Self::InvalidRequest(_) => "invalid_request",
            Self::Collaborator(_) => "collaborator_error",
            Self::Cache(_) => "cache_error",
            Self::Configuration(_) => "configuration_error",
        }
    }

    /// Returns `true` for failures the session recovers from on its own.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Channel(_) | Self::Collaborator(_))
    }

    /// Maps the error to an appropriate HTTP status code.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::RoomNotFound(_) | Self::QueueItemNotFound(_) => StatusCode::NOT_FOUND,
            Self::InvalidRequest(_) | Self::MalformedMessage(_) => StatusCode::BAD_REQUEST,
            Self::PermissionDenied(_) => StatusCode::FORBIDDEN,
            Self::InvalidState(_) | Self::OwnerLost(_) => StatusCode::CONFLICT,
            Self::Configuration(_) => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Result Type Aliases
// ─────────────────────────────────────────────────────────────────────────────

pub use crate::channel::ChannelResult;
pub use crate::collaborators::CollaboratorResult;

/// Convenient Result alias for room operations.
pub type RoomResult<T> = Result<T, RoomError>;

/// JSON response body for error responses.
#[derive(Serialize)]
struct ErrorResponse {
    error: &'static str,
    message: String,
    status: u16,
}

impl IntoResponse for RoomError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = ErrorResponse {
            error: self.code(),
            message: self.to_string(),
            status: status.as_u16(),
        };
        (status, Json(body)).into_response()
    }
}

impl From<ChannelError> for RoomError {
    fn from(err: ChannelError) -> Self {
        Self::Channel(err.to_string())
    }
}

impl From<CollaboratorError> for RoomError {
    fn from(err: CollaboratorError) -> Self {
        Self::Collaborator(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn permission_denied_maps_to_forbidden() {
        let err = RoomError::PermissionDenied("set video".into());
        assert_eq!(err.code(), "permission_denied");
        assert_eq!(err.status_code(), StatusCode::FORBIDDEN);
        assert!(!err.is_transient());
    }

    #[test]
    fn channel_errors_are_transient() {
        let err: RoomError = ChannelError::Closed.into();
        assert!(err.is_transient());
        assert_eq!(err.code(), "channel_error");
    }

    #[test]
    fn room_not_found_returns_404() {
        let err = RoomError::RoomNotFound("abc".into());
        assert_eq!(err.status_code(), StatusCode::NOT_FOUND);
    }
}
