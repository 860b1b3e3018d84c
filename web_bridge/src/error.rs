//! Bridge error types

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use thiserror::Error;

use crate::gateway::http::ApiResponse;

/// Login failures. Device id format is checked before the password.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    #[error("invalid device id format")]
    InvalidDeviceIdFormat,

    #[error("wrong password")]
    WrongPassword,
}

/// Session lookup failures. Expired and unknown handles are indistinguishable.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error("not authenticated")]
    NotAuthenticated,
}

/// Errors raised by the broker link
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BrokerError {
    /// Initial connection could not be established
    #[error("broker connection failed: {0}")]
    Connection(String),

    /// Link is currently down; nothing is queued
    #[error("broker not connected")]
    NotConnected,

    #[error("publish to {topic} failed: {reason}")]
    Publish { topic: String, reason: String },

    #[error("subscribe to {topic} failed: {reason}")]
    Subscribe { topic: String, reason: String },

    #[error("unsubscribe from {topic} failed: {reason}")]
    Unsubscribe { topic: String, reason: String },
}

/// Operator request could not be turned into a motion command
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TranslateError {
    #[error("invalid action: {0}")]
    InvalidAction(String),

    #[error("invalid parameter {name}: {reason}")]
    InvalidParameter { name: &'static str, reason: String },
}

/// Errors returned by the connection multiplexer
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MultiplexerError {
    #[error("status subscription failed: {0}")]
    Subscribe(#[source] BrokerError),

    #[error("connection {0} is already bound")]
    AlreadyBound(u64),

    #[error("multiplexer has stopped")]
    Stopped,
}

/// Why a browser socket was refused a binding
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConnectError {
    #[error(transparent)]
    Session(#[from] SessionError),

    #[error(transparent)]
    Multiplexer(#[from] MultiplexerError),

    #[error("connection is not awaiting a binding")]
    NotConnecting,

    #[error("peer went away before the binding completed")]
    Cancelled,
}

/// Failure of a control request after the session was resolved
#[derive(Debug, Error)]
pub enum ControlError {
    #[error(transparent)]
    Translate(#[from] TranslateError),

    #[error(transparent)]
    Broker(#[from] BrokerError),

    #[error("failed to encode command: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Error surfaced by an HTTP handler
#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error(transparent)]
    Control(#[from] ControlError),

    #[error("too many requests")]
    RateLimited,

    #[error("malformed request body: {0}")]
    MalformedBody(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Auth(_) | ApiError::Session(_) => StatusCode::UNAUTHORIZED,
            ApiError::Control(ControlError::Translate(_)) | ApiError::MalformedBody(_) => {
                StatusCode::BAD_REQUEST
            }
            ApiError::Control(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::RateLimited => StatusCode::TOO_MANY_REQUESTS,
        }
    }

    fn message(&self) -> String {
        match self {
            ApiError::Auth(AuthError::InvalidDeviceIdFormat) => {
                "Invalid device id format".to_string()
            }
            ApiError::Auth(AuthError::WrongPassword) => "Wrong password".to_string(),
            ApiError::Session(_) => "Not logged in".to_string(),
            ApiError::Control(ControlError::Translate(e)) => e.to_string(),
            ApiError::Control(ControlError::Broker(_)) => "MQTT publish error".to_string(),
            ApiError::Control(ControlError::Encode(_)) => "Command encoding error".to_string(),
            ApiError::RateLimited => "Too many requests".to_string(),
            ApiError::MalformedBody(_) => "Malformed request body".to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        }
        (status, Json(ApiResponse::failure(self.message()))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            ApiError::from(AuthError::WrongPassword).status(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            ApiError::from(SessionError::NotAuthenticated).status(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            ApiError::from(ControlError::from(TranslateError::InvalidAction("fly".into()))).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError::from(ControlError::from(BrokerError::NotConnected)).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(ApiError::RateLimited.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(
            ApiError::MalformedBody("eof".into()).status(),
            StatusCode::BAD_REQUEST
        );
    }
}
