use nutrisync_api_types::ApiErrorBody;
use reqwest::StatusCode;
use serde_json::Value;
use thiserror::Error;

use crate::{
    config::LoadError,
    domain::error::DomainError,
    infra::{error::InfraError, transport::TransportError},
};

/// Failure of one API call, as seen by everything above the transport.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ApiError {
    #[error("request timed out")]
    Timeout,
    #[error("connection failed: {0}")]
    Connection(String),
    /// Non-2xx response. The body is passed through as received.
    #[error("server rejected request with status {status}")]
    Rejected { status: StatusCode, body: Value },
    #[error("failed to decode response: {0}")]
    Decode(String),
    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl ApiError {
    pub fn rejected(status: StatusCode, body: Value) -> Self {
        Self::Rejected { status, body }
    }

    pub fn decode(message: impl Into<String>) -> Self {
        Self::Decode(message.into())
    }

    /// Timeouts and connection failures: recovered locally, never shown as blocking errors.
    pub fn is_transient(&self) -> bool {
        matches!(self, ApiError::Timeout | ApiError::Connection(_))
    }

    pub fn status(&self) -> Option<StatusCode> {
        match self {
            ApiError::Rejected { status, .. } => Some(*status),
            _ => None,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.status() == Some(StatusCode::NOT_FOUND)
    }

    /// Message carried by a rejection body, if the server sent one.
    pub fn server_message(&self) -> Option<String> {
        let ApiError::Rejected { body, .. } = self else {
            return None;
        };
        match body {
            Value::String(text) if !text.trim().is_empty() => Some(text.clone()),
            Value::Object(_) => serde_json::from_value::<ApiErrorBody>(body.clone())
                .ok()
                .and_then(|parsed| parsed.text().map(str::to_string)),
            _ => None,
        }
    }
}

impl From<TransportError> for ApiError {
    fn from(error: TransportError) -> Self {
        match error {
            TransportError::Timeout => ApiError::Timeout,
            TransportError::Connection(message) => ApiError::Connection(message),
            TransportError::InvalidRequest(message) => ApiError::InvalidRequest(message),
        }
    }
}

#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Config(#[from] LoadError),
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error(transparent)]
    Infra(#[from] InfraError),
    #[error(transparent)]
    Api(#[from] ApiError),
    #[error("validation failed: {0}")]
    Validation(String),
}

impl AppError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn server_message(&self) -> Option<String> {
        match self {
            AppError::Api(error) => error.server_message(),
            _ => None,
        }
    }
}
