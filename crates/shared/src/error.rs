use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    Unauthorized,
    NotFound,
    Validation,
    OutOfStock,
    RateLimited,
    Internal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CartErrorKind {
    Validation,
    Network,
    StorageQuota,
}

/// The single error surfaced through `CartState::error`.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "kind", content = "message", rename_all = "snake_case")]
pub enum CartError {
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("network failure: {0}")]
    Network(String),
    #[error("storage quota exceeded: {0}")]
    StorageQuota(String),
}

impl CartError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::Network(message.into())
    }

    pub fn storage_quota(message: impl Into<String>) -> Self {
        Self::StorageQuota(message.into())
    }

    pub fn kind(&self) -> CartErrorKind {
        match self {
            Self::Validation(_) => CartErrorKind::Validation,
            Self::Network(_) => CartErrorKind::Network,
            Self::StorageQuota(_) => CartErrorKind::StorageQuota,
        }
    }

    pub fn message(&self) -> &str {
        match self {
            Self::Validation(message) | Self::Network(message) | Self::StorageQuota(message) => {
                message
            }
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiError {
    pub code: ErrorCode,
    pub message: String,
}

impl ApiError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}
