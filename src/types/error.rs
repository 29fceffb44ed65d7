//! Error types for the navigation billing ledger

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Stable numeric codes for crate errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    /// Internal error
    InternalError = 1,
    /// No async runtime available
    NoRuntime = 2,
    /// Global handler already installed
    AlreadyInstalled = 3,
    /// Configuration error
    ConfigError = 10,
    /// Unknown trip label in a replay script
    UnknownTrip = 20,
    /// Malformed input
    ParseError = 21,
    /// IO error
    IoError = 30,
}

impl ErrorCode {
    /// Get the error code value
    pub fn code(self) -> i32 {
        self as i32
    }
}

/// Error reported by the billing backend for a single call
///
/// Delivered through a call's error channel and treated as data: the ledger
/// branches on the kind.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum BillingServiceError {
    /// Generic failure, the billed session does not exist
    #[error("unknown billing error")]
    Unknown,

    /// A paused session could not be resumed
    #[error("billing session resume failed")]
    ResumeFailed,

    /// A billing event carried a token that failed validation
    #[error("billing token validation failed")]
    TokenValidationFailed,

    /// Backend could not be reached
    #[error("billing backend unavailable: {0}")]
    Unavailable(String),
}

impl BillingServiceError {
    /// Check if this failure is compensated by beginning a fresh session
    pub fn is_resume_failure(&self) -> bool {
        matches!(self, Self::ResumeFailed)
    }

    /// Check if this is a metering validation failure
    ///
    /// Validation failures never affect session state.
    pub fn is_validation_failure(&self) -> bool {
        matches!(self, Self::TokenValidationFailed)
    }

    /// Wire name of the error kind
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::ResumeFailed => "resumeFailed",
            Self::TokenValidationFailed => "tokenValidationFailed",
            Self::Unavailable(_) => "unavailable",
        }
    }

    /// Create an unavailable error
    pub fn unavailable(msg: impl Into<String>) -> Self {
        Self::Unavailable(msg.into())
    }
}

/// Main error type for the crate
#[derive(Debug, Error)]
pub enum BillingError {
    /// Handler needs a tokio runtime to watch completions
    #[error("No tokio runtime available to drive billing completions")]
    NoRuntime,

    /// A global handler is already installed
    #[error("Global billing handler already installed")]
    AlreadyInstalled,

    // === Configuration errors ===
    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// A configuration value failed to parse
    #[error("Invalid value for {key}: {value:?}")]
    InvalidConfigValue { key: String, value: String },

    // === Replay errors ===
    /// Step references a trip that was never begun
    #[error("Unknown trip: {0}")]
    UnknownTrip(String),

    /// Script cannot be replayed as written
    #[error("Invalid replay script: {0}")]
    InvalidScript(String),

    // === External errors ===
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // === Generic errors ===
    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type for the crate
pub type Result<T> = std::result::Result<T, BillingError>;

impl BillingError {
    /// Get the error code for this error
    pub fn error_code(&self) -> ErrorCode {
        match self {
            BillingError::NoRuntime => ErrorCode::NoRuntime,
            BillingError::AlreadyInstalled => ErrorCode::AlreadyInstalled,
            BillingError::ConfigError(_) => ErrorCode::ConfigError,
            BillingError::InvalidConfigValue { .. } => ErrorCode::ConfigError,
            BillingError::UnknownTrip(_) => ErrorCode::UnknownTrip,
            BillingError::InvalidScript(_) => ErrorCode::ParseError,
            BillingError::Io(_) => ErrorCode::IoError,
            BillingError::Json(_) => ErrorCode::ParseError,
            BillingError::Internal(_) => ErrorCode::InternalError,
        }
    }

    /// Check if this error was caused by invalid input
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            BillingError::ConfigError(_)
                | BillingError::InvalidConfigValue { .. }
                | BillingError::UnknownTrip(_)
                | BillingError::InvalidScript(_)
                | BillingError::Json(_)
        )
    }

    // === Constructor helpers ===

    /// Create an internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        BillingError::Internal(msg.into())
    }

    /// Create a configuration error
    pub fn config_error(msg: impl Into<String>) -> Self {
        BillingError::ConfigError(msg.into())
    }

    /// Create an invalid configuration value error
    pub fn invalid_value(key: impl Into<String>, value: impl Into<String>) -> Self {
        BillingError::InvalidConfigValue {
            key: key.into(),
            value: value.into(),
        }
    }

    /// Create an unknown trip error
    pub fn unknown_trip(label: impl Into<String>) -> Self {
        BillingError::UnknownTrip(label.into())
    }

    /// Create an invalid script error
    pub fn invalid_script(msg: impl Into<String>) -> Self {
        BillingError::InvalidScript(msg.into())
    }
}
