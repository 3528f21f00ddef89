//! Error types for Noteguard.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Main error type for Noteguard operations.
#[derive(Error, Debug)]
pub enum NoteguardError {
    /// A request was denied by `RateLimiter::enforce`
    #[error("Rate limit exceeded for {key}. Please try again later.")]
    RateLimitExceeded { key: String },

    /// The token measurement strategy could not be loaded or used
    #[error("Token measurement unavailable: {0}")]
    MeasurementUnavailable(String),

    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// No async runtime was available to host background work
    #[error("Runtime error: {0}")]
    Runtime(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl NoteguardError {
    /// Stable 5-digit classification for this error.
    pub fn code(&self) -> ErrorCode {
        match self {
            NoteguardError::RateLimitExceeded { .. } => ErrorCode::RATE_LIMITED,
            NoteguardError::MeasurementUnavailable(_) => ErrorCode::SERVICE_UNAVAILABLE,
            NoteguardError::Config(_) => ErrorCode::BAD_REQUEST,
            NoteguardError::Runtime(_) | NoteguardError::Io(_) => ErrorCode::INTERNAL,
        }
    }

    /// Convert to the outward-facing error shape.
    pub fn to_api_error(&self) -> ApiError {
        ApiError {
            error_code: self.code(),
            message: self.to_string(),
        }
    }
}

impl From<config::ConfigError> for NoteguardError {
    fn from(err: config::ConfigError) -> Self {
        NoteguardError::Config(err.to_string())
    }
}

/// Result type alias for Noteguard operations.
pub type Result<T> = std::result::Result<T, NoteguardError>;

/// A 5-digit error classification.
///
/// The leading three digits mirror the closest HTTP status, so `42900`
/// means "too many requests" and `50300` means "service unavailable".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ErrorCode(pub u32);

impl ErrorCode {
    pub const BAD_REQUEST: ErrorCode = ErrorCode(40000);
    pub const UNAUTHORIZED: ErrorCode = ErrorCode(40100);
    pub const FORBIDDEN: ErrorCode = ErrorCode(40300);
    pub const NOT_FOUND: ErrorCode = ErrorCode(40400);
    pub const METHOD_NOT_ALLOWED: ErrorCode = ErrorCode(40500);
    pub const CONFLICT: ErrorCode = ErrorCode(40900);
    pub const RATE_LIMITED: ErrorCode = ErrorCode(42900);
    pub const INTERNAL: ErrorCode = ErrorCode(50000);
    pub const NOT_IMPLEMENTED: ErrorCode = ErrorCode(50100);
    pub const BAD_GATEWAY: ErrorCode = ErrorCode(50200);
    pub const SERVICE_UNAVAILABLE: ErrorCode = ErrorCode(50300);
    pub const GATEWAY_TIMEOUT: ErrorCode = ErrorCode(50400);

    /// Map an HTTP status code from the note service to an error code.
    pub fn from_http_status(status: u16) -> Self {
        match status {
            400 => Self::BAD_REQUEST,
            401 => Self::UNAUTHORIZED,
            403 => Self::FORBIDDEN,
            404 => Self::NOT_FOUND,
            405 => Self::METHOD_NOT_ALLOWED,
            409 => Self::CONFLICT,
            429 => Self::RATE_LIMITED,
            500 => Self::INTERNAL,
            501 => Self::NOT_IMPLEMENTED,
            502 => Self::BAD_GATEWAY,
            503 => Self::SERVICE_UNAVAILABLE,
            504 => Self::GATEWAY_TIMEOUT,
            400..=499 => ErrorCode(40000 + (status as u32 - 400) * 100),
            500..=599 => ErrorCode(50000 + (status as u32 - 500) * 100),
            _ => Self::INTERNAL,
        }
    }

    /// Coerce an arbitrary code into the 5-digit range.
    ///
    /// Values already in range pass through, 3-digit statuses are scaled
    /// by 100 and anything else collapses to `INTERNAL`.
    pub fn normalize(code: u32) -> Self {
        match code {
            10000..=99999 => ErrorCode(code),
            0..=999 => ErrorCode(code * 100),
            _ => Self::INTERNAL,
        }
    }

    pub fn as_u32(&self) -> u32 {
        self.0
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Error payload handed back to API callers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiError {
    pub error_code: ErrorCode,
    pub message: String,
}

impl ApiError {
    /// Serialize to the JSON body form.
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "errorCode": self.error_code,
            "message": self.message,
        })
    }
}
