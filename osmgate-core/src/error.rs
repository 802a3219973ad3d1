//! Error types for osmgate operations

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Input validation errors. Always raised before any network activity.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ValidationError {
    #[error("Address must not be empty")]
    EmptyAddress,

    #[error("Latitude must be between -90 and 90, got {value}")]
    InvalidLatitude { value: f64 },

    #[error("Longitude must be between -180 and 180, got {value}")]
    InvalidLongitude { value: f64 },

    #[error("Required field missing: {field}")]
    RequiredFieldMissing { field: String },

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },
}

/// Errors raised while talking to an upstream HTTP service.
///
/// Cloneable because a single outcome is fanned out to every coalesced caller.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum UpstreamError {
    #[error("Request to {service} failed: {message}")]
    Transport { service: String, message: String },

    #[error("{service} returned status {status}: {message}")]
    Status {
        service: String,
        status: u16,
        message: String,
    },

    #[error("Invalid response from {service}: {reason}")]
    Parse { service: String, reason: String },

    #[error("{service} failed after {attempts} attempts: {last}")]
    RetriesExhausted {
        service: String,
        attempts: u32,
        last: Box<UpstreamError>,
    },

    #[error("Deadline elapsed while waiting on {service}")]
    Timeout { service: String },

    #[error("Request to {service} was cancelled")]
    Cancelled { service: String },
}

impl UpstreamError {
    /// Whether another attempt of the same request could succeed.
    ///
    /// Parse failures signal an upstream contract change and are never retried.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transport { .. } | Self::Status { .. })
    }

    /// Whether the caller may usefully retry later.
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::Status { status, .. } => *status != 400,
            Self::RetriesExhausted { last, .. } => last.is_recoverable(),
            Self::Cancelled { .. } => false,
            Self::Transport { .. } | Self::Parse { .. } | Self::Timeout { .. } => true,
        }
    }

    /// The innermost error, unwrapping retry exhaustion.
    pub fn root(&self) -> &UpstreamError {
        match self {
            Self::RetriesExhausted { last, .. } => last.root(),
            other => other,
        }
    }

    /// User-facing recovery guidance, inferred from the failure kind.
    pub fn guidance(&self) -> &'static str {
        match self.root() {
            Self::Status { status, .. } => match status {
                429 => "Rate limit exceeded. Please try again in a few moments.",
                408 | 504 => "The request timed out. Try reducing the search area or simplifying the query.",
                400 => "The request was invalid. Check your parameters and try again.",
                500 => "The server encountered an error. This is likely temporary, please try again later.",
                503 => "The service is temporarily unavailable. Please try again later.",
                _ => "Please try again later or modify your request parameters.",
            },
            Self::Transport { .. } => "Check your internet connection and try again.",
            Self::Parse { .. } => {
                "The data received was incomplete or malformed. Try different search parameters."
            }
            Self::Timeout { .. } => "The request timed out. Try again in a few moments.",
            Self::Cancelled { .. } => "The request was cancelled before it completed.",
            Self::RetriesExhausted { .. } => "Please try again later.",
        }
    }
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required configuration field: {field}")]
    MissingRequired { field: String },

    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },
}

/// Polyline decoding errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PolylineError {
    #[error("Invalid polyline byte {byte:#04x} at position {position}")]
    InvalidByte { position: usize, byte: u8 },

    #[error("Polyline ends in the middle of a value at position {position}")]
    Truncated { position: usize },

    #[error("Polyline value starting at position {position} overflows")]
    Overflow { position: usize },
}

/// Master error type for all osmgate errors.
#[derive(Debug, Clone, Error)]
pub enum OsmError {
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Upstream error: {0}")]
    Upstream(#[from] UpstreamError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("Polyline error: {0}")]
    Polyline(#[from] PolylineError),
}

/// Result type alias for osmgate operations.
pub type OsmResult<T> = Result<T, OsmError>;

// =============================================================================
// STRUCTURED FAILURES
// =============================================================================

/// Machine-readable failure code surfaced to tool callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FailureCode {
    EmptyAddress,
    InvalidLatitude,
    InvalidLongitude,
    InvalidInput,
    NoResults,
    ServiceError,
    ParseError,
    Timeout,
    Cancelled,
}

impl FailureCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::EmptyAddress => "EMPTY_ADDRESS",
            Self::InvalidLatitude => "INVALID_LATITUDE",
            Self::InvalidLongitude => "INVALID_LONGITUDE",
            Self::InvalidInput => "INVALID_INPUT",
            Self::NoResults => "NO_RESULTS",
            Self::ServiceError => "SERVICE_ERROR",
            Self::ParseError => "PARSE_ERROR",
            Self::Timeout => "TIMEOUT",
            Self::Cancelled => "CANCELLED",
        }
    }
}

impl fmt::Display for FailureCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Terminal failure returned to external callers.
///
/// Internal retry and transport errors never escape raw; they are always
/// translated into one of these, keeping the originating query.
#[derive(Debug, Clone, Error, PartialEq, Serialize, Deserialize)]
#[error("{code}: {message}")]
pub struct ResolutionFailure {
    pub code: FailureCode,
    pub message: String,
    #[serde(rename = "query")]
    pub original_query: String,
    #[serde(default)]
    pub suggestions: Vec<String>,
    pub recoverable: bool,
}

impl ResolutionFailure {
    pub fn new(
        code: FailureCode,
        message: impl Into<String>,
        original_query: impl Into<String>,
        recoverable: bool,
    ) -> Self {
        Self {
            code,
            message: message.into(),
            original_query: original_query.into(),
            suggestions: Vec::new(),
            recoverable,
        }
    }

    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestions.push(suggestion.into());
        self
    }

    pub fn with_suggestions<I, S>(mut self, suggestions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.suggestions
            .extend(suggestions.into_iter().map(Into::into));
        self
    }

    /// Translate a validation error.
    pub fn from_validation(err: &ValidationError, query: impl Into<String>) -> Self {
        match err {
            ValidationError::EmptyAddress => {
                Self::new(FailureCode::EmptyAddress, err.to_string(), query, true)
                    .with_suggestion("Provide a specific address or place name")
                    .with_suggestion("Include city/region for better results")
            }
            ValidationError::InvalidLatitude { .. } => {
                Self::new(FailureCode::InvalidLatitude, err.to_string(), query, true)
                    .with_suggestion("Ensure latitude is in decimal degrees")
            }
            ValidationError::InvalidLongitude { .. } => {
                Self::new(FailureCode::InvalidLongitude, err.to_string(), query, true)
                    .with_suggestion("Ensure longitude is in decimal degrees")
            }
            ValidationError::RequiredFieldMissing { .. } | ValidationError::InvalidValue { .. } => {
                Self::new(FailureCode::InvalidInput, err.to_string(), query, true)
            }
        }
    }

    /// Translate an upstream error, keeping recoverability and guidance.
    pub fn from_upstream(err: &UpstreamError, query: impl Into<String>) -> Self {
        let code = match err.root() {
            UpstreamError::Parse { .. } => FailureCode::ParseError,
            UpstreamError::Timeout { .. } => FailureCode::Timeout,
            UpstreamError::Cancelled { .. } => FailureCode::Cancelled,
            UpstreamError::Transport { .. }
            | UpstreamError::Status { .. }
            | UpstreamError::RetriesExhausted { .. } => FailureCode::ServiceError,
        };
        Self::new(code, err.to_string(), query, err.is_recoverable())
            .with_suggestion(err.guidance())
    }
}

// =============================================================================
// TESTS
// =============================================================================
