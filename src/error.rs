// src/error.rs

//! Unified error handling for discovery, scraping, storage and serving.

use std::fmt;

use thiserror::Error;

/// Result type alias for newshound operations.
pub type Result<T> = std::result::Result<T, AppError>;

/// Unified application error type.
#[derive(Error, Debug)]
pub enum AppError {
    /// I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP request failed
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Server answered with a non-2xx status
    #[error("HTTP code {status} ({url})")]
    HttpStatus { status: u16, url: String },

    /// JSON serialization/deserialization failed
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// TOML parsing failed
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    /// URL parsing failed
    #[error("URL parse error: {0}")]
    Url(#[from] url::ParseError),

    /// Database operation failed
    #[error("Database error: {0}")]
    Sql(#[from] sqlx::Error),

    /// Schema migration failed
    #[error("Migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    /// Regular expression or simplified URL form failed to compile
    #[error("Invalid pattern '{pattern}': {message}")]
    Pattern { pattern: String, message: String },

    /// CSS selector parsing failed
    #[error("Invalid selector '{selector}': {message}")]
    Selector { selector: String, message: String },

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Data validation error
    #[error("Validation error: {0}")]
    Validation(String),

    /// Bad query parameter on the wire
    #[error("bad '{param}' param: {message}")]
    BadParam { param: String, message: String },

    /// Too many failures within a single run
    #[error("Error threshold exceeded ({errors} errors, {allowance} allowed)")]
    ErrorThresholdExceeded { errors: usize, allowance: usize },

    /// URLs resolve to more than one stored article
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Content extraction failed
    #[error("Extraction error for {url}: {message}")]
    Extract { url: String, message: String },

    /// Stopped by a cancellation request
    #[error("quit requested")]
    Cancelled,
}

impl AppError {
    /// Create a pattern compilation error.
    pub fn pattern(pattern: impl Into<String>, message: impl fmt::Display) -> Self {
        Self::Pattern {
            pattern: pattern.into(),
            message: message.to_string(),
        }
    }

    /// Create a selector parsing error.
    pub fn selector(selector: impl Into<String>, message: impl fmt::Display) -> Self {
        Self::Selector {
            selector: selector.into(),
            message: message.to_string(),
        }
    }

    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Create a validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Create a bad parameter error.
    pub fn bad_param(param: impl Into<String>, message: impl fmt::Display) -> Self {
        Self::BadParam {
            param: param.into(),
            message: message.to_string(),
        }
    }

    /// Create an extraction error with context.
    pub fn extract(url: impl Into<String>, message: impl fmt::Display) -> Self {
        Self::Extract {
            url: url.into(),
            message: message.to_string(),
        }
    }

    /// True for errors caused by bad caller input rather than a failure.
    pub fn is_client_error(&self) -> bool {
        matches!(self, Self::BadParam { .. } | Self::Validation(_))
    }
}
