//! Error types for PetroRAG services
//!
//! Provides a comprehensive error handling system with:
//! - A closed taxonomy of error kinds with stable names and codes
//! - Structured context attached to every error
//! - HTTP status code mapping
//! - Sanitized, user-safe error payloads

use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use regex_lite::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::OnceLock;
use thiserror::Error;

/// Result type alias using AppError
pub type Result<T> = std::result::Result<T, AppError>;

/// Boxed cause wrapped by an [`AppError`]
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Structured error context (ordered for stable serialization)
pub type ErrorContext = BTreeMap<String, serde_json::Value>;

/// Error kinds for machine-readable error identification
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    #[serde(rename = "validation_error")]
    Validation,
    #[serde(rename = "routing_error")]
    Routing,
    #[serde(rename = "processing_error")]
    Processing,
    #[serde(rename = "not_found_error")]
    NotFound,
    #[serde(rename = "rate_limit_exceeded")]
    RateLimitExceeded,
    #[serde(rename = "cache_error")]
    Cache,
    #[serde(rename = "upstream_error")]
    Upstream,
    #[serde(rename = "configuration_error")]
    Configuration,
    #[serde(rename = "cancelled")]
    Cancelled,
    #[serde(rename = "internal_error")]
    Internal,
}

impl ErrorKind {
    /// Stable snake_case name, identical to the serialized form
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Validation => "validation_error",
            ErrorKind::Routing => "routing_error",
            ErrorKind::Processing => "processing_error",
            ErrorKind::NotFound => "not_found_error",
            ErrorKind::RateLimitExceeded => "rate_limit_exceeded",
            ErrorKind::Cache => "cache_error",
            ErrorKind::Upstream => "upstream_error",
            ErrorKind::Configuration => "configuration_error",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::Internal => "internal_error",
        }
    }

    /// Get the numeric code for this kind
    pub fn as_code(&self) -> u16 {
        match self {
            // Client-side (1xxx - 6xxx)
            ErrorKind::Validation => 1001,
            ErrorKind::NotFound => 4001,
            ErrorKind::RateLimitExceeded => 6001,

            // Orchestration (7xxx)
            ErrorKind::Routing => 7001,
            ErrorKind::Processing => 7002,
            ErrorKind::Cancelled => 7003,

            // External (8xxx)
            ErrorKind::Upstream => 8001,
            ErrorKind::Cache => 8006,

            // Internal (9xxx)
            ErrorKind::Internal => 9001,
            ErrorKind::Configuration => 9002,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Application error: a kind, a human message, structured context and an
/// optional wrapped cause.
#[derive(Error, Debug)]
#[error("[{kind}] {message}")]
pub struct AppError {
    kind: ErrorKind,
    message: String,
    context: ErrorContext,
    #[source]
    source: Option<BoxError>,
}

impl AppError {
    /// Create an error of the given kind
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            context: ErrorContext::new(),
            source: None,
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Validation, message)
    }

    pub fn routing(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Routing, message)
    }

    pub fn processing(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Processing, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, message)
    }

    pub fn cache(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Cache, message)
    }

    pub fn upstream(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Upstream, message)
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Configuration, message)
    }

    pub fn cancelled(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Cancelled, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, message)
    }

    /// Rate limit rejection carrying the wait until the next token
    pub fn rate_limited(identity: &str, retry_after_secs: f64) -> Self {
        Self::new(
            ErrorKind::RateLimitExceeded,
            format!("Rate limit exceeded, retry in {:.1}s", retry_after_secs),
        )
        .with_context("identity", identity)
        .with_context("retry_after_secs", retry_after_secs)
    }

    /// Attach a structured context entry
    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }

    /// Attach the underlying cause
    pub fn with_source(mut self, source: impl Into<BoxError>) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn context(&self) -> &ErrorContext {
        &self.context
    }

    /// Seconds until the caller may retry, for rate limit errors
    pub fn retry_after_secs(&self) -> Option<f64> {
        self.context.get("retry_after_secs").and_then(|v| v.as_f64())
    }

    /// Get the numeric code for this error
    pub fn code(&self) -> u16 {
        self.kind.as_code()
    }

    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self.kind {
            ErrorKind::Validation => StatusCode::BAD_REQUEST,
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::RateLimitExceeded => StatusCode::TOO_MANY_REQUESTS,
            ErrorKind::Cancelled => StatusCode::GATEWAY_TIMEOUT,
            ErrorKind::Upstream => StatusCode::BAD_GATEWAY,
            ErrorKind::Cache => StatusCode::SERVICE_UNAVAILABLE,
            ErrorKind::Routing
            | ErrorKind::Processing
            | ErrorKind::Configuration
            | ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Check if this error should be logged at error level
    pub fn is_server_error(&self) -> bool {
        self.status_code().is_server_error()
    }

    /// Check if this error is a client error
    pub fn is_client_error(&self) -> bool {
        self.status_code().is_client_error()
    }

    /// Sanitized message safe to show to end users
    pub fn user_message(&self) -> String {
        sanitize_error_message(&self.message)
    }

    /// Sanitized payload for crossing the service boundary
    pub fn to_user_payload(&self) -> ErrorDetails {
        let details = if self.context.is_empty() {
            None
        } else {
            let sanitized: serde_json::Map<String, serde_json::Value> = self
                .context
                .iter()
                .map(|(k, v)| (k.clone(), sanitize_value(v)))
                .collect();
            Some(serde_json::Value::Object(sanitized))
        };

        ErrorDetails {
            code: self.kind,
            numeric_code: self.code(),
            message: self.user_message(),
            details,
            request_id: None,
        }
    }
}

/// Structured error response for API
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: ErrorDetails,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorDetails {
    pub code: ErrorKind,
    pub numeric_code: u16,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        // Full detail stays in the logs; the body only carries sanitized text
        if self.is_server_error() {
            tracing::error!(error = %self, code = self.code(), status = status.as_u16(), "Server error");
        } else if self.is_client_error() {
            tracing::warn!(error = %self, code = self.code(), status = status.as_u16(), "Client error");
        }

        let retry_after = self.retry_after_secs();
        let body = ErrorResponse {
            error: self.to_user_payload(),
        };

        let mut response = (status, Json(body)).into_response();
        if let Some(secs) = retry_after {
            if let Ok(value) = HeaderValue::from_str(&(secs.ceil() as u64).to_string()) {
                response.headers_mut().insert(header::RETRY_AFTER, value);
            }
        }
        response
    }
}

impl From<reqwest::Error> for AppError {
    fn from(err: reqwest::Error) -> Self {
        let kind = if err.is_timeout() { "timeout" } else { "request" };
        AppError::upstream(format!("HTTP client error: {}", err))
            .with_context("failure", kind)
            .with_source(err)
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::processing(format!("Serialization error: {}", err)).with_source(err)
    }
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::configuration(err.to_string()).with_source(err)
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::internal(err.to_string()).with_source(err)
    }
}

impl From<validator::ValidationErrors> for AppError {
    fn from(err: validator::ValidationErrors) -> Self {
        let fields: Vec<String> = err.field_errors().keys().map(|f| f.to_string()).collect();
        AppError::validation(err.to_string()).with_context("fields", fields)
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::internal(err.to_string())
    }
}

struct Scrubber {
    pattern: Regex,
    replacement: &'static str,
}

fn scrubbers() -> &'static [Scrubber] {
    static SCRUBBERS: OnceLock<Vec<Scrubber>> = OnceLock::new();
    SCRUBBERS.get_or_init(|| {
        // Order matters: traces swallow everything after them, keys before paths
        let rules: [(&str, &'static str); 7] = [
            (r"(?s)Traceback \(most recent call last\):.*", "[STACK_TRACE]"),
            (r"(?s)stack backtrace:.*", "[STACK_TRACE]"),
            (r"sk-[A-Za-z0-9_\-]{8,}", "[API_KEY]"),
            (
                r"(?i)\b(api_key|apikey|password|passwd|token|secret)\s*[=:]\s*[^\s,;]+",
                "${1}=[REDACTED]",
            ),
            (r"[A-Za-z0-9._%+\-]+@[A-Za-z0-9.\-]+\.[A-Za-z]{2,}", "[EMAIL]"),
            (r"[A-Za-z]:\\(?:[^\\\s:]+\\)*[^\\\s:]*", "[FILE_PATH]"),
            (r"(?:/[A-Za-z0-9._\-]+){2,}", "[FILE_PATH]"),
        ];

        rules
            .iter()
            .filter_map(|(pattern, replacement)| {
                Regex::new(pattern).ok().map(|pattern| Scrubber {
                    pattern,
                    replacement,
                })
            })
            .collect()
    })
}

/// Remove file paths, credentials, emails and stack traces from a message
pub fn sanitize_error_message(message: &str) -> String {
    if message.is_empty() {
        return String::new();
    }

    scrubbers().iter().fold(message.to_string(), |acc, scrubber| {
        scrubber
            .pattern
            .replace_all(&acc, scrubber.replacement)
            .into_owned()
    })
}

fn sanitize_value(value: &serde_json::Value) -> serde_json::Value {
    match value {
        serde_json::Value::String(s) => serde_json::Value::String(sanitize_error_message(s)),
        serde_json::Value::Array(items) => {
            serde_json::Value::Array(items.iter().map(sanitize_value).collect())
        }
        serde_json::Value::Object(map) => serde_json::Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), sanitize_value(v)))
                .collect(),
        ),
        other => other.clone(),
    }
}
