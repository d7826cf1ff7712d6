//! Error handling for the speed test server and client

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;

/// Custom error types for the speed test
#[derive(Error, Debug)]
pub enum AppError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Validation errors
    #[error("Validation error: {0}")]
    Validation(String),

    /// Client protocol errors (missing session id, bad probe counter)
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Network connectivity errors
    #[error("Network error: {0}")]
    Network(String),

    /// HTTP request errors
    #[error("HTTP request error: {0}")]
    HttpRequest(String),

    /// Timeout errors
    #[error("Timeout error: {0}")]
    Timeout(String),

    /// I/O errors (file operations, sockets)
    #[error("I/O error: {0}")]
    Io(String),

    /// Parsing errors (URLs, JSON, etc.)
    #[error("Parsing error: {0}")]
    Parse(String),

    /// Server lifecycle errors (bind, serve)
    #[error("Server error: {0}")]
    Server(String),
}

/// Result type alias used throughout the crate
pub type Result<T> = std::result::Result<T, AppError>;

impl AppError {
    /// Create a new configuration error
    pub fn config<S: Into<String>>(message: S) -> Self {
        Self::Config(message.into())
    }

    /// Create a new validation error
    pub fn validation<S: Into<String>>(message: S) -> Self {
        Self::Validation(message.into())
    }

    /// Create a new client protocol error
    pub fn protocol<S: Into<String>>(message: S) -> Self {
        Self::Protocol(message.into())
    }

    /// Create a new network error
    pub fn network<S: Into<String>>(message: S) -> Self {
        Self::Network(message.into())
    }

    /// Create a new HTTP request error
    pub fn http_request<S: Into<String>>(message: S) -> Self {
        Self::HttpRequest(message.into())
    }

    /// Create a new timeout error
    pub fn timeout<S: Into<String>>(message: S) -> Self {
        Self::Timeout(message.into())
    }

    /// Create a new I/O error
    pub fn io<S: Into<String>>(message: S) -> Self {
        Self::Io(message.into())
    }

    /// Create a new parsing error
    pub fn parse<S: Into<String>>(message: S) -> Self {
        Self::Parse(message.into())
    }

    /// Create a new server error
    pub fn server<S: Into<String>>(message: S) -> Self {
        Self::Server(message.into())
    }

    /// Get error category for logging and reporting
    pub fn category(&self) -> &'static str {
        match self {
            Self::Config(_) => "CONFIG",
            Self::Validation(_) => "VALIDATION",
            Self::Protocol(_) => "PROTOCOL",
            Self::Network(_) => "NETWORK",
            Self::HttpRequest(_) => "HTTP",
            Self::Timeout(_) => "TIMEOUT",
            Self::Io(_) => "IO",
            Self::Parse(_) => "PARSE",
            Self::Server(_) => "SERVER",
        }
    }

    /// Check if error is recoverable (can retry)
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::Network(_) | Self::HttpRequest(_) | Self::Timeout(_) => true,
            Self::Config(_) | Self::Validation(_) | Self::Protocol(_) | Self::Parse(_) => false,
            Self::Io(_) | Self::Server(_) => false,
        }
    }

    /// HTTP status returned when this error escapes a handler
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Protocol(_) | Self::Validation(_) | Self::Parse(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Get exit code for this error type
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Config(_) | Self::Validation(_) | Self::Parse(_) => 1,  // Invalid configuration/usage
            Self::Network(_) | Self::HttpRequest(_) | Self::Protocol(_) => 2,  // Network issues
            Self::Timeout(_) => 3,
            Self::Io(_) => 5,
            Self::Server(_) => 6,  // Could not bind or serve
        }
    }

    /// Format error for console display with color coding
    pub fn format_for_console(&self, use_color: bool) -> String {
        let category = self.category();
        let message = self.to_string();

        if use_color {
            use colored::Colorize;
            match self {
                Self::Config(_) | Self::Validation(_) | Self::Parse(_) | Self::Protocol(_) => {
                    format!("[{}] {}", category.red().bold(), message.red())
                }
                Self::Network(_) | Self::HttpRequest(_) => {
                    format!("[{}] {}", category.yellow().bold(), message.yellow())
                }
                Self::Timeout(_) => {
                    format!("[{}] {}", category.blue().bold(), message.blue())
                }
                Self::Io(_) | Self::Server(_) => {
                    format!("[{}] {}", category.cyan().bold(), message.cyan())
                }
            }
        } else {
            format!("[{}] {}", category, message)
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        (self.status_code(), self.to_string()).into_response()
    }
}

// Standard library error conversions
impl From<std::io::Error> for AppError {
    fn from(error: std::io::Error) -> Self {
        Self::io(error.to_string())
    }
}

impl From<url::ParseError> for AppError {
    fn from(error: url::ParseError) -> Self {
        Self::parse(format!("URL parse error: {}", error))
    }
}

impl From<serde_json::Error> for AppError {
    fn from(error: serde_json::Error) -> Self {
        Self::parse(format!("JSON parse error: {}", error))
    }
}

impl From<reqwest::Error> for AppError {
    fn from(error: reqwest::Error) -> Self {
        if error.is_timeout() {
            Self::timeout(error.to_string())
        } else if error.is_connect() || error.is_request() {
            Self::network(error.to_string())
        } else {
            Self::http_request(error.to_string())
        }
    }
}

impl From<dotenv::Error> for AppError {
    fn from(error: dotenv::Error) -> Self {
        Self::config(format!("Environment file error: {}", error))
    }
}

impl From<std::num::ParseIntError> for AppError {
    fn from(error: std::num::ParseIntError) -> Self {
        Self::parse(format!("Integer parse error: {}", error))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_categories() {
        assert_eq!(AppError::config("x").category(), "CONFIG");
        assert_eq!(AppError::protocol("x").category(), "PROTOCOL");
        assert_eq!(AppError::server("x").category(), "SERVER");
    }

    #[test]
    fn test_protocol_errors_are_client_errors() {
        assert_eq!(AppError::protocol("missing sid").status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(AppError::validation("bad").status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(AppError::io("disk").status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_exit_codes() {
        assert_eq!(AppError::config("x").exit_code(), 1);
        assert_eq!(AppError::network("x").exit_code(), 2);
        assert_eq!(AppError::timeout("x").exit_code(), 3);
        assert_eq!(AppError::io("x").exit_code(), 5);
        assert_eq!(AppError::server("x").exit_code(), 6);
    }

    #[test]
    fn test_recoverability() {
        assert!(AppError::network("x").is_recoverable());
        assert!(AppError::timeout("x").is_recoverable());
        assert!(!AppError::protocol("x").is_recoverable());
        assert!(!AppError::config("x").is_recoverable());
    }

    #[test]
    fn test_plain_console_format() {
        let error = AppError::protocol("no sid");
        assert_eq!(error.format_for_console(false), "[PROTOCOL] Protocol error: no sid");
    }

    #[test]
    fn test_conversions() {
        let io_err = std::io::Error::new(std::io::ErrorKind::AddrInUse, "in use");
        assert!(matches!(AppError::from(io_err), AppError::Io(_)));

        let parse_err = "abc".parse::<u32>().unwrap_err();
        assert!(matches!(AppError::from(parse_err), AppError::Parse(_)));

        let url_err = url::Url::parse("not a url").unwrap_err();
        assert!(matches!(AppError::from(url_err), AppError::Parse(_)));
    }

    #[test]
    fn test_into_response_status() {
        let response = AppError::protocol("no sid").into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
