//! Structured logging system for the speed test server
//!
//! This module provides:
//! - Structured logging with multiple levels and contexts
//! - Session correlation (every protocol event carries its session id)
//! - Console, compact and JSON output formats
//! - A protocol-level logger with one method per measurement event

use crate::error::{AppError, Result};
use crate::models::Config;
use crate::session::TransferMeasurement;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io::{self, Write};
use std::sync::{PoisonError, RwLock};
use std::time::Duration;

/// Log level enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum LogLevel {
    /// Trace level - most detailed
    Trace = 0,
    /// Debug level - detailed information for debugging
    Debug = 1,
    /// Info level - general application information
    Info = 2,
    /// Warning level - potentially harmful situations
    Warn = 3,
    /// Error level - error events but application can continue
    Error = 4,
}

impl LogLevel {
    /// Get log level name as string
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Trace => "TRACE",
            LogLevel::Debug => "DEBUG",
            LogLevel::Info => "INFO",
            LogLevel::Warn => "WARN",
            LogLevel::Error => "ERROR",
        }
    }

    /// Get ANSI color code for console output
    pub fn color_code(&self) -> &'static str {
        match self {
            LogLevel::Trace => "\x1b[37m",    // White
            LogLevel::Debug => "\x1b[36m",    // Cyan
            LogLevel::Info => "\x1b[32m",     // Green
            LogLevel::Warn => "\x1b[33m",     // Yellow
            LogLevel::Error => "\x1b[31m",    // Red
        }
    }

    /// Reset ANSI color code
    pub fn reset_code() -> &'static str {
        "\x1b[0m"
    }
}

impl std::str::FromStr for LogLevel {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_uppercase().as_str() {
            "TRACE" => Ok(LogLevel::Trace),
            "DEBUG" => Ok(LogLevel::Debug),
            "INFO" => Ok(LogLevel::Info),
            "WARN" | "WARNING" => Ok(LogLevel::Warn),
            "ERROR" => Ok(LogLevel::Error),
            _ => Err(AppError::parse(format!("Invalid log level: {}", s))),
        }
    }
}

/// Log output format options
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable console format
    Console,
    /// JSON format for structured logging
    Json,
    /// Compact single-line format
    Compact,
}

impl std::str::FromStr for LogFormat {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "console" => Ok(LogFormat::Console),
            "json" => Ok(LogFormat::Json),
            "compact" => Ok(LogFormat::Compact),
            _ => Err(AppError::parse(format!("Invalid log format: {}", s))),
        }
    }
}

/// Log entry structure for structured logging
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    /// Timestamp when log entry was created
    pub timestamp: DateTime<Utc>,
    /// Log level
    pub level: LogLevel,
    /// Log message
    pub message: String,
    /// Logger name/component
    pub logger: String,
    /// Correlation ID (the speed test session id)
    pub correlation_id: Option<String>,
    /// Additional structured fields
    pub fields: HashMap<String, serde_json::Value>,
}

/// Logger implementation with multiple output formats
pub struct Logger {
    /// Minimum log level to output
    min_level: LogLevel,
    /// Whether to use colored output
    use_color: bool,
    /// Output format
    format: LogFormat,
    /// Logger name
    name: String,
    /// Fields attached to every entry
    context_fields: RwLock<HashMap<String, serde_json::Value>>,
}

impl Logger {
    /// Create a new logger
    pub fn new(name: String) -> Self {
        Self {
            min_level: LogLevel::Info,
            use_color: true,
            format: LogFormat::Console,
            name,
            context_fields: RwLock::new(HashMap::new()),
        }
    }

    /// Create a logger with specific configuration
    pub fn with_config(name: String, config: &Config) -> Self {
        let min_level = if config.debug {
            LogLevel::Debug
        } else if config.verbose {
            LogLevel::Info
        } else {
            LogLevel::Warn
        };

        Self {
            min_level,
            use_color: config.enable_color,
            format: config.log_format,
            name,
            context_fields: RwLock::new(HashMap::new()),
        }
    }

    /// Set minimum log level
    pub fn set_level(&mut self, level: LogLevel) {
        self.min_level = level;
    }

    /// Enable or disable colored output
    pub fn set_color(&mut self, use_color: bool) {
        self.use_color = use_color;
    }

    /// Add context field for all subsequent log entries
    pub fn add_context_field<T: Serialize>(&self, key: &str, value: T) {
        if let Ok(json_value) = serde_json::to_value(value) {
            let mut fields = self.context_fields.write().unwrap_or_else(PoisonError::into_inner);
            fields.insert(key.to_string(), json_value);
        }
    }

    /// Create a log entry builder
    pub fn log(&self, level: LogLevel, message: &str) -> LogEntryBuilder<'_> {
        LogEntryBuilder::new(self, level, message.to_string())
    }

    pub fn debug(&self, message: &str) -> LogEntryBuilder<'_> {
        self.log(LogLevel::Debug, message)
    }

    pub fn info(&self, message: &str) -> LogEntryBuilder<'_> {
        self.log(LogLevel::Info, message)
    }

    pub fn warn(&self, message: &str) -> LogEntryBuilder<'_> {
        self.log(LogLevel::Warn, message)
    }

    pub fn error(&self, message: &str) -> LogEntryBuilder<'_> {
        self.log(LogLevel::Error, message)
    }

    /// Check if a log level would be output
    pub fn would_log(&self, level: LogLevel) -> bool {
        level >= self.min_level
    }

    /// Write log entry to output
    fn write_entry(&self, mut entry: LogEntry) {
        if entry.level < self.min_level {
            return;
        }

        {
            let fields = self.context_fields.read().unwrap_or_else(PoisonError::into_inner);
            for (key, value) in fields.iter() {
                entry.fields.entry(key.clone()).or_insert_with(|| value.clone());
            }
        }

        let output = self.format_entry(&entry);

        // Write to stderr for errors/warnings, stdout for others
        if entry.level >= LogLevel::Warn {
            let _ = writeln!(io::stderr(), "{}", output);
        } else {
            let _ = writeln!(io::stdout(), "{}", output);
        }
    }

    fn format_entry(&self, entry: &LogEntry) -> String {
        match self.format {
            LogFormat::Console => self.format_console(entry),
            LogFormat::Json => self.format_json(entry),
            LogFormat::Compact => self.format_compact(entry),
        }
    }

    /// Format log entry for console output
    fn format_console(&self, entry: &LogEntry) -> String {
        let timestamp = entry.timestamp.format("%Y-%m-%d %H:%M:%S%.3f");
        let level_str = entry.level.as_str();

        let formatted_level = if self.use_color {
            format!("{}{:>5}{}", entry.level.color_code(), level_str, LogLevel::reset_code())
        } else {
            format!("{:>5}", level_str)
        };

        let mut output = format!("{} {} [{}] {}",
            timestamp,
            formatted_level,
            entry.logger,
            entry.message
        );

        if let Some(correlation_id) = &entry.correlation_id {
            output.push_str(&format!(" [sid={}]", correlation_id));
        }

        if !entry.fields.is_empty() {
            let mut fields_str: Vec<String> = entry.fields.iter()
                .map(|(k, v)| format!("{}={}", k, v))
                .collect();
            fields_str.sort();
            output.push_str(&format!(" {{{}}}", fields_str.join(", ")));
        }

        output
    }

    /// Format log entry as JSON
    fn format_json(&self, entry: &LogEntry) -> String {
        match serde_json::to_string(entry) {
            Ok(json) => json,
            Err(_) => format!("{{\"error\": \"Failed to serialize log entry\", \"message\": \"{}\"}}", entry.message),
        }
    }

    /// Format log entry in compact format
    fn format_compact(&self, entry: &LogEntry) -> String {
        let timestamp = entry.timestamp.format("%H:%M:%S");
        let sid = entry.correlation_id.as_deref().unwrap_or("-");
        format!("{} {} {} {}: {}",
            timestamp,
            entry.level.as_str().chars().next().unwrap_or('?'),
            entry.logger,
            sid,
            entry.message
        )
    }
}

/// Builder pattern for creating log entries
pub struct LogEntryBuilder<'a> {
    logger: &'a Logger,
    entry: LogEntry,
}

impl<'a> LogEntryBuilder<'a> {
    fn new(logger: &'a Logger, level: LogLevel, message: String) -> Self {
        Self {
            logger,
            entry: LogEntry {
                timestamp: Utc::now(),
                level,
                message,
                logger: logger.name.clone(),
                correlation_id: None,
                fields: HashMap::new(),
            },
        }
    }

    /// Add a correlation ID
    pub fn correlation_id(mut self, id: &str) -> Self {
        self.entry.correlation_id = Some(id.to_string());
        self
    }

    /// Add a structured field
    pub fn field<T: Serialize>(mut self, key: &str, value: T) -> Self {
        if let Ok(json_value) = serde_json::to_value(value) {
            self.entry.fields.insert(key.to_string(), json_value);
        }
        self
    }

    /// Add transfer measurement fields
    pub fn transfer(self, measurement: &TransferMeasurement) -> Self {
        self.field("bytes", measurement.bytes)
            .field("elapsed_ms", measurement.elapsed.as_secs_f64() * 1000.0)
            .field("rate_bps", measurement.rate)
            .field("rate_mib_s", measurement.rate / crate::output::BYTES_PER_MIB)
    }

    /// Add error information
    pub fn error_info(self, error: &AppError) -> Self {
        self.field("error_category", error.category())
            .field("error_recoverable", error.is_recoverable())
    }

    /// Finalize and write the log entry
    pub fn log(self) {
        self.logger.write_entry(self.entry);
    }
}

/// Logger for measurement protocol events
pub struct ProtocolLogger {
    logger: Logger,
}

impl ProtocolLogger {
    /// Create a new protocol logger
    pub fn new(config: &Config) -> Self {
        Self {
            logger: Logger::with_config("PROTO".to_string(), config),
        }
    }

    /// Access the underlying logger
    pub fn logger(&self) -> &Logger {
        &self.logger
    }

    pub fn log_listening(&self, address: &str, probe_count: u32) {
        self.logger.info(&format!("Listening on {}", address))
            .field("address", address)
            .field("probe_count", probe_count)
            .log();
    }

    pub fn log_session_started(&self, session_id: &str, client_host: &str) {
        self.logger.info("Session started")
            .correlation_id(session_id)
            .field("client_host", client_host)
            .log();
    }

    pub fn log_probe(&self, session_id: &str, probe: u32, sample_ms: Option<f64>) {
        let mut builder = self.logger.debug(&format!("Probe {} received", probe))
            .correlation_id(session_id)
            .field("probe", probe);
        if let Some(sample) = sample_ms {
            builder = builder.field("sample_ms", sample);
        }
        builder.log();
    }

    pub fn log_download(&self, session_id: Option<&str>, requested: u64, measurement: &TransferMeasurement) {
        let completed = measurement.bytes >= requested;
        let message = if completed {
            "Download complete"
        } else {
            "Download ended early, recording partial rate"
        };

        let mut builder = self.logger.info(message)
            .field("requested_bytes", requested)
            .field("completed", completed)
            .transfer(measurement);
        if let Some(sid) = session_id {
            builder = builder.correlation_id(sid);
        }
        builder.log();
    }

    pub fn log_download_abandoned(&self, session_id: Option<&str>, requested: u64) {
        let mut builder = self.logger.warn("Download abandoned before first byte, nothing recorded")
            .field("requested_bytes", requested);
        if let Some(sid) = session_id {
            builder = builder.correlation_id(sid);
        }
        builder.log();
    }

    pub fn log_upload(&self, session_id: &str, measurement: &TransferMeasurement, multipart: bool) {
        self.logger.info("Upload complete")
            .correlation_id(session_id)
            .field("multipart", multipart)
            .transfer(measurement)
            .log();
    }

    pub fn log_upload_abandoned(&self, session_id: &str, reason: &str) {
        self.logger.warn("Upload failed before first byte, nothing recorded")
            .correlation_id(session_id)
            .field("reason", reason)
            .log();
    }

    pub fn log_server_error(&self, error: &AppError) {
        self.logger.error("Server stopped")
            .field("category", error.category())
            .field("error", error.to_string())
            .log();
    }

    pub fn log_upload_interrupted(&self, session_id: &str, reason: &str, measurement: &TransferMeasurement) {
        self.logger.warn("Upload ended early, recording partial rate")
            .correlation_id(session_id)
            .field("reason", reason)
            .transfer(measurement)
            .log();
    }

    pub fn log_results(&self, session_id: &str, timed_out: bool, waited: Duration) {
        let builder = if timed_out {
            self.logger.warn("Results resolved without download measurement")
        } else {
            self.logger.info("Results resolved")
        };
        builder
            .correlation_id(session_id)
            .field("timed_out", timed_out)
            .field("waited_ms", waited.as_millis() as u64)
            .log();
    }

    pub fn log_client_error(&self, path: &str, error: &AppError) {
        self.logger.warn(&format!("Rejected request to {}: {}", path, error))
            .field("path", path)
            .error_info(error)
            .log();
    }

    pub fn log_eviction(&self, evicted: usize, remaining: usize) {
        if evicted == 0 {
            return;
        }
        self.logger.info(&format!("Evicted {} expired sessions", evicted))
            .field("evicted", evicted)
            .field("remaining", remaining)
            .log();
    }
}
