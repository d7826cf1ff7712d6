//! Configuration data model and validation

use crate::error::{AppError, Result};
use crate::logging::LogFormat;
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;
use std::time::Duration;

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Address the HTTP server binds to
    #[serde(default = "default_bind_address")]
    pub bind_address: String,

    /// Port the HTTP server listens on (0 picks a free port)
    #[serde(default = "default_port")]
    pub port: u16,

    /// Number of latency probes in the probe chain
    #[serde(default = "default_probe_count")]
    pub probe_count: u32,

    /// Download payload size used when the request does not name one
    #[serde(default = "default_download_size")]
    pub download_size: u64,

    /// Upper bound for a requested download payload
    #[serde(default = "default_max_download_size")]
    pub max_download_size: u64,

    /// Upper bound for an accepted upload body
    #[serde(default = "default_max_upload_size")]
    pub max_upload_size: u64,

    /// How long the results page waits for a download measurement
    #[serde(default = "default_wait_timeout_secs")]
    pub wait_timeout_seconds: u64,

    /// Re-check cadence of the results wait
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Delay before the download page refreshes to the results page
    #[serde(default = "default_results_refresh_secs")]
    pub results_refresh_seconds: u64,

    /// Sessions older than this are evicted; 0 keeps them forever
    #[serde(default = "default_session_ttl_secs")]
    pub session_ttl_seconds: u64,

    /// Enable colored terminal output
    #[serde(default = "default_enable_color")]
    pub enable_color: bool,

    /// Enable verbose output
    #[serde(default)]
    pub verbose: bool,

    /// Enable debug output
    #[serde(default)]
    pub debug: bool,

    /// Log line format
    #[serde(default = "default_log_format")]
    pub log_format: LogFormat,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            port: default_port(),
            probe_count: default_probe_count(),
            download_size: default_download_size(),
            max_download_size: default_max_download_size(),
            max_upload_size: default_max_upload_size(),
            wait_timeout_seconds: default_wait_timeout_secs(),
            poll_interval_ms: default_poll_interval_ms(),
            results_refresh_seconds: default_results_refresh_secs(),
            session_ttl_seconds: default_session_ttl_secs(),
            enable_color: default_enable_color(),
            verbose: false,
            debug: false,
            log_format: default_log_format(),
        }
    }
}

impl Config {
    /// Create a new configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Socket address the server binds to
    pub fn socket_addr(&self) -> Result<SocketAddr> {
        let ip = IpAddr::from_str(&self.bind_address)
            .map_err(|e| AppError::config(format!("Invalid bind address '{}': {}", self.bind_address, e)))?;
        Ok(SocketAddr::new(ip, self.port))
    }

    /// Get the results wait timeout as Duration
    pub fn wait_timeout(&self) -> Duration {
        Duration::from_secs(self.wait_timeout_seconds)
    }

    /// Get the results poll interval as Duration
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Session time-to-live, `None` when eviction is disabled
    pub fn session_ttl(&self) -> Option<Duration> {
        if self.session_ttl_seconds == 0 {
            None
        } else {
            Some(Duration::from_secs(self.session_ttl_seconds))
        }
    }

    /// How often the eviction sweeper runs
    pub fn session_sweep_interval(&self) -> Duration {
        let quarter = self.session_ttl_seconds / 4;
        Duration::from_secs(quarter.clamp(1, 60))
    }

    /// Validate the configuration and return any errors
    pub fn validate(&self) -> Result<()> {
        if IpAddr::from_str(&self.bind_address).is_err() {
            return Err(AppError::config(format!("Invalid bind address: {}", self.bind_address)));
        }

        if self.probe_count == 0 {
            return Err(AppError::config("Probe count must be greater than 0"));
        }

        if self.probe_count > 100 {
            return Err(AppError::config("Probe count cannot exceed 100"));
        }

        if self.max_download_size == 0 {
            return Err(AppError::config("Maximum download size must be greater than 0"));
        }

        if self.download_size == 0 {
            return Err(AppError::config("Download size must be greater than 0"));
        }

        if self.download_size > self.max_download_size {
            return Err(AppError::config(format!(
                "Download size {} exceeds maximum download size {}",
                self.download_size, self.max_download_size
            )));
        }

        if self.max_upload_size == 0 {
            return Err(AppError::config("Maximum upload size must be greater than 0"));
        }

        if self.wait_timeout_seconds == 0 {
            return Err(AppError::config("Wait timeout must be greater than 0"));
        }

        if self.wait_timeout_seconds > 300 {
            return Err(AppError::config("Wait timeout cannot exceed 300 seconds"));
        }

        if self.poll_interval_ms == 0 {
            return Err(AppError::config("Poll interval must be greater than 0"));
        }

        if self.poll_interval_ms > 10_000 {
            return Err(AppError::config("Poll interval cannot exceed 10000 ms"));
        }

        if self.results_refresh_seconds > 60 {
            return Err(AppError::config("Results refresh delay cannot exceed 60 seconds"));
        }

        Ok(())
    }

    /// Merge environment variables into this configuration
    pub fn merge_from_env(&mut self) -> Result<()> {
        if let Ok(bind) = std::env::var("BIND_ADDRESS") {
            self.bind_address = bind.trim().to_string();
        }

        if let Ok(port) = std::env::var("PORT") {
            self.port = port.trim().parse()
                .map_err(|e| AppError::config(format!("Invalid PORT value '{}': {}", port, e)))?;
        }

        if let Ok(count) = std::env::var("PROBE_COUNT") {
            self.probe_count = count.trim().parse()
                .map_err(|e| AppError::config(format!("Invalid PROBE_COUNT value '{}': {}", count, e)))?;
        }

        if let Ok(size) = std::env::var("DOWNLOAD_SIZE") {
            self.download_size = size.trim().parse()
                .map_err(|e| AppError::config(format!("Invalid DOWNLOAD_SIZE value '{}': {}", size, e)))?;
        }

        if let Ok(size) = std::env::var("MAX_DOWNLOAD_SIZE") {
            self.max_download_size = size.trim().parse()
                .map_err(|e| AppError::config(format!("Invalid MAX_DOWNLOAD_SIZE value '{}': {}", size, e)))?;
        }

        if let Ok(size) = std::env::var("MAX_UPLOAD_SIZE") {
            self.max_upload_size = size.trim().parse()
                .map_err(|e| AppError::config(format!("Invalid MAX_UPLOAD_SIZE value '{}': {}", size, e)))?;
        }

        if let Ok(timeout) = std::env::var("WAIT_TIMEOUT_SECONDS") {
            self.wait_timeout_seconds = timeout.trim().parse()
                .map_err(|e| AppError::config(format!("Invalid WAIT_TIMEOUT_SECONDS value '{}': {}", timeout, e)))?;
        }

        if let Ok(interval) = std::env::var("POLL_INTERVAL_MS") {
            self.poll_interval_ms = interval.trim().parse()
                .map_err(|e| AppError::config(format!("Invalid POLL_INTERVAL_MS value '{}': {}", interval, e)))?;
        }

        if let Ok(ttl) = std::env::var("SESSION_TTL_SECONDS") {
            self.session_ttl_seconds = ttl.trim().parse()
                .map_err(|e| AppError::config(format!("Invalid SESSION_TTL_SECONDS value '{}': {}", ttl, e)))?;
        }

        if let Ok(enable_color) = std::env::var("ENABLE_COLOR") {
            self.enable_color = enable_color.trim().parse()
                .map_err(|e| AppError::config(format!("Invalid ENABLE_COLOR value '{}': {}", enable_color, e)))?;
        }

        if let Ok(format) = std::env::var("LOG_FORMAT") {
            self.log_format = format.parse()?;
        }

        Ok(())
    }
}

// Default value functions for serde
fn default_bind_address() -> String {
    crate::defaults::DEFAULT_BIND_ADDRESS.to_string()
}

fn default_port() -> u16 {
    crate::defaults::DEFAULT_PORT
}

fn default_probe_count() -> u32 {
    crate::defaults::DEFAULT_PROBE_COUNT
}

fn default_download_size() -> u64 {
    crate::defaults::DEFAULT_DOWNLOAD_SIZE
}

fn default_max_download_size() -> u64 {
    crate::defaults::DEFAULT_MAX_DOWNLOAD_SIZE
}

fn default_max_upload_size() -> u64 {
    crate::defaults::DEFAULT_MAX_UPLOAD_SIZE
}

fn default_wait_timeout_secs() -> u64 {
    crate::defaults::DEFAULT_WAIT_TIMEOUT.as_secs()
}

fn default_poll_interval_ms() -> u64 {
    crate::defaults::DEFAULT_POLL_INTERVAL.as_millis() as u64
}

fn default_results_refresh_secs() -> u64 {
    crate::defaults::DEFAULT_RESULTS_REFRESH.as_secs()
}

fn default_session_ttl_secs() -> u64 {
    crate::defaults::DEFAULT_SESSION_TTL.as_secs()
}

fn default_enable_color() -> bool {
    crate::defaults::DEFAULT_ENABLE_COLOR
}

fn default_log_format() -> LogFormat {
    LogFormat::Console
}
