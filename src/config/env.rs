//! Environment variable handling and .env file management

use crate::error::{AppError, Result};
use std::path::Path;

/// Environment variable configuration manager
pub struct EnvManager;

impl EnvManager {
    /// Load .env file from the current directory if it exists
    pub fn load_env_file(debug: bool) -> Result<()> {
        Self::load_env_file_from(Path::new(".env"), debug)
    }

    /// Load a specific .env file if it exists
    pub fn load_env_file_from(path: &Path, debug: bool) -> Result<()> {
        if path.exists() {
            dotenv::from_path(path)
                .map_err(|e| AppError::config(format!("Failed to load {}: {}", path.display(), e)))?;

            if debug {
                println!("Loaded configuration from {}", path.display());
            }
        } else if debug {
            println!("No .env file found, using defaults and CLI arguments");
        }

        Ok(())
    }

    /// Validate environment variable format before parsing
    pub fn validate_env_var(key: &str, value: &str) -> Result<()> {
        let value = value.trim();
        match key {
            "BIND_ADDRESS" => {
                value.parse::<std::net::IpAddr>()
                    .map_err(|e| AppError::config(format!("Invalid BIND_ADDRESS value '{}': {}", value, e)))?;
            }
            "PORT" => {
                value.parse::<u16>()
                    .map_err(|e| AppError::config(format!("Invalid PORT value '{}': {}", value, e)))?;
            }
            "PROBE_COUNT" => {
                let count: u32 = value.parse()
                    .map_err(|e| AppError::config(format!("Invalid PROBE_COUNT value '{}': {}", value, e)))?;
                if count == 0 || count > 100 {
                    return Err(AppError::config(format!("PROBE_COUNT must be between 1 and 100, got: {}", count)));
                }
            }
            "DOWNLOAD_SIZE" | "MAX_DOWNLOAD_SIZE" | "MAX_UPLOAD_SIZE" => {
                let size: u64 = value.parse()
                    .map_err(|e| AppError::config(format!("Invalid {} value '{}': {}", key, value, e)))?;
                if size == 0 {
                    return Err(AppError::config(format!("{} must be greater than 0", key)));
                }
            }
            "WAIT_TIMEOUT_SECONDS" => {
                let timeout: u64 = value.parse()
                    .map_err(|e| AppError::config(format!("Invalid WAIT_TIMEOUT_SECONDS value '{}': {}", value, e)))?;
                if timeout == 0 || timeout > 300 {
                    return Err(AppError::config(format!("WAIT_TIMEOUT_SECONDS must be between 1 and 300, got: {}", timeout)));
                }
            }
            "POLL_INTERVAL_MS" => {
                let interval: u64 = value.parse()
                    .map_err(|e| AppError::config(format!("Invalid POLL_INTERVAL_MS value '{}': {}", value, e)))?;
                if interval == 0 || interval > 10_000 {
                    return Err(AppError::config(format!("POLL_INTERVAL_MS must be between 1 and 10000, got: {}", interval)));
                }
            }
            "SESSION_TTL_SECONDS" => {
                value.parse::<u64>()
                    .map_err(|e| AppError::config(format!("Invalid SESSION_TTL_SECONDS value '{}': {}", value, e)))?;
            }
            "ENABLE_COLOR" => {
                value.parse::<bool>()
                    .map_err(|e| AppError::config(format!("Invalid ENABLE_COLOR value '{}': {}", value, e)))?;
            }
            "LOG_FORMAT" => {
                value.parse::<crate::logging::LogFormat>()?;
            }
            _ => {
                // Unknown environment variable, ignore
            }
        }

        Ok(())
    }

    /// Get list of all supported environment variables with descriptions
    pub fn get_supported_env_vars() -> Vec<(&'static str, &'static str, &'static str)> {
        vec![
            ("BIND_ADDRESS", "Address the server binds to", "0.0.0.0"),
            ("PORT", "Port the server listens on", "8080"),
            ("PROBE_COUNT", "Latency probes per test (1-100)", "8"),
            ("DOWNLOAD_SIZE", "Default download payload in bytes", "8388608"),
            ("MAX_DOWNLOAD_SIZE", "Largest download a client may request", "1073741824"),
            ("MAX_UPLOAD_SIZE", "Largest accepted upload body", "268435456"),
            ("WAIT_TIMEOUT_SECONDS", "Results wait for the download (1-300)", "30"),
            ("POLL_INTERVAL_MS", "Results re-check interval (1-10000)", "150"),
            ("SESSION_TTL_SECONDS", "Evict sessions after this age (0 = never)", "3600"),
            ("ENABLE_COLOR", "Enable colored output", "true"),
            ("LOG_FORMAT", "Log format: console, json or compact", "console"),
        ]
    }

    /// Display environment variable help
    pub fn display_env_help() -> String {
        let mut help = String::new();
        help.push_str("Supported Environment Variables:\n\n");

        for (var, description, example) in Self::get_supported_env_vars() {
            help.push_str(&format!("  {:<22} {}\n", var, description));
            help.push_str(&format!("  {:<22} Example: {}\n\n", "", example));
        }

        help.push_str("Configuration Priority (highest to lowest):\n");
        help.push_str("  1. Command-line arguments\n");
        help.push_str("  2. Environment variables\n");
        help.push_str("  3. .env file values\n");
        help.push_str("  4. Default values\n");

        help
    }

    /// Validate all currently set environment variables
    pub fn validate_current_env() -> Vec<String> {
        let mut warnings = Vec::new();

        for (var_name, _, _) in Self::get_supported_env_vars() {
            if let Ok(value) = std::env::var(var_name) {
                if let Err(e) = Self::validate_env_var(var_name, &value) {
                    warnings.push(format!("Warning: {}", e));
                }
            }
        }

        warnings
    }
}
