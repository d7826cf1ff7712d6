//! Configuration parsing from CLI arguments and environment variables

use crate::{
    cli::Cli,
    models::Config,
    error::Result,
    config::env::EnvManager,
};

/// Configuration parser that combines CLI arguments with environment variables
pub struct ConfigParser {
    cli: Cli,
}

impl ConfigParser {
    /// Create a new configuration parser with CLI arguments
    pub fn new(cli: Cli) -> Self {
        Self { cli }
    }

    /// Parse and build the complete configuration
    pub fn parse(&self) -> Result<Config> {
        let mut config = Config::default();

        EnvManager::load_env_file(self.cli.debug)?;

        config.merge_from_env()?;

        self.apply_cli_overrides(&mut config)?;

        config.validate()?;

        Ok(config)
    }

    /// Apply CLI argument overrides to configuration
    fn apply_cli_overrides(&self, config: &mut Config) -> Result<()> {
        if self.cli.no_color {
            config.enable_color = false;
        }

        // Verbose and debug are CLI-only
        config.verbose = self.cli.verbose;
        config.debug = self.cli.debug;

        if let Some(ref format) = self.cli.log_format {
            config.log_format = format.parse()?;
        }

        if let Some(args) = self.cli.serve_args() {
            if let Some(bind) = args.bind {
                config.bind_address = bind;
            }
            if let Some(port) = args.port {
                config.port = port;
            }
            if let Some(count) = args.probe_count {
                config.probe_count = count;
            }
            if let Some(size) = args.download_size {
                config.download_size = size;
            }
            if let Some(timeout) = args.wait_timeout {
                config.wait_timeout_seconds = timeout;
            }
            if let Some(interval) = args.poll_interval_ms {
                config.poll_interval_ms = interval;
            }
            if let Some(ttl) = args.session_ttl {
                config.session_ttl_seconds = ttl;
            }
        }

        Ok(())
    }
}

/// Convenience function to load complete configuration from CLI arguments
pub fn load_config(cli: Cli) -> Result<Config> {
    ConfigParser::new(cli).parse()
}

/// Display configuration summary for debug purposes
pub fn display_config_summary(config: &Config) -> String {
    let mut summary = Vec::new();

    summary.push(format!("Listen: {}:{}", config.bind_address, config.port));
    summary.push(format!("Probe Count: {}", config.probe_count));
    summary.push(format!("Download Size: {} bytes (max {})", config.download_size, config.max_download_size));
    summary.push(format!("Max Upload Size: {} bytes", config.max_upload_size));
    summary.push(format!("Results Wait: {}s (poll {}ms)", config.wait_timeout_seconds, config.poll_interval_ms));
    if config.session_ttl_seconds == 0 {
        summary.push("Session TTL: disabled".to_string());
    } else {
        summary.push(format!("Session TTL: {}s", config.session_ttl_seconds));
    }
    summary.push(format!("Color Output: {}", config.enable_color));
    summary.push(format!("Verbose: {}", config.verbose));
    summary.push(format!("Debug: {}", config.debug));

    summary.join("\n")
}
