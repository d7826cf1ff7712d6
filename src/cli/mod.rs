//! Command-line interface

use clap::{Args, Parser, Subcommand};

/// No-script speed test - latency, jitter and throughput over plain HTTP
#[derive(Parser, Debug, Clone)]
#[command(name = "nst")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose output
    #[arg(long, global = true)]
    pub verbose: bool,

    /// Enable debug output
    #[arg(long, global = true)]
    pub debug: bool,

    /// Disable colored output
    #[arg(long, global = true)]
    pub no_color: bool,

    /// Log line format (console, json, compact)
    #[arg(long, global = true, value_name = "FORMAT")]
    pub log_format: Option<String>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

/// Available subcommands
#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Run the speed test server (default)
    Serve(ServeArgs),
    /// Run a headless speed test against a server
    Run(RunArgs),
}

/// Server options; unset options fall back to the environment and defaults
#[derive(Args, Debug, Clone, Default)]
pub struct ServeArgs {
    /// Address to bind
    #[arg(short, long)]
    pub bind: Option<String>,

    /// Port to listen on
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Number of latency probes per test
    #[arg(long)]
    pub probe_count: Option<u32>,

    /// Default download payload in bytes
    #[arg(long)]
    pub download_size: Option<u64>,

    /// Seconds the results page waits for the download measurement
    #[arg(long)]
    pub wait_timeout: Option<u64>,

    /// Results re-check interval in milliseconds
    #[arg(long)]
    pub poll_interval_ms: Option<u64>,

    /// Evict sessions older than this many seconds (0 disables eviction)
    #[arg(long)]
    pub session_ttl: Option<u64>,
}

/// Headless client options
#[derive(Args, Debug, Clone)]
pub struct RunArgs {
    /// Base URL of the speed test server
    #[arg(short, long, env = "SPEEDTEST_SERVER")]
    pub server: String,

    /// Download payload to request in bytes (server default when omitted)
    #[arg(long)]
    pub download_size: Option<u64>,

    /// Upload payload in bytes
    #[arg(long, default_value_t = crate::defaults::DEFAULT_UPLOAD_SIZE)]
    pub upload_size: u64,

    /// Per-request timeout in seconds
    #[arg(short, long, default_value_t = crate::defaults::DEFAULT_CLIENT_TIMEOUT.as_secs())]
    pub timeout: u64,
}

impl Cli {
    /// Server arguments, treating a missing subcommand as `serve`
    pub fn serve_args(&self) -> Option<ServeArgs> {
        match &self.command {
            None => Some(ServeArgs::default()),
            Some(Command::Serve(args)) => Some(args.clone()),
            Some(Command::Run(_)) => None,
        }
    }

    /// Check if colors should be enabled
    pub fn use_colors(&self) -> bool {
        !self.no_color && supports_color()
    }
}

/// Check if the terminal supports color output
pub fn supports_color() -> bool {
    if std::env::var("NO_COLOR").is_ok() {
        return false;
    }

    !matches!(std::env::var("TERM").as_deref(), Ok("dumb"))
}
