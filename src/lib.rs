//! noscript speedtest
//!
//! Measures latency, jitter, download and upload throughput between a browser
//! and this server over plain HTTP, without client-side scripting. A
//! session-scoped protocol correlates otherwise stateless requests (start,
//! probe chain, download, upload, results) into one test run.

pub mod cli;
pub mod client;
pub mod config;
pub mod error;
pub mod logging;
pub mod models;
pub mod output;
pub mod protocol;
pub mod resolver;
pub mod server;
pub mod session;
pub mod stats;

// Re-export commonly used types
pub use error::{AppError, Result};
pub use models::Config;
pub use protocol::{MeasurementProtocol, ProtocolStep};
pub use resolver::{ResultsResolver, Summary};
pub use session::{Phase, Session, SessionStore, TransferMeasurement};

/// Application version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const PKG_NAME: &str = env!("CARGO_PKG_NAME");
pub const PKG_DESCRIPTION: &str = env!("CARGO_PKG_DESCRIPTION");

/// Build information recorded by `build.rs`
pub const BUILD_TIME: &str = env!("BUILD_TIME");
pub const GIT_COMMIT: Option<&str> = option_env!("GIT_COMMIT");
pub const TARGET_TRIPLE: &str = env!("TARGET_TRIPLE");

/// Default configuration values
pub mod defaults {
    use std::time::Duration;

    pub const DEFAULT_BIND_ADDRESS: &str = "0.0.0.0";
    pub const DEFAULT_PORT: u16 = 8080;
    pub const DEFAULT_PROBE_COUNT: u32 = 8;
    pub const DEFAULT_DOWNLOAD_SIZE: u64 = 8 * 1024 * 1024;
    pub const DEFAULT_MAX_DOWNLOAD_SIZE: u64 = 1024 * 1024 * 1024;
    pub const DEFAULT_MAX_UPLOAD_SIZE: u64 = 256 * 1024 * 1024;
    pub const DEFAULT_WAIT_TIMEOUT: Duration = Duration::from_secs(30);
    pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(150);
    pub const DEFAULT_RESULTS_REFRESH: Duration = Duration::from_secs(1);
    pub const DEFAULT_SESSION_TTL: Duration = Duration::from_secs(3600);
    pub const DEFAULT_ENABLE_COLOR: bool = true;

    /// Download body frame size
    pub const DOWNLOAD_CHUNK_SIZE: usize = 64 * 1024;

    /// Upload payload of `nst run`
    pub const DEFAULT_UPLOAD_SIZE: u64 = 4 * 1024 * 1024;
    /// Per-request timeout of `nst run`
    pub const DEFAULT_CLIENT_TIMEOUT: Duration = Duration::from_secs(60);
}
