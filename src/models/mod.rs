//! Data models for the speed test

pub mod config;

// Re-export main model types
pub use config::Config;
