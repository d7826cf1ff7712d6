//! Output formatting for speed test results
//!
//! Rates are kept in bytes per second internally and shown in MiB/s. Both a
//! plain and a colored console formatter are provided for the headless
//! client; the HTML pages reuse the plain value formatting.

use crate::resolver::Summary;
use crate::stats::mean;
use colored::*;
use std::fmt::Write as _;
use std::time::Duration;

/// Bytes in one mebibyte
pub const BYTES_PER_MIB: f64 = 1_048_576.0;

/// Format a transfer rate (bytes/s) as MiB/s, or "pending" when unmeasured
pub fn format_rate(rate: Option<f64>) -> String {
    match rate {
        Some(rate) => format!("{:.2} MiB/s", rate / BYTES_PER_MIB),
        None => "pending".to_string(),
    }
}

/// Format a millisecond value
pub fn format_ms(ms: f64) -> String {
    format!("{:.2} ms", ms)
}

/// Format a byte count with a binary unit
pub fn format_bytes(bytes: u64) -> String {
    let value = bytes as f64;
    if value >= BYTES_PER_MIB {
        format!("{:.2} MiB", value / BYTES_PER_MIB)
    } else if value >= 1024.0 {
        format!("{:.2} KiB", value / 1024.0)
    } else {
        format!("{} B", bytes)
    }
}

/// Latency classification for color coding
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LatencyLevel {
    Excellent,  // < 50ms
    Good,       // 50-100ms
    Fair,       // 100-300ms
    Poor,       // >= 300ms
}

impl LatencyLevel {
    pub fn from_ms(ms: f64) -> Self {
        if ms < 50.0 {
            Self::Excellent
        } else if ms < 100.0 {
            Self::Good
        } else if ms < 300.0 {
            Self::Fair
        } else {
            Self::Poor
        }
    }

    pub fn color(&self) -> Color {
        match self {
            Self::Excellent => Color::Green,
            Self::Good => Color::Cyan,
            Self::Fair => Color::Yellow,
            Self::Poor => Color::Red,
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            Self::Excellent => "Excellent",
            Self::Good => "Good",
            Self::Fair => "Fair",
            Self::Poor => "Poor",
        }
    }
}

/// What the headless client observed during one run
#[derive(Debug, Clone)]
pub struct ClientReport {
    /// Base URL of the server under test
    pub server: String,
    /// Server-side summary
    pub summary: Summary,
    /// Payload bytes the client received
    pub downloaded_bytes: u64,
    /// Payload bytes the client sent
    pub uploaded_bytes: u64,
    /// Download rate seen by the client, bytes/s
    pub client_download_rate: f64,
    /// Upload rate seen by the client, bytes/s
    pub client_upload_rate: f64,
    /// Round trip of each probe request, ms
    pub probe_round_trips_ms: Vec<f64>,
    /// Wall time of the whole run
    pub elapsed: Duration,
}

/// Renders a [`ClientReport`] for the console
pub trait OutputFormatter {
    fn format_report(&self, report: &ClientReport) -> String;
}

/// Formatter factory
pub fn create_formatter(enable_color: bool) -> Box<dyn OutputFormatter> {
    if enable_color {
        Box::new(ColoredFormatter)
    } else {
        Box::new(PlainFormatter)
    }
}

/// Plain text output for scripts and logs
pub struct PlainFormatter;

impl OutputFormatter for PlainFormatter {
    fn format_report(&self, report: &ClientReport) -> String {
        let s = &report.summary;
        let mut out = String::new();
        let _ = writeln!(out, "Speed test against {}", report.server);
        let _ = writeln!(out, "Session:   {}", s.session_id);
        let _ = writeln!(out, "Client:    {}", s.client_host);
        let _ = writeln!(out, "Latency:   {} ({} samples)", format_ms(s.avg_latency_ms), s.sample_count);
        let _ = writeln!(out, "Jitter:    {}", format_ms(s.jitter_ms));
        let _ = writeln!(out, "Range:     {} - {}", format_ms(s.min_latency_ms), format_ms(s.max_latency_ms));
        let _ = writeln!(out, "Download:  {} ({})", format_rate(s.download_rate), format_bytes(report.downloaded_bytes));
        let _ = writeln!(out, "Upload:    {} ({})", format_rate(s.upload_rate), format_bytes(report.uploaded_bytes));
        let _ = writeln!(
            out,
            "Observed:  down {}, up {}, probe rtt {}",
            format_rate(Some(report.client_download_rate)),
            format_rate(Some(report.client_upload_rate)),
            format_ms(mean(&report.probe_round_trips_ms))
        );
        let _ = writeln!(out, "Phase:     {}", s.phase.as_str());
        if s.timed_out {
            let _ = writeln!(out, "Note:      download rate not recorded before the results deadline");
        }
        let _ = write!(out, "Elapsed:   {:.2}s", report.elapsed.as_secs_f64());
        out
    }
}

/// Colored console output
pub struct ColoredFormatter;

impl OutputFormatter for ColoredFormatter {
    fn format_report(&self, report: &ClientReport) -> String {
        let s = &report.summary;
        let level = LatencyLevel::from_ms(s.avg_latency_ms);
        let rate = |r: Option<f64>| match r {
            Some(_) => format_rate(r).bright_white().bold(),
            None => format_rate(r).bright_black(),
        };

        let mut out = String::new();
        let _ = writeln!(out, "{} {}", "Speed test against".blue().bold(), report.server.cyan());
        let _ = writeln!(out, "{}   {}", "Session:".bright_black(), s.session_id);
        let _ = writeln!(out, "{}    {}", "Client:".bright_black(), s.client_host);
        let _ = writeln!(
            out,
            "{}   {} {} ({} samples)",
            "Latency:".bright_black(),
            format_ms(s.avg_latency_ms).color(level.color()).bold(),
            format!("[{}]", level.description()).color(level.color()),
            s.sample_count
        );
        let _ = writeln!(out, "{}    {}", "Jitter:".bright_black(), format_ms(s.jitter_ms));
        let _ = writeln!(
            out,
            "{}     {} - {}",
            "Range:".bright_black(),
            format_ms(s.min_latency_ms),
            format_ms(s.max_latency_ms)
        );
        let _ = writeln!(out, "{}  {} ({})", "Download:".bright_black(), rate(s.download_rate), format_bytes(report.downloaded_bytes));
        let _ = writeln!(out, "{}    {} ({})", "Upload:".bright_black(), rate(s.upload_rate), format_bytes(report.uploaded_bytes));
        let _ = writeln!(
            out,
            "{}  down {}, up {}, probe rtt {}",
            "Observed:".bright_black(),
            format_rate(Some(report.client_download_rate)),
            format_rate(Some(report.client_upload_rate)),
            format_ms(mean(&report.probe_round_trips_ms))
        );
        let _ = writeln!(out, "{}     {}", "Phase:".bright_black(), s.phase.as_str());
        if s.timed_out {
            let _ = writeln!(out, "{}", "Download rate not recorded before the results deadline".yellow());
        }
        let _ = write!(out, "{}   {:.2}s", "Elapsed:".bright_black(), report.elapsed.as_secs_f64());
        out
    }
}
