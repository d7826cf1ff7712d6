//! Throughput measurement primitives shared by the download and upload paths

use std::time::{Duration, Instant};

/// Elapsed-time floor applied before dividing, in seconds
pub const MIN_ELAPSED_SECS: f64 = 1e-9;

/// Bytes per second for `bytes` moved in `elapsed`
pub fn throughput(bytes: u64, elapsed: Duration) -> f64 {
    bytes as f64 / elapsed.as_secs_f64().max(MIN_ELAPSED_SECS)
}

/// One completed (or abandoned) transfer
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TransferMeasurement {
    /// Bytes actually moved
    pub bytes: u64,
    /// Time from first byte to last byte
    pub elapsed: Duration,
    /// Bytes per second
    pub rate: f64,
}

impl TransferMeasurement {
    pub fn new(bytes: u64, elapsed: Duration) -> Self {
        Self {
            bytes,
            elapsed,
            rate: throughput(bytes, elapsed),
        }
    }
}

/// Counts bytes and times a transfer from its first byte
#[derive(Debug, Default)]
pub struct TransferMeter {
    started: Option<Instant>,
    bytes: u64,
}

impl TransferMeter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start the clock; later calls keep the first start time
    pub fn start(&mut self) {
        if self.started.is_none() {
            self.started = Some(Instant::now());
        }
    }

    /// Account for `n` more bytes, starting the clock if needed
    pub fn record(&mut self, n: u64) {
        self.start();
        self.bytes += n;
    }

    pub fn bytes(&self) -> u64 {
        self.bytes
    }

    pub fn is_started(&self) -> bool {
        self.started.is_some()
    }

    /// Measurement over everything recorded so far
    pub fn finish(&self) -> TransferMeasurement {
        let elapsed = self.started.map(|s| s.elapsed()).unwrap_or_default();
        TransferMeasurement::new(self.bytes, elapsed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_throughput() {
        assert_eq!(throughput(1000, Duration::from_secs(2)), 500.0);
        assert_eq!(throughput(0, Duration::from_secs(1)), 0.0);
    }

    #[test]
    fn test_throughput_floors_elapsed() {
        let rate = throughput(1, Duration::ZERO);
        assert!(rate.is_finite());
        assert_eq!(rate, 1.0 / MIN_ELAPSED_SECS);
    }

    #[test]
    fn test_meter_counts_and_times() {
        let mut meter = TransferMeter::new();
        assert!(!meter.is_started());

        meter.record(512);
        meter.record(512);
        std::thread::sleep(Duration::from_millis(5));
        let measurement = meter.finish();

        assert_eq!(measurement.bytes, 1024);
        assert!(measurement.elapsed >= Duration::from_millis(5));
        assert!((measurement.rate - 1024.0 / measurement.elapsed.as_secs_f64()).abs() < 1e-6);
    }

    #[test]
    fn test_unstarted_meter_measures_nothing() {
        let measurement = TransferMeter::new().finish();
        assert_eq!(measurement.bytes, 0);
        assert_eq!(measurement.elapsed, Duration::ZERO);
        assert_eq!(measurement.rate, 0.0);
    }
}
