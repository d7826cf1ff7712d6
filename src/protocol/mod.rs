//! Measurement protocol
//!
//! One speed test is a chain of requests sharing a session id:
//!
//! 1. `start` creates the session and points the client at probe 1.
//! 2. `probe` n = 1..=probe_count; each arrival after the first appends the
//!    time since the previous one as a latency sample.
//! 3. `download` streams a filler payload and records its throughput.
//! 4. `upload` counts a client payload and records its throughput.
//!
//! The protocol is transport-agnostic; the `server` module maps it to HTTP.

pub mod download;
pub mod upload;

pub use download::DownloadStream;
pub use upload::{drain_into, DrainEnd};

use crate::error::{AppError, Result};
use crate::models::Config;
use crate::session::{generate_id, Session, SessionStore, TransferMeasurement, TransferMeter};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use url::form_urlencoded;

/// What the client should fetch after a probe
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NextStep {
    /// Fetch this probe number next
    Probe(u32),
    /// Probe chain finished; run the download
    Download,
}

/// Result of handling one probe
#[derive(Debug, Clone, PartialEq)]
pub struct ProbeOutcome {
    pub session_id: String,
    pub probe: u32,
    /// Latency sample appended by this probe, if any
    pub sample_ms: Option<f64>,
    pub next: NextStep,
}

/// Machine-readable instruction returned to scripted clients
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "step", rename_all = "snake_case")]
pub enum ProtocolStep {
    /// Fetch `url` as probe `probe`
    Probe { session_id: String, probe: u32, url: String },
    /// Fetch the payload at `url`, then read results at `results_url`
    Download { session_id: String, url: String, results_url: String },
}

impl ProtocolStep {
    pub fn session_id(&self) -> &str {
        match self {
            ProtocolStep::Probe { session_id, .. } | ProtocolStep::Download { session_id, .. } => session_id,
        }
    }
}

impl ProtocolStep {
    /// Step pointing at probe 1 of a fresh session
    pub fn first_probe(session_id: &str) -> Self {
        ProtocolStep::Probe {
            session_id: session_id.to_string(),
            probe: 1,
            url: probe_url(session_id, 1),
        }
    }

    /// Step that follows a handled probe; the download URL gets a fresh nonce
    pub fn after_probe(outcome: &ProbeOutcome, download_size: u64) -> Self {
        match outcome.next {
            NextStep::Probe(n) => ProtocolStep::Probe {
                session_id: outcome.session_id.clone(),
                probe: n,
                url: probe_url(&outcome.session_id, n),
            },
            NextStep::Download => ProtocolStep::Download {
                session_id: outcome.session_id.clone(),
                url: download_url(&outcome.session_id, download_size, &generate_id()),
                results_url: results_url(&outcome.session_id),
            },
        }
    }
}

fn path_with_query(path: &str, pairs: &[(&str, &str)]) -> String {
    let query = form_urlencoded::Serializer::new(String::new())
        .extend_pairs(pairs)
        .finish();
    format!("{}?{}", path, query)
}

/// `/probe` link for probe `n`
pub fn probe_url(session_id: &str, n: u32) -> String {
    path_with_query("/probe", &[("sid", session_id), ("n", &n.to_string())])
}

/// `/download` link; the nonce defeats intermediate caches
pub fn download_url(session_id: &str, size: u64, nonce: &str) -> String {
    path_with_query("/download", &[("sid", session_id), ("size", &size.to_string()), ("nonce", nonce)])
}

/// `/results` page link
pub fn results_url(session_id: &str) -> String {
    path_with_query("/results", &[("sid", session_id)])
}

/// `/api/results` JSON link
pub fn api_results_url(session_id: &str) -> String {
    path_with_query("/api/results", &[("sid", session_id)])
}

/// Require a non-empty session id
pub fn require_session_id(raw: Option<&str>) -> Result<&str> {
    match raw.map(str::trim) {
        Some(id) if !id.is_empty() => Ok(id),
        _ => Err(AppError::protocol("missing session id")),
    }
}

/// Parse the probe counter; it must be a positive integer
pub fn parse_probe_counter(raw: Option<&str>) -> Result<u32> {
    let raw = raw.map(str::trim).unwrap_or_default();
    match raw.parse::<u32>() {
        Ok(n) if n >= 1 => Ok(n),
        _ => Err(AppError::protocol(format!("invalid probe counter '{}'", raw))),
    }
}

/// Drives sessions through the measurement phases
#[derive(Debug, Clone)]
pub struct MeasurementProtocol {
    store: Arc<SessionStore>,
    probe_count: u32,
    download_size: u64,
    max_download_size: u64,
    chunk_size: usize,
}

impl MeasurementProtocol {
    pub fn new(store: Arc<SessionStore>, config: &Config) -> Self {
        Self {
            store,
            probe_count: config.probe_count.max(1),
            download_size: config.download_size,
            max_download_size: config.max_download_size,
            chunk_size: crate::defaults::DOWNLOAD_CHUNK_SIZE,
        }
    }

    pub fn store(&self) -> &Arc<SessionStore> {
        &self.store
    }

    pub fn probe_count(&self) -> u32 {
        self.probe_count
    }

    pub fn default_download_size(&self) -> u64 {
        self.download_size
    }

    /// Start step: new session stamped with the client address and an
    /// initial probe time
    pub fn start(&self, client_host: &str) -> Arc<Session> {
        let session = self.store.create();
        session.begin(client_host, Instant::now());
        session
    }

    /// Probe step `n` for `session_id`; unknown ids get a fresh session
    pub fn probe(&self, session_id: &str, n: u32) -> Result<ProbeOutcome> {
        let session_id = require_session_id(Some(session_id))?;
        if n == 0 {
            return Err(AppError::protocol("probe counter starts at 1"));
        }

        let session = self.store.get_or_create(session_id);
        let sample_ms = session.record_probe(n, Instant::now());

        let next = if n < self.probe_count {
            NextStep::Probe(n + 1)
        } else {
            session.mark_probes_done();
            NextStep::Download
        };

        Ok(ProbeOutcome {
            session_id: session_id.to_string(),
            probe: n,
            sample_ms,
            next,
        })
    }

    /// Payload size for a raw `size` parameter: the default when missing,
    /// unparsable or non-positive, clamped to the configured maximum
    pub fn download_size(&self, raw: Option<&str>) -> u64 {
        match raw.map(str::trim).and_then(|s| s.parse::<i64>().ok()) {
            Some(size) if size > 0 => (size as u64).min(self.max_download_size),
            _ => self.download_size,
        }
    }

    /// Download step. The returned stream records its throughput into the
    /// session (when one is named) as soon as it ends or is dropped, then
    /// hands the measurement to `report`. Transfers that moved no bytes are
    /// reported but not recorded.
    pub fn download<F>(&self, session_id: Option<&str>, size: u64, report: F) -> DownloadStream
    where
        F: FnOnce(TransferMeasurement) + Send + 'static,
    {
        let session = session_id
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .map(|id| self.store.get_or_create(id));

        DownloadStream::new(size, self.chunk_size, move |measurement| {
            if measurement.bytes > 0 {
                if let Some(session) = &session {
                    session.commit_download(measurement);
                }
            }
            report(measurement);
        })
    }

    /// Upload step: record what `meter` counted against `session_id`
    pub fn record_upload(&self, session_id: &str, meter: &TransferMeter) -> Result<TransferMeasurement> {
        let session_id = require_session_id(Some(session_id))?;
        let measurement = meter.finish();
        self.store.get_or_create(session_id).commit_upload(measurement);
        Ok(measurement)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::Phase;
    use futures::StreamExt;
    use proptest::prelude::*;
    use std::sync::Mutex;
    use std::time::Duration;

    fn protocol_with(probe_count: u32) -> MeasurementProtocol {
        let config = Config {
            probe_count,
            download_size: 4096,
            max_download_size: 1 << 20,
            ..Default::default()
        };
        MeasurementProtocol::new(Arc::new(SessionStore::new()), &config)
    }

    #[test]
    fn test_start_creates_probing_session() {
        let protocol = protocol_with(8);
        let session = protocol.start("192.0.2.7");

        let snapshot = session.snapshot();
        assert_eq!(snapshot.phase, Phase::Probing);
        assert_eq!(snapshot.client_host, "192.0.2.7");
        assert!(snapshot.latency_samples.is_empty());
        assert!(protocol.store().get(session.id()).is_some());
    }

    #[test]
    fn test_probe_chain_sequencing() {
        let protocol = protocol_with(3);
        let session = protocol.start("h");
        let sid = session.id().to_string();

        assert_eq!(protocol.probe(&sid, 1).unwrap().next, NextStep::Probe(2));
        assert_eq!(protocol.probe(&sid, 2).unwrap().next, NextStep::Probe(3));
        let last = protocol.probe(&sid, 3).unwrap();
        assert_eq!(last.next, NextStep::Download);
        assert!(last.sample_ms.is_some());

        let snapshot = session.snapshot();
        assert_eq!(snapshot.phase, Phase::ProbesDone);
        assert_eq!(snapshot.latency_samples.len(), 2);
    }

    #[test]
    fn test_probe_rejects_missing_context() {
        let protocol = protocol_with(8);
        assert!(matches!(protocol.probe("", 1), Err(AppError::Protocol(_))));
        assert!(matches!(protocol.probe("abc", 0), Err(AppError::Protocol(_))));
    }

    #[test]
    fn test_probe_unknown_session_is_created() {
        let protocol = protocol_with(8);
        let outcome = protocol.probe("never-started", 4).unwrap();
        assert_eq!(outcome.sample_ms, None);
        assert!(protocol.store().get("never-started").is_some());
    }

    #[test]
    fn test_parse_probe_counter() {
        assert_eq!(parse_probe_counter(Some("3")).unwrap(), 3);
        assert_eq!(parse_probe_counter(Some(" 8 ")).unwrap(), 8);
        assert!(parse_probe_counter(Some("0")).is_err());
        assert!(parse_probe_counter(Some("-1")).is_err());
        assert!(parse_probe_counter(Some("x")).is_err());
        assert!(parse_probe_counter(None).is_err());
    }

    #[test]
    fn test_require_session_id() {
        assert_eq!(require_session_id(Some("abc")).unwrap(), "abc");
        assert!(require_session_id(Some("  ")).is_err());
        assert!(require_session_id(None).is_err());
    }

    #[test]
    fn test_download_size_defaults_and_clamps() {
        let protocol = protocol_with(8);
        assert_eq!(protocol.download_size(None), 4096);
        assert_eq!(protocol.download_size(Some("")), 4096);
        assert_eq!(protocol.download_size(Some("abc")), 4096);
        assert_eq!(protocol.download_size(Some("0")), 4096);
        assert_eq!(protocol.download_size(Some("-5")), 4096);
        assert_eq!(protocol.download_size(Some("1000")), 1000);
        assert_eq!(protocol.download_size(Some("99999999999")), 1 << 20);
    }

    #[tokio::test]
    async fn test_uninterrupted_download_records_rate() {
        let protocol = protocol_with(8);
        let session = protocol.start("h");
        let reported = Arc::new(Mutex::new(None));
        let sink = reported.clone();

        let size = 200_000;
        let stream = protocol.download(Some(session.id()), size, move |m| {
            *sink.lock().unwrap() = Some(m);
        });
        let total: usize = stream.map(|c| c.unwrap().len()).fold(0, |acc, n| async move { acc + n }).await;
        assert_eq!(total as u64, size);

        let recorded = session.snapshot().download.unwrap();
        assert_eq!(recorded.bytes, size);
        assert!(recorded.rate > 0.0);
        let expected = size as f64 / recorded.elapsed.as_secs_f64().max(crate::session::MIN_ELAPSED_SECS);
        assert!((recorded.rate - expected).abs() <= expected * 1e-9);
        assert_eq!(*reported.lock().unwrap(), Some(recorded));
        assert_eq!(session.snapshot().phase, Phase::DownloadDone);
    }

    #[tokio::test]
    async fn test_interrupted_download_records_partial_rate() {
        let protocol = protocol_with(8);
        let session = protocol.start("h");
        let chunk = crate::defaults::DOWNLOAD_CHUNK_SIZE as u64;

        let mut stream = protocol.download(Some(session.id()), chunk * 10, |_| {});
        stream.next().await.unwrap().unwrap();
        stream.next().await.unwrap().unwrap();
        tokio::time::sleep(Duration::from_millis(2)).await;
        drop(stream);

        let recorded = session.snapshot().download.unwrap();
        assert_eq!(recorded.bytes, chunk * 2);
        let expected = (chunk * 2) as f64 / recorded.elapsed.as_secs_f64();
        assert!((recorded.rate - expected).abs() <= expected * 1e-9);
    }

    #[tokio::test]
    async fn test_abandoned_download_records_nothing() {
        let protocol = protocol_with(8);
        let session = protocol.start("h");
        let reported = Arc::new(Mutex::new(None));
        let sink = reported.clone();

        drop(protocol.download(Some(session.id()), 1024, move |m| {
            *sink.lock().unwrap() = Some(m.bytes);
        }));

        assert_eq!(*reported.lock().unwrap(), Some(0));
        assert!(session.snapshot().download.is_none());
    }

    #[tokio::test]
    async fn test_download_without_session_is_served() {
        let protocol = protocol_with(8);
        let chunks: Vec<_> = protocol.download(None, 10, |_| {}).collect().await;
        assert_eq!(chunks.len(), 1);
        assert!(protocol.store().is_empty());
    }

    #[test]
    fn test_record_upload() {
        let protocol = protocol_with(8);
        let session = protocol.start("h");
        let mut meter = TransferMeter::new();
        meter.record(5000);

        let measurement = protocol.record_upload(session.id(), &meter).unwrap();
        assert_eq!(measurement.bytes, 5000);
        assert_eq!(session.snapshot().upload, Some(measurement));
        assert!(protocol.record_upload("", &meter).is_err());
    }

    #[test]
    fn test_protocol_step_json_shape() {
        let step = ProtocolStep::Probe { session_id: "s1".into(), probe: 2, url: "/probe?sid=s1&n=2".into() };
        let json = serde_json::to_value(&step).unwrap();
        assert_eq!(json["step"], "probe");
        assert_eq!(json["probe"], 2);
        assert_eq!(step.session_id(), "s1");
    }

    #[test]
    fn test_links_are_encoded() {
        assert_eq!(probe_url("a-b", 3), "/probe?sid=a-b&n=3");
        assert_eq!(results_url("x y&z"), "/results?sid=x+y%26z");
        assert_eq!(api_results_url("s"), "/api/results?sid=s");
        assert_eq!(download_url("s", 1024, "n1"), "/download?sid=s&size=1024&nonce=n1");
    }

    #[test]
    fn test_steps_follow_probe_outcomes() {
        let protocol = protocol_with(2);
        let session = protocol.start("h");
        let sid = session.id().to_string();
        assert_eq!(
            ProtocolStep::first_probe(&sid),
            ProtocolStep::Probe { session_id: sid.clone(), probe: 1, url: probe_url(&sid, 1) }
        );

        let first = protocol.probe(&sid, 1).unwrap();
        assert!(matches!(ProtocolStep::after_probe(&first, 4096), ProtocolStep::Probe { probe: 2, .. }));

        let last = protocol.probe(&sid, 2).unwrap();
        match ProtocolStep::after_probe(&last, 4096) {
            ProtocolStep::Download { url, results_url: results, .. } => {
                assert!(url.starts_with(&format!("/download?sid={}&size=4096&nonce=", sid)));
                assert_eq!(results, results_url(&sid));
            }
            other => panic!("unexpected step {:?}", other),
        }
    }

    proptest! {
        #[test]
        fn prop_n_probes_yield_n_minus_one_samples(count in 1u32..20) {
            let protocol = protocol_with(count);
            let session = protocol.start("h");
            for n in 1..=count {
                protocol.probe(session.id(), n).unwrap();
            }
            let samples = session.snapshot().latency_samples;
            prop_assert_eq!(samples.len(), (count - 1) as usize);
            prop_assert!(samples.iter().all(|s| *s >= 0.0));
        }
    }
}
