//! Results resolution
//!
//! The results page may be requested while the download is still streaming.
//! [`ResultsResolver::resolve`] waits, up to a deadline, for the download
//! measurement before summarizing the session.

use crate::session::{Phase, SessionSnapshot, SessionStore};
use crate::stats::LatencyStatistics;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Summary of one speed test session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Summary {
    pub session_id: String,
    pub client_host: String,
    /// Mean probe latency in milliseconds
    pub avg_latency_ms: f64,
    /// Population standard deviation of the latency samples
    pub jitter_ms: f64,
    pub min_latency_ms: f64,
    pub max_latency_ms: f64,
    pub sample_count: usize,
    /// Bytes per second; `None` until measured
    pub download_rate: Option<f64>,
    /// Bytes per second; `None` until measured
    pub upload_rate: Option<f64>,
    pub phase: Phase,
    /// The wait deadline passed before a download rate was recorded
    pub timed_out: bool,
    pub generated_at: DateTime<Utc>,
}

impl Summary {
    /// Build a summary from a session snapshot
    pub fn from_snapshot(snapshot: &SessionSnapshot, timed_out: bool) -> Self {
        let stats = LatencyStatistics::from_samples(&snapshot.latency_samples);
        Self {
            session_id: snapshot.id.clone(),
            client_host: snapshot.client_host.clone(),
            avg_latency_ms: stats.avg_ms,
            jitter_ms: stats.jitter_ms,
            min_latency_ms: stats.min_ms,
            max_latency_ms: stats.max_ms,
            sample_count: stats.sample_count,
            download_rate: snapshot.download.map(|m| m.rate),
            upload_rate: snapshot.upload.map(|m| m.rate),
            phase: snapshot.phase,
            timed_out,
            generated_at: Utc::now(),
        }
    }

    /// Both transfer rates are known
    pub fn is_complete(&self) -> bool {
        self.download_rate.is_some() && self.upload_rate.is_some()
    }
}

/// Waits for a session's download measurement and summarizes it
#[derive(Debug, Clone)]
pub struct ResultsResolver {
    store: Arc<SessionStore>,
}

impl ResultsResolver {
    pub fn new(store: Arc<SessionStore>) -> Self {
        Self { store }
    }

    /// Summarize `session_id`, creating the session if it is unknown.
    ///
    /// Returns as soon as a download rate is recorded, or once `wait_timeout`
    /// has passed, whichever comes first. Commits wake the wait directly;
    /// `poll_interval` bounds how long any single wait lasts.
    pub async fn resolve(&self, session_id: &str, wait_timeout: Duration, poll_interval: Duration) -> Summary {
        let session = self.store.get_or_create(session_id);
        let deadline = Instant::now() + wait_timeout;
        let poll_interval = poll_interval.max(Duration::from_millis(1));

        loop {
            let notified = session.download_notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let snapshot = session.snapshot();
            if snapshot.download.is_some() {
                return Summary::from_snapshot(&snapshot, false);
            }

            let now = Instant::now();
            if now >= deadline {
                return Summary::from_snapshot(&snapshot, true);
            }

            let wait = poll_interval.min(deadline - now);
            let _ = tokio::time::timeout(wait, notified).await;
        }
    }

    /// Summarize `session_id` without waiting; `None` for unknown sessions
    pub fn peek(&self, session_id: &str) -> Option<Summary> {
        self.store.get(session_id).map(|session| {
            let snapshot = session.snapshot();
            let timed_out = snapshot.download.is_none();
            Summary::from_snapshot(&snapshot, timed_out)
        })
    }
}
