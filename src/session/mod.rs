//! Session store
//!
//! A [`SessionStore`] maps opaque session ids to [`Session`] records. Every
//! request of one speed test run carries the same id, which is how otherwise
//! stateless HTTP requests are correlated.
//!
//! Locking discipline: the store lock is held only to look up, insert or
//! evict entries. Each session has its own lock, held for single field reads
//! and writes and never across an `.await` or a transfer.

pub mod transfer;

pub use transfer::{throughput, TransferMeasurement, TransferMeter, MIN_ELAPSED_SECS};

use serde::{Deserialize, Serialize};
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tokio::sync::futures::Notified;
use tokio::sync::Notify;
use uuid::Uuid;

/// Progress of a speed test run; only ever moves forward
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// Created by lookup, nothing recorded yet
    #[default]
    Pending,
    /// Started; probes in flight
    Probing,
    /// Probe chain finished
    ProbesDone,
    /// Download rate recorded
    DownloadDone,
    /// Download and upload rates recorded
    Complete,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Pending => "pending",
            Phase::Probing => "probing",
            Phase::ProbesDone => "probes_done",
            Phase::DownloadDone => "download_done",
            Phase::Complete => "complete",
        }
    }
}

#[derive(Debug, Default)]
struct SessionRecord {
    phase: Phase,
    last_probe_at: Option<Instant>,
    latency_samples: Vec<f64>,
    download: Option<TransferMeasurement>,
    upload: Option<TransferMeasurement>,
    client_host: String,
}

impl SessionRecord {
    fn advance(&mut self, to: Phase) {
        if to > self.phase {
            self.phase = to;
        }
    }
}

/// Point-in-time copy of a session record
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSnapshot {
    pub id: String,
    pub phase: Phase,
    pub client_host: String,
    pub latency_samples: Vec<f64>,
    pub download: Option<TransferMeasurement>,
    pub upload: Option<TransferMeasurement>,
}

/// One speed test run
#[derive(Debug)]
pub struct Session {
    id: String,
    created_at: Instant,
    record: Mutex<SessionRecord>,
    download_ready: Notify,
}

impl Session {
    fn new(id: String) -> Self {
        Self {
            id,
            created_at: Instant::now(),
            record: Mutex::new(SessionRecord::default()),
            download_ready: Notify::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Time since the session was created
    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }

    fn lock(&self) -> MutexGuard<'_, SessionRecord> {
        self.record.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record the start step: client address and the initial probe timestamp
    pub fn begin(&self, client_host: &str, now: Instant) {
        let mut record = self.lock();
        record.client_host = client_host.to_string();
        record.last_probe_at = Some(now);
        record.advance(Phase::Probing);
    }

    /// Record probe `n` arriving at `now`; returns the latency sample, if any.
    ///
    /// Probe 1 only sets the baseline. Later probes append the time since
    /// the previous probe when one is known.
    pub fn record_probe(&self, n: u32, now: Instant) -> Option<f64> {
        let mut record = self.lock();
        let sample = if n > 1 {
            record
                .last_probe_at
                .map(|previous| now.saturating_duration_since(previous).as_secs_f64() * 1000.0)
        } else {
            None
        };
        if let Some(sample) = sample {
            record.latency_samples.push(sample);
        }
        record.last_probe_at = Some(now);
        record.advance(Phase::Probing);
        sample
    }

    pub fn mark_probes_done(&self) {
        self.lock().advance(Phase::ProbesDone);
    }

    /// Store a download measurement (last writer wins) and wake waiting readers
    pub fn commit_download(&self, measurement: TransferMeasurement) {
        {
            let mut record = self.lock();
            record.download = Some(measurement);
            let phase = if record.upload.is_some() { Phase::Complete } else { Phase::DownloadDone };
            record.advance(phase);
        }
        self.download_ready.notify_waiters();
    }

    /// Store an upload measurement (last writer wins)
    pub fn commit_upload(&self, measurement: TransferMeasurement) {
        let mut record = self.lock();
        record.upload = Some(measurement);
        if record.download.is_some() {
            record.advance(Phase::Complete);
        }
    }

    /// Future resolving at the next download commit.
    ///
    /// Call `enable()` on the pinned future before reading the snapshot so a
    /// commit landing in between is not missed.
    pub fn download_notified(&self) -> Notified<'_> {
        self.download_ready.notified()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let record = self.lock();
        SessionSnapshot {
            id: self.id.clone(),
            phase: record.phase,
            client_host: record.client_host.clone(),
            latency_samples: record.latency_samples.clone(),
            download: record.download,
            upload: record.upload,
        }
    }
}

/// Process-wide registry of sessions, shared through `Arc`
#[derive(Debug, Default)]
pub struct SessionStore {
    sessions: Mutex<HashMap<String, Arc<Session>>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Arc<Session>>> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Return the session for `id`, creating an empty one if it is unknown
    pub fn get_or_create(&self, id: &str) -> Arc<Session> {
        self.lock()
            .entry(id.to_string())
            .or_insert_with(|| Arc::new(Session::new(id.to_string())))
            .clone()
    }

    /// Register a session under a freshly generated id
    pub fn create(&self) -> Arc<Session> {
        let mut sessions = self.lock();
        loop {
            if let Entry::Vacant(slot) = sessions.entry(generate_id()) {
                let session = Arc::new(Session::new(slot.key().clone()));
                slot.insert(session.clone());
                return session;
            }
        }
    }

    pub fn get(&self, id: &str) -> Option<Arc<Session>> {
        self.lock().get(id).cloned()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Drop sessions created more than `max_age` ago; returns how many went.
    /// Handles already held by requests stay usable.
    pub fn evict_older_than(&self, max_age: Duration) -> usize {
        let mut sessions = self.lock();
        let before = sessions.len();
        sessions.retain(|_, session| session.age() <= max_age);
        before - sessions.len()
    }
}

static ID_SEQUENCE: AtomicU64 = AtomicU64::new(0);

/// New session id: clock reading, process counter and a random suffix, base36
pub fn generate_id() -> String {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or_default();
    let sequence = ID_SEQUENCE.fetch_add(1, Ordering::Relaxed);
    let random = (Uuid::new_v4().as_u128() & 0xff_ffff) as u64;
    format!("{}-{}-{}", to_base36(nanos), to_base36(sequence), to_base36(random))
}

fn to_base36(mut value: u64) -> String {
    const DIGITS: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    if value == 0 {
        return "0".to_string();
    }
    let mut buf = Vec::with_capacity(13);
    while value > 0 {
        buf.push(DIGITS[(value % 36) as usize]);
        value /= 36;
    }
    buf.reverse();
    String::from_utf8_lossy(&buf).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::thread;

    #[test]
    fn test_to_base36() {
        assert_eq!(to_base36(0), "0");
        assert_eq!(to_base36(35), "z");
        assert_eq!(to_base36(36), "10");
        assert_eq!(to_base36(u64::MAX), "3w5e11264sgsf");
    }

    #[test]
    fn test_generated_ids_are_unique_and_url_safe() {
        let ids: HashSet<String> = (0..10_000).map(|_| generate_id()).collect();
        assert_eq!(ids.len(), 10_000);
        assert!(ids.iter().all(|id| id.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')));
    }

    #[test]
    fn test_get_or_create_returns_shared_record() {
        let store = SessionStore::new();
        let a = store.get_or_create("abc");
        let b = store.get_or_create("abc");
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(store.len(), 1);
        assert_eq!(a.snapshot().phase, Phase::Pending);
    }

    #[test]
    fn test_concurrent_get_or_create_same_id() {
        let store = Arc::new(SessionStore::new());
        let handles: Vec<_> = (0..16)
            .map(|_| {
                let store = store.clone();
                thread::spawn(move || store.get_or_create("shared"))
            })
            .collect();
        let sessions: Vec<Arc<Session>> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        assert_eq!(store.len(), 1);
        assert!(sessions.windows(2).all(|pair| Arc::ptr_eq(&pair[0], &pair[1])));
    }

    #[test]
    fn test_concurrent_sessions_are_independent() {
        let store = Arc::new(SessionStore::new());
        let handles: Vec<_> = (0..8u32)
            .map(|i| {
                let store = store.clone();
                thread::spawn(move || {
                    let session = store.create();
                    session.begin(&format!("10.0.0.{}", i), Instant::now());
                    for n in 1..=(i + 2) {
                        session.record_probe(n, Instant::now());
                    }
                    session.commit_upload(TransferMeasurement::new(u64::from(i) + 1, Duration::from_secs(1)));
                    (session.id().to_string(), i)
                })
            })
            .collect();
        let created: Vec<(String, u32)> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        let ids: HashSet<&String> = created.iter().map(|(id, _)| id).collect();
        assert_eq!(ids.len(), 8);

        for (id, i) in &created {
            let snapshot = store.get(id).unwrap().snapshot();
            assert_eq!(snapshot.client_host, format!("10.0.0.{}", i));
            assert_eq!(snapshot.latency_samples.len(), (*i + 1) as usize);
            assert_eq!(snapshot.upload.unwrap().bytes, u64::from(*i) + 1);
            assert!(snapshot.download.is_none());
        }
    }

    #[test]
    fn test_first_probe_sets_baseline_only() {
        let session = Session::new("s".to_string());
        let t0 = Instant::now();
        session.begin("host", t0);

        assert_eq!(session.record_probe(1, t0 + Duration::from_millis(5)), None);
        let sample = session.record_probe(2, t0 + Duration::from_millis(25)).unwrap();
        assert!((sample - 20.0).abs() < 1e-9);
        assert_eq!(session.snapshot().latency_samples, vec![sample]);
    }

    #[test]
    fn test_probe_without_baseline_records_nothing() {
        let session = Session::new("s".to_string());
        assert_eq!(session.record_probe(3, Instant::now()), None);
        assert!(session.snapshot().latency_samples.is_empty());
    }

    #[test]
    fn test_phase_only_moves_forward() {
        let session = Session::new("s".to_string());
        session.begin("host", Instant::now());
        session.mark_probes_done();
        session.commit_download(TransferMeasurement::new(10, Duration::from_millis(1)));
        assert_eq!(session.snapshot().phase, Phase::DownloadDone);

        session.record_probe(2, Instant::now());
        assert_eq!(session.snapshot().phase, Phase::DownloadDone);

        session.commit_upload(TransferMeasurement::new(10, Duration::from_millis(1)));
        assert_eq!(session.snapshot().phase, Phase::Complete);
    }

    #[test]
    fn test_upload_before_download_completes_later() {
        let session = Session::new("s".to_string());
        session.commit_upload(TransferMeasurement::new(10, Duration::from_millis(1)));
        assert_eq!(session.snapshot().phase, Phase::Pending);

        session.commit_download(TransferMeasurement::new(10, Duration::from_millis(1)));
        assert_eq!(session.snapshot().phase, Phase::Complete);
    }

    #[test]
    fn test_last_download_write_wins() {
        let session = Session::new("s".to_string());
        session.commit_download(TransferMeasurement::new(10, Duration::from_secs(1)));
        session.commit_download(TransferMeasurement::new(30, Duration::from_secs(1)));
        assert_eq!(session.snapshot().download.unwrap().rate, 30.0);
    }

    #[test]
    fn test_measured_zero_is_not_unset() {
        let session = Session::new("s".to_string());
        session.commit_upload(TransferMeasurement::new(0, Duration::from_secs(1)));
        let upload = session.snapshot().upload;
        assert_eq!(upload.map(|m| m.rate), Some(0.0));
    }

    #[tokio::test]
    async fn test_download_commit_wakes_waiter() {
        let session = Arc::new(Session::new("s".to_string()));
        let waiter = {
            let session = session.clone();
            tokio::spawn(async move {
                let notified = session.download_notified();
                tokio::pin!(notified);
                notified.as_mut().enable();
                if session.snapshot().download.is_none() {
                    notified.await;
                }
                session.snapshot().download.is_some()
            })
        };

        tokio::time::sleep(Duration::from_millis(10)).await;
        session.commit_download(TransferMeasurement::new(1, Duration::from_millis(1)));

        let woke = tokio::time::timeout(Duration::from_secs(2), waiter).await.unwrap().unwrap();
        assert!(woke);
    }

    #[test]
    fn test_evict_older_than() {
        let store = SessionStore::new();
        let old = store.create();
        thread::sleep(Duration::from_millis(30));
        let fresh = store.create();

        assert_eq!(store.evict_older_than(Duration::from_millis(20)), 1);
        assert_eq!(store.len(), 1);
        assert!(store.get(old.id()).is_none());
        assert!(store.get(fresh.id()).is_some());

        // A handle held across eviction keeps working
        old.commit_upload(TransferMeasurement::new(1, Duration::from_millis(1)));
        assert!(old.snapshot().upload.is_some());
    }
}
