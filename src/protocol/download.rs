//! Streaming download body that measures its own throughput

use crate::session::{TransferMeasurement, TransferMeter};
use axum::body::Bytes;
use futures::Stream;
use std::convert::Infallible;
use std::pin::Pin;
use std::task::{Context, Poll};

type FinishHook = Box<dyn FnOnce(TransferMeasurement) + Send>;

/// Yields `size` filler bytes in fixed chunks, one body frame per chunk.
///
/// The clock starts when the first chunk is handed to the transport. When the
/// stream ends, or is dropped because the client went away, the finish hook
/// runs exactly once with the bytes handed over so far.
pub struct DownloadStream {
    chunk: Bytes,
    total: u64,
    remaining: u64,
    meter: TransferMeter,
    on_finish: Option<FinishHook>,
}

impl DownloadStream {
    pub fn new<F>(size: u64, chunk_size: usize, on_finish: F) -> Self
    where
        F: FnOnce(TransferMeasurement) + Send + 'static,
    {
        Self {
            chunk: Bytes::from(vec![b'a'; chunk_size.max(1)]),
            total: size,
            remaining: size,
            meter: TransferMeter::new(),
            on_finish: Some(Box::new(on_finish)),
        }
    }

    /// Full payload length, used for `Content-Length`
    pub fn total(&self) -> u64 {
        self.total
    }

    /// Bytes handed to the transport so far
    pub fn sent(&self) -> u64 {
        self.meter.bytes()
    }

    fn finish(&mut self) {
        if let Some(on_finish) = self.on_finish.take() {
            on_finish(self.meter.finish());
        }
    }
}

impl Stream for DownloadStream {
    type Item = Result<Bytes, Infallible>;

    fn poll_next(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.remaining == 0 {
            this.finish();
            return Poll::Ready(None);
        }

        let n = this.remaining.min(this.chunk.len() as u64) as usize;
        this.remaining -= n as u64;
        this.meter.record(n as u64);
        Poll::Ready(Some(Ok(this.chunk.slice(..n))))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let chunk = self.chunk.len() as u64;
        let frames = self.remaining.div_ceil(chunk) as usize;
        (frames, Some(frames))
    }
}

impl Drop for DownloadStream {
    fn drop(&mut self) {
        self.finish();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use std::sync::{Arc, Mutex};

    fn capture() -> (Arc<Mutex<Vec<TransferMeasurement>>>, impl FnOnce(TransferMeasurement) + Send + 'static) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        (seen, move |m| sink.lock().unwrap().push(m))
    }

    #[tokio::test]
    async fn test_full_download_yields_exact_size() {
        let (seen, hook) = capture();
        let stream = DownloadStream::new(10_000, 4096, hook);
        assert_eq!(stream.size_hint(), (3, Some(3)));

        let chunks: Vec<Bytes> = stream.map(|c| c.unwrap()).collect().await;
        let lengths: Vec<usize> = chunks.iter().map(|c| c.len()).collect();
        assert_eq!(lengths, vec![4096, 4096, 1808]);
        assert!(chunks.iter().all(|c| c.iter().all(|&b| b == b'a')));

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].bytes, 10_000);
        assert!(seen[0].rate > 0.0);
    }

    #[tokio::test]
    async fn test_dropped_stream_reports_partial_bytes() {
        let (seen, hook) = capture();
        let mut stream = DownloadStream::new(1_000_000, 1000, hook);

        for _ in 0..3 {
            stream.next().await.unwrap().unwrap();
        }
        assert_eq!(stream.sent(), 3000);
        drop(stream);

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].bytes, 3000);
    }

    #[tokio::test]
    async fn test_finish_hook_runs_once() {
        let (seen, hook) = capture();
        let mut stream = DownloadStream::new(10, 64, hook);
        while stream.next().await.is_some() {}
        assert!(stream.next().await.is_none());
        drop(stream);

        assert_eq!(seen.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_untouched_stream_reports_zero() {
        let (seen, hook) = capture();
        let stream = DownloadStream::new(100, 10, hook);
        assert_eq!(stream.total(), 100);
        drop(stream);

        let seen = seen.lock().unwrap();
        assert_eq!(seen[0].bytes, 0);
    }
}
