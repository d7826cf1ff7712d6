//! Upload body counting

use crate::session::TransferMeter;
use axum::body::Bytes;
use futures::{Stream, StreamExt};

/// Why counting an upload body stopped
#[derive(Debug, PartialEq)]
pub enum DrainEnd<E> {
    /// The body ended normally
    Complete,
    /// The body failed part way; bytes read before the error stay counted
    Interrupted(E),
    /// The meter passed the byte limit
    LimitExceeded,
}

impl<E> DrainEnd<E> {
    /// Convert the interruption error
    pub fn map_err<F, G>(self, f: G) -> DrainEnd<F>
    where
        G: FnOnce(E) -> F,
    {
        match self {
            DrainEnd::Complete => DrainEnd::Complete,
            DrainEnd::Interrupted(e) => DrainEnd::Interrupted(f(e)),
            DrainEnd::LimitExceeded => DrainEnd::LimitExceeded,
        }
    }
}

/// Count every chunk of `stream` into `meter`, discarding the bytes.
///
/// Stops as soon as the meter holds more than `limit` bytes.
pub async fn drain_into<S, E>(stream: S, meter: &mut TransferMeter, limit: u64) -> DrainEnd<E>
where
    S: Stream<Item = Result<Bytes, E>>,
{
    let mut stream = std::pin::pin!(stream);
    while let Some(item) = stream.next().await {
        match item {
            Ok(chunk) => {
                meter.record(chunk.len() as u64);
                if meter.bytes() > limit {
                    return DrainEnd::LimitExceeded;
                }
            }
            Err(e) => return DrainEnd::Interrupted(e),
        }
    }
    DrainEnd::Complete
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;

    #[tokio::test]
    async fn test_drain_counts_all_chunks() {
        let chunks: Vec<Result<Bytes, std::io::Error>> = vec![
            Ok(Bytes::from_static(b"hello")),
            Ok(Bytes::from_static(b" ")),
            Ok(Bytes::from_static(b"world")),
        ];
        let mut meter = TransferMeter::new();
        let end = drain_into(stream::iter(chunks), &mut meter, u64::MAX).await;

        assert!(matches!(end, DrainEnd::Complete));
        assert_eq!(meter.bytes(), 11);
    }

    #[tokio::test]
    async fn test_drain_keeps_bytes_read_before_error() {
        let chunks: Vec<Result<Bytes, &'static str>> = vec![
            Ok(Bytes::from(vec![0u8; 300])),
            Err("connection reset"),
            Ok(Bytes::from(vec![0u8; 300])),
        ];
        let mut meter = TransferMeter::new();
        let end = drain_into(stream::iter(chunks), &mut meter, u64::MAX).await;

        assert_eq!(end, DrainEnd::Interrupted("connection reset"));
        assert_eq!(meter.bytes(), 300);
    }

    #[tokio::test]
    async fn test_drain_stops_past_limit() {
        let chunks: Vec<Result<Bytes, std::io::Error>> = (0..10).map(|_| Ok(Bytes::from(vec![0u8; 100]))).collect();
        let mut meter = TransferMeter::new();
        let end = drain_into(stream::iter(chunks), &mut meter, 250).await;

        assert!(matches!(end, DrainEnd::LimitExceeded));
        assert_eq!(meter.bytes(), 300);
    }

    #[tokio::test]
    async fn test_empty_body_is_complete() {
        let chunks: Vec<Result<Bytes, std::io::Error>> = Vec::new();
        let mut meter = TransferMeter::new();
        let end = drain_into(stream::iter(chunks), &mut meter, 0).await;

        assert!(matches!(end, DrainEnd::Complete));
        assert!(!meter.is_started());
    }
}
