//! Headless speed test client
//!
//! Drives the measurement protocol against a running server through its JSON
//! surface: start, follow the probe steps, stream the download, post an
//! upload and read the summary.

use crate::error::{AppError, Result};
use crate::output::ClientReport;
use crate::protocol::{api_results_url, ProtocolStep};
use crate::resolver::Summary;
use crate::session::TransferMeter;
use futures::StreamExt;
use reqwest::{header, Client, Response, StatusCode, Url};
use std::time::{Duration, Instant};

/// Upper bound on protocol steps before the run is abandoned
const MAX_STEPS: usize = 1_000;

/// Client for one speed test server
pub struct SpeedTestClient {
    client: Client,
    base: Url,
    download_size: Option<u64>,
    upload_size: u64,
}

impl SpeedTestClient {
    /// Create a client for `server` with a per-request timeout
    pub fn new(server: &str, timeout: Duration) -> Result<Self> {
        let base = Url::parse(server)
            .map_err(|e| AppError::parse(format!("Invalid server URL '{}': {}", server, e)))?;
        if !matches!(base.scheme(), "http" | "https") {
            return Err(AppError::validation(format!("Unsupported URL scheme '{}'", base.scheme())));
        }

        let client = Client::builder()
            .timeout(timeout)
            .user_agent(format!("{}/{}", crate::PKG_NAME, crate::VERSION))
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| AppError::network(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base,
            download_size: None,
            upload_size: crate::defaults::DEFAULT_UPLOAD_SIZE,
        })
    }

    /// Request a specific download size instead of the server default
    pub fn with_download_size(mut self, size: Option<u64>) -> Self {
        self.download_size = size;
        self
    }

    pub fn with_upload_size(mut self, size: u64) -> Self {
        self.upload_size = size;
        self
    }

    pub fn base_url(&self) -> &Url {
        &self.base
    }

    fn url(&self, path: &str) -> Result<Url> {
        Ok(self.base.join(path)?)
    }

    async fn check(response: Response, what: &str) -> Result<Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(AppError::http_request(format!("{} failed with {}: {}", what, status, body.trim())))
    }

    async fn fetch_step(&self, path: &str) -> Result<ProtocolStep> {
        let response = self
            .client
            .get(self.url(path)?)
            .header(header::ACCEPT, "application/json")
            .send()
            .await?;
        let response = Self::check(response, path).await?;
        Ok(response.json::<ProtocolStep>().await?)
    }

    /// Run the whole protocol once
    pub async fn run(&self) -> Result<ClientReport> {
        let started = Instant::now();

        let mut step = self.fetch_step("/start").await?;
        let mut probe_round_trips_ms = Vec::new();
        let (session_id, download_path) = loop {
            match step {
                ProtocolStep::Probe { url, .. } => {
                    if probe_round_trips_ms.len() >= MAX_STEPS {
                        return Err(AppError::protocol("server never ended the probe chain"));
                    }
                    let sent = Instant::now();
                    step = self.fetch_step(&url).await?;
                    probe_round_trips_ms.push(sent.elapsed().as_secs_f64() * 1000.0);
                }
                ProtocolStep::Download { session_id, url, .. } => break (session_id, url),
            }
        };

        let download = self.download(&download_path).await?;
        let upload = self.upload(&session_id).await?;
        let summary = self.results(&session_id).await?;

        Ok(ClientReport {
            server: self.base.to_string(),
            summary,
            downloaded_bytes: download.bytes,
            uploaded_bytes: upload.bytes,
            client_download_rate: download.rate,
            client_upload_rate: upload.rate,
            probe_round_trips_ms,
            elapsed: started.elapsed(),
        })
    }

    fn download_url(&self, path: &str) -> Result<Url> {
        let mut url = self.url(path)?;
        if let Some(size) = self.download_size {
            let pairs: Vec<(String, String)> = url
                .query_pairs()
                .filter(|(k, _)| k != "size")
                .map(|(k, v)| (k.into_owned(), v.into_owned()))
                .collect();
            url.query_pairs_mut()
                .clear()
                .extend_pairs(pairs)
                .append_pair("size", &size.to_string());
        }
        Ok(url)
    }

    async fn download(&self, path: &str) -> Result<crate::session::TransferMeasurement> {
        let response = self.client.get(self.download_url(path)?).send().await?;
        let response = Self::check(response, "download").await?;

        let mut meter = TransferMeter::new();
        let mut body = response.bytes_stream();
        while let Some(chunk) = body.next().await {
            meter.record(chunk?.len() as u64);
        }
        Ok(meter.finish())
    }

    async fn upload(&self, session_id: &str) -> Result<crate::session::TransferMeasurement> {
        let mut url = self.url("/upload")?;
        url.query_pairs_mut().append_pair("sid", session_id);

        let payload = vec![b'u'; self.upload_size as usize];
        let sent = Instant::now();
        let response = self
            .client
            .post(url)
            .header(header::CONTENT_TYPE, "application/octet-stream")
            .body(payload)
            .send()
            .await?;
        let elapsed = sent.elapsed();

        if response.status() != StatusCode::SEE_OTHER {
            Self::check(response, "upload").await?;
        }
        Ok(crate::session::TransferMeasurement::new(self.upload_size, elapsed))
    }

    async fn results(&self, session_id: &str) -> Result<Summary> {
        let response = self.client.get(self.url(&api_results_url(session_id))?).send().await?;
        let response = Self::check(response, "results").await?;
        Ok(response.json::<Summary>().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_invalid_server_urls() {
        assert!(matches!(
            SpeedTestClient::new("not a url", Duration::from_secs(1)),
            Err(AppError::Parse(_))
        ));
        assert!(matches!(
            SpeedTestClient::new("ftp://example.com", Duration::from_secs(1)),
            Err(AppError::Validation(_))
        ));
    }

    #[test]
    fn test_download_url_override() {
        let client = SpeedTestClient::new("http://127.0.0.1:8080", Duration::from_secs(1))
            .unwrap()
            .with_download_size(Some(1234));
        let url = client.download_url("/download?sid=s&size=99&nonce=n").unwrap();
        assert_eq!(url.as_str(), "http://127.0.0.1:8080/download?sid=s&nonce=n&size=1234");

        let client = client.with_download_size(None);
        let url = client.download_url("/download?sid=s&size=99&nonce=n").unwrap();
        assert_eq!(url.as_str(), "http://127.0.0.1:8080/download?sid=s&size=99&nonce=n");
    }

    #[test]
    fn test_paths_join_onto_base() {
        let client = SpeedTestClient::new("http://localhost:9000/", Duration::from_secs(1)).unwrap();
        assert_eq!(client.url("/probe?sid=a&n=1").unwrap().as_str(), "http://localhost:9000/probe?sid=a&n=1");
        assert_eq!(client.base_url().port(), Some(9000));
    }
}
