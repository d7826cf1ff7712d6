//! HTTP server
//!
//! Maps the measurement protocol onto script-free HTML pages plus a small
//! JSON surface for scripted clients.
//!
//! ## Endpoints
//!
//! - `GET /` - Landing page with the start form
//! - `GET|POST /start` - Create a session, go to probe 1
//! - `GET /probe?sid=&n=` - Latency probe chain
//! - `GET /download?sid=&size=&nonce=` - Download payload
//! - `POST /upload[?sid=]` - Multipart or raw upload, 303 to results
//! - `GET /results?sid=` - Results page
//! - `GET /api/results?sid=` - Results as JSON
//! - `GET /health` - Health check

pub mod pages;

use crate::error::{AppError, Result};
use crate::logging::ProtocolLogger;
use crate::models::Config;
use crate::protocol::{
    drain_into, parse_probe_counter, require_session_id, results_url, DrainEnd, MeasurementProtocol, ProtocolStep,
};
use crate::resolver::{ResultsResolver, Summary};
use crate::session::{SessionStore, TransferMeter};
use axum::{
    body::Body,
    extract::{ConnectInfo, DefaultBodyLimit, FromRequest, Multipart, Query, Request, State},
    http::{header, HeaderMap, HeaderName, StatusCode},
    response::{Html, IntoResponse, Redirect, Response},
    routing::{get, post},
    Form, Json, Router,
};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

/// Caching headers carried by every protocol response
const NO_STORE: [(HeaderName, &str); 3] = [
    (header::CACHE_CONTROL, "no-store, no-cache, must-revalidate, max-age=0"),
    (header::PRAGMA, "no-cache"),
    (header::EXPIRES, "0"),
];

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    protocol: MeasurementProtocol,
    resolver: ResultsResolver,
    config: Arc<Config>,
    logger: Arc<ProtocolLogger>,
}

impl AppState {
    /// State backed by a fresh session store
    pub fn new(config: Config) -> Self {
        Self::with_store(Arc::new(SessionStore::new()), config)
    }

    /// State backed by an existing session store
    pub fn with_store(store: Arc<SessionStore>, config: Config) -> Self {
        Self {
            protocol: MeasurementProtocol::new(store.clone(), &config),
            resolver: ResultsResolver::new(store),
            logger: Arc::new(ProtocolLogger::new(&config)),
            config: Arc::new(config),
        }
    }

    pub fn store(&self) -> &Arc<SessionStore> {
        self.protocol.store()
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    fn reject(&self, path: &str, error: AppError) -> AppError {
        self.logger.log_client_error(path, &error);
        error
    }
}

/// Create the router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(index_handler))
        .route("/start", get(start_handler).post(start_handler))
        .route("/probe", get(probe_handler))
        .route("/download", get(download_handler))
        .route("/upload", post(upload_handler).layer(DefaultBodyLimit::disable()))
        .route("/results", get(results_handler))
        .route("/api/results", get(api_results_handler))
        .route("/health", get(health_handler))
        .with_state(state)
}

/// Bind the configured address and serve until interrupted
pub async fn run_server(config: Config) -> Result<()> {
    let addr = config.socket_addr()?;
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|e| AppError::server(format!("Failed to bind {}: {}", addr, e)))?;
    serve(listener, config).await
}

/// Serve on an already bound listener until interrupted
pub async fn serve(listener: TcpListener, config: Config) -> Result<()> {
    let local_addr = listener.local_addr()?;
    let state = AppState::new(config);
    state.logger.log_listening(&local_addr.to_string(), state.protocol.probe_count());

    let sweeper = spawn_sweeper(&state);
    let logger = state.logger.clone();
    let app = create_router(state).into_make_service_with_connect_info::<SocketAddr>();
    let result = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| AppError::server(format!("Server failed: {}", e)));

    if let Some(sweeper) = sweeper {
        sweeper.abort();
    }
    if let Err(e) = &result {
        logger.log_server_error(e);
    }
    result
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}

/// Periodically evict expired sessions; nothing runs when the TTL is 0
fn spawn_sweeper(state: &AppState) -> Option<JoinHandle<()>> {
    let ttl = state.config.session_ttl()?;
    let period = state.config.session_sweep_interval();
    let store = state.store().clone();
    let logger = state.logger.clone();

    Some(tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let evicted = store.evict_older_than(ttl);
            logger.log_eviction(evicted, store.len());
        }
    }))
}

/// Address of the requesting client: first `X-Forwarded-For` entry, else the peer
fn observed_host(headers: &HeaderMap, peer: Option<&ConnectInfo<SocketAddr>>) -> String {
    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty());

    match (forwarded, peer) {
        (Some(host), _) => host.to_string(),
        (None, Some(ConnectInfo(addr))) => addr.ip().to_string(),
        (None, None) => "unknown".to_string(),
    }
}

fn wants_json(headers: &HeaderMap) -> bool {
    headers
        .get(header::ACCEPT)
        .and_then(|v| v.to_str().ok())
        .map(|accept| accept.contains("application/json"))
        .unwrap_or(false)
}

/// Optional start hint
#[derive(Debug, Default, Deserialize)]
pub struct StartParams {
    pub ip: Option<String>,
}

/// Query of a session-scoped request
#[derive(Debug, Default, Deserialize)]
pub struct SessionParams {
    pub sid: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ProbeParams {
    pub sid: Option<String>,
    pub n: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct DownloadParams {
    pub sid: Option<String>,
    pub size: Option<String>,
    pub nonce: Option<String>,
}

/// Health check response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub sessions: usize,
}

async fn index_handler(headers: HeaderMap, peer: Option<ConnectInfo<SocketAddr>>) -> Html<String> {
    Html(pages::landing(&observed_host(&headers, peer.as_ref())))
}

async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: crate::VERSION.to_string(),
        sessions: state.store().len(),
    })
}

/// Start handler; `Form` reads the query on GET and the body on POST
async fn start_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    peer: Option<ConnectInfo<SocketAddr>>,
    params: Option<Form<StartParams>>,
) -> Response {
    let hint = params
        .and_then(|Form(p)| p.ip)
        .map(|ip| ip.trim().to_string())
        .filter(|ip| !ip.is_empty());
    let client_host = hint.unwrap_or_else(|| observed_host(&headers, peer.as_ref()));

    let session = state.protocol.start(&client_host);
    state.logger.log_session_started(session.id(), &client_host);

    let step = ProtocolStep::first_probe(session.id());
    render_step(&state, &headers, step, "Starting")
}

async fn probe_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<ProbeParams>,
) -> Result<Response> {
    let sid = require_session_id(params.sid.as_deref()).map_err(|e| state.reject("/probe", e))?;
    let n = parse_probe_counter(params.n.as_deref()).map_err(|e| state.reject("/probe", e))?;
    let outcome = state.protocol.probe(sid, n).map_err(|e| state.reject("/probe", e))?;
    state.logger.log_probe(sid, n, outcome.sample_ms);

    let step = ProtocolStep::after_probe(&outcome, state.protocol.default_download_size());
    Ok(render_step(&state, &headers, step, &format!("ping {}", n)))
}

fn render_step(state: &AppState, headers: &HeaderMap, step: ProtocolStep, label: &str) -> Response {
    if wants_json(headers) {
        return (NO_STORE, Json(step)).into_response();
    }
    let html = match &step {
        ProtocolStep::Probe { url, .. } => pages::hop(url, label),
        ProtocolStep::Download { session_id, url, .. } => {
            pages::download(url, session_id, state.config.results_refresh_seconds)
        }
    };
    (NO_STORE, Html(html)).into_response()
}

async fn download_handler(State(state): State<AppState>, Query(params): Query<DownloadParams>) -> Response {
    let size = state.protocol.download_size(params.size.as_deref());
    let sid = params.sid.as_deref().map(str::trim).filter(|s| !s.is_empty()).map(str::to_string);

    let logger = state.logger.clone();
    let report_sid = sid.clone();
    let stream = state.protocol.download(sid.as_deref(), size, move |measurement| {
        if measurement.bytes == 0 {
            logger.log_download_abandoned(report_sid.as_deref(), size);
        } else {
            logger.log_download(report_sid.as_deref(), size, &measurement);
        }
    });

    (
        NO_STORE,
        [
            (header::CONTENT_TYPE, "application/octet-stream".to_string()),
            (header::CONTENT_LENGTH, stream.total().to_string()),
        ],
        Body::from_stream(stream),
    )
        .into_response()
}

/// Count the file parts of a multipart body, capturing the `sid` text field
async fn drain_multipart(
    multipart: &mut Multipart,
    meter: &mut TransferMeter,
    limit: u64,
    sid: &mut Option<String>,
) -> DrainEnd<String> {
    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => return DrainEnd::Complete,
            Err(e) => return DrainEnd::Interrupted(e.body_text()),
        };

        if field.file_name().is_some() {
            match drain_into(field, meter, limit).await {
                DrainEnd::Complete => {}
                other => return other.map_err(|e| e.body_text()),
            }
        } else if field.name() == Some("sid") {
            match field.text().await {
                Ok(text) => *sid = Some(text),
                Err(e) => return DrainEnd::Interrupted(e.body_text()),
            }
        }
    }
}

/// Whether the body should be read as a multipart form; requires a parsable
/// `multipart/form-data` type with a boundary
fn is_multipart_form(headers: &HeaderMap) -> bool {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|ct| multer::parse_boundary(ct).is_ok())
        .unwrap_or(false)
}

/// Upload handler. Both body kinds share the `max_upload_size` limit, which
/// `drain_into` enforces, so the route carries no extractor body limit.
async fn upload_handler(
    State(state): State<AppState>,
    Query(params): Query<SessionParams>,
    request: Request,
) -> Result<Response> {
    let is_multipart = is_multipart_form(request.headers());
    let limit = state.config.max_upload_size;

    let mut meter = TransferMeter::new();
    let mut form_sid = None;
    let end = if is_multipart {
        let mut multipart = Multipart::from_request(request, &state)
            .await
            .map_err(|e| state.reject("/upload", AppError::protocol(e.body_text())))?;
        drain_multipart(&mut multipart, &mut meter, limit, &mut form_sid).await
    } else {
        drain_into(request.into_body().into_data_stream(), &mut meter, limit)
            .await
            .map_err(|e| e.to_string())
    };

    let sid = form_sid.filter(|s| !s.trim().is_empty()).or(params.sid);
    let sid = require_session_id(sid.as_deref()).map_err(|e| state.reject("/upload", e))?;

    match end {
        DrainEnd::Complete => {
            let measurement = state.protocol.record_upload(sid, &meter)?;
            state.logger.log_upload(sid, &measurement, is_multipart);
        }
        DrainEnd::Interrupted(reason) if meter.bytes() == 0 => {
            state.logger.log_upload_abandoned(sid, &reason);
        }
        DrainEnd::Interrupted(reason) => {
            let measurement = state.protocol.record_upload(sid, &meter)?;
            state.logger.log_upload_interrupted(sid, &reason, &measurement);
        }
        DrainEnd::LimitExceeded => {
            let measurement = state.protocol.record_upload(sid, &meter)?;
            let reason = format!("upload exceeds {} bytes", limit);
            state.logger.log_upload_interrupted(sid, &reason, &measurement);
            return Ok((StatusCode::PAYLOAD_TOO_LARGE, NO_STORE, reason).into_response());
        }
    }

    Ok((NO_STORE, Redirect::to(&results_url(sid))).into_response())
}

async fn resolve_summary(
    state: &AppState,
    path: &str,
    params: &SessionParams,
    headers: &HeaderMap,
    peer: Option<&ConnectInfo<SocketAddr>>,
) -> Result<Summary> {
    let sid = require_session_id(params.sid.as_deref()).map_err(|e| state.reject(path, e))?;

    let started = Instant::now();
    let mut summary = state
        .resolver
        .resolve(sid, state.config.wait_timeout(), state.config.poll_interval())
        .await;
    state.logger.log_results(sid, summary.timed_out, started.elapsed());

    if summary.client_host.is_empty() {
        summary.client_host = observed_host(headers, peer);
    }
    Ok(summary)
}

async fn results_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    peer: Option<ConnectInfo<SocketAddr>>,
    Query(params): Query<SessionParams>,
) -> Result<Response> {
    let summary = resolve_summary(&state, "/results", &params, &headers, peer.as_ref()).await?;
    Ok((NO_STORE, Html(pages::results(&summary))).into_response())
}

async fn api_results_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    peer: Option<ConnectInfo<SocketAddr>>,
    Query(params): Query<SessionParams>,
) -> Result<Response> {
    let summary = resolve_summary(&state, "/api/results", &params, &headers, peer.as_ref()).await?;
    Ok((NO_STORE, Json(summary)).into_response())
}
