//! The control/observer HTTP API: live log inspection over SSE, session
//! lifecycle control, and report/catalog export.

use crate::export;
use axum::extract::{Path, Query, State};
use axum::http::{header, StatusCode};
use axum::response::sse::{Event, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::Stream;
use wiretap_core::error::CoreError;
use wiretap_core::model::SessionMeta;
use wiretap_store::{RingBuffer, SessionStore};

const DEFAULT_LOGS_LIMIT: usize = 100;
const MAX_LOGS_LIMIT: usize = 2000;
const DEFAULT_SESSION_LOGS_LIMIT: usize = 500;
const MAX_SESSION_LOGS_LIMIT: usize = 5000;

#[derive(Clone)]
pub struct AppState {
    pub ring: Arc<RingBuffer>,
    pub store: Arc<SessionStore>,
    pub subscriber_queue: usize,
}

/// Wraps a [`CoreError`] for use as an Axum handler error type.
struct ApiError(CoreError);

impl From<CoreError> for ApiError {
    fn from(err: CoreError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.0.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, Json(self.0.to_json_body())).into_response()
    }
}

fn not_found(message: &str) -> Response {
    (StatusCode::NOT_FOUND, Json(serde_json::json!({ "error": message }))).into_response()
}

fn bad_request(message: &str) -> Response {
    (StatusCode::BAD_REQUEST, Json(serde_json::json!({ "error": message }))).into_response()
}

/// Route key used when caching/merging a session's report, matching the
/// catalog builder's own fallback (session name, or `/` if unnamed).
fn route_key_of(meta: &SessionMeta) -> String {
    if meta.name.trim().is_empty() {
        "/".to_string()
    } else {
        meta.name.clone()
    }
}

/// The admin API server, owning the bound listener and shared state.
pub struct AdminServer {
    addr: SocketAddr,
    state: AppState,
}

impl AdminServer {
    pub fn new(addr: SocketAddr, state: AppState) -> Self {
        Self { addr, state }
    }

    pub async fn start(self) -> anyhow::Result<()> {
        let app = build_admin_router(self.state);
        let listener = tokio::net::TcpListener::bind(self.addr).await?;
        tracing::info!(addr = %self.addr, "admin API listening");
        axum::serve(listener, app).await?;
        Ok(())
    }
}

pub fn build_admin_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/logs", get(get_logs))
        .route("/api/clear", post(clear_logs))
        .route("/events", get(events))
        .route("/api/sessions", get(list_sessions))
        .route("/api/sessions/{id}", get(get_session))
        .route("/api/sessions/start", post(start_session))
        .route("/api/sessions/stop", post(stop_session))
        .route("/api/sessions/{id}/logs", get(get_session_logs))
        .route("/api/sessions/{id}/export", get(export_session))
        .route("/api/sessions/{id}/report", post(build_session_report))
        .route("/api/catalog/export", get(export_catalog))
        .with_state(state)
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "ok": true }))
}

#[derive(Debug, Default, Deserialize)]
struct LimitQuery {
    #[serde(default)]
    limit: Option<usize>,
}

async fn get_logs(State(state): State<AppState>, Query(q): Query<LimitQuery>) -> Json<serde_json::Value> {
    let limit = q.limit.unwrap_or(DEFAULT_LOGS_LIMIT).min(MAX_LOGS_LIMIT);
    Json(serde_json::json!({ "items": state.ring.snapshot(limit) }))
}

async fn clear_logs(State(state): State<AppState>) -> Json<serde_json::Value> {
    state.ring.clear();
    Json(serde_json::json!({ "ok": true }))
}

async fn events(State(state): State<AppState>) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let (tx, rx) = mpsc::channel::<Result<Event, Infallible>>(state.subscriber_queue.max(1));
    let (handle, mut sub_rx) = state.ring.subscribe(state.subscriber_queue.max(1));

    let _ = tx.send(Ok(Event::default().event("hello").data("{}"))).await;

    tokio::spawn(async move {
        // Keeps the subscription alive (and removed on drop) for the
        // lifetime of this connection's forwarding loop.
        let _handle = handle;
        while let Some(record) = sub_rx.recv().await {
            let event = match Event::default().event("log").json_data(&record) {
                Ok(event) => event,
                Err(e) => {
                    tracing::warn!(error = %e, "failed to encode log event");
                    continue;
                }
            };
            if tx.send(Ok(event)).await.is_err() {
                break;
            }
        }
    });

    Sse::new(ReceiverStream::new(rx)).keep_alive(axum::response::sse::KeepAlive::default())
}

async fn list_sessions(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "items": state.store.list(),
        "current": state.store.current(),
    }))
}

async fn get_session(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    match state.store.read(&id) {
        Some(meta) => Json(meta).into_response(),
        None => not_found("session not found"),
    }
}

#[derive(Debug, Default, Deserialize)]
struct StartSessionBody {
    #[serde(default)]
    name: Option<String>,
}

async fn start_session(
    State(state): State<AppState>,
    Json(body): Json<StartSessionBody>,
) -> Result<Json<SessionMeta>, ApiError> {
    let meta = state.store.start(body.name)?;
    Ok(Json(meta))
}

async fn stop_session(State(state): State<AppState>) -> Json<serde_json::Value> {
    match state.store.stop() {
        Some(meta) => Json(serde_json::to_value(meta).unwrap_or_default()),
        None => Json(serde_json::json!({ "ok": true })),
    }
}

async fn get_session_logs(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(q): Query<LimitQuery>,
) -> Result<Response, ApiError> {
    if state.store.read(&id).is_none() {
        return Ok(not_found("session not found"));
    }
    let limit = q.limit.unwrap_or(DEFAULT_SESSION_LOGS_LIMIT).min(MAX_SESSION_LOGS_LIMIT);
    let logs = state.store.read_logs(&id, limit)?;
    Ok(Json(serde_json::json!({ "items": logs })).into_response())
}

#[derive(Debug, Default, Deserialize)]
struct FormatQuery {
    #[serde(default)]
    format: Option<String>,
}

fn download(content_type: &'static str, filename: String, body: String) -> Response {
    (
        [
            (header::CONTENT_TYPE, content_type.to_string()),
            (header::CONTENT_DISPOSITION, format!("attachment; filename=\"{filename}\"")),
        ],
        body,
    )
        .into_response()
}

async fn export_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(q): Query<FormatQuery>,
) -> Result<Response, ApiError> {
    let Some(meta) = state.store.read(&id) else {
        return Ok(not_found("session not found"));
    };
    let logs = state.store.read_logs(&id, usize::MAX)?;

    match q.format.as_deref().unwrap_or("json") {
        "json" => {
            let body = serde_json::to_string_pretty(&serde_json::json!({ "meta": meta, "items": logs }))
                .unwrap_or_default();
            Ok(download("application/json", format!("session-{id}.json"), body))
        }
        "har" => {
            let body = serde_json::to_string_pretty(&export::session_har(&logs)).unwrap_or_default();
            Ok(download("application/json", format!("session-{id}.har"), body))
        }
        "md" => {
            let route_key = route_key_of(&meta);
            let report = state
                .store
                .report_for(&id, &route_key)?
                .unwrap_or_else(|| wiretap_report::build_report(wiretap_report::ReportInput {
                    route_key,
                    session_id: meta.id.clone(),
                    logs: &logs,
                }));
            let body = export::session_markdown(&meta, &report);
            Ok(download("text/markdown", format!("session-{id}.md"), body))
        }
        other => Ok(bad_request(&format!("unsupported export format: {other}"))),
    }
}

async fn build_session_report(State(state): State<AppState>, Path(id): Path<String>) -> Result<Response, ApiError> {
    let Some(meta) = state.store.read(&id) else {
        return Ok(not_found("session not found"));
    };
    let route_key = route_key_of(&meta);
    match state.store.report_for(&id, &route_key)? {
        Some(report) => Ok(Json(report).into_response()),
        None => Ok(not_found("session not found")),
    }
}

async fn export_catalog(State(state): State<AppState>, Query(q): Query<FormatQuery>) -> Response {
    let catalog = wiretap_report::build_catalog(state.store.as_ref());
    match q.format.as_deref().unwrap_or("json") {
        "json" => {
            let body = serde_json::to_string_pretty(&catalog).unwrap_or_default();
            download("application/json", "catalog.json".to_string(), body)
        }
        "md" => download("text/markdown", "catalog.md".to_string(), export::catalog_markdown(&catalog)),
        other => bad_request(&format!("unsupported export format: {other}")),
    }
}
