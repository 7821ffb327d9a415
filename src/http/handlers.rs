//! HTTP request handlers
//!
//! Implements the request/response control surface. State errors map to
//! 400 with a JSON body; a missing or too-young upstream playlist maps to
//! 404 with a short text reason.

use axum::{
    extract::State,
    http::{HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::config::FragmentConfig;
use crate::engine::{self, RunOverrides};
use crate::error::CaptionError;
use crate::playlist::{delayed_view, live_view};
use crate::session::{Mode, Slot};
use crate::state::AppState;

/// HTTP error type
#[derive(Debug)]
pub enum HttpError {
    BadRequest(String),
    NotFound(String),
    InternalError(String),
}

impl IntoResponse for HttpError {
    fn into_response(self) -> Response {
        match self {
            HttpError::BadRequest(reason) => (
                StatusCode::BAD_REQUEST,
                Json(serde_json::json!({ "error": reason })),
            )
                .into_response(),
            HttpError::NotFound(reason) => (StatusCode::NOT_FOUND, reason).into_response(),
            HttpError::InternalError(reason) => {
                (StatusCode::INTERNAL_SERVER_ERROR, reason).into_response()
            }
        }
    }
}

impl From<CaptionError> for HttpError {
    fn from(err: CaptionError) -> Self {
        match err {
            CaptionError::PlaylistMissing(_) => HttpError::NotFound("no upstream playlist".into()),
            CaptionError::NotEnoughSegments => HttpError::NotFound("not enough segments".into()),
            CaptionError::Io(e) => HttpError::InternalError(e.to_string()),
            CaptionError::Json(e) => HttpError::InternalError(e.to_string()),
            other => HttpError::BadRequest(other.to_string()),
        }
    }
}

fn m3u8_response(body: String) -> Response {
    let mut headers = HeaderMap::new();
    headers.insert(
        "Content-Type",
        HeaderValue::from_static("application/vnd.apple.mpegurl"),
    );
    headers.insert("Cache-Control", HeaderValue::from_static("no-cache"));
    (headers, body).into_response()
}

/// Health check endpoint
pub async fn health_check() -> &'static str {
    "OK"
}

/// Version endpoint
pub async fn version_check() -> &'static str {
    concat!("caption-server v", env!("CARGO_PKG_VERSION"))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigResponse {
    #[serde(rename = "delaySec")]
    pub delay_secs: u64,
    pub mode: Mode,
    pub fragment_mode: bool,
}

/// GET /config
pub async fn get_config(State(state): State<Arc<AppState>>) -> Json<ConfigResponse> {
    let session = state.session.lock();
    Json(ConfigResponse {
        delay_secs: session.delay_secs,
        mode: session.mode,
        fragment_mode: session.fragment_active,
    })
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DelayResponse {
    #[serde(rename = "delaySec")]
    pub delay_secs: u64,
    #[serde(rename = "minDelaySec")]
    pub min_delay_secs: u64,
    #[serde(rename = "maxDelaySec")]
    pub max_delay_secs: u64,
}

/// GET /delay
pub async fn get_delay(State(state): State<Arc<AppState>>) -> Json<DelayResponse> {
    let session = state.session.lock();
    Json(DelayResponse {
        delay_secs: session.delay_secs,
        min_delay_secs: session
            .fragment
            .min_delay_secs(state.config.media.segment_duration_secs),
        max_delay_secs: state.config.delay.max_delay_secs,
    })
}

#[derive(Debug, Deserialize)]
pub struct SetDelayRequest {
    #[serde(rename = "delaySec")]
    pub delay_secs: u64,
}

/// POST /delay
pub async fn set_delay(
    State(state): State<Arc<AppState>>,
    Json(request): Json<SetDelayRequest>,
) -> Result<Json<serde_json::Value>, HttpError> {
    let applied = engine::set_delay(&state, request.delay_secs)?;
    Ok(Json(serde_json::json!({ "delaySec": applied })))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LiveStatusResponse {
    pub running: bool,
    pub live_started_at: Option<u64>,
    pub manifest: bool,
    pub segment_count: usize,
    pub mode: Mode,
    #[serde(rename = "delaySec")]
    pub delay_secs: u64,
    pub fragment_mode: bool,
    pub min_subtitlers: usize,
}

/// GET /live/status
pub async fn live_status(State(state): State<Arc<AppState>>) -> Json<LiveStatusResponse> {
    let playlist = state.playlist_status();
    let session = state.session.lock();
    Json(LiveStatusResponse {
        running: session.running,
        live_started_at: session.live_started_at_ms,
        manifest: playlist.has_manifest,
        segment_count: playlist.segment_count,
        mode: session.mode,
        delay_secs: session.delay_secs,
        fragment_mode: session.fragment_active,
        min_subtitlers: session.fragment.required_subtitlers,
    })
}

/// Body of POST /live/start and POST /fragment/config
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartRunRequest {
    /// Media source selection; handled by the upload/selection collaborator
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub mode: Option<Mode>,
    #[serde(default, rename = "delaySec")]
    pub delay_secs: Option<u64>,
    #[serde(default)]
    pub slot_duration: Option<u64>,
    #[serde(default)]
    pub overlap_duration: Option<u64>,
    #[serde(default)]
    pub notify_before: Option<u64>,
    #[serde(default)]
    pub grace_period_percent: Option<u64>,
    #[serde(default)]
    pub required_subtitlers: Option<usize>,
}

impl StartRunRequest {
    fn overrides(&self) -> RunOverrides {
        RunOverrides {
            mode: self.mode,
            delay_secs: self.delay_secs,
            slot_duration_secs: self.slot_duration,
            overlap_duration_secs: self.overlap_duration,
            grace_percent: self.grace_period_percent,
            notify_before_secs: self.notify_before,
            required_subtitlers: self.required_subtitlers,
        }
    }
}

/// POST /live/start
pub async fn live_start(
    State(state): State<Arc<AppState>>,
    Json(request): Json<StartRunRequest>,
) -> Result<Json<serde_json::Value>, HttpError> {
    if let Some(source) = &request.source {
        tracing::info!(%source, "starting live run");
    }
    engine::start_run(&state, request.overrides())?;
    Ok(Json(serde_json::json!({ "status": "started" })))
}

/// POST /live/stop (idempotent)
pub async fn live_stop(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    engine::stop_run(&state);
    Json(serde_json::json!({ "status": "stopped" }))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FragmentConfigResponse {
    pub slot_duration: u64,
    pub overlap_duration: u64,
    pub grace_period_percent: u64,
    pub notify_before: u64,
    pub required_subtitlers: usize,
    pub settle_ms: u64,
    pub min_required: usize,
    #[serde(rename = "minDelaySec")]
    pub min_delay_secs: u64,
}

impl FragmentConfigResponse {
    fn from_config(fragment: &FragmentConfig, segment_duration_secs: u64) -> Self {
        Self {
            slot_duration: fragment.slot_duration_secs,
            overlap_duration: fragment.overlap_duration_secs,
            grace_period_percent: fragment.grace_percent,
            notify_before: fragment.notify_before_secs,
            required_subtitlers: fragment.required_subtitlers,
            settle_ms: fragment.settle_ms,
            min_required: fragment.min_required(),
            min_delay_secs: fragment.min_delay_secs(segment_duration_secs),
        }
    }
}

/// GET /fragment/config
pub async fn fragment_config_get(
    State(state): State<Arc<AppState>>,
) -> Json<FragmentConfigResponse> {
    let fragment = state.session.lock().fragment.clone();
    Json(FragmentConfigResponse::from_config(
        &fragment,
        state.config.media.segment_duration_secs,
    ))
}

/// POST /fragment/config
pub async fn fragment_config_set(
    State(state): State<Arc<AppState>>,
    Json(request): Json<StartRunRequest>,
) -> Result<Json<FragmentConfigResponse>, HttpError> {
    let updated = engine::set_fragment_config(&state, request.overrides())?;
    Ok(Json(FragmentConfigResponse::from_config(
        &updated,
        state.config.media.segment_duration_secs,
    )))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FragmentStatusResponse {
    pub active: bool,
    pub waiting_for_subtitlers: bool,
    pub current_slot_index: Option<u64>,
    pub current_subtitler_name: Option<String>,
    pub subtitler_count: usize,
    pub required_subtitlers: usize,
    pub slots_count: usize,
    pub raw_captions_count: usize,
    pub fused_captions_count: usize,
}

/// GET /fragment/status
pub async fn fragment_status(State(state): State<Arc<AppState>>) -> Json<FragmentStatusResponse> {
    let session = state.session.lock();
    Json(FragmentStatusResponse {
        active: session.fragment_active,
        waiting_for_subtitlers: session.fragment_active && !session.rotation_started,
        current_slot_index: session.slots.last().map(|s| s.index),
        current_subtitler_name: session.current_subtitler().map(|s| s.name.clone()),
        subtitler_count: session.subtitlers.len(),
        required_subtitlers: session.fragment.required_subtitlers,
        slots_count: session.slots.len(),
        raw_captions_count: session.raw_caption_count(),
        fused_captions_count: session.fused.len(),
    })
}

/// POST /fragment/start
pub async fn fragment_start(
    State(state): State<Arc<AppState>>,
) -> Result<Json<serde_json::Value>, HttpError> {
    let mut session = state.session.lock();
    engine::scheduler::start_fragment(&state, &mut session)?;
    Ok(Json(serde_json::json!({ "status": "started" })))
}

/// POST /fragment/stop
pub async fn fragment_stop(
    State(state): State<Arc<AppState>>,
) -> Result<Json<serde_json::Value>, HttpError> {
    let mut session = state.session.lock();
    engine::scheduler::stop_fragment(&state, &mut session)?;
    Ok(Json(serde_json::json!({ "status": "stopped" })))
}

/// GET /fragment/raw-captions, the slot-indexed dump for export
pub async fn raw_captions(State(state): State<Arc<AppState>>) -> Json<Vec<Slot>> {
    Json(state.session.lock().slots.clone())
}

/// GET /hls/live.m3u8
pub async fn hls_live(State(state): State<Arc<AppState>>) -> Result<Response, HttpError> {
    let playlist = state.load_playlist()?;
    let view = live_view(&playlist, state.config.media.window_size);
    Ok(m3u8_response(view.render()))
}

/// GET /hls/delayed.m3u8
pub async fn hls_delayed(State(state): State<Arc<AppState>>) -> Result<Response, HttpError> {
    let playlist = state.load_playlist()?;
    let delay_secs = state.session.lock().delay_secs;
    let view = delayed_view(&playlist, delay_secs, state.config.media.window_size)?;
    Ok(m3u8_response(view.render()))
}
